use async_trait::async_trait;

use chrono::{DateTime, NaiveDate, Utc};

use super::batch::{BatchError, NewBatch, OrderBatch};
use super::contract::{Contract, ContractError, ContractTransition};
use super::ids::{
    BatchId, BpCompanyId, CaseId, ClientCompanyId, ContractId, OrderId, PersonnelId, RequestId,
    SalesRepId,
};
use super::order::{NewOrder, Order, OrderTransition};
use super::period::YearMonth;
use super::personnel::{
    BpCompany, BpEmployeeDetail, Case, ClientCompany, EmployeeDetail, EmploymentStatus,
    FreelancerDetail, PersonType, Personnel, SalesRepresentative,
};
use super::request::{
    NewRequest, NewRequestItem, Request, RequestItem, RequestTransition, RequestValidationError,
};
use super::status::TransitionError;

/// Relational store seam for the billing lifecycle.
///
/// Every method is one transaction scope. State changes are never written back from a snapshot:
/// the `transition_*`, `attach_batch_orders`, `refresh_batch_counts` and `process_batch` calls
/// re-check the stored row and apply the change in the same scope, so a concurrent writer can
/// never be overwritten with stale values.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn personnel(&self, id: PersonnelId) -> Result<Option<Personnel>, RepositoryError>;
    async fn personnel_of_type(
        &self,
        person_type: PersonType,
    ) -> Result<Vec<Personnel>, RepositoryError>;
    /// Derives the employment status from the contracts in force on `as_of` and stores it.
    /// Returns the `(from, to)` pair when the status changed.
    async fn refresh_employment_status(
        &self,
        id: PersonnelId,
        as_of: NaiveDate,
    ) -> Result<Option<(EmploymentStatus, EmploymentStatus)>, RepositoryError>;
    async fn bp_employee_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<BpEmployeeDetail>, RepositoryError>;
    async fn freelancer_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<FreelancerDetail>, RepositoryError>;
    async fn employee_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<EmployeeDetail>, RepositoryError>;
    async fn bp_company(&self, id: BpCompanyId) -> Result<Option<BpCompany>, RepositoryError>;
    async fn client_company(
        &self,
        id: ClientCompanyId,
    ) -> Result<Option<ClientCompany>, RepositoryError>;
    async fn case(&self, id: CaseId) -> Result<Option<Case>, RepositoryError>;
    async fn sales_representative(
        &self,
        id: SalesRepId,
    ) -> Result<Option<SalesRepresentative>, RepositoryError>;

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>, RepositoryError>;
    async fn contracts(&self) -> Result<Vec<Contract>, RepositoryError>;
    async fn contracts_for_personnel(
        &self,
        id: PersonnelId,
    ) -> Result<Vec<Contract>, RepositoryError>;
    /// Applies a status change or amendment to the stored contract.
    async fn transition_contract(
        &self,
        id: ContractId,
        transition: ContractTransition,
    ) -> Result<Contract, RepositoryError>;

    /// Claims the (personnel, month) key and inserts the order; `Conflict` when taken.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, RepositoryError>;
    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn orders_for_month(&self, year_month: YearMonth) -> Result<Vec<Order>, RepositoryError>;
    /// Applies a lifecycle step to the stored order; `Transition` when its status refuses it.
    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Order, RepositoryError>;
    /// Removes an unsent order, releasing its period key and batch associations.
    async fn delete_order(&self, id: OrderId) -> Result<Order, RepositoryError>;

    /// Claims the (client, month) key, inserts the request with its items and derived totals.
    async fn insert_request(
        &self,
        request: NewRequest,
        items: Vec<NewRequestItem>,
    ) -> Result<(Request, Vec<RequestItem>), RepositoryError>;
    async fn request(&self, id: RequestId) -> Result<Option<Request>, RepositoryError>;
    async fn request_items(&self, id: RequestId) -> Result<Vec<RequestItem>, RepositoryError>;
    /// Applies a lifecycle step or field update to the stored request, then re-derives its
    /// totals from the items currently stored.
    async fn transition_request(
        &self,
        id: RequestId,
        transition: RequestTransition,
    ) -> Result<Request, RepositoryError>;
    /// Removes an unsent request with its items and releases its period key.
    async fn delete_request(&self, id: RequestId) -> Result<Request, RepositoryError>;
    /// Swaps the items of an unsent request and re-derives its totals. `Conflict` once sent.
    async fn replace_request_items(
        &self,
        id: RequestId,
        items: Vec<NewRequestItem>,
    ) -> Result<(Request, Vec<RequestItem>), RepositoryError>;

    async fn insert_batch(&self, batch: NewBatch) -> Result<OrderBatch, RepositoryError>;
    async fn batch(&self, id: BatchId) -> Result<Option<OrderBatch>, RepositoryError>;
    /// Attaches the candidates not yet in the batch and recounts; returns the ids added.
    async fn attach_batch_orders(
        &self,
        id: BatchId,
        candidates: Vec<OrderId>,
    ) -> Result<(OrderBatch, Vec<OrderId>), RepositoryError>;
    /// Recomputes total and sent counts from the orders currently stored.
    async fn refresh_batch_counts(&self, id: BatchId) -> Result<OrderBatch, RepositoryError>;
    async fn process_batch(
        &self,
        id: BatchId,
        processed_by: String,
        at: DateTime<Utc>,
    ) -> Result<OrderBatch, RepositoryError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    /// The stored row's current state refuses the requested change.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Invalid(#[from] RequestValidationError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
