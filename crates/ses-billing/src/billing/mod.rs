//! Monthly billing lifecycle: contracts feed per-month orders (to BP companies) and requests (to
//! clients); both follow the shared document status machine and orders are supervised in batches.

pub mod batch;
pub mod collaborators;
pub mod contract;
pub mod ids;
pub mod memory;
pub mod order;
pub mod period;
pub mod personnel;
pub mod repository;
pub mod request;
pub mod router;
pub mod service;
pub mod status;

#[cfg(test)]
mod tests;

pub use batch::{BatchError, BatchScope, BatchStatus, BatchSummary, BatchType, OrderBatch};
pub use collaborators::{CollaboratorError, DocumentRenderer, ObjectStorage, RenderedDocument};
pub use contract::{
    CalculationItem, Contract, ContractChange, ContractChangeReason, ContractChangeType,
    ContractError, ContractItemType, ContractStatus, ContractTransition, MonthlyPayment,
    PaymentUnit,
};
pub use ids::{
    BatchId, BpCompanyId, CaseId, ClientCompanyId, ContractId, OrderId, PersonnelId, RequestId,
    RequestItemId, SalesRepId,
};
pub use memory::InMemoryBillingStore;
pub use order::{Order, OrderDetails, OrderTransition};
pub use period::{PeriodError, PeriodIndex, PeriodKey, YearMonth};
pub use personnel::{
    BpCompany, BpEmployeeDetail, Case, ClientCompany, EmployeeDetail, EmploymentStatus,
    FreelancerDetail, PersonType, Personnel, SalesRepresentative,
};
pub use repository::{BillingStore, RepositoryError};
pub use request::{
    NewRequestItem, Request, RequestDetails, RequestItem, RequestTransition, RequestUpdate,
};
pub use router::billing_router;
pub use service::{
    AmendContract, AttachOrders, BatchAttachment, BatchSendReport, BillingError, BillingService,
    BulkFailure, BulkOutcome, ContractAction, CreateBatch, CreateOrder, CreateRequest,
    GenerateOrders, GenerateRequests, GenerationReport, PayRequest, RequestWithItems,
    StatusChange, SweepReport, TerminateContract,
};
pub use status::{DocumentStatus, OrderStatus, RequestStatus};
