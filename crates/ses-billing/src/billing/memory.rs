//! In-process [`BillingStore`]. One mutex guards every table, so each trait call is atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::batch::{NewBatch, OrderBatch, BATCH_NUMBER_PREFIX};
use super::contract::{Contract, ContractTransition};
use super::ids::{
    BatchId, BpCompanyId, CaseId, ClientCompanyId, ContractId, OrderId, PersonnelId, RequestId,
    RequestItemId, SalesRepId,
};
use super::order::{NewOrder, Order, OrderTransition, ORDER_NUMBER_PREFIX};
use super::period::{format_document_number, next_sequence, PeriodIndex, PeriodScoped, YearMonth};
use super::personnel::{
    BpCompany, BpEmployeeDetail, Case, ClientCompany, EmployeeDetail, EmploymentStatus,
    FreelancerDetail, PersonType, Personnel, SalesRepresentative,
};
use super::repository::{BillingStore, RepositoryError};
use super::request::{
    validate_items, validate_tax_rate, NewRequest, NewRequestItem, Request, RequestItem,
    RequestTotals, RequestTransition, REQUEST_NUMBER_PREFIX,
};
use super::status::DocumentStatus;

#[derive(Default)]
struct Tables {
    personnel: BTreeMap<PersonnelId, Personnel>,
    bp_employee_details: HashMap<PersonnelId, BpEmployeeDetail>,
    freelancer_details: HashMap<PersonnelId, FreelancerDetail>,
    employee_details: HashMap<PersonnelId, EmployeeDetail>,
    bp_companies: HashMap<BpCompanyId, BpCompany>,
    client_companies: HashMap<ClientCompanyId, ClientCompany>,
    cases: HashMap<CaseId, Case>,
    sales_representatives: HashMap<SalesRepId, SalesRepresentative>,
    contracts: BTreeMap<ContractId, Contract>,
    orders: BTreeMap<OrderId, Order>,
    order_periods: PeriodIndex<PersonnelId, OrderId>,
    requests: BTreeMap<RequestId, Request>,
    request_items: BTreeMap<RequestItemId, RequestItem>,
    request_periods: PeriodIndex<ClientCompanyId, RequestId>,
    batches: BTreeMap<BatchId, OrderBatch>,
    next_order: u64,
    next_request: u64,
    next_request_item: u64,
    next_batch: u64,
}

impl Tables {
    fn allocate(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    fn items_of(&self, id: RequestId) -> Vec<RequestItem> {
        self.request_items
            .values()
            .filter(|item| item.request_id == id)
            .cloned()
            .collect()
    }

    /// Resolves the batch's order ids against the stored orders and recounts it.
    fn recount(orders: &BTreeMap<OrderId, Order>, batch: &mut OrderBatch) {
        let resolved: Vec<Order> = batch
            .order_ids
            .iter()
            .filter_map(|order_id| orders.get(order_id).cloned())
            .collect();
        batch.update_counts(&resolved);
    }

    fn write_items(&mut self, id: RequestId, items: Vec<NewRequestItem>) -> Vec<RequestItem> {
        items
            .into_iter()
            .map(|item| {
                let item_id = RequestItemId(Self::allocate(&mut self.next_request_item));
                let item = item.into_item(item_id, id);
                self.request_items.insert(item_id, item.clone());
                item
            })
            .collect()
    }
}

#[derive(Default, Clone)]
pub struct InMemoryBillingStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_personnel(&self, personnel: Personnel) {
        self.tables
            .lock()
            .await
            .personnel
            .insert(personnel.id, personnel);
    }

    pub async fn add_bp_employee_detail(&self, detail: BpEmployeeDetail) {
        self.tables
            .lock()
            .await
            .bp_employee_details
            .insert(detail.personnel_id, detail);
    }

    pub async fn add_freelancer_detail(&self, detail: FreelancerDetail) {
        self.tables
            .lock()
            .await
            .freelancer_details
            .insert(detail.personnel_id, detail);
    }

    pub async fn add_employee_detail(&self, detail: EmployeeDetail) {
        self.tables
            .lock()
            .await
            .employee_details
            .insert(detail.personnel_id, detail);
    }

    pub async fn add_bp_company(&self, company: BpCompany) {
        self.tables.lock().await.bp_companies.insert(company.id, company);
    }

    pub async fn add_client_company(&self, company: ClientCompany) {
        self.tables
            .lock()
            .await
            .client_companies
            .insert(company.id, company);
    }

    pub async fn add_case(&self, case: Case) {
        self.tables.lock().await.cases.insert(case.id, case);
    }

    pub async fn add_sales_representative(&self, rep: SalesRepresentative) {
        self.tables
            .lock()
            .await
            .sales_representatives
            .insert(rep.id, rep);
    }

    pub async fn add_contract(&self, contract: Contract) {
        self.tables.lock().await.contracts.insert(contract.id, contract);
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    pub async fn request_count(&self) -> usize {
        self.tables.lock().await.requests.len()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn personnel(&self, id: PersonnelId) -> Result<Option<Personnel>, RepositoryError> {
        Ok(self.tables.lock().await.personnel.get(&id).cloned())
    }

    async fn personnel_of_type(
        &self,
        person_type: PersonType,
    ) -> Result<Vec<Personnel>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .personnel
            .values()
            .filter(|personnel| personnel.person_type == person_type)
            .cloned()
            .collect())
    }

    async fn refresh_employment_status(
        &self,
        id: PersonnelId,
        as_of: NaiveDate,
    ) -> Result<Option<(EmploymentStatus, EmploymentStatus)>, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let in_force = tables
            .contracts
            .values()
            .filter(|contract| contract.personnel_id == id && contract.is_in_force(as_of))
            .count();
        let Some(personnel) = tables.personnel.get_mut(&id) else {
            return Ok(None);
        };

        let from = personnel.employment_status;
        let to = from.recompute(in_force);
        if from == to {
            return Ok(None);
        }
        personnel.employment_status = to;
        Ok(Some((from, to)))
    }

    async fn bp_employee_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<BpEmployeeDetail>, RepositoryError> {
        Ok(self.tables.lock().await.bp_employee_details.get(&id).cloned())
    }

    async fn freelancer_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<FreelancerDetail>, RepositoryError> {
        Ok(self.tables.lock().await.freelancer_details.get(&id).cloned())
    }

    async fn employee_detail(
        &self,
        id: PersonnelId,
    ) -> Result<Option<EmployeeDetail>, RepositoryError> {
        Ok(self.tables.lock().await.employee_details.get(&id).cloned())
    }

    async fn bp_company(&self, id: BpCompanyId) -> Result<Option<BpCompany>, RepositoryError> {
        Ok(self.tables.lock().await.bp_companies.get(&id).cloned())
    }

    async fn client_company(
        &self,
        id: ClientCompanyId,
    ) -> Result<Option<ClientCompany>, RepositoryError> {
        Ok(self.tables.lock().await.client_companies.get(&id).cloned())
    }

    async fn case(&self, id: CaseId) -> Result<Option<Case>, RepositoryError> {
        Ok(self.tables.lock().await.cases.get(&id).cloned())
    }

    async fn sales_representative(
        &self,
        id: SalesRepId,
    ) -> Result<Option<SalesRepresentative>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .sales_representatives
            .get(&id)
            .cloned())
    }

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>, RepositoryError> {
        Ok(self.tables.lock().await.contracts.get(&id).cloned())
    }

    async fn contracts(&self) -> Result<Vec<Contract>, RepositoryError> {
        Ok(self.tables.lock().await.contracts.values().cloned().collect())
    }

    async fn contracts_for_personnel(
        &self,
        id: PersonnelId,
    ) -> Result<Vec<Contract>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .contracts
            .values()
            .filter(|contract| contract.personnel_id == id)
            .cloned()
            .collect())
    }

    async fn transition_contract(
        &self,
        id: ContractId,
        transition: ContractTransition,
    ) -> Result<Contract, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.contracts.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let mut contract = stored.clone();
        contract.apply(transition)?;
        *stored = contract.clone();
        Ok(contract)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.order_periods.find(&order.period_key()).is_some() {
            return Err(RepositoryError::Conflict);
        }

        let sequence = next_sequence(
            ORDER_NUMBER_PREFIX,
            order.year_month,
            tables.orders.values().map(|order| order.order_number.as_str()),
        );
        let number = format_document_number(ORDER_NUMBER_PREFIX, order.year_month, sequence);
        let id = OrderId(Tables::allocate(&mut tables.next_order));
        let order = order.into_order(id, number, Utc::now());

        tables
            .order_periods
            .claim_document(&order)
            .map_err(|_| RepositoryError::Conflict)?;
        tables.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn orders_for_month(&self, year_month: YearMonth) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .filter(|order| order.year_month == year_month)
            .cloned()
            .collect())
    }

    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let mut order = stored.clone();
        order.apply(transition)?;
        *stored = order.clone();
        Ok(order)
    }

    async fn delete_order(&self, id: OrderId) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.lock().await;
        match tables.orders.get(&id) {
            None => return Err(RepositoryError::NotFound),
            Some(order) if order.is_sent() => return Err(RepositoryError::Conflict),
            Some(_) => {}
        }
        let order = tables.orders.remove(&id).ok_or(RepositoryError::NotFound)?;
        tables.order_periods.release(&order.period_key());
        let Tables {
            batches, orders, ..
        } = &mut *tables;
        for batch in batches.values_mut() {
            if batch.order_ids.contains(&id) {
                batch.order_ids.retain(|order_id| *order_id != id);
                Tables::recount(orders, batch);
            }
        }
        Ok(order)
    }

    async fn insert_request(
        &self,
        request: NewRequest,
        items: Vec<NewRequestItem>,
    ) -> Result<(Request, Vec<RequestItem>), RepositoryError> {
        validate_items(&items, request.tax_rate)?;
        let totals = RequestTotals::derive(
            items.iter().map(NewRequestItem::stored_amount),
            request.tax_rate,
        )?;

        let mut tables = self.tables.lock().await;
        let key = request.period_key();
        if tables.request_periods.find(&key).is_some() {
            return Err(RepositoryError::Conflict);
        }

        let sequence = next_sequence(
            REQUEST_NUMBER_PREFIX,
            request.year_month,
            tables
                .requests
                .values()
                .map(|request| request.request_number.as_str()),
        );
        let number = format_document_number(REQUEST_NUMBER_PREFIX, request.year_month, sequence);
        let id = RequestId(Tables::allocate(&mut tables.next_request));
        tables
            .request_periods
            .claim(key, id)
            .map_err(|_| RepositoryError::Conflict)?;

        let items = tables.write_items(id, items);
        let request = request.into_request(id, number, totals, Utc::now());
        tables.requests.insert(id, request.clone());
        Ok((request, items))
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        Ok(self.tables.lock().await.requests.get(&id).cloned())
    }

    async fn request_items(&self, id: RequestId) -> Result<Vec<RequestItem>, RepositoryError> {
        Ok(self.tables.lock().await.items_of(id))
    }

    async fn transition_request(
        &self,
        id: RequestId,
        transition: RequestTransition,
    ) -> Result<Request, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let mut request = tables
            .requests
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        request.apply(transition)?;
        validate_tax_rate(request.tax_rate)?;
        let totals = RequestTotals::of_items(&tables.items_of(id), request.tax_rate)?;
        request.apply_totals(totals);
        tables.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn delete_request(&self, id: RequestId) -> Result<Request, RepositoryError> {
        let mut tables = self.tables.lock().await;
        match tables.requests.get(&id) {
            None => return Err(RepositoryError::NotFound),
            Some(request) if request.is_sent() => return Err(RepositoryError::Conflict),
            Some(_) => {}
        }
        let request = tables.requests.remove(&id).ok_or(RepositoryError::NotFound)?;
        tables.request_items.retain(|_, item| item.request_id != id);
        tables.request_periods.release(&request.period_key());
        Ok(request)
    }

    async fn replace_request_items(
        &self,
        id: RequestId,
        items: Vec<NewRequestItem>,
    ) -> Result<(Request, Vec<RequestItem>), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let mut request = tables
            .requests
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        if !request.status.is_editable() {
            return Err(RepositoryError::Conflict);
        }
        validate_items(&items, request.tax_rate)?;
        let totals = RequestTotals::derive(
            items.iter().map(NewRequestItem::stored_amount),
            request.tax_rate,
        )?;

        tables.request_items.retain(|_, item| item.request_id != id);
        let items = tables.write_items(id, items);
        request.apply_totals(totals);
        tables.requests.insert(id, request.clone());
        Ok((request, items))
    }

    async fn insert_batch(&self, batch: NewBatch) -> Result<OrderBatch, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let sequence = next_sequence(
            BATCH_NUMBER_PREFIX,
            batch.year_month,
            tables
                .batches
                .values()
                .map(|batch| batch.batch_number.as_str()),
        );
        let number = format_document_number(BATCH_NUMBER_PREFIX, batch.year_month, sequence);
        let id = BatchId(Tables::allocate(&mut tables.next_batch));

        let mut batch = batch.into_batch(id, number, Utc::now());
        Tables::recount(&tables.orders, &mut batch);
        tables.batches.insert(id, batch.clone());
        Ok(batch)
    }

    async fn batch(&self, id: BatchId) -> Result<Option<OrderBatch>, RepositoryError> {
        Ok(self.tables.lock().await.batches.get(&id).cloned())
    }

    async fn attach_batch_orders(
        &self,
        id: BatchId,
        candidates: Vec<OrderId>,
    ) -> Result<(OrderBatch, Vec<OrderId>), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Tables {
            batches, orders, ..
        } = &mut *tables;
        let stored = batches.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let mut batch = stored.clone();
        let added = batch.attach(&candidates)?;
        Tables::recount(orders, &mut batch);
        *stored = batch.clone();
        Ok((batch, added))
    }

    async fn refresh_batch_counts(&self, id: BatchId) -> Result<OrderBatch, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Tables {
            batches, orders, ..
        } = &mut *tables;
        let batch = batches.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        Tables::recount(orders, batch);
        Ok(batch.clone())
    }

    async fn process_batch(
        &self,
        id: BatchId,
        processed_by: String,
        at: DateTime<Utc>,
    ) -> Result<OrderBatch, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let batch = tables.batches.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        batch.mark_processed(&processed_by, at)?;
        Ok(batch.clone())
    }
}
