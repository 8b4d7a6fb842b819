use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    parse_period, BillingError, BillingService, BulkFailure, BulkOutcome, GenerationReport,
};
use crate::billing::collaborators::{DocumentRenderer, ObjectStorage, RenderedDocument};
use crate::billing::contract::{ContractStatus, DEFAULT_STANDARD_WORKING_HOURS};
use crate::billing::ids::{CaseId, ClientCompanyId, PersonnelId, RequestId};
use crate::billing::personnel::{resolve_sales_representative, ClientCompany};
use crate::billing::repository::{BillingStore, RepositoryError};
use crate::billing::request::{
    validate_items, validate_payment_amount, validate_tax_rate, NewRequest, NewRequestItem,
    Request, RequestDetails, RequestItem, RequestReferences, RequestTransition, RequestUpdate,
};
use crate::billing::status::{DocumentStatus, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub client_company_id: ClientCompanyId,
    pub year_month: String,
    pub items: Vec<NewRequestItem>,
    /// Percentage; the configured default applies when omitted.
    #[serde(default)]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub payment_due_date: Option<NaiveDate>,
    #[serde(default)]
    pub order_document_url: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Monthly request generation for one client. Empty filters select every active contract on
/// the client's cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequests {
    pub year_month: String,
    pub client_company_id: ClientCompanyId,
    #[serde(default)]
    pub case_ids: Option<Vec<CaseId>>,
    #[serde(default)]
    pub personnel_ids: Option<Vec<PersonnelId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub payment_received_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestWithItems {
    #[serde(flatten)]
    pub request: Request,
    pub items: Vec<RequestItem>,
}

impl<S, R, O> BillingService<S, R, O>
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    /// Create the request of one client for one month together with its items.
    pub async fn create_request(
        &self,
        command: CreateRequest,
    ) -> Result<RequestWithItems, BillingError> {
        let year_month = parse_period(&command.year_month)?;
        let tax_rate = command.tax_rate.unwrap_or(self.config.default_tax_rate);
        validate_items(&command.items, tax_rate)?;

        let client = self
            .store
            .client_company(command.client_company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("client company", command.client_company_id))?;
        self.check_item_references(&client, &command.items).await?;

        let new_request = NewRequest {
            client_company_id: client.id,
            year_month,
            tax_rate,
            payment_due_date: command.payment_due_date,
            order_document_url: command.order_document_url,
            remark: command.remark,
        };

        match self.store.insert_request(new_request, command.items).await {
            Ok((request, items)) => {
                info!(
                    request_id = %request.id,
                    request_number = %request.request_number,
                    client_company_id = %request.client_company_id,
                    year_month = %request.year_month,
                    items = items.len(),
                    "request created"
                );
                Ok(RequestWithItems { request, items })
            }
            Err(RepositoryError::Conflict) => {
                warn!(
                    client_company_id = %client.id,
                    year_month = %year_month,
                    "duplicate request rejected"
                );
                Err(BillingError::Duplicate {
                    entity: "request",
                    key: format!("client company {} in {}", client.id, year_month),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Every referenced row must exist, cases must belong to the client and contracts must be
    /// active and bound to the item's case and personnel.
    async fn check_item_references(
        &self,
        client: &ClientCompany,
        items: &[NewRequestItem],
    ) -> Result<(), BillingError> {
        for item in items {
            self.store
                .personnel(item.personnel_id)
                .await?
                .ok_or_else(|| BillingError::not_found("personnel", item.personnel_id))?;
            let case = self
                .store
                .case(item.case_id)
                .await?
                .ok_or_else(|| BillingError::not_found("case", item.case_id))?;
            let contract = self
                .store
                .contract(item.contract_id)
                .await?
                .ok_or_else(|| BillingError::not_found("contract", item.contract_id))?;

            if case.client_company_id != client.id {
                return Err(BillingError::Validation(format!(
                    "case {} does not belong to client company {}",
                    case.id, client.id
                )));
            }
            if contract.status != ContractStatus::Active {
                return Err(BillingError::Validation(format!(
                    "contract {} is {}, not active",
                    contract.id,
                    contract.status.label()
                )));
            }
            if contract.case_id != item.case_id || contract.personnel_id != item.personnel_id {
                return Err(BillingError::Validation(format!(
                    "contract {} does not bind personnel {} to case {}",
                    contract.id, item.personnel_id, item.case_id
                )));
            }
        }
        Ok(())
    }

    pub async fn request(&self, id: RequestId) -> Result<RequestWithItems, BillingError> {
        let request = self
            .store
            .request(id)
            .await?
            .ok_or_else(|| BillingError::not_found("request", id))?;
        let items = self.store.request_items(id).await?;
        Ok(RequestWithItems { request, items })
    }

    /// Recompute the request's display payload; amounts are scaled to yen.
    pub async fn request_details(&self, id: RequestId) -> Result<RequestDetails, BillingError> {
        let RequestWithItems { request, items } = self.request(id).await?;
        self.assemble_request_details(&request, &items).await
    }

    async fn assemble_request_details(
        &self,
        request: &Request,
        items: &[RequestItem],
    ) -> Result<RequestDetails, BillingError> {
        let store = self.store.as_ref();
        let mut refs = RequestReferences {
            client_company_name: store
                .client_company(request.client_company_id)
                .await?
                .map(|client| client.company_name)
                .unwrap_or_default(),
            ..RequestReferences::default()
        };

        let mut cases = HashMap::new();
        for item in items {
            if !refs.personnel_names.contains_key(&item.personnel_id) {
                if let Some(personnel) = store.personnel(item.personnel_id).await? {
                    refs.personnel_names.insert(personnel.id, personnel.name);
                }
            }
            if !cases.contains_key(&item.case_id) {
                let case = store.case(item.case_id).await?;
                cases.insert(item.case_id, case);
            }
        }

        if let Some(Some(case)) = items.first().and_then(|item| cases.get(&item.case_id)) {
            refs.sales_representative_name = resolve_sales_representative(store, case)
                .await?
                .map(|rep| rep.name)
                .unwrap_or_default();
        }
        refs.case_titles = cases
            .into_iter()
            .filter_map(|(id, case)| case.map(|case| (id, case.title)))
            .collect();

        Ok(RequestDetails::assemble(request, items, &refs))
    }

    /// Swap the items of an unsent request; totals are re-derived in the same store call.
    pub async fn replace_request_items(
        &self,
        id: RequestId,
        items: Vec<NewRequestItem>,
    ) -> Result<RequestWithItems, BillingError> {
        let current = self
            .store
            .request(id)
            .await?
            .ok_or_else(|| BillingError::not_found("request", id))?;
        let refused = || BillingError::InvalidTransition {
            document: "request",
            from: current.status.label(),
            to: "edited",
        };
        if !current.status.is_editable() {
            return Err(refused());
        }

        validate_items(&items, current.tax_rate)?;
        let client = self
            .store
            .client_company(current.client_company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("client company", current.client_company_id))?;
        self.check_item_references(&client, &items).await?;

        match self.store.replace_request_items(id, items).await {
            Ok((request, items)) => {
                info!(
                    request_id = %id,
                    items = items.len(),
                    tax_excluded_amount = %request.tax_excluded_amount,
                    "request items replaced"
                );
                Ok(RequestWithItems { request, items })
            }
            Err(RepositoryError::Conflict) => Err(refused()),
            Err(other) => Err(other.into()),
        }
    }

    async fn transition_request(
        &self,
        id: RequestId,
        transition: RequestTransition,
    ) -> Result<Request, BillingError> {
        match self.store.transition_request(id, transition).await {
            Ok(request) => Ok(request),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("request", id)),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn send_request(&self, id: RequestId, actor: &str) -> Result<Request, BillingError> {
        let transition = RequestTransition::Send {
            actor: actor.to_string(),
            at: Utc::now(),
        };
        let request = self.transition_request(id, transition).await?;
        info!(request_id = %request.id, sent_by = actor, "request sent");
        Ok(request)
    }

    /// Send many requests; an already sent request counts as a failure.
    pub async fn send_requests(&self, ids: &[RequestId], actor: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match self.send_request(*id, actor).await {
                Ok(request) => outcome.succeeded.push(request.id.0),
                Err(err) => outcome.fail(id.0, err),
            }
        }
        if outcome.failure_count() > 0 {
            warn!(
                sent = outcome.success_count(),
                failed = outcome.failure_count(),
                "bulk request send finished with failures"
            );
        }
        outcome
    }

    /// Record the client's payment. The received date defaults to today.
    pub async fn pay_request(
        &self,
        id: RequestId,
        payment: PayRequest,
    ) -> Result<Request, BillingError> {
        validate_payment_amount(payment.payment_amount)?;
        let received = payment
            .payment_received_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let transition = RequestTransition::Pay {
            received,
            amount: payment.payment_amount,
        };
        let request = self.transition_request(id, transition).await?;
        info!(request_id = %request.id, received = %received, "request paid");
        Ok(request)
    }

    /// Change the tax rate, due date, remark or order document URL. Once sent, only the remark
    /// and the order document URL may change.
    pub async fn update_request(
        &self,
        id: RequestId,
        update: RequestUpdate,
    ) -> Result<Request, BillingError> {
        if let Some(tax_rate) = update.tax_rate {
            validate_tax_rate(tax_rate)?;
        }
        let request = self
            .transition_request(id, RequestTransition::Update(update))
            .await?;
        info!(
            request_id = %id,
            request_amount = %request.request_amount,
            "request updated"
        );
        Ok(request)
    }

    /// Delete an unsent request together with its items.
    pub async fn delete_request(&self, id: RequestId) -> Result<Request, BillingError> {
        let current = self
            .store
            .request(id)
            .await?
            .ok_or_else(|| BillingError::not_found("request", id))?;
        let refused = || BillingError::InvalidTransition {
            document: "request",
            from: current.status.label(),
            to: "deleted",
        };
        if !current.status.is_editable() {
            return Err(refused());
        }

        match self.store.delete_request(id).await {
            Ok(deleted) => {
                info!(
                    request_id = %id,
                    request_number = %deleted.request_number,
                    "request deleted"
                );
                Ok(deleted)
            }
            Err(RepositoryError::Conflict) => Err(refused()),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("request", id)),
            Err(other) => Err(other.into()),
        }
    }

    /// Render and upload the request document, then move the request to generated. Totals are
    /// re-derived from the items stored at that moment.
    pub async fn generate_request_document(&self, id: RequestId) -> Result<Request, BillingError> {
        let RequestWithItems { request, items } = self.request(id).await?;
        request.status.advance(Stage::Generated)?;

        let details = self.assemble_request_details(&request, &items).await?;
        let document = self
            .renderer
            .render_request(&details)
            .await
            .inspect_err(|err| {
                warn!(request_id = %id, error = %err, "request rendering failed");
            })?;
        let key = request.document_key();
        let url = self.storage.put(&key, document).await.inspect_err(|err| {
            warn!(request_id = %id, error = %err, "request upload failed");
        })?;

        let request = self
            .transition_request(id, RequestTransition::AttachDocument { url })
            .await
            .inspect_err(|err| {
                warn!(request_id = %id, error = %err, "request changed while rendering");
            })?;
        info!(request_id = %request.id, key = %key, "request document generated");
        Ok(request)
    }

    /// Store the purchase order the client filed for this request. Any status accepts it.
    pub async fn upload_order_document(
        &self,
        id: RequestId,
        document: RenderedDocument,
    ) -> Result<Request, BillingError> {
        if document.bytes.is_empty() {
            return Err(BillingError::Validation("order document is empty".to_string()));
        }
        let request = self
            .store
            .request(id)
            .await?
            .ok_or_else(|| BillingError::not_found("request", id))?;

        let key = request.order_document_key();
        let url = self.storage.put(&key, document).await.inspect_err(|err| {
            warn!(request_id = %id, error = %err, "order document upload failed");
        })?;
        let request = self
            .transition_request(id, RequestTransition::AttachOrderDocument { url })
            .await?;
        info!(request_id = %id, key = %key, "client order document stored");
        Ok(request)
    }

    /// Create and render the month's request of one client from its active contracts. One item
    /// per contract carries the basic salary; an existing request for the month is skipped.
    pub async fn generate_requests_for_month(
        &self,
        command: GenerateRequests,
    ) -> Result<GenerationReport<Request>, BillingError> {
        let year_month = parse_period(&command.year_month)?;
        let client = self
            .store
            .client_company(command.client_company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("client company", command.client_company_id))?;
        let mut report = GenerationReport::new(year_month);

        let case_filter = command.case_ids.filter(|ids| !ids.is_empty());
        let personnel_filter = command.personnel_ids.filter(|ids| !ids.is_empty());
        let mut client_cases = HashMap::new();
        let mut pairs = HashSet::new();
        let mut items = Vec::new();

        for contract in self.store.contracts().await? {
            if contract.status != ContractStatus::Active
                || case_filter
                    .as_ref()
                    .is_some_and(|ids| !ids.contains(&contract.case_id))
                || personnel_filter
                    .as_ref()
                    .is_some_and(|ids| !ids.contains(&contract.personnel_id))
            {
                continue;
            }
            if !client_cases.contains_key(&contract.case_id) {
                let case = self.store.case(contract.case_id).await?;
                let owned = case.is_some_and(|case| case.client_company_id == client.id);
                client_cases.insert(contract.case_id, owned);
            }
            if client_cases.get(&contract.case_id) != Some(&true) {
                continue;
            }
            if !pairs.insert((contract.case_id, contract.personnel_id)) {
                debug!(contract_id = %contract.id, "second contract for the same pair skipped");
                continue;
            }

            let basic_salary = contract.basic_salary();
            let work_hours = if contract.standard_working_hours > Decimal::ZERO {
                contract.standard_working_hours
            } else {
                DEFAULT_STANDARD_WORKING_HOURS
            };
            items.push(NewRequestItem {
                personnel_id: contract.personnel_id,
                case_id: contract.case_id,
                contract_id: contract.id,
                item_amount: basic_salary,
                work_hours,
                unit_price: basic_salary,
                remark: Some(format!("{}分", year_month.display_label())),
            });
        }

        if items.is_empty() {
            return Err(BillingError::Validation(format!(
                "client company {} has no active contracts to bill for {}",
                client.id, year_month
            )));
        }

        let created = self
            .create_request(CreateRequest {
                client_company_id: client.id,
                year_month: year_month.to_string(),
                items,
                tax_rate: None,
                payment_due_date: None,
                order_document_url: None,
                remark: Some(format!("{}の月度請求書", year_month.display_label())),
            })
            .await;
        match created {
            Ok(RequestWithItems { request, .. }) => {
                match self.generate_request_document(request.id).await {
                    Ok(generated) => {
                        report.documents_generated += 1;
                        report.created.push(generated);
                    }
                    Err(err) => {
                        report.failures.push(BulkFailure {
                            id: request.id.0,
                            message: format!("request {}: {err}", request.request_number),
                        });
                        report.created.push(request);
                    }
                }
            }
            Err(BillingError::Duplicate { .. }) => report.skipped += 1,
            Err(err) => return Err(err),
        }

        info!(
            year_month = %year_month,
            client_company_id = %client.id,
            created = report.created.len(),
            documents = report.documents_generated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "monthly request generation finished"
        );
        Ok(report)
    }
}
