use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    parse_period, BillingError, BillingService, BulkFailure, BulkOutcome, GenerationReport,
};
use crate::billing::collaborators::{DocumentRenderer, ObjectStorage, RenderedDocument};
use crate::billing::contract::ContractStatus;
use crate::billing::ids::{BpCompanyId, CaseId, ContractId, OrderId, PersonnelId};
use crate::billing::order::{ContractSummary, NewOrder, Order, OrderDetails, OrderTransition};
use crate::billing::personnel::{
    lookup_detail, resolve_bp_company, resolve_sales_representative, PersonType,
};
use crate::billing::repository::{BillingStore, RepositoryError};
use crate::billing::status::{DocumentStatus, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub contract_id: ContractId,
    pub year_month: String,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Filters for the monthly bulk generation; both are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOrders {
    pub year_month: String,
    #[serde(default)]
    pub bp_company_id: Option<BpCompanyId>,
    #[serde(default)]
    pub personnel_ids: Option<Vec<PersonnelId>>,
}

impl<S, R, O> BillingService<S, R, O>
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    /// Create the order of one personnel for one month.
    pub async fn create_order(&self, command: CreateOrder) -> Result<Order, BillingError> {
        let year_month = parse_period(&command.year_month)?;

        let personnel = self
            .store
            .personnel(command.personnel_id)
            .await?
            .ok_or_else(|| BillingError::not_found("personnel", command.personnel_id))?;
        let case = self
            .store
            .case(command.case_id)
            .await?
            .ok_or_else(|| BillingError::not_found("case", command.case_id))?;
        let contract = self
            .store
            .contract(command.contract_id)
            .await?
            .ok_or_else(|| BillingError::not_found("contract", command.contract_id))?;

        if contract.status != ContractStatus::Active {
            return Err(BillingError::Validation(format!(
                "contract {} is {}, not active",
                contract.id,
                contract.status.label()
            )));
        }
        if contract.personnel_id != personnel.id || contract.case_id != case.id {
            return Err(BillingError::Validation(format!(
                "contract {} does not bind personnel {} to case {}",
                contract.id, personnel.id, case.id
            )));
        }

        let new_order = NewOrder {
            personnel_id: personnel.id,
            case_id: case.id,
            contract_id: contract.id,
            year_month,
            remark: command.remark,
        };

        match self.store.insert_order(new_order).await {
            Ok(order) => {
                info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    personnel_id = %order.personnel_id,
                    year_month = %order.year_month,
                    "order created"
                );
                Ok(order)
            }
            Err(RepositoryError::Conflict) => {
                warn!(
                    personnel_id = %personnel.id,
                    year_month = %year_month,
                    "duplicate order rejected"
                );
                Err(BillingError::Duplicate {
                    entity: "order",
                    key: format!("personnel {} in {}", personnel.id, year_month),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    pub async fn order(&self, id: OrderId) -> Result<Order, BillingError> {
        self.store
            .order(id)
            .await?
            .ok_or_else(|| BillingError::not_found("order", id))
    }

    /// Recompute the order's display payload from the current reference data.
    pub async fn order_details(&self, id: OrderId) -> Result<OrderDetails, BillingError> {
        let order = self.order(id).await?;
        self.assemble_order_details(order).await
    }

    async fn assemble_order_details(&self, order: Order) -> Result<OrderDetails, BillingError> {
        let store = self.store.as_ref();

        let personnel = store.personnel(order.personnel_id).await?;
        let (personnel_name, bp_company_name) = match &personnel {
            Some(personnel) => {
                let company = resolve_bp_company(store, personnel).await?;
                (
                    personnel.name.clone(),
                    company.map(|company| company.name).unwrap_or_default(),
                )
            }
            None => (String::new(), String::new()),
        };

        let case = store.case(order.case_id).await?;
        let (case_title, case_location, client_company_name, sales_representative_name) =
            match &case {
                Some(case) => {
                    let client = store.client_company(case.client_company_id).await?;
                    let rep = resolve_sales_representative(store, case).await?;
                    (
                        case.title.clone(),
                        case.location.clone().unwrap_or_default(),
                        client.map(|client| client.company_name).unwrap_or_default(),
                        rep.map(|rep| rep.name).unwrap_or_default(),
                    )
                }
                None => Default::default(),
            };

        let contract = store.contract(order.contract_id).await?;
        let basic_salary = contract
            .as_ref()
            .map(|contract| contract.basic_salary())
            .unwrap_or_default();
        let contract = contract.map(|contract| ContractSummary {
            contract_number: contract.contract_number,
            start_date: contract.start_date,
            end_date: contract.end_date,
            unit_price: contract.unit_price,
            standard_working_hours: contract.standard_working_hours,
            min_working_hours: contract.min_working_hours,
            max_working_hours: contract.max_working_hours,
        });

        Ok(OrderDetails {
            year_month_label: order.year_month.display_label(),
            order,
            personnel_name,
            bp_company_name,
            case_title,
            case_location,
            client_company_name,
            sales_representative_name,
            contract,
            basic_salary,
        })
    }

    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Order, BillingError> {
        match self.store.transition_order(id, transition).await {
            Ok(order) => Ok(order),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("order", id)),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn send_order(&self, id: OrderId, actor: &str) -> Result<Order, BillingError> {
        let transition = OrderTransition::Send {
            actor: actor.to_string(),
            at: Utc::now(),
        };
        let order = self.transition_order(id, transition).await?;
        info!(order_id = %order.id, sent_by = actor, "order sent");
        Ok(order)
    }

    pub async fn collect_order(&self, id: OrderId) -> Result<Order, BillingError> {
        let transition = OrderTransition::Collect { at: Utc::now() };
        let order = self.transition_order(id, transition).await?;
        info!(order_id = %order.id, "order collected");
        Ok(order)
    }

    /// Render and upload the order document, then move the order to generated. A collaborator
    /// failure leaves the stored order untouched, and an order sent while rendering keeps its
    /// sent state.
    pub async fn generate_order_document(&self, id: OrderId) -> Result<Order, BillingError> {
        let order = self.order(id).await?;
        order.status.advance(Stage::Generated)?;

        let details = self.assemble_order_details(order).await?;
        let document = self.renderer.render_order(&details).await.inspect_err(|err| {
            warn!(order_id = %id, error = %err, "order rendering failed");
        })?;
        let key = details.order.document_key();
        let url = self.storage.put(&key, document).await.inspect_err(|err| {
            warn!(order_id = %id, error = %err, "order upload failed");
        })?;

        let order = self
            .transition_order(id, OrderTransition::AttachDocument { url })
            .await
            .inspect_err(|err| {
                warn!(order_id = %id, error = %err, "order changed while rendering");
            })?;
        info!(order_id = %order.id, key = %key, "order document generated");
        Ok(order)
    }

    /// Store the acknowledgement the supplier returned for a sent order.
    pub async fn upload_order_acknowledgement(
        &self,
        id: OrderId,
        document: RenderedDocument,
    ) -> Result<Order, BillingError> {
        if document.bytes.is_empty() {
            return Err(BillingError::Validation(
                "acknowledgement document is empty".to_string(),
            ));
        }
        let order = self.order(id).await?;
        order.ensure_acknowledgeable()?;

        let key = order.acknowledgement_key();
        let url = self.storage.put(&key, document).await.inspect_err(|err| {
            warn!(order_id = %id, error = %err, "acknowledgement upload failed");
        })?;
        let order = self
            .transition_order(id, OrderTransition::AttachAcknowledgement { url })
            .await?;
        info!(order_id = %id, key = %key, "order acknowledgement stored");
        Ok(order)
    }

    /// Send many orders; each one succeeds or fails on its own.
    pub async fn send_orders(&self, ids: &[OrderId], actor: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match self.send_order(*id, actor).await {
                Ok(order) => outcome.succeeded.push(order.id.0),
                Err(err) => outcome.fail(id.0, err),
            }
        }
        if outcome.failure_count() > 0 {
            warn!(
                sent = outcome.success_count(),
                failed = outcome.failure_count(),
                "bulk order send finished with failures"
            );
        }
        outcome
    }

    /// Create and render the month's orders for every active contract of BP personnel.
    pub async fn generate_orders_for_month(
        &self,
        command: GenerateOrders,
    ) -> Result<GenerationReport<Order>, BillingError> {
        let year_month = parse_period(&command.year_month)?;
        let mut report = GenerationReport::new(year_month);

        let mut personnel = self.store.personnel_of_type(PersonType::BpEmployee).await?;
        if let Some(ids) = command.personnel_ids.as_ref().filter(|ids| !ids.is_empty()) {
            personnel.retain(|personnel| ids.contains(&personnel.id));
        }

        for personnel in personnel {
            if let Some(company) = command.bp_company_id {
                let detail = lookup_detail(self.store.as_ref(), &personnel).await?;
                if detail.and_then(|detail| detail.bp_company_id()) != Some(company) {
                    continue;
                }
            }

            let contracts = self.store.contracts_for_personnel(personnel.id).await?;
            for contract in contracts
                .into_iter()
                .filter(|contract| contract.status == ContractStatus::Active)
            {
                let created = self
                    .create_order(CreateOrder {
                        personnel_id: personnel.id,
                        case_id: contract.case_id,
                        contract_id: contract.id,
                        year_month: year_month.to_string(),
                        remark: None,
                    })
                    .await;

                let order = match created {
                    Ok(order) => order,
                    Err(BillingError::Duplicate { .. }) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(err) => {
                        report.failures.push(BulkFailure {
                            id: contract.id.0,
                            message: format!("contract {}: {err}", contract.id),
                        });
                        continue;
                    }
                };

                match self.generate_order_document(order.id).await {
                    Ok(generated) => {
                        report.documents_generated += 1;
                        report.created.push(generated);
                    }
                    Err(err) => {
                        report.failures.push(BulkFailure {
                            id: order.id.0,
                            message: format!("order {}: {err}", order.order_number),
                        });
                        report.created.push(order);
                    }
                }
            }
        }

        info!(
            year_month = %year_month,
            created = report.created.len(),
            documents = report.documents_generated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "monthly order generation finished"
        );
        Ok(report)
    }

    /// Delete an order that has not been sent yet.
    pub async fn delete_order(&self, id: OrderId) -> Result<Order, BillingError> {
        let order = self.order(id).await?;
        let refused = || BillingError::InvalidTransition {
            document: "order",
            from: order.status.label(),
            to: "deleted",
        };
        if !order.status.is_editable() {
            return Err(refused());
        }

        match self.store.delete_order(id).await {
            Ok(deleted) => {
                info!(order_id = %id, order_number = %deleted.order_number, "order deleted");
                Ok(deleted)
            }
            Err(RepositoryError::Conflict) => Err(refused()),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("order", id)),
            Err(other) => Err(other.into()),
        }
    }
}
