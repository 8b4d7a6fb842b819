use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_period, BillingError, BillingService, BulkFailure, BulkOutcome};
use crate::billing::batch::{BatchError, BatchScope, BatchSummary, BatchType, NewBatch, OrderBatch};
use crate::billing::collaborators::{DocumentRenderer, ObjectStorage};
use crate::billing::ids::{BatchId, OrderId};
use crate::billing::order::Order;
use crate::billing::personnel::lookup_detail;
use crate::billing::repository::{BillingStore, RepositoryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub year_month: String,
    pub batch_type: BatchType,
    #[serde(default)]
    pub filter_id: Option<u64>,
    pub created_by: String,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachOrders {
    pub order_ids: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAttachment {
    pub batch: BatchSummary,
    pub attached: Vec<OrderId>,
    pub skipped: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSendReport {
    pub batch: BatchSummary,
    #[serde(flatten)]
    pub outcome: BulkOutcome,
}

impl<S, R, O> BillingService<S, R, O>
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    /// Create a batch holding every order of the month that falls inside its scope.
    pub async fn create_batch(&self, command: CreateBatch) -> Result<BatchSummary, BillingError> {
        let year_month = parse_period(&command.year_month)?;
        let scope = BatchScope::new(command.batch_type, command.filter_id)?;

        let mut order_ids = Vec::new();
        for order in self.store.orders_for_month(year_month).await? {
            if self.admits(&scope, &order).await? {
                order_ids.push(order.id);
            }
        }

        let batch = self
            .store
            .insert_batch(NewBatch {
                year_month,
                scope,
                order_ids,
                created_by: command.created_by,
                remark: command.remark,
            })
            .await?;
        info!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            batch_type = ?batch.batch_type,
            total_orders = batch.total_orders,
            "order batch created"
        );
        Ok(batch.into())
    }

    /// Resolve the order's BP company or sales representative as the scope requires.
    async fn admits(&self, scope: &BatchScope, order: &Order) -> Result<bool, BillingError> {
        let admitted = match scope {
            BatchScope::All => true,
            BatchScope::ByBpCompany(_) => {
                let bp_company = match self.store.personnel(order.personnel_id).await? {
                    Some(personnel) => lookup_detail(self.store.as_ref(), &personnel)
                        .await?
                        .and_then(|detail| detail.bp_company_id()),
                    None => None,
                };
                scope.admits(bp_company, None)
            }
            BatchScope::BySalesRep(_) => {
                let sales_rep = self
                    .store
                    .case(order.case_id)
                    .await?
                    .and_then(|case| case.sales_representative_id);
                scope.admits(None, sales_rep)
            }
        };
        Ok(admitted)
    }

    async fn load_batch(&self, id: BatchId) -> Result<OrderBatch, BillingError> {
        self.store
            .batch(id)
            .await?
            .ok_or_else(|| BillingError::not_found("batch", id))
    }

    async fn batch_orders(&self, batch: &OrderBatch) -> Result<Vec<Order>, BillingError> {
        let mut orders = Vec::with_capacity(batch.order_ids.len());
        for id in &batch.order_ids {
            if let Some(order) = self.store.order(*id).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    pub async fn batch(&self, id: BatchId) -> Result<BatchSummary, BillingError> {
        Ok(self.load_batch(id).await?.into())
    }

    /// Recompute total and sent counts from the associated orders.
    pub async fn refresh_batch(&self, id: BatchId) -> Result<BatchSummary, BillingError> {
        match self.store.refresh_batch_counts(id).await {
            Ok(batch) => Ok(batch.into()),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("batch", id)),
            Err(other) => Err(other.into()),
        }
    }

    /// Attach further orders of the same month; ids that are missing, from another month or
    /// outside the scope are reported as skipped.
    pub async fn add_orders_to_batch(
        &self,
        id: BatchId,
        command: AttachOrders,
    ) -> Result<BatchAttachment, BillingError> {
        let batch = self.load_batch(id).await?;
        if batch.is_processed() {
            return Err(BatchError::AlreadyProcessed(id).into());
        }
        let scope = batch.scope()?;
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();
        let mut skip = |order_id: OrderId, message: &str| {
            skipped.push(BulkFailure {
                id: order_id.0,
                message: message.to_string(),
            })
        };

        for order_id in command.order_ids {
            let Some(order) = self.store.order(order_id).await? else {
                skip(order_id, "order not found");
                continue;
            };
            if order.year_month != batch.year_month {
                skip(order_id, "order belongs to another month");
            } else if !self.admits(&scope, &order).await? {
                skip(order_id, "order is outside the batch scope");
            } else {
                candidates.push(order_id);
            }
        }

        let (batch, attached) = self
            .store
            .attach_batch_orders(id, candidates.clone())
            .await?;
        for order_id in candidates.iter().filter(|id| !attached.contains(id)) {
            skip(*order_id, "order already in batch");
        }

        let summary = BatchSummary::from(batch);
        info!(
            batch_id = %id,
            attached = attached.len(),
            skipped = skipped.len(),
            "orders attached to batch"
        );
        Ok(BatchAttachment {
            batch: summary,
            attached,
            skipped,
        })
    }

    /// Send every unsent order of the batch, then refresh its counts.
    pub async fn send_batch(
        &self,
        id: BatchId,
        actor: &str,
    ) -> Result<BatchSendReport, BillingError> {
        let batch = self.load_batch(id).await?;
        let unsent: Vec<OrderId> = self
            .batch_orders(&batch)
            .await?
            .into_iter()
            .filter(|order| !order.is_sent())
            .map(|order| order.id)
            .collect();

        let outcome = self.send_orders(&unsent, actor).await;
        let summary = self.refresh_batch(id).await?;
        info!(
            batch_id = %id,
            sent = outcome.success_count(),
            failed = outcome.failure_count(),
            completion_rate = %summary.completion_rate,
            "batch sent"
        );
        Ok(BatchSendReport {
            batch: summary,
            outcome,
        })
    }

    /// Approve the batch. A processed batch cannot be processed again.
    pub async fn mark_batch_processed(
        &self,
        id: BatchId,
        processed_by: &str,
    ) -> Result<BatchSummary, BillingError> {
        let batch = match self
            .store
            .process_batch(id, processed_by.to_string(), Utc::now())
            .await
        {
            Ok(batch) => batch,
            Err(RepositoryError::NotFound) => return Err(BillingError::not_found("batch", id)),
            Err(other) => return Err(other.into()),
        };
        info!(batch_id = %id, processed_by, "batch approved");
        Ok(batch.into())
    }
}
