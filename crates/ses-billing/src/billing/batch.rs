use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{BatchId, BpCompanyId, OrderId, SalesRepId};
use super::order::Order;
use super::period::YearMonth;

pub const BATCH_NUMBER_PREFIX: &str = "BATCH-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    All,
    ByBpCompany,
    BySalesRep,
}

/// Eligibility rule of a batch: the type plus its filter, checked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    All,
    ByBpCompany(BpCompanyId),
    BySalesRep(SalesRepId),
}

impl BatchScope {
    pub fn new(batch_type: BatchType, filter_id: Option<u64>) -> Result<Self, BatchError> {
        match (batch_type, filter_id) {
            (BatchType::All, _) => Ok(BatchScope::All),
            (BatchType::ByBpCompany, Some(id)) => Ok(BatchScope::ByBpCompany(BpCompanyId(id))),
            (BatchType::BySalesRep, Some(id)) => Ok(BatchScope::BySalesRep(SalesRepId(id))),
            (batch_type, None) => Err(BatchError::MissingFilter(batch_type)),
        }
    }

    pub fn batch_type(&self) -> BatchType {
        match self {
            BatchScope::All => BatchType::All,
            BatchScope::ByBpCompany(_) => BatchType::ByBpCompany,
            BatchScope::BySalesRep(_) => BatchType::BySalesRep,
        }
    }

    pub fn filter_id(&self) -> Option<u64> {
        match self {
            BatchScope::All => None,
            BatchScope::ByBpCompany(id) => Some(id.0),
            BatchScope::BySalesRep(id) => Some(id.0),
        }
    }

    /// Whether an order whose reference chains resolved to `bp_company` and `sales_rep` belongs
    /// to this batch. A broken chain never matches a filtered scope.
    pub fn admits(&self, bp_company: Option<BpCompanyId>, sales_rep: Option<SalesRepId>) -> bool {
        match self {
            BatchScope::All => true,
            BatchScope::ByBpCompany(id) => bp_company == Some(*id),
            BatchScope::BySalesRep(id) => sales_rep == Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Draft,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch type {0:?} requires a filter_id")]
    MissingFilter(BatchType),
    #[error("batch {0} has already been processed")]
    AlreadyProcessed(BatchId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBatch {
    pub id: BatchId,
    pub batch_number: String,
    pub year_month: YearMonth,
    pub batch_type: BatchType,
    pub filter_id: Option<u64>,
    pub order_ids: Vec<OrderId>,
    pub total_orders: u32,
    pub sent_orders: u32,
    pub status: BatchStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub remark: Option<String>,
}

/// Insert payload; the store assigns the id and batch number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub year_month: YearMonth,
    pub scope: BatchScope,
    pub order_ids: Vec<OrderId>,
    pub created_by: String,
    pub remark: Option<String>,
}

impl NewBatch {
    pub fn into_batch(
        self,
        id: BatchId,
        batch_number: String,
        created_at: DateTime<Utc>,
    ) -> OrderBatch {
        OrderBatch {
            id,
            batch_number,
            year_month: self.year_month,
            batch_type: self.scope.batch_type(),
            filter_id: self.scope.filter_id(),
            order_ids: self.order_ids,
            total_orders: 0,
            sent_orders: 0,
            status: BatchStatus::Draft,
            created_by: self.created_by,
            created_at,
            processed_date: None,
            processed_by: None,
            remark: self.remark,
        }
    }
}

impl OrderBatch {
    pub fn scope(&self) -> Result<BatchScope, BatchError> {
        BatchScope::new(self.batch_type, self.filter_id)
    }

    pub fn is_processed(&self) -> bool {
        self.status == BatchStatus::Approved
    }

    /// Recomputes the counters from the batch's resolved orders.
    pub fn update_counts(&mut self, orders: &[Order]) {
        self.total_orders = u32::try_from(orders.len()).unwrap_or(u32::MAX);
        let sent = orders.iter().filter(|order| order.is_sent()).count();
        self.sent_orders = u32::try_from(sent).unwrap_or(u32::MAX);
    }

    /// Percentage of sent orders; zero for an empty batch.
    pub fn completion_rate(&self) -> Decimal {
        if self.total_orders == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.sent_orders) * Decimal::ONE_HUNDRED / Decimal::from(self.total_orders)
    }

    /// Adds order ids not yet associated; returns the ids that were new.
    pub fn attach(&mut self, order_ids: &[OrderId]) -> Result<Vec<OrderId>, BatchError> {
        if self.is_processed() {
            return Err(BatchError::AlreadyProcessed(self.id));
        }
        let mut added = Vec::new();
        for id in order_ids {
            if !self.order_ids.contains(id) && !added.contains(id) {
                added.push(*id);
            }
        }
        self.order_ids.extend(added.iter().copied());
        Ok(added)
    }

    pub fn mark_processed(
        &mut self,
        processed_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BatchError> {
        if self.is_processed() {
            return Err(BatchError::AlreadyProcessed(self.id));
        }
        self.processed_date = Some(at);
        self.processed_by = Some(processed_by.to_string());
        self.status = BatchStatus::Approved;
        Ok(())
    }
}

/// Batch as returned to callers, with the derived completion rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: OrderBatch,
    pub completion_rate: Decimal,
}

impl From<OrderBatch> for BatchSummary {
    fn from(batch: OrderBatch) -> Self {
        let completion_rate = batch.completion_rate().round_dp(2);
        Self {
            batch,
            completion_rate,
        }
    }
}
