//! Billing service composing the store, the document renderer and object storage.

mod batches;
mod contracts;
mod orders;
mod requests;

use std::sync::Arc;

use serde::Serialize;

use super::batch::BatchError;
use super::collaborators::{CollaboratorError, DocumentRenderer, ObjectStorage};
use super::contract::ContractError;
use super::period::{PeriodError, YearMonth};
use super::repository::{BillingStore, RepositoryError};
use super::request::RequestValidationError;
use super::status::TransitionError;
use crate::config::BillingConfig;

pub use batches::{AttachOrders, BatchAttachment, BatchSendReport, CreateBatch};
pub use contracts::{AmendContract, ContractAction, StatusChange, SweepReport, TerminateContract};
pub use orders::{CreateOrder, GenerateOrders};
pub use requests::{CreateRequest, GenerateRequests, PayRequest, RequestWithItems};

pub struct BillingService<S, R, O> {
    store: Arc<S>,
    renderer: Arc<R>,
    storage: Arc<O>,
    config: BillingConfig,
}

impl<S, R, O> BillingService<S, R, O>
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    pub fn new(store: Arc<S>, renderer: Arc<R>, storage: Arc<O>, config: BillingConfig) -> Self {
        Self {
            store,
            renderer,
            storage,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }
}

/// Per-document failure inside a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: u64,
    pub message: String,
}

/// Outcome of a bulk operation where each document is processed independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<u64>,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    fn fail(&mut self, id: u64, error: impl ToString) {
        self.failures.push(BulkFailure {
            id,
            message: error.to_string(),
        });
    }
}

/// Result of a monthly bulk generation: the documents created, how many were rendered, and the
/// keys skipped because a document already existed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport<T> {
    pub year_month: YearMonth,
    pub created: Vec<T>,
    pub documents_generated: usize,
    pub skipped: usize,
    pub failures: Vec<BulkFailure>,
}

impl<T> GenerationReport<T> {
    fn new(year_month: YearMonth) -> Self {
        Self {
            year_month,
            created: Vec::new(),
            documents_generated: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }
}

pub(crate) fn parse_period(raw: &str) -> Result<YearMonth, BillingError> {
    Ok(YearMonth::parse(raw)?)
}

/// Error raised by the billing service.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} already exists for {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("{document} cannot move from {from} to {to}")]
    InvalidTransition {
        document: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl BillingError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<u64>) -> Self {
        BillingError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Collaborator and store outages may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Collaborator(_)
                | BillingError::Repository(RepositoryError::Unavailable(_))
        )
    }
}

/// State refusals raised inside the store surface like the ones raised before it.
impl From<RepositoryError> for BillingError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Transition(err) => err.into(),
            RepositoryError::Contract(err) => err.into(),
            RepositoryError::Batch(err) => err.into(),
            RepositoryError::Invalid(err) => err.into(),
            other => BillingError::Repository(other),
        }
    }
}

impl From<PeriodError> for BillingError {
    fn from(error: PeriodError) -> Self {
        BillingError::Validation(error.to_string())
    }
}

impl From<RequestValidationError> for BillingError {
    fn from(error: RequestValidationError) -> Self {
        BillingError::Validation(error.to_string())
    }
}

impl From<TransitionError> for BillingError {
    fn from(error: TransitionError) -> Self {
        BillingError::InvalidTransition {
            document: error.document,
            from: error.from,
            to: error.to,
        }
    }
}

impl From<ContractError> for BillingError {
    fn from(error: ContractError) -> Self {
        match error {
            ContractError::InvalidTransition { from, to, .. } => BillingError::InvalidTransition {
                document: "contract",
                from,
                to,
            },
            other => BillingError::Validation(other.to_string()),
        }
    }
}

impl From<BatchError> for BillingError {
    fn from(error: BatchError) -> Self {
        match error {
            BatchError::AlreadyProcessed(_) => BillingError::InvalidTransition {
                document: "batch",
                from: "approved",
                to: "approved",
            },
            BatchError::MissingFilter(_) => BillingError::Validation(error.to_string()),
        }
    }
}
