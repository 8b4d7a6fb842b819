use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BillingError, BillingService, BulkFailure};
use crate::billing::collaborators::{DocumentRenderer, ObjectStorage};
use crate::billing::contract::{Contract, ContractChangeReason, ContractTransition, MonthlyPayment};
use crate::billing::ids::{ContractId, PersonnelId};
use crate::billing::personnel::EmploymentStatus;
use crate::billing::repository::{BillingStore, RepositoryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateContract {
    /// Defaults to today.
    #[serde(default)]
    pub termination_date: Option<NaiveDate>,
    #[serde(default = "default_reason")]
    pub reason: ContractChangeReason,
    #[serde(default)]
    pub requested_by: Option<String>,
}

fn default_reason() -> ContractChangeReason {
    ContractChangeReason::Other
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractAction {
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendContract {
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub standard_working_hours: Option<Decimal>,
    #[serde(default = "default_reason")]
    pub reason: ContractChangeReason,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub personnel_id: PersonnelId,
    pub from: EmploymentStatus,
    pub to: EmploymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub as_of: NaiveDate,
    pub terminated: Vec<ContractId>,
    pub status_changes: Vec<StatusChange>,
    pub failures: Vec<BulkFailure>,
}

impl<S, R, O> BillingService<S, R, O>
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    pub async fn contract(&self, id: ContractId) -> Result<Contract, BillingError> {
        self.store
            .contract(id)
            .await?
            .ok_or_else(|| BillingError::not_found("contract", id))
    }

    async fn transition_contract(
        &self,
        id: ContractId,
        transition: ContractTransition,
    ) -> Result<Contract, BillingError> {
        match self.store.transition_contract(id, transition).await {
            Ok(contract) => Ok(contract),
            Err(RepositoryError::NotFound) => Err(BillingError::not_found("contract", id)),
            Err(other) => Err(other.into()),
        }
    }

    async fn change_contract(
        &self,
        id: ContractId,
        transition: ContractTransition,
    ) -> Result<Contract, BillingError> {
        let contract = self.transition_contract(id, transition).await?;
        info!(
            contract_id = %id,
            to = contract.status.label(),
            "contract status changed"
        );

        self.recompute_employment_status(contract.personnel_id, Utc::now().date_naive())
            .await?;
        Ok(contract)
    }

    /// Terminate the contract early; the date must fall within its term.
    pub async fn terminate_contract(
        &self,
        id: ContractId,
        command: TerminateContract,
    ) -> Result<Contract, BillingError> {
        let date = command
            .termination_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let transition = ContractTransition::Terminate {
            date,
            reason: command.reason,
            requested_by: command.requested_by,
        };
        self.change_contract(id, transition).await
    }

    pub async fn suspend_contract(
        &self,
        id: ContractId,
        command: ContractAction,
    ) -> Result<Contract, BillingError> {
        let transition = ContractTransition::Suspend {
            requested_by: command.requested_by,
        };
        self.change_contract(id, transition).await
    }

    pub async fn resume_contract(
        &self,
        id: ContractId,
        command: ContractAction,
    ) -> Result<Contract, BillingError> {
        let transition = ContractTransition::Resume {
            requested_by: command.requested_by,
        };
        self.change_contract(id, transition).await
    }

    pub async fn cancel_contract(
        &self,
        id: ContractId,
        command: ContractAction,
    ) -> Result<Contract, BillingError> {
        let transition = ContractTransition::Cancel {
            requested_by: command.requested_by,
        };
        self.change_contract(id, transition).await
    }

    /// Change price or standard hours; an amendment that changes nothing is not recorded.
    pub async fn amend_contract(
        &self,
        id: ContractId,
        command: AmendContract,
    ) -> Result<Contract, BillingError> {
        if let Some(hours) = command.standard_working_hours {
            if hours <= Decimal::ZERO {
                return Err(BillingError::Validation(
                    "standard working hours must be positive".to_string(),
                ));
            }
        }

        let transition = ContractTransition::Amend {
            unit_price: command.unit_price,
            standard_working_hours: command.standard_working_hours,
            reason: command.reason,
            effective_date: command.effective_date,
            requested_by: command.requested_by,
        };
        let contract = self.transition_contract(id, transition).await?;
        info!(
            contract_id = %id,
            changes = contract.change_history.len(),
            "contract conditions amended"
        );
        Ok(contract)
    }

    pub async fn monthly_payment(
        &self,
        id: ContractId,
        actual_hours: Decimal,
    ) -> Result<MonthlyPayment, BillingError> {
        if actual_hours < Decimal::ZERO {
            return Err(BillingError::Validation(
                "actual hours must not be negative".to_string(),
            ));
        }
        let contract = self.contract(id).await?;
        Ok(contract.monthly_payment(actual_hours)?)
    }

    /// Derive the personnel's employment status from the contracts in force on `as_of`.
    pub async fn recompute_employment_status(
        &self,
        personnel_id: PersonnelId,
        as_of: NaiveDate,
    ) -> Result<Option<StatusChange>, BillingError> {
        let Some((from, to)) = self
            .store
            .refresh_employment_status(personnel_id, as_of)
            .await?
        else {
            return Ok(None);
        };
        info!(
            personnel_id = %personnel_id,
            from = from.label(),
            to = to.label(),
            "employment status recomputed"
        );
        Ok(Some(StatusChange {
            personnel_id,
            from,
            to,
        }))
    }

    /// Terminate every active contract that ended before `as_of`, then recompute the status of
    /// each affected personnel. Failures are collected per contract.
    pub async fn sweep_expired_contracts(
        &self,
        as_of: NaiveDate,
    ) -> Result<SweepReport, BillingError> {
        let mut report = SweepReport {
            as_of,
            terminated: Vec::new(),
            status_changes: Vec::new(),
            failures: Vec::new(),
        };
        let mut affected = BTreeSet::new();

        for contract in self.store.contracts().await? {
            if !contract.is_expired(as_of) {
                continue;
            }
            let id = contract.id;
            match self.transition_contract(id, ContractTransition::Expire).await {
                Ok(contract) => {
                    report.terminated.push(id);
                    affected.insert(contract.personnel_id);
                }
                Err(err) => {
                    warn!(contract_id = %id, error = %err, "contract expiry failed");
                    report.failures.push(BulkFailure {
                        id: id.0,
                        message: err.to_string(),
                    });
                }
            }
        }

        for personnel_id in affected {
            match self.recompute_employment_status(personnel_id, as_of).await {
                Ok(Some(change)) => report.status_changes.push(change),
                Ok(None) => {}
                Err(err) => {
                    warn!(personnel_id = %personnel_id, error = %err, "status recompute failed");
                    report.failures.push(BulkFailure {
                        id: personnel_id.0,
                        message: format!("personnel {personnel_id}: {err}"),
                    });
                }
            }
        }

        info!(
            as_of = %as_of,
            terminated = report.terminated.len(),
            status_changes = report.status_changes.len(),
            failed = report.failures.len(),
            "contract expiry sweep finished"
        );
        Ok(report)
    }

    /// Active contracts ending within `days` of `as_of`, soonest first.
    pub async fn contracts_expiring_within(
        &self,
        days: u32,
        as_of: NaiveDate,
    ) -> Result<Vec<Contract>, BillingError> {
        let mut contracts: Vec<Contract> = self
            .store
            .contracts()
            .await?
            .into_iter()
            .filter(|contract| contract.expires_within(as_of, days))
            .collect();
        contracts.sort_by_key(|contract| (contract.end_date, contract.id));
        Ok(contracts)
    }
}
