//! Contract ledger: engagement terms binding a personnel to a case, and the calculations that
//! feed order and request amounts.

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{CaseId, ContractId, PersonnelId};

pub const DEFAULT_STANDARD_WORKING_HOURS: Decimal = Decimal::from_parts(160, 0, 0, false, 0);
const HOURS_PER_DAY: Decimal = Decimal::from_parts(8, 0, 0, false, 0);
const MINUTES_PER_HOUR: Decimal = Decimal::from_parts(60, 0, 0, false, 0);
const TEN_THOUSAND: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Suspended,
    Terminated,
    Cancelled,
}

impl ContractStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Suspended => "suspended",
            ContractStatus::Terminated => "terminated",
            ContractStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ContractStatus::Terminated | ContractStatus::Cancelled)
    }

    /// Allowed moves: active → {suspended, terminated, cancelled}, suspended → active.
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        matches!(
            (self, next),
            (ContractStatus::Active, ContractStatus::Suspended)
                | (ContractStatus::Active, ContractStatus::Terminated)
                | (ContractStatus::Active, ContractStatus::Cancelled)
                | (ContractStatus::Suspended, ContractStatus::Active)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractItemType {
    BasicSalary,
    OvertimeFee,
    AbsenceDeduction,
    Allowance,
    OtherFee,
    Bonus,
    Transportation,
    Welfare,
    OtherDeduction,
}

impl ContractItemType {
    pub const fn is_deduction(self) -> bool {
        matches!(
            self,
            ContractItemType::AbsenceDeduction | ContractItemType::OtherDeduction
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentUnit {
    YenPerMonth,
    YenPerHour,
    YenPerDay,
    YenPerMinute,
    TenThousandYenPerMonth,
    Percentage,
    FixedAmount,
}

/// Named amount attached to a contract (basic salary, transportation, deductions, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationItem {
    pub item_name: String,
    pub item_type: ContractItemType,
    pub amount: Decimal,
    pub payment_unit: PaymentUnit,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

impl CalculationItem {
    /// Monthly equivalent of the item for the given actual hours and hourly rate; `None` when
    /// the product leaves the decimal range.
    pub fn monthly_amount(&self, actual_hours: Decimal, hourly_rate: Decimal) -> Option<Decimal> {
        match self.payment_unit {
            PaymentUnit::YenPerMonth | PaymentUnit::FixedAmount => Some(self.amount),
            PaymentUnit::TenThousandYenPerMonth => self.amount.checked_mul(TEN_THOUSAND),
            PaymentUnit::YenPerHour => actual_hours.checked_mul(self.amount),
            PaymentUnit::YenPerMinute => actual_hours
                .checked_mul(MINUTES_PER_HOUR)?
                .checked_mul(self.amount),
            PaymentUnit::YenPerDay => (actual_hours / HOURS_PER_DAY).checked_mul(self.amount),
            PaymentUnit::Percentage => {
                let base = if hourly_rate > Decimal::ZERO {
                    hourly_rate.checked_mul(actual_hours)?
                } else {
                    Decimal::ZERO
                };
                Some(base.checked_mul(self.amount)? / Decimal::ONE_HUNDRED)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractChangeType {
    EarlyTermination,
    ConditionChange,
    StatusChange,
    Suspension,
    Resumption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractChangeReason {
    ClientRequest,
    PersonnelRequest,
    ProjectChange,
    PerformanceIssue,
    BudgetChange,
    ScheduleChange,
    ContractExpired,
    Other,
}

/// Audit entry appended on every amendment or status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractChange {
    pub change_type: ContractChangeType,
    #[serde(default)]
    pub reason: Option<ContractChangeReason>,
    pub before: BTreeMap<String, String>,
    pub after: BTreeMap<String, String>,
    pub description: String,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub contract_number: String,
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub unit_price: Decimal,
    pub standard_working_hours: Decimal,
    #[serde(default)]
    pub min_working_hours: Option<Decimal>,
    #[serde(default)]
    pub max_working_hours: Option<Decimal>,
    pub overtime_rate: Decimal,
    pub shortage_rate: Decimal,
    #[serde(default)]
    pub free_overtime_hours: Decimal,
    pub status: ContractStatus,
    #[serde(default)]
    pub calculation_items: Vec<CalculationItem>,
    #[serde(default)]
    pub change_history: Vec<ContractChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("contract {contract} cannot move from {from} to {to}")]
    InvalidTransition {
        contract: ContractId,
        from: &'static str,
        to: &'static str,
    },
    #[error("contract {contract} already has an active {item_type:?} item")]
    DuplicateActiveItem {
        contract: ContractId,
        item_type: ContractItemType,
    },
    #[error("contract {0} has no standard working hours to derive an hourly rate")]
    MissingStandardHours(ContractId),
    #[error("termination date {date} of contract {contract} is outside {start_date}..={end_date}")]
    TerminationOutOfRange {
        contract: ContractId,
        date: NaiveDate,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("monthly payment of contract {0} exceeds the supported amount range")]
    AmountOverflow(ContractId),
}

/// Status change or amendment applied to the stored contract in one store call.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractTransition {
    Expire,
    Terminate {
        date: NaiveDate,
        reason: ContractChangeReason,
        requested_by: Option<String>,
    },
    Suspend {
        requested_by: Option<String>,
    },
    Resume {
        requested_by: Option<String>,
    },
    Cancel {
        requested_by: Option<String>,
    },
    Amend {
        unit_price: Option<Decimal>,
        standard_working_hours: Option<Decimal>,
        reason: ContractChangeReason,
        effective_date: Option<NaiveDate>,
        requested_by: Option<String>,
    },
}

/// Breakdown produced by [`Contract::monthly_payment`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPayment {
    pub contract_number: String,
    pub actual_hours: Decimal,
    pub base_salary: Decimal,
    pub overtime_payment: Decimal,
    pub shortage_deduction: Decimal,
    pub allowances: Decimal,
    pub other_deductions: Decimal,
    pub total_payment: Decimal,
    pub details: Vec<String>,
}

impl Contract {
    /// Amount of the active basic salary item, or zero when none is configured.
    pub fn basic_salary(&self) -> Decimal {
        self.active_item(ContractItemType::BasicSalary)
            .map_or(Decimal::ZERO, |item| item.amount)
    }

    pub fn active_item(&self, item_type: ContractItemType) -> Option<&CalculationItem> {
        self.calculation_items
            .iter()
            .find(|item| item.is_active && item.item_type == item_type)
    }

    /// An active contract whose end date has passed.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.status == ContractStatus::Active && self.end_date < as_of
    }

    /// Active and covering `on`; the contracts that make a personnel "working".
    pub fn is_in_force(&self, on: NaiveDate) -> bool {
        self.status == ContractStatus::Active && self.start_date <= on && on <= self.end_date
    }

    /// Active and ending within `[as_of, as_of + days]`. A horizon past the calendar's last
    /// date leaves the window open-ended.
    pub fn expires_within(&self, as_of: NaiveDate, days: u32) -> bool {
        let before_horizon = as_of
            .checked_add_days(Days::new(u64::from(days)))
            .map_or(true, |horizon| self.end_date <= horizon);
        self.status == ContractStatus::Active && as_of <= self.end_date && before_horizon
    }

    /// Adds a calculation item, keeping at most one active item per type.
    pub fn add_calculation_item(&mut self, item: CalculationItem) -> Result<(), ContractError> {
        if item.is_active && self.active_item(item.item_type).is_some() {
            return Err(ContractError::DuplicateActiveItem {
                contract: self.id,
                item_type: item.item_type,
            });
        }
        self.calculation_items.push(item);
        self.calculation_items.sort_by_key(|item| item.sort_order);
        Ok(())
    }

    fn ensure_can_move_to(&self, next: ContractStatus) -> Result<(), ContractError> {
        if !self.status.can_transition_to(next) {
            return Err(ContractError::InvalidTransition {
                contract: self.id,
                from: self.status.label(),
                to: next.label(),
            });
        }
        Ok(())
    }

    fn transition(
        &mut self,
        next: ContractStatus,
        change_type: ContractChangeType,
        reason: Option<ContractChangeReason>,
        requested_by: Option<&str>,
    ) -> Result<(), ContractError> {
        self.ensure_can_move_to(next)?;

        let before = BTreeMap::from([("status".to_string(), self.status.label().to_string())]);
        self.status = next;
        let after = BTreeMap::from([("status".to_string(), next.label().to_string())]);
        self.change_history.push(ContractChange {
            change_type,
            reason,
            before,
            after,
            description: format!("status changed to {}", next.label()),
            effective_date: None,
            requested_by: requested_by.map(str::to_string),
        });
        Ok(())
    }

    /// Terminates a contract whose end date has passed, keeping its end date.
    pub fn expire(&mut self) -> Result<(), ContractError> {
        self.transition(
            ContractStatus::Terminated,
            ContractChangeType::StatusChange,
            Some(ContractChangeReason::ContractExpired),
            None,
        )
    }

    /// Terminates the contract effective `termination_date`, moving the end date. The date must
    /// fall within the contract's current term.
    pub fn terminate_early(
        &mut self,
        termination_date: NaiveDate,
        reason: ContractChangeReason,
        requested_by: Option<&str>,
    ) -> Result<(), ContractError> {
        self.ensure_can_move_to(ContractStatus::Terminated)?;
        if termination_date < self.start_date || termination_date > self.end_date {
            return Err(ContractError::TerminationOutOfRange {
                contract: self.id,
                date: termination_date,
                start_date: self.start_date,
                end_date: self.end_date,
            });
        }
        let previous_end = self.end_date;
        self.transition(
            ContractStatus::Terminated,
            ContractChangeType::EarlyTermination,
            Some(reason),
            requested_by,
        )?;
        self.end_date = termination_date;

        if let Some(change) = self.change_history.last_mut() {
            change
                .before
                .insert("end_date".to_string(), previous_end.to_string());
            change
                .after
                .insert("end_date".to_string(), termination_date.to_string());
            change.description = format!("terminated early on {termination_date}");
            change.effective_date = Some(termination_date);
        }
        Ok(())
    }

    pub fn suspend(&mut self, requested_by: Option<&str>) -> Result<(), ContractError> {
        self.transition(
            ContractStatus::Suspended,
            ContractChangeType::Suspension,
            None,
            requested_by,
        )
    }

    pub fn resume(&mut self, requested_by: Option<&str>) -> Result<(), ContractError> {
        self.transition(
            ContractStatus::Active,
            ContractChangeType::Resumption,
            None,
            requested_by,
        )
    }

    pub fn cancel(&mut self, requested_by: Option<&str>) -> Result<(), ContractError> {
        self.transition(
            ContractStatus::Cancelled,
            ContractChangeType::StatusChange,
            None,
            requested_by,
        )
    }

    pub fn apply(&mut self, transition: ContractTransition) -> Result<(), ContractError> {
        match transition {
            ContractTransition::Expire => self.expire(),
            ContractTransition::Terminate {
                date,
                reason,
                requested_by,
            } => self.terminate_early(date, reason, requested_by.as_deref()),
            ContractTransition::Suspend { requested_by } => self.suspend(requested_by.as_deref()),
            ContractTransition::Resume { requested_by } => self.resume(requested_by.as_deref()),
            ContractTransition::Cancel { requested_by } => self.cancel(requested_by.as_deref()),
            ContractTransition::Amend {
                unit_price,
                standard_working_hours,
                reason,
                effective_date,
                requested_by,
            } => {
                if self.status.is_terminal() {
                    return Err(ContractError::InvalidTransition {
                        contract: self.id,
                        from: self.status.label(),
                        to: "amended",
                    });
                }
                self.amend_conditions(
                    unit_price,
                    standard_working_hours,
                    reason,
                    effective_date,
                    requested_by.as_deref(),
                );
                Ok(())
            }
        }
    }

    /// Changes price and/or standard hours, recording before/after values.
    /// Returns `false` when nothing changed.
    pub fn amend_conditions(
        &mut self,
        unit_price: Option<Decimal>,
        standard_working_hours: Option<Decimal>,
        reason: ContractChangeReason,
        effective_date: Option<NaiveDate>,
        requested_by: Option<&str>,
    ) -> bool {
        let mut before = BTreeMap::new();
        let mut after = BTreeMap::new();
        let mut changes = Vec::new();

        if let Some(price) = unit_price.filter(|price| *price != self.unit_price) {
            before.insert("unit_price".to_string(), self.unit_price.to_string());
            after.insert("unit_price".to_string(), price.to_string());
            changes.push(format!("unit price {} -> {}", self.unit_price, price));
            self.unit_price = price;
        }

        if let Some(hours) =
            standard_working_hours.filter(|hours| *hours != self.standard_working_hours)
        {
            before.insert(
                "standard_working_hours".to_string(),
                self.standard_working_hours.to_string(),
            );
            after.insert("standard_working_hours".to_string(), hours.to_string());
            changes.push(format!(
                "standard hours {}h -> {}h",
                self.standard_working_hours, hours
            ));
            self.standard_working_hours = hours;
        }

        if changes.is_empty() {
            return false;
        }

        self.change_history.push(ContractChange {
            change_type: ContractChangeType::ConditionChange,
            reason: Some(reason),
            before,
            after,
            description: changes.join(", "),
            effective_date,
            requested_by: requested_by.map(str::to_string),
        });
        true
    }

    /// Settles one month: base salary, overtime above the max, shortage below the min, and every
    /// active calculation item other than the basic salary.
    pub fn monthly_payment(&self, actual_hours: Decimal) -> Result<MonthlyPayment, ContractError> {
        if self.standard_working_hours <= Decimal::ZERO {
            return Err(ContractError::MissingStandardHours(self.id));
        }
        let overflow = || ContractError::AmountOverflow(self.id);
        let hourly_rate = self
            .unit_price
            .checked_div(self.standard_working_hours)
            .ok_or_else(overflow)?;
        let mut details = vec![format!("base salary: {}", self.unit_price.round_dp(0))];

        let mut overtime_payment = Decimal::ZERO;
        if let Some(max) = self.max_working_hours {
            let overtime_hours = actual_hours
                .checked_sub(max)
                .and_then(|hours| hours.checked_sub(self.free_overtime_hours))
                .ok_or_else(overflow)?;
            if actual_hours > max && overtime_hours > Decimal::ZERO {
                overtime_payment = overtime_hours
                    .checked_mul(hourly_rate)
                    .and_then(|amount| amount.checked_mul(self.overtime_rate))
                    .ok_or_else(overflow)?;
                details.push(format!(
                    "overtime: {}h x {} x {} = {}",
                    overtime_hours,
                    hourly_rate.round_dp(2),
                    self.overtime_rate,
                    overtime_payment.round_dp(0)
                ));
            }
        }

        let mut shortage_deduction = Decimal::ZERO;
        if let Some(min) = self.min_working_hours {
            if actual_hours < min {
                let shortage_hours = min.checked_sub(actual_hours).ok_or_else(overflow)?;
                shortage_deduction = shortage_hours
                    .checked_mul(hourly_rate)
                    .and_then(|amount| amount.checked_mul(self.shortage_rate))
                    .ok_or_else(overflow)?;
                details.push(format!(
                    "shortage: {}h x {} x {} = {}",
                    shortage_hours,
                    hourly_rate.round_dp(2),
                    self.shortage_rate,
                    shortage_deduction.round_dp(0)
                ));
            }
        }

        let mut allowances = Decimal::ZERO;
        let mut other_deductions = Decimal::ZERO;
        for item in self
            .calculation_items
            .iter()
            .filter(|item| item.is_active && item.item_type != ContractItemType::BasicSalary)
        {
            let amount = item
                .monthly_amount(actual_hours, hourly_rate)
                .ok_or_else(overflow)?;
            if item.item_type.is_deduction() {
                other_deductions = other_deductions.checked_add(amount).ok_or_else(overflow)?;
                details.push(format!("{} (deduction): -{}", item.item_name, amount.round_dp(0)));
            } else {
                allowances = allowances.checked_add(amount).ok_or_else(overflow)?;
                details.push(format!("{}: +{}", item.item_name, amount.round_dp(0)));
            }
        }

        let total_payment = self
            .unit_price
            .checked_add(overtime_payment)
            .and_then(|total| total.checked_add(allowances))
            .and_then(|total| total.checked_sub(shortage_deduction))
            .and_then(|total| total.checked_sub(other_deductions))
            .ok_or_else(overflow)?;

        Ok(MonthlyPayment {
            contract_number: self.contract_number.clone(),
            actual_hours,
            base_salary: self.unit_price,
            overtime_payment: overtime_payment.round_dp(2),
            shortage_deduction: shortage_deduction.round_dp(2),
            allowances: allowances.round_dp(2),
            other_deductions: other_deductions.round_dp(2),
            total_payment: total_payment.round_dp(2),
            details,
        })
    }
}
