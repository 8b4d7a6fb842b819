//! Client requests (invoices) and their items.
//!
//! Monetary values are stored in units of ten-thousand yen; the detail read path multiplies them by
//! [`DISPLAY_SCALE`] so renderers see yen.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::contract::DEFAULT_STANDARD_WORKING_HOURS;
use super::ids::{CaseId, ClientCompanyId, ContractId, PersonnelId, RequestId, RequestItemId};
use super::period::{PeriodKey, PeriodScoped, YearMonth};
use super::status::{DocumentStatus, RequestStatus, Stage, TransitionError};

pub const REQUEST_NUMBER_PREFIX: &str = "REQ";
pub const DISPLAY_SCALE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound of stored amounts and totals (twelve digits, two of them decimals).
pub const AMOUNT_LIMIT: Decimal = Decimal::from_parts(1_410_065_408, 2, 0, false, 0);
const UNIT_PRICE_LIMIT: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);
const WORK_HOURS_LIMIT: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub request_number: String,
    pub client_company_id: ClientCompanyId,
    pub year_month: YearMonth,
    pub request_amount: Decimal,
    pub calculation_amount: Decimal,
    pub tax_excluded_amount: Decimal,
    pub tax_rate: Decimal,
    pub status: RequestStatus,
    pub request_document_url: Option<String>,
    pub order_document_url: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub sent_by: Option<String>,
    pub payment_due_date: Option<NaiveDate>,
    pub payment_received_date: Option<NaiveDate>,
    pub payment_amount: Option<Decimal>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: RequestItemId,
    pub request_id: RequestId,
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub contract_id: ContractId,
    pub item_amount: Decimal,
    pub work_hours: Decimal,
    pub unit_price: Decimal,
    pub remark: Option<String>,
}

/// Item as submitted by a caller, before the store assigns ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequestItem {
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub contract_id: ContractId,
    pub item_amount: Decimal,
    #[serde(default = "default_work_hours")]
    pub work_hours: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub remark: Option<String>,
}

fn default_work_hours() -> Decimal {
    DEFAULT_STANDARD_WORKING_HOURS
}

impl NewRequestItem {
    /// Amount as it will be stored, rounded to two decimals.
    pub fn stored_amount(&self) -> Decimal {
        self.item_amount.round_dp(MONEY_SCALE)
    }

    pub fn into_item(self, id: RequestItemId, request_id: RequestId) -> RequestItem {
        RequestItem {
            id,
            request_id,
            personnel_id: self.personnel_id,
            case_id: self.case_id,
            contract_id: self.contract_id,
            item_amount: self.stored_amount(),
            work_hours: self.work_hours,
            unit_price: self.unit_price.round_dp(MONEY_SCALE),
            remark: self.remark,
        }
    }
}

/// Insert payload for a request; totals are derived by the store from the items.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub client_company_id: ClientCompanyId,
    pub year_month: YearMonth,
    pub tax_rate: Decimal,
    pub payment_due_date: Option<NaiveDate>,
    pub order_document_url: Option<String>,
    pub remark: Option<String>,
}

impl NewRequest {
    pub fn period_key(&self) -> PeriodKey<ClientCompanyId> {
        PeriodKey::new(self.client_company_id, self.year_month)
    }

    pub fn into_request(
        self,
        id: RequestId,
        request_number: String,
        totals: RequestTotals,
        created_at: DateTime<Utc>,
    ) -> Request {
        let mut request = Request {
            id,
            request_number,
            client_company_id: self.client_company_id,
            year_month: self.year_month,
            request_amount: Decimal::ZERO,
            calculation_amount: Decimal::ZERO,
            tax_excluded_amount: Decimal::ZERO,
            tax_rate: self.tax_rate,
            status: RequestStatus::Draft,
            request_document_url: None,
            order_document_url: self.order_document_url,
            sent_date: None,
            sent_by: None,
            payment_due_date: self.payment_due_date,
            payment_received_date: None,
            payment_amount: None,
            remark: self.remark,
            created_at,
        };
        request.apply_totals(totals);
        request
    }
}

/// Amounts derived from the items of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTotals {
    pub tax_excluded_amount: Decimal,
    pub calculation_amount: Decimal,
    pub request_amount: Decimal,
}

impl RequestTotals {
    /// Sums the items and applies the tax rate, rounding to two decimals. Fails when a total
    /// leaves the storable range.
    pub fn derive(
        item_amounts: impl IntoIterator<Item = Decimal>,
        tax_rate: Decimal,
    ) -> Result<Self, RequestValidationError> {
        let mut sum = Decimal::ZERO;
        for amount in item_amounts {
            sum = sum
                .checked_add(amount)
                .ok_or(RequestValidationError::TotalOutOfRange)?;
        }
        let tax_excluded_amount = sum.round_dp(MONEY_SCALE);
        let request_amount = (tax_rate / Decimal::ONE_HUNDRED)
            .checked_add(Decimal::ONE)
            .and_then(|multiplier| tax_excluded_amount.checked_mul(multiplier))
            .ok_or(RequestValidationError::TotalOutOfRange)?
            .round_dp(MONEY_SCALE);
        if request_amount >= AMOUNT_LIMIT || tax_excluded_amount >= AMOUNT_LIMIT {
            return Err(RequestValidationError::TotalOutOfRange);
        }

        Ok(Self {
            tax_excluded_amount,
            calculation_amount: tax_excluded_amount,
            request_amount,
        })
    }

    pub fn of_items(
        items: &[RequestItem],
        tax_rate: Decimal,
    ) -> Result<Self, RequestValidationError> {
        Self::derive(items.iter().map(|item| item.item_amount), tax_rate)
    }
}

/// Field changes of a request. Once sent, only the remark and the order document URL may change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestUpdate {
    #[serde(default)]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub payment_due_date: Option<NaiveDate>,
    #[serde(default)]
    pub order_document_url: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl RequestUpdate {
    fn touches_billing_terms(&self) -> bool {
        self.tax_rate.is_some() || self.payment_due_date.is_some()
    }
}

/// Change applied to the stored request in one store call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestTransition {
    AttachDocument { url: String },
    Send { actor: String, at: DateTime<Utc> },
    Pay { received: NaiveDate, amount: Option<Decimal> },
    Update(RequestUpdate),
    AttachOrderDocument { url: String },
}

impl PeriodScoped for Request {
    type Owner = ClientCompanyId;
    type Id = RequestId;

    fn period_key(&self) -> PeriodKey<ClientCompanyId> {
        PeriodKey::new(self.client_company_id, self.year_month)
    }

    fn document_id(&self) -> RequestId {
        self.id
    }
}

impl Request {
    pub fn is_sent(&self) -> bool {
        self.status.is_sent()
    }

    pub fn apply_totals(&mut self, totals: RequestTotals) {
        self.tax_excluded_amount = totals.tax_excluded_amount;
        self.calculation_amount = totals.calculation_amount;
        self.request_amount = totals.request_amount;
    }

    pub fn document_key(&self) -> String {
        format!("requests/{}/{}.pdf", self.year_month, self.request_number)
    }

    /// Storage key of the client's purchase order filed against this request.
    pub fn order_document_key(&self) -> String {
        format!(
            "requests/{}/orders/{}_order.pdf",
            self.year_month, self.request_number
        )
    }

    pub fn attach_document(&mut self, url: String) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Generated)?;
        self.request_document_url = Some(url);
        Ok(())
    }

    pub fn mark_sent(&mut self, actor: &str, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Sent)?;
        self.sent_date = Some(at);
        self.sent_by = Some(actor.to_string());
        Ok(())
    }

    /// Records the payment. `amount` must already be validated as positive.
    pub fn mark_paid(
        &mut self,
        received: NaiveDate,
        amount: Option<Decimal>,
    ) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Settled)?;
        self.payment_received_date = Some(received);
        if let Some(amount) = amount {
            self.payment_amount = Some(amount);
        }
        Ok(())
    }

    pub fn update(&mut self, update: RequestUpdate) -> Result<(), TransitionError> {
        if self.is_sent() && update.touches_billing_terms() {
            return Err(TransitionError {
                document: RequestStatus::KIND,
                from: self.status.label(),
                to: "edited",
            });
        }
        if let Some(tax_rate) = update.tax_rate {
            self.tax_rate = tax_rate;
        }
        if let Some(due) = update.payment_due_date {
            self.payment_due_date = Some(due);
        }
        if let Some(url) = update.order_document_url {
            self.order_document_url = Some(url);
        }
        if let Some(remark) = update.remark {
            self.remark = Some(remark);
        }
        Ok(())
    }

    pub fn apply(&mut self, transition: RequestTransition) -> Result<(), TransitionError> {
        match transition {
            RequestTransition::AttachDocument { url } => self.attach_document(url),
            RequestTransition::Send { actor, at } => self.mark_sent(&actor, at),
            RequestTransition::Pay { received, amount } => self.mark_paid(received, amount),
            RequestTransition::Update(update) => self.update(update),
            RequestTransition::AttachOrderDocument { url } => {
                self.order_document_url = Some(url);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestValidationError {
    #[error("a request needs at least one item")]
    NoItems,
    #[error("item {index}: {field} must not be negative")]
    NegativeAmount { index: usize, field: &'static str },
    #[error("item {index}: {field} must be less than {limit}")]
    AmountTooLarge {
        index: usize,
        field: &'static str,
        limit: Decimal,
    },
    #[error("tax rate {0} must be between 0 and 100")]
    TaxRateOutOfRange(Decimal),
    #[error("case {case_id} / personnel {personnel_id} appears more than once")]
    DuplicateItem {
        case_id: CaseId,
        personnel_id: PersonnelId,
    },
    #[error("payment amount must be greater than zero")]
    NonPositivePayment,
    #[error("payment amount must be less than 10,000,000,000")]
    PaymentTooLarge,
    #[error("request total must be less than 10,000,000,000")]
    TotalOutOfRange,
}

/// Item and tax checks, in order: presence, amount ranges, tax rate, (case, personnel)
/// uniqueness, and finally the derived totals.
pub fn validate_items(
    items: &[NewRequestItem],
    tax_rate: Decimal,
) -> Result<(), RequestValidationError> {
    if items.is_empty() {
        return Err(RequestValidationError::NoItems);
    }

    for (index, item) in items.iter().enumerate() {
        let fields = [
            ("item_amount", item.item_amount, AMOUNT_LIMIT),
            ("unit_price", item.unit_price, UNIT_PRICE_LIMIT),
            ("work_hours", item.work_hours, WORK_HOURS_LIMIT),
        ];
        for (field, value, limit) in fields {
            if value < Decimal::ZERO {
                return Err(RequestValidationError::NegativeAmount { index, field });
            }
            if value >= limit {
                return Err(RequestValidationError::AmountTooLarge {
                    index,
                    field,
                    limit,
                });
            }
        }
    }

    validate_tax_rate(tax_rate)?;

    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert((item.case_id, item.personnel_id)) {
            return Err(RequestValidationError::DuplicateItem {
                case_id: item.case_id,
                personnel_id: item.personnel_id,
            });
        }
    }

    RequestTotals::derive(items.iter().map(NewRequestItem::stored_amount), tax_rate)?;
    Ok(())
}

pub fn validate_tax_rate(tax_rate: Decimal) -> Result<(), RequestValidationError> {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        return Err(RequestValidationError::TaxRateOutOfRange(tax_rate));
    }
    Ok(())
}

pub fn validate_payment_amount(amount: Option<Decimal>) -> Result<(), RequestValidationError> {
    match amount {
        Some(amount) if amount <= Decimal::ZERO => Err(RequestValidationError::NonPositivePayment),
        Some(amount) if amount >= AMOUNT_LIMIT => Err(RequestValidationError::PaymentTooLarge),
        _ => Ok(()),
    }
}

/// Names resolved from the reference data for a request's items and client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestReferences {
    pub client_company_name: String,
    pub sales_representative_name: String,
    pub personnel_names: HashMap<PersonnelId, String>,
    pub case_titles: HashMap<CaseId, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestItemDetails {
    pub id: RequestItemId,
    pub personnel_id: PersonnelId,
    pub personnel_name: String,
    pub case_id: CaseId,
    pub case_title: String,
    pub contract_id: ContractId,
    pub item_amount: Decimal,
    pub work_hours: Decimal,
    pub unit_price: Decimal,
    pub remark: Option<String>,
}

/// Display payload of a request; amounts are in yen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDetails {
    pub id: RequestId,
    pub request_number: String,
    pub client_company_id: ClientCompanyId,
    pub client_company_name: String,
    pub year_month: YearMonth,
    pub year_month_label: String,
    pub status: RequestStatus,
    pub case_titles: String,
    pub personnel_names: String,
    pub sales_representative_name: String,
    pub request_amount: Decimal,
    pub calculation_amount: Decimal,
    pub tax_excluded_amount: Decimal,
    pub basic_salary: Decimal,
    pub tax_rate: Decimal,
    pub payment_due_date: Option<NaiveDate>,
    pub payment_received_date: Option<NaiveDate>,
    pub payment_amount: Option<Decimal>,
    pub request_document_url: Option<String>,
    pub order_document_url: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub sent_by: Option<String>,
    pub remark: Option<String>,
    pub items: Vec<RequestItemDetails>,
}

impl RequestDetails {
    pub fn assemble(request: &Request, items: &[RequestItem], refs: &RequestReferences) -> Self {
        let personnel_name =
            |id: PersonnelId| refs.personnel_names.get(&id).cloned().unwrap_or_default();
        let case_title = |id: CaseId| refs.case_titles.get(&id).cloned().unwrap_or_default();
        let basic_salary: Decimal = items.iter().map(|item| item.item_amount).sum();

        Self {
            id: request.id,
            request_number: request.request_number.clone(),
            client_company_id: request.client_company_id,
            client_company_name: refs.client_company_name.clone(),
            year_month: request.year_month,
            year_month_label: request.year_month.display_label(),
            status: request.status,
            case_titles: join_distinct(items.iter().map(|item| case_title(item.case_id))),
            personnel_names: join_distinct(
                items.iter().map(|item| personnel_name(item.personnel_id)),
            ),
            sales_representative_name: refs.sales_representative_name.clone(),
            request_amount: request.request_amount * DISPLAY_SCALE,
            calculation_amount: request.calculation_amount * DISPLAY_SCALE,
            tax_excluded_amount: request.tax_excluded_amount * DISPLAY_SCALE,
            basic_salary: basic_salary * DISPLAY_SCALE,
            tax_rate: request.tax_rate,
            payment_due_date: request.payment_due_date,
            payment_received_date: request.payment_received_date,
            payment_amount: request.payment_amount,
            request_document_url: request.request_document_url.clone(),
            order_document_url: request.order_document_url.clone(),
            sent_date: request.sent_date,
            sent_by: request.sent_by.clone(),
            remark: request.remark.clone(),
            items: items
                .iter()
                .map(|item| RequestItemDetails {
                    id: item.id,
                    personnel_id: item.personnel_id,
                    personnel_name: personnel_name(item.personnel_id),
                    case_id: item.case_id,
                    case_title: case_title(item.case_id),
                    contract_id: item.contract_id,
                    item_amount: item.item_amount * DISPLAY_SCALE,
                    work_hours: item.work_hours,
                    unit_price: item.unit_price * DISPLAY_SCALE,
                    remark: item.remark.clone(),
                })
                .collect(),
        }
    }
}

/// Joins non-empty values with ", ", keeping the first occurrence of each.
fn join_distinct(values: impl IntoIterator<Item = String>) -> String {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}
