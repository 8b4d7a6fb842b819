use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{CaseId, ContractId, OrderId, PersonnelId};
use super::period::{PeriodKey, PeriodScoped, YearMonth};
use super::status::{DocumentStatus, OrderStatus, Stage, TransitionError};

/// Document number prefix; order numbers are plain `YYYYMM-NNN`.
pub const ORDER_NUMBER_PREFIX: &str = "";

/// Purchase order sent to the supplier (BP company) of one personnel for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub contract_id: ContractId,
    pub year_month: YearMonth,
    pub status: OrderStatus,
    pub order_document_url: Option<String>,
    pub order_request_url: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub sent_by: Option<String>,
    pub collected_date: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns the id and order number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub personnel_id: PersonnelId,
    pub case_id: CaseId,
    pub contract_id: ContractId,
    pub year_month: YearMonth,
    pub remark: Option<String>,
}

impl NewOrder {
    pub fn period_key(&self) -> PeriodKey<PersonnelId> {
        PeriodKey::new(self.personnel_id, self.year_month)
    }

    pub fn into_order(self, id: OrderId, order_number: String, created_at: DateTime<Utc>) -> Order {
        Order {
            id,
            order_number,
            personnel_id: self.personnel_id,
            case_id: self.case_id,
            contract_id: self.contract_id,
            year_month: self.year_month,
            status: OrderStatus::Draft,
            order_document_url: None,
            order_request_url: None,
            sent_date: None,
            sent_by: None,
            collected_date: None,
            remark: self.remark,
            created_at,
        }
    }
}

impl PeriodScoped for Order {
    type Owner = PersonnelId;
    type Id = OrderId;

    fn period_key(&self) -> PeriodKey<PersonnelId> {
        PeriodKey::new(self.personnel_id, self.year_month)
    }

    fn document_id(&self) -> OrderId {
        self.id
    }
}

impl Order {
    pub fn is_sent(&self) -> bool {
        self.status.is_sent()
    }

    /// Storage key of the rendered order document.
    pub fn document_key(&self) -> String {
        format!("orders/{}/{}.pdf", self.year_month, self.order_number)
    }

    /// Storage key of the supplier's countersigned acknowledgement.
    pub fn acknowledgement_key(&self) -> String {
        format!("orders/{}/{}_request.pdf", self.year_month, self.order_number)
    }

    pub fn attach_document(&mut self, url: String) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Generated)?;
        self.order_document_url = Some(url);
        Ok(())
    }

    pub fn mark_sent(&mut self, actor: &str, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Sent)?;
        self.sent_date = Some(at);
        self.sent_by = Some(actor.to_string());
        Ok(())
    }

    pub fn mark_collected(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.advance(Stage::Settled)?;
        self.collected_date = Some(at);
        Ok(())
    }

    /// Only a sent order can carry the supplier's acknowledgement.
    pub fn ensure_acknowledgeable(&self) -> Result<(), TransitionError> {
        if !self.is_sent() {
            return Err(TransitionError {
                document: OrderStatus::KIND,
                from: self.status.label(),
                to: "acknowledged",
            });
        }
        Ok(())
    }

    pub fn attach_acknowledgement(&mut self, url: String) -> Result<(), TransitionError> {
        self.ensure_acknowledgeable()?;
        self.order_request_url = Some(url);
        Ok(())
    }

    pub fn apply(&mut self, transition: OrderTransition) -> Result<(), TransitionError> {
        match transition {
            OrderTransition::AttachDocument { url } => self.attach_document(url),
            OrderTransition::Send { actor, at } => self.mark_sent(&actor, at),
            OrderTransition::Collect { at } => self.mark_collected(at),
            OrderTransition::AttachAcknowledgement { url } => self.attach_acknowledgement(url),
        }
    }
}

/// Change applied to the stored order in one store call.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTransition {
    AttachDocument { url: String },
    Send { actor: String, at: DateTime<Utc> },
    Collect { at: DateTime<Utc> },
    AttachAcknowledgement { url: String },
}

/// Read model recomputed from personnel, case and contract on every read.
///
/// Broken reference chains degrade to empty strings; this is the payload the document renderer
/// consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub year_month_label: String,
    pub personnel_name: String,
    pub bp_company_name: String,
    pub case_title: String,
    pub case_location: String,
    pub client_company_name: String,
    pub sales_representative_name: String,
    pub contract: Option<ContractSummary>,
    pub basic_salary: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractSummary {
    pub contract_number: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub unit_price: Decimal,
    pub standard_working_hours: Decimal,
    pub min_working_hours: Option<Decimal>,
    pub max_working_hours: Option<Decimal>,
}
