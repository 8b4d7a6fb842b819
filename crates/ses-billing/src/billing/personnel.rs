//! Reference data consumed by the aggregators: personnel, companies, cases and sales reps.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{BpCompanyId, CaseId, ClientCompanyId, PersonnelId, SalesRepId};
use super::repository::{BillingStore, RepositoryError};

/// Discriminates which detail table backs a personnel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonType {
    BpEmployee,
    Freelancer,
    Employee,
}

impl PersonType {
    pub const fn label(self) -> &'static str {
        match self {
            PersonType::BpEmployee => "BP社員",
            PersonType::Freelancer => "個人事業主",
            PersonType::Employee => "自社社員",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStatus {
    Available,
    Working,
    Vacation,
    Unavailable,
    Retired,
}

impl EmploymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EmploymentStatus::Available => "available",
            EmploymentStatus::Working => "working",
            EmploymentStatus::Vacation => "vacation",
            EmploymentStatus::Unavailable => "unavailable",
            EmploymentStatus::Retired => "retired",
        }
    }

    /// Status implied by the number of contracts currently in force.
    ///
    /// Only `working` is downgraded; vacation, unavailable and retired are set by people, not by
    /// the contract ledger.
    pub fn recompute(self, contracts_in_force: usize) -> Self {
        if contracts_in_force > 0 {
            EmploymentStatus::Working
        } else if self == EmploymentStatus::Working {
            EmploymentStatus::Available
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personnel {
    pub id: PersonnelId,
    pub name: String,
    pub person_type: PersonType,
    pub employment_status: EmploymentStatus,
    #[serde(default)]
    pub current_project_end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpEmployeeDetail {
    pub personnel_id: PersonnelId,
    pub bp_company_id: BpCompanyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelancerDetail {
    pub personnel_id: PersonnelId,
    #[serde(default)]
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeDetail {
    pub personnel_id: PersonnelId,
    #[serde(default)]
    pub joining_date: Option<NaiveDate>,
}

/// Detail row of a personnel record, selected by its [`PersonType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonnelDetail {
    BpEmployee(BpEmployeeDetail),
    Freelancer(FreelancerDetail),
    Employee(EmployeeDetail),
}

impl PersonnelDetail {
    pub fn bp_company_id(&self) -> Option<BpCompanyId> {
        match self {
            PersonnelDetail::BpEmployee(detail) => Some(detail.bp_company_id),
            PersonnelDetail::Freelancer(_) | PersonnelDetail::Employee(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpCompany {
    pub id: BpCompanyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCompany {
    pub id: ClientCompanyId,
    pub company_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRepresentative {
    pub id: SalesRepId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub title: String,
    pub client_company_id: ClientCompanyId,
    #[serde(default)]
    pub sales_representative_id: Option<SalesRepId>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Loads the detail row matching the personnel's type. A missing row is `None`, not an error.
pub async fn lookup_detail<S>(
    store: &S,
    personnel: &Personnel,
) -> Result<Option<PersonnelDetail>, RepositoryError>
where
    S: BillingStore + ?Sized,
{
    let detail = match personnel.person_type {
        PersonType::BpEmployee => store
            .bp_employee_detail(personnel.id)
            .await?
            .map(PersonnelDetail::BpEmployee),
        PersonType::Freelancer => store
            .freelancer_detail(personnel.id)
            .await?
            .map(PersonnelDetail::Freelancer),
        PersonType::Employee => store
            .employee_detail(personnel.id)
            .await?
            .map(PersonnelDetail::Employee),
    };
    Ok(detail)
}

/// Follows personnel → BP employee detail → BP company. Any broken hop yields `None`.
pub async fn resolve_bp_company<S>(
    store: &S,
    personnel: &Personnel,
) -> Result<Option<BpCompany>, RepositoryError>
where
    S: BillingStore + ?Sized,
{
    let Some(company_id) = lookup_detail(store, personnel)
        .await?
        .and_then(|detail| detail.bp_company_id())
    else {
        return Ok(None);
    };
    store.bp_company(company_id).await
}

/// Follows case → sales representative. A case without a representative yields `None`.
pub async fn resolve_sales_representative<S>(
    store: &S,
    case: &Case,
) -> Result<Option<SalesRepresentative>, RepositoryError>
where
    S: BillingStore + ?Sized,
{
    match case.sales_representative_id {
        Some(id) => store.sales_representative(id).await,
        None => Ok(None),
    }
}
