use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use ses_billing::billing::contract::DEFAULT_STANDARD_WORKING_HOURS;
use ses_billing::billing::{
    BillingError, BillingService, BpCompany, BpCompanyId, BpEmployeeDetail, CalculationItem,
    Case, CaseId, ClientCompany, ClientCompanyId, CollaboratorError, Contract, ContractId,
    ContractItemType, ContractStatus, DocumentRenderer, EmploymentStatus, FreelancerDetail,
    InMemoryBillingStore, ObjectStorage, OrderDetails, PaymentUnit, PersonType, Personnel,
    PersonnelId, RenderedDocument, RequestDetails, SalesRepId, SalesRepresentative, YearMonth,
};
use ses_billing::config::BillingConfig;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type ApiService =
    BillingService<InMemoryBillingStore, JsonDocumentRenderer, InMemoryObjectStorage>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Renders details payloads as pretty JSON documents.
#[derive(Debug, Default, Clone)]
pub(crate) struct JsonDocumentRenderer;

impl JsonDocumentRenderer {
    fn render<T: serde::Serialize>(payload: &T) -> Result<RenderedDocument, CollaboratorError> {
        let bytes = serde_json::to_vec_pretty(payload)
            .map_err(|err| CollaboratorError::Renderer(err.to_string()))?;
        Ok(RenderedDocument {
            content_type: "application/json".to_string(),
            bytes,
        })
    }
}

#[async_trait]
impl DocumentRenderer for JsonDocumentRenderer {
    async fn render_order(
        &self,
        details: &OrderDetails,
    ) -> Result<RenderedDocument, CollaboratorError> {
        Self::render(details)
    }

    async fn render_request(
        &self,
        details: &RequestDetails,
    ) -> Result<RenderedDocument, CollaboratorError> {
        Self::render(details)
    }
}

/// Keeps uploaded documents in memory under the configured bucket name.
#[derive(Clone)]
pub(crate) struct InMemoryObjectStorage {
    bucket: String,
    objects: Arc<Mutex<BTreeMap<String, RenderedDocument>>>,
}

impl InMemoryObjectStorage {
    pub(crate) fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::default(),
        }
    }

    pub(crate) async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put(
        &self,
        key: &str,
        document: RenderedDocument,
    ) -> Result<String, CollaboratorError> {
        if key.is_empty() {
            return Err(CollaboratorError::Storage("object key is empty".to_string()));
        }
        self.objects.lock().await.insert(key.to_string(), document);
        Ok(format!("memory://{}/{key}", self.bucket))
    }
}

pub(crate) struct BillingStack {
    pub(crate) service: Arc<ApiService>,
    pub(crate) storage: Arc<InMemoryObjectStorage>,
}

/// Build the billing service over a store seeded with the sample roster.
pub(crate) async fn build_billing_stack(
    config: &BillingConfig,
    anchor: YearMonth,
) -> Result<BillingStack, BillingError> {
    let store = Arc::new(InMemoryBillingStore::new());
    seed_sample_roster(&store, anchor).await?;
    let storage = Arc::new(InMemoryObjectStorage::new(config.document_bucket.clone()));
    let service = Arc::new(BillingService::new(
        store,
        Arc::new(JsonDocumentRenderer),
        storage.clone(),
        config.clone(),
    ));
    Ok(BillingStack { service, storage })
}

fn first_day(year_month: YearMonth) -> Result<NaiveDate, BillingError> {
    year_month
        .first_day()
        .ok_or_else(|| BillingError::Validation(format!("{year_month} has no first day")))
}

fn sample_contract(
    id: u64,
    personnel: u64,
    case: u64,
    start: NaiveDate,
    end: NaiveDate,
    unit_price: Decimal,
) -> Contract {
    Contract {
        id: ContractId(id),
        contract_number: format!("C{}{id:04}", start.year()),
        personnel_id: PersonnelId(personnel),
        case_id: CaseId(case),
        start_date: start,
        end_date: end,
        unit_price,
        standard_working_hours: DEFAULT_STANDARD_WORKING_HOURS,
        min_working_hours: Some(Decimal::from(140)),
        max_working_hours: Some(Decimal::from(180)),
        overtime_rate: Decimal::ONE,
        shortage_rate: Decimal::ONE,
        free_overtime_hours: Decimal::ZERO,
        status: ContractStatus::Active,
        calculation_items: vec![CalculationItem {
            item_name: "基本給".to_string(),
            item_type: ContractItemType::BasicSalary,
            amount: unit_price / Decimal::from(10_000),
            payment_unit: PaymentUnit::TenThousandYenPerMonth,
            comment: None,
            is_active: true,
            sort_order: 0,
        }],
        change_history: Vec::new(),
    }
}

/// Two BP partners, one freelancer and two clients. One contract lapses at the end of the
/// anchor month so the expiry sweep has work to do.
pub(crate) async fn seed_sample_roster(
    store: &InMemoryBillingStore,
    anchor: YearMonth,
) -> Result<(), BillingError> {
    for (id, name) in [(1, "Sakura Tech Partners"), (2, "Kanto Engineering")] {
        store
            .add_bp_company(BpCompany {
                id: BpCompanyId(id),
                name: name.to_string(),
            })
            .await;
    }
    for (id, name) in [(1, "Marunouchi Bank"), (2, "Shibuya Retail")] {
        store
            .add_client_company(ClientCompany {
                id: ClientCompanyId(id),
                company_name: name.to_string(),
            })
            .await;
    }
    for (id, name) in [(1, "Tanaka"), (2, "Suzuki")] {
        store
            .add_sales_representative(SalesRepresentative {
                id: SalesRepId(id),
                name: name.to_string(),
            })
            .await;
    }
    for (id, title, client, rep) in [
        (1, "Core banking renewal", 1, 1),
        (2, "Store inventory system", 2, 2),
    ] {
        store
            .add_case(Case {
                id: CaseId(id),
                title: title.to_string(),
                client_company_id: ClientCompanyId(client),
                sales_representative_id: Some(SalesRepId(rep)),
                location: Some("Tokyo".to_string()),
            })
            .await;
    }

    let roster = [
        (1, "Yamada Taro", PersonType::BpEmployee, Some(1)),
        (2, "Sato Hanako", PersonType::BpEmployee, Some(2)),
        (3, "Kobayashi Ken", PersonType::Freelancer, None),
    ];
    for (id, name, person_type, bp_company) in roster {
        store
            .add_personnel(Personnel {
                id: PersonnelId(id),
                name: name.to_string(),
                person_type,
                employment_status: EmploymentStatus::Working,
                current_project_end_date: None,
            })
            .await;
        match bp_company {
            Some(company) => {
                store
                    .add_bp_employee_detail(BpEmployeeDetail {
                        personnel_id: PersonnelId(id),
                        bp_company_id: BpCompanyId(company),
                    })
                    .await
            }
            None => {
                store
                    .add_freelancer_detail(FreelancerDetail {
                        personnel_id: PersonnelId(id),
                        business_name: Some(format!("{name} Consulting")),
                    })
                    .await
            }
        }
    }

    let start = first_day(anchor)? - Duration::days(90);
    let month_end = first_day(anchor)? + Duration::days(40);
    let month_end = month_end - Duration::days(i64::from(month_end.day()));
    let long_end = start + Duration::days(365);
    store
        .add_contract(sample_contract(1, 1, 1, start, long_end, Decimal::from(650_000)))
        .await;
    store
        .add_contract(sample_contract(2, 2, 2, start, month_end, Decimal::from(580_000)))
        .await;
    store
        .add_contract(sample_contract(3, 3, 1, start, long_end, Decimal::from(700_000)))
        .await;
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_year_month(raw: &str) -> Result<YearMonth, String> {
    YearMonth::parse(raw).map_err(|err| err.to_string())
}
