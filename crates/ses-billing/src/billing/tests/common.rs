use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::billing::collaborators::{
    CollaboratorError, DocumentRenderer, ObjectStorage, RenderedDocument,
};
use crate::billing::contract::{
    CalculationItem, Contract, ContractItemType, ContractStatus, PaymentUnit,
    DEFAULT_STANDARD_WORKING_HOURS,
};
use crate::billing::ids::{
    BpCompanyId, CaseId, ClientCompanyId, ContractId, PersonnelId, SalesRepId,
};
use crate::billing::memory::InMemoryBillingStore;
use crate::billing::order::OrderDetails;
use crate::billing::personnel::{
    BpCompany, BpEmployeeDetail, Case, ClientCompany, EmploymentStatus, FreelancerDetail,
    PersonType, Personnel, SalesRepresentative,
};
use crate::billing::request::{NewRequestItem, RequestDetails};
use crate::billing::service::{BillingService, CreateOrder, CreateRequest};
use crate::config::BillingConfig;

pub(super) type TestService = BillingService<InMemoryBillingStore, JsonRenderer, MemoryStorage>;

pub(super) const MONTH: &str = "2024-08";

/// Renders the details payload as JSON; can be switched offline or paused mid-render.
#[derive(Default)]
pub(super) struct JsonRenderer {
    offline: AtomicBool,
    rendered: Mutex<Vec<String>>,
    paused: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

/// Handle on a paused render: `reached` fires once rendering started, `release` resumes it.
pub(super) struct RenderPause {
    pub(super) reached: oneshot::Receiver<()>,
    pub(super) release: oneshot::Sender<()>,
}

impl JsonRenderer {
    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Pauses the next render until the returned handle releases it.
    pub(super) fn pause_next_render(&self) -> RenderPause {
        let (reached_tx, reached) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        *self.paused.lock().expect("renderer mutex poisoned") = Some((reached_tx, release_rx));
        RenderPause { reached, release }
    }

    async fn wait_if_paused(&self) {
        let paused = self.paused.lock().expect("renderer mutex poisoned").take();
        if let Some((reached, release)) = paused {
            let _ = reached.send(());
            let _ = release.await;
        }
    }

    pub(super) fn rendered(&self) -> Vec<String> {
        self.rendered.lock().expect("renderer mutex poisoned").clone()
    }

    fn render(
        &self,
        label: String,
        payload: Vec<u8>,
    ) -> Result<RenderedDocument, CollaboratorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Renderer("template service offline".into()));
        }
        self.rendered
            .lock()
            .expect("renderer mutex poisoned")
            .push(label);
        Ok(RenderedDocument {
            content_type: "application/json".to_string(),
            bytes: payload,
        })
    }
}

#[async_trait]
impl DocumentRenderer for JsonRenderer {
    async fn render_order(
        &self,
        details: &OrderDetails,
    ) -> Result<RenderedDocument, CollaboratorError> {
        let payload = serde_json::to_vec(details).unwrap_or_default();
        self.wait_if_paused().await;
        self.render(details.order.order_number.clone(), payload)
    }

    async fn render_request(
        &self,
        details: &RequestDetails,
    ) -> Result<RenderedDocument, CollaboratorError> {
        let payload = serde_json::to_vec(details).unwrap_or_default();
        self.wait_if_paused().await;
        self.render(details.request_number.clone(), payload)
    }
}

#[derive(Default)]
pub(super) struct MemoryStorage {
    offline: AtomicBool,
    objects: Mutex<HashMap<String, RenderedDocument>>,
}

impl MemoryStorage {
    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(super) fn object(&self, key: &str) -> Option<RenderedDocument> {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .get(key)
            .cloned()
    }

    pub(super) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("storage mutex poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(
        &self,
        key: &str,
        document: RenderedDocument,
    ) -> Result<String, CollaboratorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("bucket unreachable".into()));
        }
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .insert(key.to_string(), document);
        Ok(format!("memory://test-bucket/{key}"))
    }
}

pub(super) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub(super) fn basic_salary(amount: Decimal) -> CalculationItem {
    CalculationItem {
        item_name: "基本給".to_string(),
        item_type: ContractItemType::BasicSalary,
        amount,
        payment_unit: PaymentUnit::TenThousandYenPerMonth,
        comment: None,
        is_active: true,
        sort_order: 0,
    }
}

pub(super) fn contract(
    id: u64,
    personnel: u64,
    case: u64,
    start: NaiveDate,
    end: NaiveDate,
) -> Contract {
    Contract {
        id: ContractId(id),
        contract_number: format!("C-{id:04}"),
        personnel_id: PersonnelId(personnel),
        case_id: CaseId(case),
        start_date: start,
        end_date: end,
        unit_price: dec!(640000),
        standard_working_hours: DEFAULT_STANDARD_WORKING_HOURS,
        min_working_hours: Some(dec!(140)),
        max_working_hours: Some(dec!(180)),
        overtime_rate: Decimal::ONE,
        shortage_rate: Decimal::ONE,
        free_overtime_hours: Decimal::ZERO,
        status: ContractStatus::Active,
        calculation_items: vec![basic_salary(dec!(50))],
        change_history: Vec::new(),
    }
}

fn personnel(id: u64, name: &str, person_type: PersonType) -> Personnel {
    Personnel {
        id: PersonnelId(id),
        name: name.to_string(),
        person_type,
        employment_status: EmploymentStatus::Working,
        current_project_end_date: None,
    }
}

/// Two BP companies (9, 8), client 7 with cases 3 and 4, client 70 with case 6, and:
/// personnel 1 (BP 9) on contract 5 for case 3, personnel 2 (BP 8) on contract 6 for case 4,
/// personnel 3 (freelancer) on contract 7 for case 3, personnel 4 (BP 9, no company row) on
/// contract 9 for case 4. Contract 8 is a terminated contract of personnel 1.
pub(super) async fn seed(store: &InMemoryBillingStore) {
    store
        .add_bp_company(BpCompany {
            id: BpCompanyId(9),
            name: "Tech Partners".into(),
        })
        .await;
    store
        .add_bp_company(BpCompany {
            id: BpCompanyId(8),
            name: "Nihon Staffing".into(),
        })
        .await;
    store
        .add_client_company(ClientCompany {
            id: ClientCompanyId(7),
            company_name: "Acme Bank".into(),
        })
        .await;
    store
        .add_client_company(ClientCompany {
            id: ClientCompanyId(70),
            company_name: "Globex".into(),
        })
        .await;
    store
        .add_sales_representative(SalesRepresentative {
            id: SalesRepId(2),
            name: "Sato".into(),
        })
        .await;
    store
        .add_sales_representative(SalesRepresentative {
            id: SalesRepId(4),
            name: "Ito".into(),
        })
        .await;

    for (id, title, client, rep) in [
        (3, "Core banking", 7, Some(2)),
        (4, "Customer portal", 7, Some(4)),
        (6, "Logistics", 70, None),
    ] {
        store
            .add_case(Case {
                id: CaseId(id),
                title: title.into(),
                client_company_id: ClientCompanyId(client),
                sales_representative_id: rep.map(SalesRepId),
                location: Some("Tokyo".into()),
            })
            .await;
    }

    store
        .add_personnel(personnel(1, "Yamada Taro", PersonType::BpEmployee))
        .await;
    store
        .add_personnel(personnel(2, "Suzuki Hanako", PersonType::BpEmployee))
        .await;
    store
        .add_personnel(personnel(3, "Kato Ken", PersonType::Freelancer))
        .await;
    store
        .add_personnel(personnel(4, "Mori Aoi", PersonType::BpEmployee))
        .await;

    for (personnel_id, company) in [(1, 9), (2, 8), (4, 99)] {
        store
            .add_bp_employee_detail(BpEmployeeDetail {
                personnel_id: PersonnelId(personnel_id),
                bp_company_id: BpCompanyId(company),
            })
            .await;
    }
    store
        .add_freelancer_detail(FreelancerDetail {
            personnel_id: PersonnelId(3),
            business_name: Some("Kato Consulting".into()),
        })
        .await;

    let year = (date(2024, 1, 1), date(2024, 12, 31));
    store.add_contract(contract(5, 1, 3, year.0, year.1)).await;
    store.add_contract(contract(6, 2, 4, year.0, year.1)).await;
    store.add_contract(contract(7, 3, 3, year.0, year.1)).await;
    store.add_contract(contract(9, 4, 4, year.0, year.1)).await;
    let mut ended = contract(8, 1, 4, date(2023, 1, 1), date(2023, 12, 31));
    ended.status = ContractStatus::Terminated;
    store.add_contract(ended).await;
}

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<InMemoryBillingStore>,
    pub(super) renderer: Arc<JsonRenderer>,
    pub(super) storage: Arc<MemoryStorage>,
}

pub(super) async fn harness() -> Harness {
    let store = Arc::new(InMemoryBillingStore::new());
    seed(&store).await;
    let renderer = Arc::new(JsonRenderer::default());
    let storage = Arc::new(MemoryStorage::default());
    let service = Arc::new(BillingService::new(
        store.clone(),
        renderer.clone(),
        storage.clone(),
        BillingConfig::default(),
    ));
    Harness {
        service,
        store,
        renderer,
        storage,
    }
}

pub(super) fn create_order(personnel: u64, case: u64, contract: u64) -> CreateOrder {
    CreateOrder {
        personnel_id: PersonnelId(personnel),
        case_id: CaseId(case),
        contract_id: ContractId(contract),
        year_month: MONTH.to_string(),
        remark: None,
    }
}

pub(super) fn item(personnel: u64, case: u64, contract: u64, amount: Decimal) -> NewRequestItem {
    NewRequestItem {
        personnel_id: PersonnelId(personnel),
        case_id: CaseId(case),
        contract_id: ContractId(contract),
        item_amount: amount,
        work_hours: dec!(160),
        unit_price: amount,
        remark: None,
    }
}

pub(super) fn create_request(items: Vec<NewRequestItem>) -> CreateRequest {
    CreateRequest {
        client_company_id: ClientCompanyId(7),
        year_month: MONTH.to_string(),
        items,
        tax_rate: Some(dec!(10)),
        payment_due_date: Some(date(2024, 9, 30)),
        order_document_url: None,
        remark: None,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
