use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::collaborators::{DocumentRenderer, ObjectStorage, RenderedDocument};
use super::ids::{BatchId, ContractId, OrderId, RequestId};
use super::repository::{BillingStore, RepositoryError};
use super::request::{NewRequestItem, RequestUpdate};
use super::service::{
    AmendContract, AttachOrders, BillingError, BillingService, ContractAction, CreateBatch,
    CreateOrder, CreateRequest, GenerateOrders, GenerateRequests, PayRequest, TerminateContract,
};

const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/pdf";

type Shared<S, R, O> = Arc<BillingService<S, R, O>>;

/// Router exposing the order, request, batch and contract endpoints.
pub fn billing_router<S, R, O>(service: Shared<S, R, O>) -> Router
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    Router::new()
        .route("/api/v1/orders", post(create_order_handler::<S, R, O>))
        .route("/api/v1/orders/generate", post(generate_orders_handler::<S, R, O>))
        .route("/api/v1/orders/send", post(send_orders_handler::<S, R, O>))
        .route(
            "/api/v1/orders/:id",
            get(order_details_handler::<S, R, O>).delete(delete_order_handler::<S, R, O>),
        )
        .route("/api/v1/orders/:id/send", post(send_order_handler::<S, R, O>))
        .route(
            "/api/v1/orders/:id/collect",
            post(collect_order_handler::<S, R, O>),
        )
        .route(
            "/api/v1/orders/:id/document",
            post(order_document_handler::<S, R, O>),
        )
        .route(
            "/api/v1/orders/:id/acknowledgement",
            post(order_acknowledgement_handler::<S, R, O>),
        )
        .route("/api/v1/requests", post(create_request_handler::<S, R, O>))
        .route(
            "/api/v1/requests/generate",
            post(generate_requests_handler::<S, R, O>),
        )
        .route("/api/v1/requests/send", post(send_requests_handler::<S, R, O>))
        .route(
            "/api/v1/requests/:id",
            get(request_details_handler::<S, R, O>)
                .patch(update_request_handler::<S, R, O>)
                .delete(delete_request_handler::<S, R, O>),
        )
        .route(
            "/api/v1/requests/:id/items",
            put(replace_items_handler::<S, R, O>),
        )
        .route(
            "/api/v1/requests/:id/send",
            post(send_request_handler::<S, R, O>),
        )
        .route("/api/v1/requests/:id/pay", post(pay_request_handler::<S, R, O>))
        .route(
            "/api/v1/requests/:id/document",
            post(request_document_handler::<S, R, O>),
        )
        .route(
            "/api/v1/requests/:id/order-document",
            post(request_order_document_handler::<S, R, O>),
        )
        .route("/api/v1/batches", post(create_batch_handler::<S, R, O>))
        .route("/api/v1/batches/:id", get(batch_handler::<S, R, O>))
        .route(
            "/api/v1/batches/:id/orders",
            post(attach_orders_handler::<S, R, O>),
        )
        .route(
            "/api/v1/batches/:id/refresh",
            post(refresh_batch_handler::<S, R, O>),
        )
        .route("/api/v1/batches/:id/send", post(send_batch_handler::<S, R, O>))
        .route(
            "/api/v1/batches/:id/process",
            post(process_batch_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/sweep",
            post(sweep_contracts_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/expiring",
            get(expiring_contracts_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/terminate",
            post(terminate_contract_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/suspend",
            post(suspend_contract_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/resume",
            post(resume_contract_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/cancel",
            post(cancel_contract_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/amend",
            post(amend_contract_handler::<S, R, O>),
        )
        .route(
            "/api/v1/contracts/:id/payment",
            get(payment_handler::<S, R, O>),
        )
        .with_state(service)
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Duplicate { .. } | BillingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            BillingError::NotFound { .. } | BillingError::Repository(RepositoryError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            BillingError::Repository(RepositoryError::Invalid(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BillingError::Repository(
                RepositoryError::Conflict
                | RepositoryError::Transition(_)
                | RepositoryError::Contract(_)
                | RepositoryError::Batch(_),
            ) => StatusCode::CONFLICT,
            BillingError::Collaborator(_)
            | BillingError::Repository(RepositoryError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let payload = json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (status, Json(payload)).into_response()
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, BillingError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorBody {
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendOrdersBody {
    pub order_ids: Vec<OrderId>,
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequestsBody {
    pub request_ids: Vec<RequestId>,
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessBatchBody {
    pub processed_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceItemsBody {
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepBody {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiringQuery {
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentQuery {
    pub actual_hours: Decimal,
}

pub(crate) async fn create_order_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(command): Json<CreateOrder>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::CREATED, service.create_order(command).await)
}

pub(crate) async fn order_details_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.order_details(OrderId(id)).await)
}

pub(crate) async fn delete_order_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    match service.delete_order(OrderId(id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn send_order_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.send_order(OrderId(id), &body.actor).await)
}

pub(crate) async fn collect_order_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.collect_order(OrderId(id)).await)
}

pub(crate) async fn order_document_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.generate_order_document(OrderId(id)).await,
    )
}

/// Raw upload body; the content type header defaults to PDF.
fn uploaded_document(headers: &HeaderMap, body: Bytes) -> RenderedDocument {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE);
    RenderedDocument {
        content_type: content_type.to_string(),
        bytes: body.to_vec(),
    }
}

pub(crate) async fn order_acknowledgement_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let document = uploaded_document(&headers, body);
    respond(
        StatusCode::OK,
        service
            .upload_order_acknowledgement(OrderId(id), document)
            .await,
    )
}

pub(crate) async fn generate_orders_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(command): Json<GenerateOrders>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.generate_orders_for_month(command).await,
    )
}

pub(crate) async fn send_orders_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(body): Json<SendOrdersBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let outcome = service.send_orders(&body.order_ids, &body.actor).await;
    (StatusCode::OK, Json(outcome)).into_response()
}

pub(crate) async fn create_request_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(command): Json<CreateRequest>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::CREATED, service.create_request(command).await)
}

pub(crate) async fn generate_requests_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(command): Json<GenerateRequests>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.generate_requests_for_month(command).await,
    )
}

pub(crate) async fn send_requests_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(body): Json<SendRequestsBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let outcome = service.send_requests(&body.request_ids, &body.actor).await;
    (StatusCode::OK, Json(outcome)).into_response()
}

pub(crate) async fn update_request_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(update): Json<RequestUpdate>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.update_request(RequestId(id), update).await,
    )
}

pub(crate) async fn delete_request_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    match service.delete_request(RequestId(id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn request_order_document_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let document = uploaded_document(&headers, body);
    respond(
        StatusCode::OK,
        service.upload_order_document(RequestId(id), document).await,
    )
}

pub(crate) async fn request_details_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.request_details(RequestId(id)).await)
}

pub(crate) async fn replace_items_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(body): Json<ReplaceItemsBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.replace_request_items(RequestId(id), body.items).await,
    )
}

pub(crate) async fn send_request_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.send_request(RequestId(id), &body.actor).await,
    )
}

pub(crate) async fn pay_request_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(payment): Json<PayRequest>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.pay_request(RequestId(id), payment).await,
    )
}

pub(crate) async fn request_document_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.generate_request_document(RequestId(id)).await,
    )
}

pub(crate) async fn create_batch_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(command): Json<CreateBatch>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::CREATED, service.create_batch(command).await)
}

pub(crate) async fn batch_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.batch(BatchId(id)).await)
}

pub(crate) async fn attach_orders_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<AttachOrders>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.add_orders_to_batch(BatchId(id), command).await,
    )
}

pub(crate) async fn refresh_batch_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(StatusCode::OK, service.refresh_batch(BatchId(id)).await)
}

pub(crate) async fn send_batch_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(body): Json<ActorBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.send_batch(BatchId(id), &body.actor).await,
    )
}

pub(crate) async fn process_batch_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(body): Json<ProcessBatchBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service
            .mark_batch_processed(BatchId(id), &body.processed_by)
            .await,
    )
}

pub(crate) async fn sweep_contracts_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Json(body): Json<SweepBody>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let as_of = body.as_of.unwrap_or_else(|| Utc::now().date_naive());
    respond(StatusCode::OK, service.sweep_expired_contracts(as_of).await)
}

pub(crate) async fn expiring_contracts_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Query(query): Query<ExpiringQuery>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    let days = query
        .days
        .unwrap_or(service.config().expiry_notice_days);
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    respond(
        StatusCode::OK,
        service.contracts_expiring_within(days, as_of).await,
    )
}

pub(crate) async fn terminate_contract_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<TerminateContract>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.terminate_contract(ContractId(id), command).await,
    )
}

pub(crate) async fn suspend_contract_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<ContractAction>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.suspend_contract(ContractId(id), command).await,
    )
}

pub(crate) async fn resume_contract_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<ContractAction>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.resume_contract(ContractId(id), command).await,
    )
}

pub(crate) async fn cancel_contract_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<ContractAction>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.cancel_contract(ContractId(id), command).await,
    )
}

pub(crate) async fn amend_contract_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Json(command): Json<AmendContract>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service.amend_contract(ContractId(id), command).await,
    )
}

pub(crate) async fn payment_handler<S, R, O>(
    State(service): State<Shared<S, R, O>>,
    Path(id): Path<u64>,
    Query(query): Query<PaymentQuery>,
) -> Response
where
    S: BillingStore + 'static,
    R: DocumentRenderer + 'static,
    O: ObjectStorage + 'static,
{
    respond(
        StatusCode::OK,
        service
            .monthly_payment(ContractId(id), query.actual_hours)
            .await,
    )
}
