use super::common::*;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::Json;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::billing::memory::InMemoryBillingStore;
use crate::billing::router::{self, billing_router, PaymentQuery, SweepBody};

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request")
}

fn decimal_field(payload: &Value, field: &str) -> Option<Decimal> {
    payload.get(field)?.as_str()?.parse().ok()
}

fn order_payload(personnel: u64, case: u64, contract: u64) -> Value {
    json!({
        "personnel_id": personnel,
        "case_id": case,
        "contract_id": contract,
        "year_month": MONTH,
    })
}

#[tokio::test]
async fn create_order_route_returns_created() {
    let h = harness().await;
    let router = billing_router(h.service.clone());

    let response = router
        .oneshot(post_json("/api/v1/orders", order_payload(1, 3, 5)))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["order_number"], "202408-001");
    assert_eq!(payload["status"], "draft");
    assert_eq!(payload["year_month"], MONTH);
}

#[tokio::test]
async fn duplicate_order_route_returns_conflict() {
    let h = harness().await;
    let router = billing_router(h.service.clone());

    let first = router
        .clone()
        .oneshot(post_json("/api/v1/orders", order_payload(1, 3, 5)))
        .await
        .expect("route executes");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = router
        .oneshot(post_json("/api/v1/orders", order_payload(1, 3, 5)))
        .await
        .expect("route executes");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let payload = read_json_body(second).await;
    assert_eq!(payload["retryable"], false);
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("already exists"));
}

#[tokio::test]
async fn invalid_month_is_unprocessable() {
    let h = harness().await;
    let mut payload = order_payload(1, 3, 5);
    payload["year_month"] = json!("2024-00");

    let response = billing_router(h.service.clone())
        .oneshot(post_json("/api/v1/orders", payload))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let h = harness().await;
    let response = billing_router(h.service.clone())
        .oneshot(
            Request::get("/api/v1/orders/404")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_details_route_returns_resolved_names() {
    let h = harness().await;
    let order = h
        .service
        .create_order(create_order(1, 3, 5))
        .await
        .expect("order");

    let response = billing_router(h.service.clone())
        .oneshot(
            Request::get(format!("/api/v1/orders/{}", order.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["order_number"], "202408-001");
    assert_eq!(payload["bp_company_name"], "Tech Partners");
    assert_eq!(payload["year_month_label"], "2024年8月");
}

#[tokio::test]
async fn storage_outage_is_service_unavailable() {
    let h = harness().await;
    let order = h
        .service
        .create_order(create_order(1, 3, 5))
        .await
        .expect("order");
    h.storage.set_offline(true);

    let response = billing_router(h.service.clone())
        .oneshot(
            Request::post(format!("/api/v1/orders/{}/document", order.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retryable"], true);
}

#[tokio::test]
async fn delete_route_returns_no_content_for_drafts() {
    let h = harness().await;
    let order = h
        .service
        .create_order(create_order(1, 3, 5))
        .await
        .expect("order");
    let router = billing_router(h.service.clone());
    let uri = format!("/api/v1/orders/{}", order.id);

    let response = router
        .clone()
        .oneshot(Request::delete(&uri).body(Body::empty()).expect("request"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(Request::delete(&uri).body(Body::empty()).expect("request"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_request_handler_returns_totals() {
    let h = harness().await;
    let response = router::create_request_handler::<
        InMemoryBillingStore,
        JsonRenderer,
        MemoryStorage,
    >(
        State(h.service.clone()),
        Json(create_request(vec![item(1, 3, 5, dec!(500000))])),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(decimal_field(&payload, "request_amount"), Some(dec!(550000)));
    assert_eq!(payload["request_number"], "REQ202408-001");
    assert_eq!(payload["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn paying_an_unsent_request_is_a_conflict() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");

    let response = billing_router(h.service.clone())
        .oneshot(post_json(
            &format!("/api/v1/requests/{}/pay", created.request.id),
            json!({ "payment_amount": "110" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn batch_route_rejects_missing_filter() {
    let h = harness().await;
    let response = billing_router(h.service.clone())
        .oneshot(post_json(
            "/api/v1/batches",
            json!({
                "year_month": MONTH,
                "batch_type": "by_bp_company",
                "created_by": "ops",
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn sweep_handler_reports_terminated_contracts() {
    let h = harness().await;
    let response = router::sweep_contracts_handler::<
        InMemoryBillingStore,
        JsonRenderer,
        MemoryStorage,
    >(
        State(h.service.clone()),
        Json(SweepBody {
            as_of: Some(date(2025, 1, 1)),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["as_of"], "2025-01-01");
    assert_eq!(payload["terminated"], json!([5, 6, 7, 9]));
}

#[tokio::test]
async fn payment_handler_returns_breakdown() {
    let h = harness().await;
    let response = router::payment_handler::<InMemoryBillingStore, JsonRenderer, MemoryStorage>(
        State(h.service.clone()),
        Path(5),
        Query(PaymentQuery {
            actual_hours: dec!(190),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(decimal_field(&payload, "total_payment"), Some(dec!(680000)));
    assert_eq!(payload["contract_number"], "C-0005");
}

#[tokio::test]
async fn request_routes_update_and_delete_drafts() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(1000))]))
        .await
        .expect("request");
    let router = billing_router(h.service.clone());
    let uri = format!("/api/v1/requests/{}", created.request.id);

    let response = router
        .clone()
        .oneshot(
            Request::patch(&uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "tax_rate": "8" }).to_string()))
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(decimal_field(&payload, "request_amount"), Some(dec!(1080)));

    let response = router
        .clone()
        .oneshot(Request::delete(&uri).body(Body::empty()).expect("request"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(Request::get(&uri).body(Body::empty()).expect("request"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generate_requests_route_reports_created_requests() {
    let h = harness().await;
    let router = billing_router(h.service.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/requests/generate",
            json!({ "year_month": MONTH, "client_company_id": 7 }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["created"].as_array().map(Vec::len), Some(1));
    assert_eq!(payload["documents_generated"], 1);

    let response = router
        .oneshot(post_json(
            "/api/v1/requests/generate",
            json!({ "year_month": MONTH, "client_company_id": 70 }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn uploaded_documents_default_to_pdf() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");

    let response = billing_router(h.service.clone())
        .oneshot(
            Request::post(format!(
                "/api/v1/requests/{}/order-document",
                created.request.id
            ))
            .body(Body::from("%PDF-1.4"))
            .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload["order_document_url"],
        "memory://test-bucket/requests/2024-08/orders/REQ202408-001_order.pdf"
    );
    let stored = h
        .storage
        .object("requests/2024-08/orders/REQ202408-001_order.pdf")
        .expect("stored upload");
    assert_eq!(stored.content_type, "application/pdf");
    assert_eq!(stored.bytes, b"%PDF-1.4".to_vec());
}

#[tokio::test]
async fn acknowledgement_upload_before_sending_is_a_conflict() {
    let h = harness().await;
    let order = h
        .service
        .create_order(create_order(1, 3, 5))
        .await
        .expect("order");

    let response = billing_router(h.service.clone())
        .oneshot(
            Request::post(format!("/api/v1/orders/{}/acknowledgement", order.id))
                .header(header::CONTENT_TYPE, "image/png")
                .body(Body::from("scan"))
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unbounded_expiry_window_is_accepted() {
    let h = harness().await;
    let response = billing_router(h.service.clone())
        .oneshot(
            Request::get("/api/v1/contracts/expiring?days=4294967295&as_of=2024-11-01")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(4));
}
