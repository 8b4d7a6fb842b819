use super::common::*;
use crate::billing::collaborators::RenderedDocument;
use crate::billing::ids::{CaseId, ClientCompanyId, PersonnelId, RequestId};
use crate::billing::request::RequestUpdate;
use crate::billing::service::{BillingError, GenerateRequests, PayRequest};
use crate::billing::status::RequestStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn generate_for(client: u64) -> GenerateRequests {
    GenerateRequests {
        year_month: MONTH.into(),
        client_company_id: ClientCompanyId(client),
        case_ids: None,
        personnel_ids: None,
    }
}

#[tokio::test]
async fn request_totals_include_tax() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(500000))]))
        .await
        .expect("request");

    let request = &created.request;
    assert_eq!(request.request_number, "REQ202408-001");
    assert_eq!(request.tax_excluded_amount, dec!(500000));
    assert_eq!(request.calculation_amount, dec!(500000));
    assert_eq!(request.request_amount, dec!(550000));
    assert_eq!(request.status, RequestStatus::Draft);
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].request_id, request.id);
}

#[tokio::test]
async fn omitted_tax_rate_uses_configured_default() {
    let h = harness().await;
    let mut command = create_request(vec![item(1, 3, 5, dec!(1000))]);
    command.tax_rate = None;

    let created = h.service.create_request(command).await.expect("request");
    assert_eq!(created.request.tax_rate, dec!(10));
    assert_eq!(created.request.request_amount, dec!(1100));
}

#[tokio::test]
async fn duplicate_items_are_rejected_without_writes() {
    let h = harness().await;
    let err = h
        .service
        .create_request(create_request(vec![
            item(1, 3, 5, dec!(100)),
            item(1, 3, 5, dec!(200)),
        ]))
        .await
        .expect_err("duplicate pair");

    assert!(matches!(err, BillingError::Validation(_)));
    assert_eq!(h.store.request_count().await, 0);
}

#[tokio::test]
async fn invalid_items_and_tax_rates_are_rejected() {
    let h = harness().await;

    let err = h
        .service
        .create_request(create_request(Vec::new()))
        .await
        .expect_err("no items");
    assert!(matches!(err, BillingError::Validation(_)));

    let mut command = create_request(vec![item(1, 3, 5, dec!(100))]);
    command.tax_rate = Some(dec!(150));
    assert!(matches!(
        h.service.create_request(command).await,
        Err(BillingError::Validation(_))
    ));

    let err = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(-1))]))
        .await
        .expect_err("negative amount");
    assert!(err.to_string().contains("item_amount"));
    assert_eq!(h.store.request_count().await, 0);
}

#[tokio::test]
async fn items_must_belong_to_the_client() {
    let h = harness().await;

    let err = h
        .service
        .create_request(create_request(vec![item(1, 6, 5, dec!(100))]))
        .await
        .expect_err("case of another client");
    assert!(matches!(err, BillingError::Validation(_)));

    let err = h
        .service
        .create_request(create_request(vec![item(1, 3, 404, dec!(100))]))
        .await
        .expect_err("missing contract");
    assert!(matches!(
        err,
        BillingError::NotFound {
            entity: "contract",
            id: 404
        }
    ));

    let mut command = create_request(vec![item(1, 3, 5, dec!(100))]);
    command.client_company_id = crate::billing::ClientCompanyId(404);
    assert!(matches!(
        h.service.create_request(command).await,
        Err(BillingError::NotFound {
            entity: "client company",
            ..
        })
    ));
}

#[tokio::test]
async fn second_request_for_same_client_and_month_is_a_duplicate() {
    let h = harness().await;
    h.service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("first request");

    let err = h
        .service
        .create_request(create_request(vec![item(2, 4, 6, dec!(100))]))
        .await
        .expect_err("same client and month");
    assert!(matches!(err, BillingError::Duplicate { entity: "request", .. }));
    assert_eq!(h.store.request_count().await, 1);
}

#[tokio::test]
async fn details_scale_amounts_and_join_names() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![
            item(1, 3, 5, dec!(50)),
            item(2, 4, 6, dec!(30)),
        ]))
        .await
        .expect("request");
    assert_eq!(created.request.request_amount, dec!(88));

    let details = h
        .service
        .request_details(created.request.id)
        .await
        .expect("details");
    assert_eq!(details.client_company_name, "Acme Bank");
    assert_eq!(details.personnel_names, "Yamada Taro, Suzuki Hanako");
    assert_eq!(details.case_titles, "Core banking, Customer portal");
    assert_eq!(details.sales_representative_name, "Sato");
    assert_eq!(details.tax_excluded_amount, dec!(800000));
    assert_eq!(details.request_amount, dec!(880000));
    assert_eq!(details.basic_salary, dec!(800000));
    assert_eq!(details.items[1].item_amount, dec!(300000));
    assert_eq!(details.year_month_label, "2024年8月");
}

#[tokio::test]
async fn replacing_items_rederives_totals_until_sent() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");
    let id = created.request.id;

    let replaced = h
        .service
        .replace_request_items(id, vec![item(1, 3, 5, dec!(200)), item(2, 4, 6, dec!(300))])
        .await
        .expect("replace");
    assert_eq!(replaced.items.len(), 2);
    assert_eq!(replaced.request.tax_excluded_amount, dec!(500));
    assert_eq!(replaced.request.request_amount, dec!(550));

    let stored = h.service.request(id).await.expect("stored");
    assert_eq!(stored.items.len(), 2);

    h.service.send_request(id, "ops").await.expect("send");
    let err = h
        .service
        .replace_request_items(id, vec![item(1, 3, 5, dec!(999))])
        .await
        .expect_err("sent request");
    assert!(matches!(
        err,
        BillingError::InvalidTransition {
            document: "request",
            from: "sent",
            to: "edited"
        }
    ));
    let stored = h.service.request(id).await.expect("stored");
    assert_eq!(stored.request.tax_excluded_amount, dec!(500));
}

#[tokio::test]
async fn payment_requires_a_sent_request() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(500000))]))
        .await
        .expect("request");
    let id = created.request.id;

    let err = h
        .service
        .pay_request(id, PayRequest::default())
        .await
        .expect_err("draft request");
    assert!(matches!(err, BillingError::InvalidTransition { .. }));

    let sent = h.service.send_request(id, "tanaka").await.expect("send");
    assert_eq!(sent.status, RequestStatus::Sent);
    assert_eq!(sent.sent_by.as_deref(), Some("tanaka"));

    let err = h
        .service
        .pay_request(
            id,
            PayRequest {
                payment_received_date: None,
                payment_amount: Some(dec!(0)),
            },
        )
        .await
        .expect_err("zero payment");
    assert!(matches!(err, BillingError::Validation(_)));

    let paid = h
        .service
        .pay_request(
            id,
            PayRequest {
                payment_received_date: Some(date(2024, 9, 25)),
                payment_amount: Some(dec!(550000)),
            },
        )
        .await
        .expect("pay");
    assert_eq!(paid.status, RequestStatus::Paid);
    assert_eq!(paid.payment_received_date, Some(date(2024, 9, 25)));
    assert_eq!(paid.payment_amount, Some(dec!(550000)));

    assert!(h.service.send_request(id, "tanaka").await.is_err());
}

#[tokio::test]
async fn request_document_is_uploaded_under_its_month() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(500000))]))
        .await
        .expect("request");

    let generated = h
        .service
        .generate_request_document(created.request.id)
        .await
        .expect("document");
    assert_eq!(generated.status, RequestStatus::Generated);
    assert_eq!(
        generated.request_document_url.as_deref(),
        Some("memory://test-bucket/requests/2024-08/REQ202408-001.pdf")
    );
    let object = h
        .storage
        .object("requests/2024-08/REQ202408-001.pdf")
        .expect("uploaded");
    let payload: serde_json::Value = serde_json::from_slice(&object.bytes).expect("json");
    assert_eq!(payload["client_company_name"], "Acme Bank");
}

#[tokio::test]
async fn renderer_failure_keeps_request_in_draft() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");

    h.renderer.set_offline(true);
    let err = h
        .service
        .generate_request_document(created.request.id)
        .await
        .expect_err("renderer offline");
    assert!(err.is_retryable());
    assert!(h.storage.keys().is_empty());

    let stored = h.service.request(created.request.id).await.expect("stored");
    assert_eq!(stored.request.status, RequestStatus::Draft);
    assert!(matches!(
        h.service.request(RequestId(404)).await,
        Err(BillingError::NotFound { entity: "request", .. })
    ));
}

#[tokio::test]
async fn out_of_range_amounts_are_validation_errors() {
    let h = harness().await;
    let err = h
        .service
        .create_request(create_request(vec![
            item(1, 3, 5, Decimal::MAX),
            item(2, 4, 6, Decimal::MAX),
        ]))
        .await
        .expect_err("amounts beyond the storable range");
    assert!(matches!(err, BillingError::Validation(_)));

    let err = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(1e25))]))
        .await
        .expect_err("amount beyond the storable range");
    assert!(err.to_string().contains("item_amount"));

    let mut huge_hours = item(1, 3, 5, dec!(50));
    huge_hours.work_hours = dec!(1e20);
    assert!(matches!(
        h.service.create_request(create_request(vec![huge_hours])).await,
        Err(BillingError::Validation(_))
    ));
    assert_eq!(h.store.request_count().await, 0);
}

#[tokio::test]
async fn concurrent_creators_produce_exactly_one_request() {
    let h = harness().await;
    let (first, second) = tokio::join!(
        h.service
            .create_request(create_request(vec![item(1, 3, 5, dec!(100))])),
        h.service
            .create_request(create_request(vec![item(2, 4, 6, dec!(70))])),
    );

    let (winner, loser) = match (first, second) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one request, got {other:?}"),
    };
    assert!(matches!(loser, BillingError::Duplicate { entity: "request", .. }));
    assert_eq!(h.store.request_count().await, 1);

    let stored = h.service.request(winner.request.id).await.expect("stored");
    assert_eq!(stored.items, winner.items);
    assert_eq!(stored.items.len(), 1);
}

#[tokio::test]
async fn items_replaced_while_rendering_keep_their_totals() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");
    let id = created.request.id;

    let RenderPause { reached, release } = h.renderer.pause_next_render();
    let (generated, replaced) = tokio::join!(h.service.generate_request_document(id), async {
        reached.await.expect("rendering started");
        let replaced = h
            .service
            .replace_request_items(id, vec![item(1, 3, 5, dec!(40)), item(2, 4, 6, dec!(60))])
            .await;
        let _ = release.send(());
        replaced
    });

    replaced.expect("replace during rendering");
    let generated = generated.expect("document");
    assert_eq!(generated.status, RequestStatus::Generated);
    assert_eq!(generated.tax_excluded_amount, dec!(100));
    assert_eq!(generated.request_amount, dec!(110));

    let stored = h.service.request(id).await.expect("stored");
    assert_eq!(stored.items.len(), 2);
    assert_eq!(stored.request.tax_excluded_amount, dec!(100));
    assert_eq!(
        stored.request.request_document_url.as_deref(),
        Some("memory://test-bucket/requests/2024-08/REQ202408-001.pdf")
    );
}

#[tokio::test]
async fn sending_while_the_request_renders_is_kept() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");
    let id = created.request.id;

    let RenderPause { reached, release } = h.renderer.pause_next_render();
    let (generated, sent) = tokio::join!(h.service.generate_request_document(id), async {
        reached.await.expect("rendering started");
        let sent = h.service.send_request(id, "tanaka").await;
        let _ = release.send(());
        sent
    });

    sent.expect("send during rendering");
    assert!(matches!(
        generated,
        Err(BillingError::InvalidTransition { from: "sent", .. })
    ));
    let stored = h.service.request(id).await.expect("stored");
    assert_eq!(stored.request.status, RequestStatus::Sent);
    assert_eq!(stored.request.sent_by.as_deref(), Some("tanaka"));
}

#[tokio::test]
async fn updates_rederive_totals_and_freeze_terms_once_sent() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(1000))]))
        .await
        .expect("request");
    let id = created.request.id;

    let updated = h
        .service
        .update_request(
            id,
            RequestUpdate {
                tax_rate: Some(dec!(8)),
                remark: Some("revised".into()),
                ..RequestUpdate::default()
            },
        )
        .await
        .expect("draft update");
    assert_eq!(updated.tax_rate, dec!(8));
    assert_eq!(updated.request_amount, dec!(1080));
    assert_eq!(updated.remark.as_deref(), Some("revised"));

    assert!(matches!(
        h.service
            .update_request(
                id,
                RequestUpdate {
                    tax_rate: Some(dec!(101)),
                    ..RequestUpdate::default()
                },
            )
            .await,
        Err(BillingError::Validation(_))
    ));

    h.service.send_request(id, "ops").await.expect("send");
    let err = h
        .service
        .update_request(
            id,
            RequestUpdate {
                payment_due_date: Some(date(2024, 10, 31)),
                ..RequestUpdate::default()
            },
        )
        .await
        .expect_err("terms frozen after sending");
    assert!(matches!(
        err,
        BillingError::InvalidTransition {
            from: "sent",
            to: "edited",
            ..
        }
    ));

    let updated = h
        .service
        .update_request(
            id,
            RequestUpdate {
                order_document_url: Some("https://files.example/po-42.pdf".into()),
                remark: Some("po attached".into()),
                ..RequestUpdate::default()
            },
        )
        .await
        .expect("remark after sending");
    assert_eq!(updated.payment_due_date, Some(date(2024, 9, 30)));
    assert_eq!(updated.remark.as_deref(), Some("po attached"));
    assert_eq!(updated.request_amount, dec!(1080));
}

#[tokio::test]
async fn only_unsent_requests_can_be_deleted() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100)), item(2, 4, 6, dec!(5))]))
        .await
        .expect("request");

    let deleted = h.service.delete_request(created.request.id).await.expect("delete");
    assert_eq!(deleted.request_number, "REQ202408-001");
    assert_eq!(h.store.request_count().await, 0);
    assert!(matches!(
        h.service.request(created.request.id).await,
        Err(BillingError::NotFound { entity: "request", .. })
    ));

    let again = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("period released");
    h.service.send_request(again.request.id, "ops").await.expect("send");
    let err = h
        .service
        .delete_request(again.request.id)
        .await
        .expect_err("sent request");
    assert!(matches!(
        err,
        BillingError::InvalidTransition {
            document: "request",
            from: "sent",
            to: "deleted"
        }
    ));
    assert!(matches!(
        h.service.delete_request(RequestId(404)).await,
        Err(BillingError::NotFound { .. })
    ));
}

#[tokio::test]
async fn bulk_request_send_counts_already_sent_as_failures() {
    let h = harness().await;
    let first = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");
    let id = first.request.id;
    h.service.send_request(id, "ops").await.expect("pre-sent");

    let outcome = h.service.send_requests(&[id, RequestId(404)], "ops").await;
    assert!(outcome.succeeded.is_empty());
    assert_eq!(outcome.failure_count(), 2);
    assert!(outcome.failures[0].message.contains("sent"));
}

#[tokio::test]
async fn client_order_documents_are_stored_against_the_request() {
    let h = harness().await;
    let created = h
        .service
        .create_request(create_request(vec![item(1, 3, 5, dec!(100))]))
        .await
        .expect("request");
    let id = created.request.id;
    h.service.send_request(id, "ops").await.expect("send");

    let document = RenderedDocument {
        content_type: "application/pdf".into(),
        bytes: b"%PDF-1.4 purchase order".to_vec(),
    };
    let empty = RenderedDocument {
        bytes: Vec::new(),
        ..document.clone()
    };
    assert!(matches!(
        h.service.upload_order_document(id, empty).await,
        Err(BillingError::Validation(_))
    ));

    let updated = h
        .service
        .upload_order_document(id, document.clone())
        .await
        .expect("upload");
    assert_eq!(updated.status, RequestStatus::Sent);
    assert_eq!(
        updated.order_document_url.as_deref(),
        Some("memory://test-bucket/requests/2024-08/orders/REQ202408-001_order.pdf")
    );
    assert_eq!(
        h.storage.object("requests/2024-08/orders/REQ202408-001_order.pdf"),
        Some(document.clone())
    );
    assert!(matches!(
        h.service.upload_order_document(RequestId(404), document).await,
        Err(BillingError::NotFound { entity: "request", .. })
    ));
}

#[tokio::test]
async fn monthly_request_generation_bills_every_active_contract_of_the_client() {
    let h = harness().await;
    let report = h
        .service
        .generate_requests_for_month(generate_for(7))
        .await
        .expect("generation");

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.documents_generated, 1);
    assert!(report.failures.is_empty());
    let request = &report.created[0];
    assert_eq!(request.status, RequestStatus::Generated);
    assert_eq!(request.tax_rate, dec!(10));
    assert_eq!(request.tax_excluded_amount, dec!(200));
    assert_eq!(request.request_amount, dec!(220));
    assert_eq!(request.remark.as_deref(), Some("2024年8月の月度請求書"));

    let stored = h.service.request(request.id).await.expect("stored");
    let contracts: Vec<u64> = stored.items.iter().map(|item| item.contract_id.0).collect();
    assert_eq!(contracts, vec![5, 6, 7, 9]);
    assert!(stored.items.iter().all(|item| item.work_hours == dec!(160)));
    assert!(stored.items.iter().all(|item| item.unit_price == dec!(50)));
    assert_eq!(stored.items[0].remark.as_deref(), Some("2024年8月分"));

    let again = h
        .service
        .generate_requests_for_month(generate_for(7))
        .await
        .expect("second run");
    assert!(again.created.is_empty());
    assert_eq!(again.skipped, 1);
    assert_eq!(h.store.request_count().await, 1);
}

#[tokio::test]
async fn monthly_request_generation_honours_filters_and_render_failures() {
    let h = harness().await;
    let mut command = generate_for(7);
    command.personnel_ids = Some(vec![PersonnelId(1), PersonnelId(3)]);
    command.case_ids = Some(vec![CaseId(3)]);

    h.renderer.set_offline(true);
    let report = h
        .service
        .generate_requests_for_month(command)
        .await
        .expect("generation");
    assert_eq!(report.documents_generated, 0);
    assert_eq!(report.failures.len(), 1);
    let request = &report.created[0];
    assert_eq!(request.status, RequestStatus::Draft);
    assert_eq!(request.tax_excluded_amount, dec!(100));

    let err = h
        .service
        .generate_requests_for_month(generate_for(70))
        .await
        .expect_err("client without active contracts");
    assert!(matches!(err, BillingError::Validation(_)));

    assert!(matches!(
        h.service.generate_requests_for_month(generate_for(404)).await,
        Err(BillingError::NotFound { entity: "client company", .. })
    ));
}
