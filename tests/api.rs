//! API Integration Tests
//!
//! Full HTTP round trips through auth, routing, handlers and the in-memory store.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Duration;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use sale_ledger::audit::AuditLog;

mod common;

use common::{dec, json_request, setup_test_app, TestApp, ADMIN_KEY, READ_ONLY_KEY};

/// Installment sale of 1,000,000 at 5% with one plan covering the price
async fn open_installment_sale(app: &TestApp) -> (Uuid, Uuid) {
    let (status, body) = app
        .post(
            "/api/v1/sales",
            json!({
                "unit_reference": "TOWER-C-0905",
                "quantity": 1,
                "sale_price": "1000000",
                "payment_plan_type": "installment",
                "commission_percentage": "5"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "sale creation failed: {}", body);
    let sale_id: Uuid = serde_json::from_value(body["sale"]["sale_id"].clone()).unwrap();

    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/plans", sale_id),
            json!({ "total_amount": "1000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "plan creation failed: {}", body);
    let plan_id: Uuid = serde_json::from_value(body["sale"]["plans"][0]["plan_id"].clone()).unwrap();

    (sale_id, plan_id)
}

async fn pay_plan(app: &TestApp, sale_id: Uuid, plan_id: Uuid, amount: &str) -> Value {
    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/plans/{}/payments", sale_id, plan_id),
            json!({ "amount": amount }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "payment failed: {}", body);
    body
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let app = setup_test_app();
    let (status, body) = app
        .send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_installment_progress_e2e() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;

    pay_plan(&app, sale_id, plan_id, "300000").await;
    let body = pay_plan(&app, sale_id, plan_id, "200000").await;
    assert_eq!(body["event_type"], "PaymentRecorded");
    assert_eq!(body["replayed"], false);

    let (status, statement) = app.get(&format!("/api/v1/sales/{}", sale_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&statement["plans"][0]["outstanding_balance"]), dec!(500000));
    assert_eq!(statement["plans"][0]["status"], "active");
    assert_eq!(dec(&statement["statistics"]["paid_percentage"]), dec!(50));

    let (status, stats) = app
        .get(&format!("/api/v1/sales/{}/statistics", sale_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&stats["paid_amount"]), dec!(500000));
    assert_eq!(dec(&stats["remaining_amount"]), dec!(500000));
}

#[tokio::test]
async fn test_commission_guard_e2e() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;
    pay_plan(&app, sale_id, plan_id, "500000").await;

    let uri = format!("/api/v1/sales/{}/commission/payments", sale_id);
    let (status, body) = app.post(&uri, json!({ "amount": "30000" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "exceeds_accrued");
    assert_eq!(dec(&body["details"]["payable"]), dec!(25000));

    let (status, body) = app.post(&uri, json!({ "amount": "25000" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dec(&body["sale"]["commission"]["payable"]), dec!(0));
    assert_eq!(body["sale"]["commission"]["status"], "paid");

    let (status, body) = app.post(&uri, json!({ "amount": "1" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "no_accrual");
}

#[tokio::test]
async fn test_overdue_query_e2e() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;
    pay_plan(&app, sale_id, plan_id, "800000").await;

    let uri = format!("/api/v1/sales/{}/plans/{}/overdue", sale_id, plan_id);
    let (status, body) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_overdue"], false);

    let (_, body) = app.get(&format!("{}?as_of=2025-04-15T09:00:00Z", uri)).await;
    assert_eq!(body["is_overdue"], true);

    app.clock.advance(Duration::days(45));
    let (_, body) = app.get(&uri).await;
    assert_eq!(body["is_overdue"], true);

    let (status, _) = app
        .get(&format!("/api/v1/sales/{}/plans/{}/overdue", sale_id, Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancelled_sale_cannot_complete() {
    let app = setup_test_app();
    let (sale_id, _) = open_installment_sale(&app).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/cancel", sale_id),
            json!({ "reason": "buyer withdrew" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sale"]["status"], "cancelled");

    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/status", sale_id),
            json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "invalid_transition");
    assert_eq!(body["details"]["from"], "cancelled");
}

#[tokio::test]
async fn test_idempotent_replay_e2e() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;
    let key = Uuid::new_v4();

    let request = || {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/sales/{}/plans/{}/payments", sale_id, plan_id))
            .header("content-type", "application/json")
            .header("X-API-Key", ADMIN_KEY)
            .header("Idempotency-Key", key.to_string())
            .body(Body::from(json!({ "amount": "300000" }).to_string()))
            .unwrap()
    };

    let (status, first) = app.send(request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = app.send(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["event_id"], first["event_id"]);

    let (_, events) = app.get(&format!("/api/v1/sales/{}/events", sale_id)).await;
    assert_eq!(events["total"], 3);
    let (_, stats) = app
        .get(&format!("/api/v1/sales/{}/statistics", sale_id))
        .await;
    assert_eq!(dec(&stats["paid_amount"]), dec!(300000));

    let mut bad = request();
    bad.headers_mut()
        .insert("idempotency-key", "not-a-uuid".parse().unwrap());
    let (status, _) = app.send(bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_with_foreign_idempotency_key_conflicts() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;
    let key = Uuid::new_v4();

    let payment = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/sales/{}/plans/{}/payments", sale_id, plan_id))
        .header("content-type", "application/json")
        .header("X-API-Key", ADMIN_KEY)
        .header("Idempotency-Key", key.to_string())
        .body(Body::from(json!({ "amount": "1000" }).to_string()))
        .unwrap();
    let (status, _) = app.send(payment).await;
    assert_eq!(status, StatusCode::CREATED);

    let other_sale = Uuid::new_v4();
    let create = Request::builder()
        .method("POST")
        .uri("/api/v1/sales")
        .header("content-type", "application/json")
        .header("X-API-Key", ADMIN_KEY)
        .header("Idempotency-Key", key.to_string())
        .body(Body::from(
            json!({
                "sale_id": other_sale,
                "unit_reference": "LOT-44",
                "quantity": 1,
                "sale_price": "90000",
                "payment_plan_type": "full_payment"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = app.send(create).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "idempotency_conflict");

    let (status, _) = app.get(&format!("/api/v1/sales/{}", other_sale)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_legacy_import_rejects_unbounded_amounts() {
    let app = setup_test_app();

    let (status, body) = app
        .post(
            "/api/v1/sales/import",
            json!({
                "unitReference": "VILLA-9",
                "salePrice": "79228162514264337593543950335",
                "paymentPlanType": "full_payment",
                "commissionPercentage": "5"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "unexpected: {}", body);

    let (status, _) = app
        .post(
            "/api/v1/sales/import",
            json!({
                "unitReference": "VILLA-9",
                "salePrice": "1000",
                "paymentPlanType": "full_payment",
                "payments": [{ "amount": "0.001" }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_legacy_import_e2e() {
    let app = setup_test_app();

    let (status, body) = app
        .post(
            "/api/v1/sales/import",
            json!({
                "unitReference": "VILLA-7",
                "salePrice": 250000,
                "paymentPlanType": "full_payment",
                "commissionPercentage": "4",
                "saleData": {
                    "payments": [
                        { "amount": "100000", "paymentDate": "2024-11-02T10:00:00Z" },
                        { "amount": 50000 }
                    ]
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "import failed: {}", body);
    assert_eq!(body["event_type"], "SaleImported");
    assert_eq!(dec(&body["sale"]["statistics"]["paid_amount"]), dec!(150000));
    assert_eq!(dec(&body["sale"]["commission"]["accrued"]), dec!(6000));

    let (status, body) = app
        .post(
            "/api/v1/sales/import",
            json!({
                "unit_reference": "VILLA-8",
                "sale_price": "300000",
                "payment_plan_type": "full_payment",
                "amount_paid": "120000"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "import failed: {}", body);
    assert_eq!(dec(&body["sale"]["statistics"]["paid_amount"]), dec!(120000));
}

#[tokio::test]
async fn test_validation_error_names_field() {
    let app = setup_test_app();
    let (status, body) = app
        .post(
            "/api/v1/sales",
            json!({
                "unit_reference": "TOWER-C-0906",
                "quantity": 1,
                "sale_price": "abc",
                "payment_plan_type": "full_payment"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "validation_error");
    assert_eq!(body["details"]["field"], "sale_price");
}

#[tokio::test]
async fn test_auth_and_permissions() {
    let app = setup_test_app();
    let (sale_id, _) = open_installment_sale(&app).await;

    // no key
    let (status, body) = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/sales/{}", sale_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "missing_api_key");

    // unknown key
    let (status, _) = app
        .send(json_request(
            "GET",
            &format!("/api/v1/sales/{}", sale_id),
            "nope",
            Value::Null,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // read-only key can read but not write
    let (status, _) = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/sales/{}", sale_id))
                .header("X-API-Key", READ_ONLY_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/sales/{}/cancel", sale_id),
            READ_ONLY_KEY,
            json!({ "reason": "not allowed" }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "permission_denied");

    let recent = app.state.audit.recent(1).await.unwrap();
    assert_eq!(recent[0].action, "auth.permission_denied");

    // the chain stays intact across denials and mutations
    let (status, body) = app.get("/api/v1/admin/audit/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_valid"], true);
    assert_eq!(body["entries_checked"], 3);

    let (status, _) = app
        .send(
            Request::builder()
                .uri("/api/v1/admin/audit/verify")
                .header("X-API-Key", READ_ONLY_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_actor_and_correlation_travel_into_events() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;
    let actor = Uuid::new_v4();
    let correlation = Uuid::new_v4();

    let mut request = json_request(
        "POST",
        &format!("/api/v1/sales/{}/plans/{}/payments", sale_id, plan_id),
        ADMIN_KEY,
        json!({ "amount": "1000" }),
    );
    request
        .headers_mut()
        .insert("x-request-user-id", actor.to_string().parse().unwrap());
    request
        .headers_mut()
        .insert("x-correlation-id", correlation.to_string().parse().unwrap());

    let response = tower::util::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()["X-Correlation-Id"],
        correlation.to_string().as_str()
    );

    let (_, events) = app.get(&format!("/api/v1/sales/{}/events", sale_id)).await;
    let last = &events["events"][2];
    assert_eq!(last["context"]["actor_id"], actor.to_string());
    assert_eq!(last["context"]["correlation_id"], correlation.to_string());
    assert_eq!(last["event_data"]["payment"]["recorded_by"], actor.to_string());

    let mut bad = json_request("GET", &format!("/api/v1/sales/{}", sale_id), ADMIN_KEY, Value::Null);
    bad.headers_mut()
        .insert("x-request-user-id", "someone".parse().unwrap());
    let (status, body) = app.send(bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_user_id");
}

#[tokio::test]
async fn test_refund_and_confirm_e2e() {
    let app = setup_test_app();
    let (sale_id, plan_id) = open_installment_sale(&app).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/payments", sale_id),
            json!({ "plan_id": plan_id, "amount": "400000", "status": "pending" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let payment_id = body["event"]["payment"]["id"].as_str().unwrap().to_string();
    assert_eq!(dec(&body["sale"]["statistics"]["pending_amount"]), dec!(400000));

    let (status, body) = app
        .post(
            &format!("/api/v1/sales/{}/payments/{}/confirm", sale_id, payment_id),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "confirm failed: {}", body);
    assert_eq!(dec(&body["sale"]["statistics"]["paid_amount"]), dec!(400000));

    let refund_uri = format!("/api/v1/sales/{}/payments/{}/refund", sale_id, payment_id);
    let (status, body) = app.post(&refund_uri, json!({ "reason": "bounced" })).await;
    assert_eq!(status, StatusCode::OK, "refund failed: {}", body);
    assert_eq!(dec(&body["sale"]["statistics"]["paid_amount"]), dec!(0));
    assert_eq!(dec(&body["sale"]["plans"][0]["outstanding_balance"]), dec!(1000000));

    let (status, body) = app.post(&refund_uri, json!({ "reason": "again" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "invalid_state");
}

#[tokio::test]
async fn test_unknown_sale_is_not_found() {
    let app = setup_test_app();
    let (status, body) = app.get(&format!("/api/v1/sales/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "sale_not_found");

    let (status, _) = app
        .get(&format!("/api/v1/sales/{}/events", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
