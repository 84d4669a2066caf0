mod common;

use common::{provider_payment, TestApp, TEST_SUBJECT};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

async fn record_payment(app: &TestApp, payment_id: &str, subject: &str) {
    app.mock_payment(payment_id, provider_payment(9900, Some("bk_1"), subject))
        .await;
    let response = app
        .post_webhook(&json!({ "payment_id": payment_id, "status": "Paid" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn status_requires_a_valid_bearer_token() {
    let app = TestApp::spawn().await;

    let anonymous = app
        .client
        .get(format!("{}/subscriptions/status", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);
    let body: Value = anonymous.json().await.unwrap();
    assert_eq!(body["success"], false);

    let forged = app
        .client
        .get(format!("{}/subscriptions/status", app.address))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status().as_u16(), 401);
}

#[tokio::test]
async fn status_reflects_paid_and_cancelled_periods() {
    let app = TestApp::spawn().await;
    app.mock_schedule_creation().await;

    let response = app.get_authed("/subscriptions/status", TEST_SUBJECT).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["active"], false);
    assert_eq!(body["status"], "free");
    assert_eq!(body["can_subscribe"], true);

    record_payment(&app, "pay_1", TEST_SUBJECT).await;

    let response = app.get_authed("/subscriptions/status", TEST_SUBJECT).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["active"], true);
    assert_eq!(body["status"], "subscribed");
    assert_eq!(body["can_cancel"], true);
    assert_eq!(body["can_subscribe"], false);
    assert_eq!(body["transaction_key"], "pay_1");
    assert!(body["entitled_until"].is_string());

    let other = app.get_authed("/subscriptions/status", "user-2").await;
    let body: Value = other.json().await.unwrap();
    assert_eq!(body["active"], false);

    Mock::given(method("GET"))
        .and(path("/payment-schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&app.provider)
        .await;
    let cancelled = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "Cancelled" }))
        .await;
    assert_eq!(cancelled.status().as_u16(), 200);

    let response = app.get_authed("/subscriptions/status", TEST_SUBJECT).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["active"], false);
    assert_eq!(body["status"], "free");
}

#[tokio::test]
async fn payments_are_listed_newest_first() {
    let app = TestApp::spawn().await;
    app.mock_schedule_creation().await;
    record_payment(&app, "pay_1", TEST_SUBJECT).await;
    record_payment(&app, "pay_2", TEST_SUBJECT).await;
    record_payment(&app, "pay_3", "user-2").await;

    let response = app.get_authed("/subscriptions/payments", TEST_SUBJECT).await;
    assert_eq!(response.status().as_u16(), 200);

    let rows: Vec<Value> = response.json().await.unwrap();
    let keys: Vec<&str> = rows
        .iter()
        .map(|r| r["transaction_key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["pay_2", "pay_1"]);
}

#[tokio::test]
async fn subscribe_charges_the_billing_key() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/payments/payment_\d+_[a-z0-9]{7}/billing-key$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "payment": { "pgTxId": "pg_1" } })),
        )
        .expect(1)
        .mount(&app.provider)
        .await;

    let response = app
        .post_authed(
            "/subscriptions",
            TEST_SUBJECT,
            &json!({ "billing_key": "bk_1", "order_name": "Monthly magazine", "amount": 9900 }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let payment_id = body["payment_id"].as_str().unwrap().to_string();
    assert!(payment_id.starts_with("payment_"));
    assert_eq!(body["provider_response"]["payment"]["pgTxId"], "pg_1");

    let charges = app
        .provider_requests("POST", &format!("/payments/{}/billing-key", payment_id))
        .await;
    assert_eq!(charges.len(), 1);
    let charge: Value = serde_json::from_slice(&charges[0].body).unwrap();
    assert_eq!(charge["billingKey"], "bk_1");
    assert_eq!(charge["orderName"], "Monthly magazine");
    assert_eq!(charge["amount"]["total"], 9900);
    assert_eq!(charge["customer"]["id"], TEST_SUBJECT);
    assert_eq!(charge["currency"], "KRW");
}

#[tokio::test]
async fn subscribe_rejects_invalid_body() {
    let app = TestApp::spawn().await;

    let response = app
        .post_authed(
            "/subscriptions",
            TEST_SUBJECT,
            &json!({ "billing_key": "", "order_name": "Monthly magazine", "amount": 0 }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.provider.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_requires_ownership() {
    let app = TestApp::spawn().await;
    app.mock_schedule_creation().await;
    record_payment(&app, "pay_1", "user-2").await;

    let response = app
        .post_authed(
            "/subscriptions/cancel",
            TEST_SUBJECT,
            &json!({ "transaction_key": "pay_1" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 404);
    assert!(app
        .provider_requests("POST", "/payments/pay_1/cancel")
        .await
        .is_empty());
}

#[tokio::test]
async fn cancel_forwards_to_provider() {
    let app = TestApp::spawn().await;
    app.mock_schedule_creation().await;
    record_payment(&app, "pay_1", TEST_SUBJECT).await;
    Mock::given(method("POST"))
        .and(path("/payments/pay_1/cancel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "cancellation": { "status": "SUCCEEDED" } })),
        )
        .mount(&app.provider)
        .await;

    let response = app
        .post_authed(
            "/subscriptions/cancel",
            TEST_SUBJECT,
            &json!({ "transaction_key": "pay_1", "reason": "Moving abroad" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["transaction_key"], "pay_1");

    let cancels = app.provider_requests("POST", "/payments/pay_1/cancel").await;
    assert_eq!(cancels.len(), 1);
    let sent: Value = serde_json::from_slice(&cancels[0].body).unwrap();
    assert_eq!(sent["reason"], "Moving abroad");

    // The ledger only changes once the provider's cancelled webhook arrives.
    assert_eq!(app.ledger.find_by_transaction("pay_1").await.unwrap().len(), 1);
}
