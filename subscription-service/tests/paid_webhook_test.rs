mod common;

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use common::{provider_payment, TestApp, TEST_SUBJECT, TEST_WEBHOOK_SECRET};
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::utils::signature::sign_webhook;
use subscription_service::models::BillingStatus;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn paid_webhook_records_row_and_schedules_renewal() {
    let app = TestApp::spawn().await;
    app.mock_payment("pay_1", json!({ "amount": { "total": 9900 }, "method": { "billingKey": "bk_1" } }))
        .await;
    app.mock_schedule_creation().await;
    let before = Utc::now();

    let response = app
        .post_webhook(&json!({ "paymentId": "pay_1", "status": "Paid" }))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["steps"]["step1_payment_inquiry"]["status"], "completed");
    assert_eq!(body["steps"]["step2_database_insert"]["status"], "completed");
    assert_eq!(body["steps"]["step3_subscription_schedule"]["status"], "completed");

    let rows = app.ledger.find_by_transaction("pay_1").await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.amount, 9900);
    assert_eq!(row.status, BillingStatus::Paid);
    assert!(row.period_start >= before && row.period_start <= Utc::now());
    assert_eq!(row.period_end - row.period_start, Duration::days(30));
    assert_eq!(row.grace_end - row.period_start, Duration::days(31));

    let creations = app.schedule_creations().await;
    assert_eq!(creations.len(), 1);
    let (route, schedule) = &creations[0];
    assert_eq!(route, &format!("/payments/{}/schedule", row.next_schedule_id));
    assert_eq!(schedule["payment"]["billingKey"], "bk_1");
    assert_eq!(schedule["payment"]["amount"]["total"], 9900);
    assert_eq!(schedule["payment"]["currency"], "KRW");

    let time_to_pay = DateTime::parse_from_rfc3339(schedule["timeToPay"].as_str().unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(time_to_pay, row.next_schedule_time);

    let kst = FixedOffset::east_opt(9 * 3600).unwrap();
    let local = time_to_pay.with_timezone(&kst);
    assert_eq!(local.hour(), 10);
    assert_eq!(
        local.date_naive(),
        (row.period_end + Duration::days(1)).with_timezone(&kst).date_naive()
    );
}

#[tokio::test]
async fn redelivered_paid_webhook_is_skipped() {
    let app = TestApp::spawn().await;
    app.mock_payment("pay_1", provider_payment(9900, Some("bk_1"), TEST_SUBJECT))
        .await;
    app.mock_schedule_creation().await;

    let first = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "paid" }))
        .await;
    assert_eq!(first.status().as_u16(), 200);

    let second = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "paid" }))
        .await;
    assert_eq!(second.status().as_u16(), 200);

    let body: Value = second.json().await.unwrap();
    assert_eq!(body["steps"]["step1_payment_inquiry"]["status"], "skipped");
    assert_eq!(body["steps"]["step2_database_insert"]["status"], "skipped");
    assert_eq!(body["steps"]["step3_subscription_schedule"]["status"], "skipped");

    assert_eq!(app.ledger.find_by_transaction("pay_1").await.unwrap().len(), 1);
    assert_eq!(app.schedule_creations().await.len(), 1);
    assert_eq!(app.provider_requests("GET", "/payments/pay_1").await.len(), 1);
}

#[tokio::test]
async fn unclassifiable_webhooks_return_400() {
    let app = TestApp::spawn().await;

    let cases = vec![
        json!({ "status": "Paid" }),
        json!({ "payment_id": "pay_1" }),
        json!({ "payment_id": "pay_1", "status": "Ready" }),
        json!({ "paymentId": "", "status": "Paid" }),
    ];

    for case in cases {
        let response = app.post_webhook(&case).await;
        assert_eq!(response.status().as_u16(), 400, "payload {}", case);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["timestamp"].is_string());
    }

    let response = app
        .client
        .post(format!("{}/webhooks/portone", app.address))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    assert!(app.provider.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_lookup_failure_returns_500_without_writing() {
    let app = TestApp::spawn().await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_1"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "type": "UNAVAILABLE", "message": "down" })),
        )
        .mount(&app.provider)
        .await;

    let response = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "Paid" }))
        .await;

    assert_eq!(response.status().as_u16(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("pay_1"));
    assert!(body["timestamp"].is_string());

    assert!(app.ledger.find_by_transaction("pay_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn payment_id_with_reserved_characters_stays_in_its_path_segment() {
    let app = TestApp::spawn().await;
    app.mock_payment("pay_1", provider_payment(9900, Some("bk_1"), TEST_SUBJECT))
        .await;
    app.mock_schedule_creation().await;

    let recorded = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "paid" }))
        .await;
    assert_eq!(recorded.status().as_u16(), 200);

    let response = app
        .post_webhook(&json!({ "payment_id": "pay_1?x=1", "status": "paid" }))
        .await;

    // The provider knows no payment with that literal id.
    assert_eq!(response.status().as_u16(), 500);

    let lookups = app.provider_requests("GET", "/payments/pay_1%3Fx=1").await;
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].url.query(), None);

    assert!(app
        .ledger
        .find_by_transaction("pay_1?x=1")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(app.ledger.find_by_transaction("pay_1").await.unwrap().len(), 1);
    assert_eq!(app.schedule_creations().await.len(), 1);
}

#[tokio::test]
async fn schedule_failure_returns_500_and_keeps_row() {
    let app = TestApp::spawn().await;
    app.mock_payment("pay_1", provider_payment(9900, Some("bk_1"), TEST_SUBJECT))
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/payments/[^/]+/schedule$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.provider)
        .await;

    let response = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "Paid" }))
        .await;

    assert_eq!(response.status().as_u16(), 500);
    let rows = app.ledger.find_by_transaction("pay_1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, BillingStatus::Paid);
}

#[tokio::test]
async fn paid_without_billing_key_skips_schedule() {
    let app = TestApp::spawn().await;
    app.mock_payment("pay_1", provider_payment(9900, None, TEST_SUBJECT))
        .await;

    let response = app
        .post_webhook(&json!({ "payment_id": "pay_1", "status": "Paid" }))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["steps"]["step2_database_insert"]["status"], "completed");
    assert_eq!(body["steps"]["step3_subscription_schedule"]["status"], "skipped");
    assert!(app.schedule_creations().await.is_empty());
}

#[tokio::test]
async fn signed_webhooks_are_enforced_when_secret_is_set() {
    let app = TestApp::spawn_with(|config| {
        config.portone.webhook_secret = Some(Secret::new(TEST_WEBHOOK_SECRET.to_string()));
    })
    .await;
    app.mock_payment("pay_1", provider_payment(9900, Some("bk_1"), TEST_SUBJECT))
        .await;
    app.mock_schedule_creation().await;

    let body = json!({ "payment_id": "pay_1", "status": "Paid" }).to_string();

    let unsigned = app
        .client
        .post(format!("{}/webhooks/portone", app.address))
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status().as_u16(), 401);
    assert!(app.ledger.find_by_transaction("pay_1").await.unwrap().is_empty());

    let timestamp = Utc::now().timestamp();
    let signature =
        sign_webhook(TEST_WEBHOOK_SECRET, "msg_1", timestamp, body.as_bytes()).unwrap();

    let signed = app
        .client
        .post(format!("{}/webhooks/portone", app.address))
        .header("content-type", "application/json")
        .header("webhook-id", "msg_1")
        .header("webhook-timestamp", timestamp.to_string())
        .header("webhook-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(signed.status().as_u16(), 200);
    assert_eq!(app.ledger.find_by_transaction("pay_1").await.unwrap().len(), 1);
}
