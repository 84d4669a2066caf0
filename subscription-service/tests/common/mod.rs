#![allow(dead_code)]

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use subscription_service::config::{
    AuthConfig, BillingConfig, Config, LedgerConfig, OperatorConfig, PortOneConfig, ServerConfig,
    TelemetryConfig,
};
use subscription_service::services::LedgerStore;
use subscription_service::startup::Application;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_PORTONE_SECRET: &str = "test-portone-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
pub const TEST_OPERATOR_KEY: &str = "test-operator-key";
pub const TEST_SUBJECT: &str = "user-1";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub provider: MockServer,
    pub ledger: Arc<dyn LedgerStore>,
    pub client: reqwest::Client,
}

pub fn test_config(provider_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        ledger: LedgerConfig::Memory,
        portone: PortOneConfig {
            api_base_url: provider_url.to_string(),
            api_secret: Secret::new(TEST_PORTONE_SECRET.to_string()),
            webhook_secret: None,
            request_timeout_secs: 5,
            currency: "KRW".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(TEST_JWT_SECRET.to_string()),
            audience: "authenticated".to_string(),
        },
        billing: BillingConfig::default(),
        operator: OperatorConfig { api_key: None },
        telemetry: TelemetryConfig {
            log_level: "info".to_string(),
            otlp_endpoint: None,
            json_logs: false,
        },
        service_name: "subscription-service".to_string(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with<F>(customize: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let provider = MockServer::start().await;
        let mut config = test_config(&provider.uri());
        customize(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let ledger = app.ledger();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        TestApp {
            address,
            port,
            provider,
            ledger,
            client: reqwest::Client::new(),
        }
    }

    pub async fn post_webhook(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/portone", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_authed(&self, route: &str, subject: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, route))
            .bearer_auth(access_token(subject))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_authed(&self, route: &str, subject: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, route))
            .bearer_auth(access_token(subject))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Provider answers `GET /payments/{id}` with `body`.
    pub async fn mock_payment(&self, payment_id: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/payments/{}", payment_id)))
            .and(header(
                "authorization",
                format!("PortOne {}", TEST_PORTONE_SECRET).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.provider)
            .await;
    }

    /// Provider accepts any schedule creation.
    pub async fn mock_schedule_creation(&self) {
        Mock::given(method("POST"))
            .and(wiremock::matchers::path_regex(r"^/payments/[^/]+/schedule$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "schedule": { "id": "sch_1" } })),
            )
            .mount(&self.provider)
            .await;
    }

    /// Requests the provider received with the given method and path.
    pub async fn provider_requests(&self, http_method: &str, route: &str) -> Vec<wiremock::Request> {
        self.provider
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.to_string() == http_method && r.url.path() == route)
            .collect()
    }

    pub async fn schedule_creations(&self) -> Vec<(String, Value)> {
        self.provider
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.to_string() == "POST" && r.url.path().ends_with("/schedule"))
            .map(|r| {
                let body: Value = serde_json::from_slice(&r.body).expect("schedule body is JSON");
                (r.url.path().to_string(), body)
            })
            .collect()
    }
}

/// Paid payment as returned by the provider.
pub fn provider_payment(amount: i64, billing_key: Option<&str>, customer: &str) -> Value {
    json!({
        "id": "pay",
        "status": "PAID",
        "amount": { "total": amount },
        "method": { "billingKey": billing_key },
        "orderName": "Monthly magazine",
        "customer": { "id": customer }
    })
}

pub fn access_token(subject: &str) -> String {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        aud: &'a str,
        exp: i64,
    }

    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: subject,
            aud: "authenticated",
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        },
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}
