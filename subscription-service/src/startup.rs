use axum::extract::FromRef;
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{Config, LedgerConfig};
use crate::handlers;
use crate::middleware::SubjectVerifier;
use crate::services::{
    BillingOrchestrator, BillingPolicy, InMemoryLedgerStore, LedgerStore, MongoLedgerStore,
    PaymentGateway, PortOneClient, WebhookVerifier,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<dyn LedgerStore>,
    /// Set when the ledger lives in MongoDB; used by the readiness probe.
    pub mongo_ledger: Option<MongoLedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub orchestrator: BillingOrchestrator,
    pub webhook_verifier: Option<WebhookVerifier>,
    pub subject_verifier: SubjectVerifier,
}

impl FromRef<AppState> for SubjectVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.subject_verifier.clone()
    }
}

pub struct Application {
    listener: TcpListener,
    port: u16,
    router: Router,
    ledger: Arc<dyn LedgerStore>,
}

async fn connect_ledger(
    config: &LedgerConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Option<MongoLedgerStore>)> {
    match config {
        LedgerConfig::Mongo(database) => {
            let mut client_options = ClientOptions::parse(database.url.expose_secret()).await?;
            client_options.app_name = Some("subscription-service".to_string());

            let client = Client::with_options(client_options)?;
            let db = client.database(&database.db_name);

            let store = MongoLedgerStore::new(&db);
            store.init_indexes().await?;
            tracing::info!(database = %database.db_name, "Using MongoDB ledger");

            Ok((Arc::new(store.clone()), Some(store)))
        }
        LedgerConfig::Memory => {
            tracing::warn!("Using in-memory ledger; rows are lost on restart");
            Ok((Arc::new(InMemoryLedgerStore::new()), None))
        }
    }
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let (ledger, mongo_ledger) = connect_ledger(&config.ledger).await?;

        let portone = PortOneClient::new(config.portone.clone())?;
        if portone.is_configured() {
            tracing::info!(base_url = %config.portone.api_base_url, "PortOne client initialized");
        } else {
            tracing::warn!("PortOne secret not configured - provider calls will fail");
        }
        let gateway: Arc<dyn PaymentGateway> = Arc::new(portone);

        let webhook_verifier = config.portone.webhook_secret.clone().map(WebhookVerifier::new);
        if webhook_verifier.is_none() {
            tracing::warn!("Webhook secret not configured - signatures are not verified");
        }

        let policy = BillingPolicy::from_config(&config.billing)?;
        let orchestrator = BillingOrchestrator::new(
            ledger.clone(),
            gateway.clone(),
            policy,
            config.portone.currency.clone(),
        );

        let state = AppState {
            subject_verifier: SubjectVerifier::new(&config.auth),
            config: config.clone(),
            ledger: ledger.clone(),
            mongo_ledger,
            gateway,
            orchestrator,
            webhook_verifier,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics))
            .route("/webhooks/portone", post(handlers::webhook::portone_webhook))
            .route(
                "/subscriptions",
                post(handlers::subscriptions::subscribe),
            )
            .route(
                "/subscriptions/status",
                get(handlers::subscriptions::status),
            )
            .route(
                "/subscriptions/payments",
                get(handlers::subscriptions::payments),
            )
            .route(
                "/subscriptions/cancel",
                post(handlers::subscriptions::cancel),
            )
            .route(
                "/internal/reconciliation/orphaned-renewals",
                get(handlers::reconciliation::orphaned_renewals),
            )
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                        subject_id = tracing::field::Empty,
                    )
                }),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .with_state(state);

        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            listener,
            port,
            router,
            ledger,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        self.ledger.clone()
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.listener.local_addr()?;
        tracing::info!("Listening on {}", addr);

        axum::serve(self.listener, self.router).await?;

        Ok(())
    }
}
