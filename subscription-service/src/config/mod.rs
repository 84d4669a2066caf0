use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub portone: PortOneConfig,
    pub auth: AuthConfig,
    pub billing: BillingConfig,
    pub operator: OperatorConfig,
    pub telemetry: TelemetryConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum LedgerConfig {
    Mongo(DatabaseConfig),
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PortOneConfig {
    pub api_base_url: String,
    pub api_secret: Secret<String>,
    /// Standard Webhooks secret; signature checks are skipped when absent.
    pub webhook_secret: Option<Secret<String>>,
    /// Upper bound for every outbound provider call.
    pub request_timeout_secs: u64,
    pub currency: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthConfig {
    /// HS256 secret of the hosted identity provider's access tokens.
    pub jwt_secret: Secret<String>,
    pub audience: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    pub period_days: i64,
    pub grace_days: i64,
    /// Local hour in which renewal charges are scheduled.
    pub renewal_hour: u32,
    /// Offset of the renewal wall clock from UTC, in seconds.
    pub renewal_utc_offset_secs: i32,
    /// Half-width of the window used to look a scheduled charge up again.
    pub schedule_lookup_window_days: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period_days: 30,
            grace_days: 1,
            renewal_hour: 10,
            renewal_utc_offset_secs: 9 * 3600,
            schedule_lookup_window_days: 1,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct OperatorConfig {
    pub api_key: Option<Secret<String>>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = var_or("SUBSCRIPTION_SERVICE_HOST", "0.0.0.0");
        let port = parsed_var("SUBSCRIPTION_SERVICE_PORT", 3010u16)?;

        let ledger = match var_or("SUBSCRIPTION_LEDGER_BACKEND", "mongo").as_str() {
            "memory" => LedgerConfig::Memory,
            "mongo" => {
                let url = env::var("SUBSCRIPTION_DATABASE_URL")
                    .context("SUBSCRIPTION_DATABASE_URL must be set for the mongo ledger")?;
                LedgerConfig::Mongo(DatabaseConfig {
                    url: Secret::new(url),
                    db_name: var_or("SUBSCRIPTION_DATABASE_NAME", "subscription_db"),
                })
            }
            other => anyhow::bail!("Unknown SUBSCRIPTION_LEDGER_BACKEND: {}", other),
        };

        let portone = PortOneConfig {
            api_base_url: var_or("SUBSCRIPTION_PORTONE_API_URL", "https://api.portone.io"),
            api_secret: Secret::new(var_or("SUBSCRIPTION_PORTONE_SECRET", "")),
            webhook_secret: optional_var("SUBSCRIPTION_PORTONE_WEBHOOK_SECRET").map(Secret::new),
            request_timeout_secs: parsed_var("SUBSCRIPTION_PORTONE_TIMEOUT_SECS", 10u64)?,
            currency: var_or("SUBSCRIPTION_CURRENCY", "KRW"),
        };

        let auth = AuthConfig {
            jwt_secret: Secret::new(
                env::var("SUBSCRIPTION_JWT_SECRET").context("SUBSCRIPTION_JWT_SECRET must be set")?,
            ),
            audience: var_or("SUBSCRIPTION_JWT_AUDIENCE", "authenticated"),
        };

        let defaults = BillingConfig::default();
        let billing = BillingConfig {
            period_days: parsed_var("SUBSCRIPTION_PERIOD_DAYS", defaults.period_days)?,
            grace_days: parsed_var("SUBSCRIPTION_GRACE_DAYS", defaults.grace_days)?,
            renewal_hour: parsed_var("SUBSCRIPTION_RENEWAL_HOUR", defaults.renewal_hour)?,
            renewal_utc_offset_secs: parsed_var(
                "SUBSCRIPTION_RENEWAL_UTC_OFFSET_SECS",
                defaults.renewal_utc_offset_secs,
            )?,
            schedule_lookup_window_days: parsed_var(
                "SUBSCRIPTION_SCHEDULE_LOOKUP_WINDOW_DAYS",
                defaults.schedule_lookup_window_days,
            )?,
        };

        let operator = OperatorConfig {
            api_key: optional_var("SUBSCRIPTION_OPERATOR_API_KEY").map(Secret::new),
        };

        let telemetry = TelemetryConfig {
            log_level: var_or("SUBSCRIPTION_LOG_LEVEL", "info,subscription_service=debug"),
            otlp_endpoint: optional_var("SUBSCRIPTION_OTLP_ENDPOINT"),
            json_logs: parsed_var("SUBSCRIPTION_JSON_LOGS", true)?,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            ledger,
            portone,
            auth,
            billing,
            operator,
            telemetry,
            service_name: "subscription-service".to_string(),
        })
    }
}
