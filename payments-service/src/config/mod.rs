use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mpesa: MpesaConfig,
    pub sweep: SweepConfig,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Daraja environment. Selects the default API host; sandbox credentials
/// do not work against the production host and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

/// M-Pesa Daraja credentials and endpoints, injected into the client at
/// construction time rather than read from the process environment per call.
#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: Secret<String>,
    pub shortcode: String,
    pub passkey: Secret<String>,
    pub environment: MpesaEnvironment,
    pub callback_url: String,
    /// Resolved from `environment` unless overridden (tests point this at a
    /// mock server).
    pub api_base_url: String,
}

/// Background reconciliation sweep for payments stuck in "pending" when the
/// gateway callback never arrives.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Minimum age before a pending payment is considered stale.
    pub pending_age_seconds: i64,
    /// How far back the sweep looks for completed payments whose invoice was
    /// never marked paid.
    pub repair_lookback_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYMENTS_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYMENTS_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("PAYMENTS_DATABASE_URL").expect("PAYMENTS_DATABASE_URL must be set");
        let db_name =
            env::var("PAYMENTS_DATABASE_NAME").unwrap_or_else(|_| "hospital_payments".to_string());

        let environment = match env::var("MPESA_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string())
            .as_str()
        {
            "production" => MpesaEnvironment::Production,
            _ => MpesaEnvironment::Sandbox,
        };
        let api_base_url = env::var("MPESA_API_BASE_URL")
            .unwrap_or_else(|_| environment.default_base_url().to_string());

        let mpesa = MpesaConfig {
            consumer_key: env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: Secret::new(env::var("MPESA_CONSUMER_SECRET").unwrap_or_default()),
            shortcode: env::var("MPESA_SHORTCODE").unwrap_or_default(),
            passkey: Secret::new(env::var("MPESA_PASSKEY").unwrap_or_default()),
            environment,
            callback_url: env::var("MPESA_CALLBACK_URL")
                .unwrap_or_else(|_| "https://localhost/payments/mpesa/callback".to_string()),
            api_base_url,
        };

        let sweep = SweepConfig {
            enabled: env::var("SWEEP_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            interval_seconds: env::var("SWEEP_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            pending_age_seconds: env::var("SWEEP_PENDING_AGE_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            repair_lookback_seconds: env::var("SWEEP_REPAIR_LOOKBACK_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            mpesa,
            sweep,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            service_name: "payments-service".to_string(),
        })
    }
}
