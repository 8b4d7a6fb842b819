use rust_decimal::Decimal;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub billing: BillingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            billing: BillingConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Billing defaults shared by the document generators and the contract sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    /// Tax rate (percent) applied when a request payload omits one.
    pub default_tax_rate: Decimal,
    /// Object storage bucket receiving generated documents.
    pub document_bucket: String,
    /// Look-ahead window for the "expiring soon" contract listing.
    pub expiry_notice_days: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_tax_rate: Decimal::from(10),
            document_bucket: "ses-billing-documents".to_string(),
            expiry_notice_days: 30,
        }
    }
}

impl BillingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_tax_rate = match env::var("BILLING_DEFAULT_TAX_RATE") {
            Ok(raw) => {
                let rate = Decimal::from_str(raw.trim())
                    .map_err(|_| ConfigError::InvalidTaxRate { value: raw.clone() })?;
                if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
                    return Err(ConfigError::InvalidTaxRate { value: raw });
                }
                rate
            }
            Err(_) => defaults.default_tax_rate,
        };

        let document_bucket =
            env::var("BILLING_DOCUMENT_BUCKET").unwrap_or(defaults.document_bucket);

        let expiry_notice_days = match env::var("BILLING_EXPIRY_NOTICE_DAYS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNoticeDays)?,
            Err(_) => defaults.expiry_notice_days,
        };

        Ok(Self {
            default_tax_rate,
            document_bucket,
            expiry_notice_days,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTaxRate { value: String },
    InvalidNoticeDays,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTaxRate { value } => write!(
                f,
                "BILLING_DEFAULT_TAX_RATE must be a decimal between 0 and 100 (got '{value}')"
            ),
            ConfigError::InvalidNoticeDays => {
                write!(f, "BILLING_EXPIRY_NOTICE_DAYS must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidTaxRate { .. }
            | ConfigError::InvalidNoticeDays => None,
        }
    }
}
