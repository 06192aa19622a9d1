use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, is_production};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct BookingServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// In-memory stores are used when no database is configured.
    pub database: Option<DatabaseConfig>,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub commission_rate: Decimal,
    pub platform_account_id: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            commission_rate: Decimal::new(5, 2),
            platform_account_id: "COMPANY_WALLET".to_string(),
        }
    }
}

impl BookingServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_production();

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .unwrap_or(1),
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let wallet = WalletConfig {
            commission_rate: parse_commission_rate(&get_env(
                "COMMISSION_RATE",
                Some("0.05"),
                is_prod,
            )?)?,
            platform_account_id: get_env("PLATFORM_ACCOUNT_ID", Some("COMPANY_WALLET"), is_prod)?,
        };

        Ok(Self {
            common,
            service_name: "booking-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
            database,
            wallet,
        })
    }
}

/// Commission rate must lie in `[0, 1)`.
fn parse_commission_rate(raw: &str) -> Result<Decimal, AppError> {
    let rate = Decimal::from_str(raw.trim()).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("COMMISSION_RATE '{}' is not a decimal: {}", raw, e))
    })?;

    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "COMMISSION_RATE must be in [0, 1), got {}",
            rate
        )));
    }

    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commission_rate_bounds() {
        assert_eq!(parse_commission_rate("0.05").unwrap(), Decimal::new(5, 2));
        assert_eq!(parse_commission_rate(" 0 ").unwrap(), Decimal::ZERO);
        assert!(parse_commission_rate("1").is_err());
        assert!(parse_commission_rate("-0.1").is_err());
        assert!(parse_commission_rate("five percent").is_err());
    }

    #[test]
    fn default_wallet_config() {
        let wallet = WalletConfig::default();
        assert_eq!(wallet.commission_rate.to_string(), "0.05");
        assert_eq!(wallet.platform_account_id, "COMPANY_WALLET");
    }
}
