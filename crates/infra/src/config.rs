//! Engine configuration.

use chrono::FixedOffset;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use homeledger_invoicing::BillingSchedule;

/// Prefix of environment overrides, e.g. `HOMELEDGER__CONCURRENCY_RETRIES=3` or
/// `HOMELEDGER__BILLING__DUE_DAYS_AFTER_ISSUE=30`.
pub const ENV_PREFIX: &str = "HOMELEDGER";

pub const DEFAULT_CONFIG_PATH: &str = "config/homeledger";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Financial-document engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinanceConfig {
    /// Offset of the business time zone, used to derive "today" from the UTC clock.
    #[serde(default = "default_business_utc_offset_minutes")]
    pub business_utc_offset_minutes: i32,
    /// Automatic retries of detail/item mutations after a stale stream version.
    #[serde(default = "default_concurrency_retries")]
    pub concurrency_retries: u32,
    /// VAT rate applied to invoice details that do not specify one.
    #[serde(default)]
    pub default_vat_rate: Decimal,
    /// Generate voucher numbers (`PC-{year}-{seq}`) when the caller omits one.
    #[serde(default = "default_auto_number_vouchers")]
    pub auto_number_vouchers: bool,
    #[serde(default)]
    pub billing: BillingSchedule,
}

fn default_business_utc_offset_minutes() -> i32 {
    420 // UTC+7
}

fn default_concurrency_retries() -> u32 {
    2
}

fn default_auto_number_vouchers() -> bool {
    true
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            business_utc_offset_minutes: default_business_utc_offset_minutes(),
            concurrency_retries: default_concurrency_retries(),
            default_vat_rate: Decimal::ZERO,
            auto_number_vouchers: default_auto_number_vouchers(),
            billing: BillingSchedule::default(),
        }
    }
}

impl FinanceConfig {
    /// Loads configuration from `config/homeledger.*` (optional) and `HOMELEDGER__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from the file at `path` (extension optional, file optional) with
    /// environment overrides on top, then validates it.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let loaded: FinanceConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-720..=840).contains(&self.business_utc_offset_minutes) {
            return Err(ConfigError::Invalid {
                field: "business_utc_offset_minutes",
                message: "must be between -720 and 840".to_string(),
            });
        }
        if self.default_vat_rate < Decimal::ZERO || self.default_vat_rate > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid {
                field: "default_vat_rate",
                message: "must be between 0 and 100".to_string(),
            });
        }
        self.billing.validate().map_err(|e| ConfigError::Invalid {
            field: "billing",
            message: e.to_string(),
        })
    }

    pub fn business_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.business_utc_offset_minutes * 60).ok_or(ConfigError::Invalid {
            field: "business_utc_offset_minutes",
            message: "not a valid UTC offset".to_string(),
        })
    }
}
