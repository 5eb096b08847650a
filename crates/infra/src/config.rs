//! Engine configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file
//! (`config/medstock.toml` unless a path is given), then environment
//! variables such as `MEDSTOCK__ORDERS__NEAR_EXPIRY_DAYS=120`.

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use medstock_catalog::TaxClassifier;
use medstock_observability::LoggingConfig;

const DEFAULT_CONFIG_FILE: &str = "config/medstock";
const ENV_PREFIX: &str = "MEDSTOCK";
/// Upper bound for the day windows; keeps date arithmetic in range.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    /// Leading code segments that are zero-rated.
    pub zero_tax_families: Vec<String>,
    /// Percentage applied to everything else.
    pub default_rate: Decimal,
}

impl Default for TaxConfig {
    fn default() -> Self {
        let classifier = TaxClassifier::default();
        Self {
            zero_tax_families: classifier.zero_tax_families().to_vec(),
            default_rate: classifier.default_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrivalConfig {
    /// Expiry must be later than today plus this many days at reception.
    pub min_expiry_days: u32,
    pub folio_prefix: String,
}

impl Default for ArrivalConfig {
    fn default() -> Self {
        Self {
            min_expiry_days: 60,
            folio_prefix: "ENT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub near_expiry_days: u32,
    pub folio_prefix: String,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            near_expiry_days: 90,
            folio_prefix: "PED".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnsConfig {
    pub folio_prefix: String,
}

impl Default for ReturnsConfig {
    fn default() -> Self {
        Self {
            folio_prefix: "DEV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tax: TaxConfig,
    pub arrival: ArrivalConfig,
    pub orders: OrdersConfig,
    pub returns: ReturnsConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineConfigError> {
        let defaults = EngineConfig::default();
        let mut builder = Config::builder()
            .set_default("tax.zero_tax_families", defaults.tax.zero_tax_families.clone())?
            .set_default("tax.default_rate", defaults.tax.default_rate.to_string())?
            .set_default("arrival.min_expiry_days", i64::from(defaults.arrival.min_expiry_days))?
            .set_default("arrival.folio_prefix", defaults.arrival.folio_prefix.clone())?
            .set_default("orders.near_expiry_days", i64::from(defaults.orders.near_expiry_days))?
            .set_default("orders.folio_prefix", defaults.orders.folio_prefix.clone())?
            .set_default("returns.folio_prefix", defaults.returns.folio_prefix.clone())?
            .set_default("logging.level", defaults.logging.level.clone())?
            .set_default("logging.json", defaults.logging.json)?;

        builder = match path {
            Some(path) => {
                info!(path = %path.display(), "loading engine configuration file");
                builder.add_source(File::from(path).required(true))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tax.zero_tax_families")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: EngineConfig = config.try_deserialize()?;
        loaded.validate()?;
        debug!(?loaded, "engine configuration loaded");
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.tax.default_rate < Decimal::ZERO || self.tax.default_rate > Decimal::ONE_HUNDRED {
            return Err(EngineConfigError::Invalid(format!(
                "tax.default_rate must be within 0..=100, got {}",
                self.tax.default_rate
            )));
        }
        for (key, prefix) in [
            ("arrival.folio_prefix", &self.arrival.folio_prefix),
            ("orders.folio_prefix", &self.orders.folio_prefix),
            ("returns.folio_prefix", &self.returns.folio_prefix),
        ] {
            if prefix.trim().is_empty() {
                return Err(EngineConfigError::Invalid(format!("{key} cannot be empty")));
            }
        }
        for (key, days) in [
            ("arrival.min_expiry_days", self.arrival.min_expiry_days),
            ("orders.near_expiry_days", self.orders.near_expiry_days),
        ] {
            if days > MAX_WINDOW_DAYS {
                return Err(EngineConfigError::Invalid(format!(
                    "{key} must be at most {MAX_WINDOW_DAYS}, got {days}"
                )));
            }
        }
        Ok(())
    }

    pub fn tax_classifier(&self) -> TaxClassifier {
        TaxClassifier::new(self.tax.zero_tax_families.iter().cloned(), self.tax.default_rate)
    }

    /// Install the process-wide subscriber described by `logging`.
    pub fn init_logging(&self) {
        medstock_observability::init(&self.logging);
    }
}
