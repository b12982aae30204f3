//! Configuration
//!
//! Settings are read from YAML and may be overridden from the environment
//! (a `.env` file is honoured when present):
//!
//! - `PRICEWISE_FIRE_EVENTS`: `true`/`false`/`1`/`0`
//! - `PRICEWISE_STATE_FILE_PATH`: coupon state file

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`Settings::fire_events`].
pub const FIRE_EVENTS_ENV: &str = "PRICEWISE_FIRE_EVENTS";

/// Environment variable overriding [`Settings::state_file_path`].
pub const STATE_FILE_PATH_ENV: &str = "PRICEWISE_STATE_FILE_PATH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] io::Error),

    /// The settings file is not valid YAML.
    #[error("failed to parse settings: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// An environment override could not be interpreted.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logical field name → item key
    pub fields: BTreeMap<String, String>,

    /// Default global discount percentage
    pub global_discount: Decimal,

    /// Default global tax percentage
    pub global_tax_rate: Decimal,

    /// Emit domain notifications
    pub fire_events: bool,

    /// Coupon state file
    pub state_file_path: PathBuf,

    /// Namespace used when discovering rules
    pub condition_namespace: String,

    /// Directory scanned when discovering rules
    pub condition_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fields: BTreeMap::from([
                ("price".to_string(), "price".to_string()),
                ("quantity".to_string(), "quantity".to_string()),
            ]),
            global_discount: Decimal::ZERO,
            global_tax_rate: Decimal::ZERO,
            fire_events: true,
            state_file_path: PathBuf::from("storage/pricewise/coupons.json"),
            condition_namespace: "conditions".to_string(),
            condition_path: PathBuf::from("conditions"),
        }
    }
}

impl Settings {
    /// Parse settings from YAML. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the document is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_norway::from_str(yaml)?)
    }

    /// Load settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;

        Self::from_yaml_str(&contents)
    }

    /// Apply overrides from the process environment (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unparseable override.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        _ = dotenvy::dotenv();

        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides supplied by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unparseable override.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(FIRE_EVENTS_ENV) {
            self.fire_events = parse_flag(&value).ok_or(ConfigError::InvalidEnv {
                name: FIRE_EVENTS_ENV,
                value,
            })?;
        }

        if let Some(value) = lookup(STATE_FILE_PATH_ENV).filter(|value| !value.is_empty()) {
            self.state_file_path = PathBuf::from(value);
        }

        Ok(self)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
