// Startup configuration: defaults, optional TOML file, then environment.

use crate::error::ConfigError;
use crate::pricing::{gwei, MIN_REPLACEMENT_BUMP_PERCENT};
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "oracle.toml";

/// Private key material. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// What to do when a submitted transaction is neither mined nor dropped
/// within the receipt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckTxPolicy {
    /// Leave it alone and re-check the round on the next cycle.
    Recheck,
    /// Re-sign the same call at the same nonce with a higher gas price, once.
    ReplaceSameNonce { bump_percent: u64 },
}

/// Raw settings as read from file and environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub rpc_url: Option<String>,
    pub oracle_address: Option<String>,
    pub betting_address: Option<String>,
    pub private_key: Option<SecretKey>,
    pub forecast_url: Option<String>,
    pub poll_interval_secs: u64,
    pub cooldown_secs: u64,
    pub error_backoff_secs: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_secs: u64,
    pub forecast_timeout_secs: u64,
    pub gas_limit: u64,
    pub gas_price_floor_gwei: u64,
    pub gas_premium_percent: u64,
    pub min_balance_eth: String,
    pub log_level: String,
    pub explorer_tx_url: Option<String>,
    pub stuck_tx_policy: String,
    pub replacement_bump_percent: u64,
}

impl Settings {
    /// Load settings, layering `path` (if it exists) and the environment over
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let settings = config::Config::builder()
            .set_default("poll_interval_secs", 300)?
            .set_default("cooldown_secs", 30)?
            .set_default("error_backoff_secs", 60)?
            .set_default("receipt_timeout_secs", 300)?
            .set_default("receipt_poll_secs", 3)?
            .set_default("forecast_timeout_secs", 30)?
            .set_default("gas_limit", 200_000)?
            .set_default("gas_price_floor_gwei", 10)?
            .set_default("gas_premium_percent", 10)?
            .set_default("min_balance_eth", "0.01")?
            .set_default("log_level", "info")?
            .set_default("stuck_tx_policy", "recheck")?
            .set_default("replacement_bump_percent", 20)?
            .add_source(config::File::with_name(&file).required(path.is_some()))
            .add_source(config::Environment::default())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check every required value and parse it into its typed form.
    pub fn validate(self) -> Result<OracleSettings, ConfigError> {
        let rpc_url = required("rpc_url", self.rpc_url)?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "rpc_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }

        let oracle_address = parse_address("oracle_address", self.oracle_address)?;
        let betting_address = parse_address("betting_address", self.betting_address)?;

        let key = self
            .private_key
            .ok_or(ConfigError::MissingField { field: "private_key" })?;
        let wallet = LocalWallet::from_str(key.expose().trim_start_matches("0x")).map_err(|_| {
            ConfigError::InvalidValue {
                field: "private_key",
                reason: "expected a 32-byte hex secp256k1 key".to_string(),
            }
        })?;

        let forecast_url = required("forecast_url", self.forecast_url)?;

        let min_balance = Decimal::from_str(&self.min_balance_eth).map_err(|e| {
            ConfigError::InvalidValue {
                field: "min_balance_eth",
                reason: e.to_string(),
            }
        })?;
        let min_balance_wei = crate::pricing::to_fixed_point(min_balance).ok_or(
            ConfigError::InvalidValue {
                field: "min_balance_eth",
                reason: "must be a non-negative amount".to_string(),
            },
        )?;

        let stuck_tx_policy = match self.stuck_tx_policy.to_lowercase().as_str() {
            "recheck" => StuckTxPolicy::Recheck,
            "replace" => StuckTxPolicy::ReplaceSameNonce {
                bump_percent: self.replacement_bump_percent.max(MIN_REPLACEMENT_BUMP_PERCENT),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "stuck_tx_policy",
                    reason: format!("unknown policy '{}', expected 'recheck' or 'replace'", other),
                })
            }
        };

        if self.gas_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gas_limit",
                reason: "must be positive".to_string(),
            });
        }

        Ok(OracleSettings {
            rpc_url,
            oracle_address,
            betting_address,
            wallet,
            forecast_url,
            forecast_timeout: Duration::from_secs(self.forecast_timeout_secs),
            schedule: ScheduleSettings {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                cooldown: Duration::from_secs(self.cooldown_secs),
                error_backoff: Duration::from_secs(self.error_backoff_secs),
            },
            execution: ExecutionSettings {
                gas_limit: self.gas_limit,
                gas_price_floor: gwei(self.gas_price_floor_gwei),
                gas_premium_percent: self.gas_premium_percent,
                receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
                stuck_tx_policy,
                explorer_tx_url: self.explorer_tx_url.filter(|url| !url.is_empty()),
            },
            receipt_poll: Duration::from_secs(self.receipt_poll_secs.max(1)),
            min_balance_wei,
            log_level: self.log_level,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingField { field }),
    }
}

pub fn parse_address(field: &'static str, value: Option<String>) -> Result<Address, ConfigError> {
    let raw = required(field, value)?;
    Address::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: format!("'{}' is not a 20-byte hex address ({})", raw, e),
    })
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub error_backoff: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            cooldown: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub gas_limit: u64,
    pub gas_price_floor: U256,
    pub gas_premium_percent: u64,
    pub receipt_timeout: Duration,
    pub stuck_tx_policy: StuckTxPolicy,
    pub explorer_tx_url: Option<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            gas_limit: 200_000,
            gas_price_floor: gwei(10),
            gas_premium_percent: 10,
            receipt_timeout: Duration::from_secs(300),
            stuck_tx_policy: StuckTxPolicy::Recheck,
            explorer_tx_url: None,
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub rpc_url: String,
    pub oracle_address: Address,
    pub betting_address: Address,
    pub wallet: LocalWallet,
    pub forecast_url: String,
    pub forecast_timeout: Duration,
    pub schedule: ScheduleSettings,
    pub execution: ExecutionSettings,
    pub receipt_poll: Duration,
    pub min_balance_wei: U256,
    pub log_level: String,
}
