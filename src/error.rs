use ethers::types::H256;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// The point in a resolution attempt (or scan) where something went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Scan,
    Forecast,
    Convert,
    GasPrice,
    Nonce,
    Recheck,
    Build,
    Sign,
    Submit,
    Confirm,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Scan => "scan",
            Step::Forecast => "forecast",
            Step::Convert => "convert",
            Step::GasPrice => "gas_price",
            Step::Nonce => "nonce",
            Step::Recheck => "recheck",
            Step::Build => "build",
            Step::Sign => "sign",
            Step::Submit => "submit",
            Step::Confirm => "confirm",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("RPC connection failed: {0}")]
    Connection(String),

    #[error("forecast unavailable: {0}")]
    Forecast(String),

    #[error("chain call failed during {step}: {reason}")]
    ChainCall { step: Step, reason: String },

    #[error("transaction {tx_hash:?} not confirmed within {secs}s", secs = .waited.as_secs())]
    TransactionTimeout { tx_hash: H256, waited: Duration },

    #[error("transaction {tx_hash:?} for round {round_id} reverted")]
    ContractRevert { round_id: u64, tx_hash: H256 },

    #[error("failed to sign transaction: {0}")]
    Signing(String),
}

impl OracleError {
    pub fn chain_call(step: Step, reason: impl ToString) -> Self {
        OracleError::ChainCall {
            step,
            reason: reason.to_string(),
        }
    }

    /// Config and connection errors abort the process when they happen at startup.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, OracleError::Config(_) | OracleError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
