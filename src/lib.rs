// Core modules
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod forecast;
pub mod pricing;
pub mod round;
pub mod scanner;
pub mod scheduler;

// Re-exports
pub use chain::{ChainClient, Receipt, RpcChainClient};
pub use config::{OracleSettings, Settings, StuckTxPolicy};
pub use contracts::{ContractBindings, ContractCall};
pub use error::{ConfigError, OracleError, Step};
pub use executor::{AttemptStatus, ResolutionAttempt, ResolutionExecutor};
pub use forecast::{Forecast, ForecastProvider, HttpForecastProvider};
pub use round::Round;
pub use scanner::RoundScanner;
pub use scheduler::{CycleOutcome, Scheduler, SchedulerState, SchedulerStats};
