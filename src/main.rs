use anyhow::{Context, Result};
use clap::Parser;
use ethers::signers::Signer;
use round_oracle::{
    chain::{ChainClient, RpcChainClient},
    config::{OracleSettings, Settings},
    contracts::ContractBindings,
    executor::ResolutionExecutor,
    forecast::HttpForecastProvider,
    pricing::format_ether,
    scanner::RoundScanner,
    scheduler::{stop_channel, CycleOutcome, Scheduler},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Push oracle that settles due prediction-market rounds on-chain.
#[derive(Parser, Debug)]
#[command(name = "round-oracle", version, about)]
struct Cli {
    /// Run a single scan + resolve cycle and exit
    #[arg(long)]
    once: bool,

    /// TOML configuration file (defaults to ./oracle.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    let settings = match Settings::load(cli.config.as_deref()).and_then(Settings::validate) {
        Ok(settings) => settings,
        Err(e) => {
            init_logging("info");
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings.log_level);
    info!("Starting round oracle");

    let mut scheduler = match build(&settings).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Installed in both modes so Ctrl-C never interrupts a receipt wait.
    let stop_rx = stop_channel(tokio::signal::ctrl_c());

    if cli.once {
        info!("Running a single cycle");
        return match scheduler.run_once().await {
            Ok(CycleOutcome::Attempted(attempt)) => {
                info!(round_id = attempt.round_id, status = %attempt.status, "Cycle finished");
                ExitCode::SUCCESS
            }
            Ok(CycleOutcome::NotDue) => {
                info!("Cycle finished, no round due");
                ExitCode::SUCCESS
            }
            // Cycle errors are logged by the scheduler and are not startup failures.
            Err(_) => ExitCode::SUCCESS,
        };
    }

    scheduler.run(stop_rx).await;
    ExitCode::SUCCESS
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build(settings: &OracleSettings) -> Result<Scheduler> {
    let chain = RpcChainClient::connect(&settings.rpc_url, settings.receipt_poll)
        .await
        .context("Failed to connect to RPC endpoint")?;
    let chain: Arc<dyn ChainClient> = Arc::new(chain);

    let contracts = Arc::new(
        ContractBindings::new(settings.betting_address, settings.oracle_address)
            .context("Failed to bind contracts")?,
    );

    let account = settings.wallet.address();
    info!("🔑 Signer: {:?}", account);
    info!("📜 Oracle: {:?}", contracts.oracle_address());
    info!("📜 Betting: {:?}", contracts.betting_address());

    match chain.balance(account).await {
        Ok(balance) => {
            info!("💰 Balance: {} ETH", format_ether(balance));
            if balance < settings.min_balance_wei {
                warn!(
                    "⚠️ Balance below {} ETH - transactions may fail for lack of gas",
                    format_ether(settings.min_balance_wei)
                );
            }
        }
        Err(e) => warn!("Could not read signer balance: {}", e),
    }

    let forecaster = Arc::new(
        HttpForecastProvider::new(settings.forecast_url.clone(), settings.forecast_timeout)
            .context("Failed to create forecast client")?,
    );

    let scanner = RoundScanner::new(chain.clone(), contracts.clone());
    let executor = ResolutionExecutor::new(
        chain.clone(),
        contracts,
        forecaster,
        settings.wallet.clone(),
        settings.execution.clone(),
    );

    Ok(Scheduler::new(chain, scanner, executor, settings.schedule.clone()))
}
