// Resolution of a single due round: forecast, price conversion, gas pricing,
// build/sign/submit, confirmation and outcome classification.
//
// `execute` never returns an error. Every failure is logged with the round id
// and step and folded into the attempt's status; the round stays unresolved
// and is reconsidered on the next due check.

use crate::chain::{ChainClient, Receipt};
use crate::config::{ExecutionSettings, StuckTxPolicy};
use crate::contracts::{ContractBindings, ContractCall};
use crate::error::{OracleError, Step};
use crate::forecast::ForecastProvider;
use crate::pricing::{bumped_gas_price, gas_price_or_floor, to_fixed_point};
use crate::round::Round;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Resolved { gas_used: U256 },
    /// Mined with status 0: already resolved by someone else, or an on-chain guard failed.
    Reverted,
    /// The pre-build re-check found the round already settled.
    AlreadyResolved,
    /// The forecast provider had no prediction yet.
    NoForecast,
    ForecastFailed,
    /// Submitted but unconfirmed within the receipt timeout. Outcome unknown.
    TimedOut,
    Failed { step: Step },
}

impl AttemptStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, AttemptStatus::Resolved { .. })
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Resolved { .. } => f.write_str("resolved"),
            AttemptStatus::Reverted => f.write_str("reverted"),
            AttemptStatus::AlreadyResolved => f.write_str("already_resolved"),
            AttemptStatus::NoForecast => f.write_str("no_forecast"),
            AttemptStatus::ForecastFailed => f.write_str("forecast_failed"),
            AttemptStatus::TimedOut => f.write_str("timed_out"),
            AttemptStatus::Failed { step } => write!(f, "failed({})", step),
        }
    }
}

/// Record of one `execute` call. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionAttempt {
    pub round_id: u64,
    pub predicted_price: Option<Decimal>,
    pub price_fixed_point: Option<U256>,
    pub gas_price_wei: Option<U256>,
    pub nonce: Option<U256>,
    pub tx_hash: Option<H256>,
    pub status: AttemptStatus,
}

impl ResolutionAttempt {
    fn new(round_id: u64) -> Self {
        Self {
            round_id,
            predicted_price: None,
            price_fixed_point: None,
            gas_price_wei: None,
            nonce: None,
            tx_hash: None,
            status: AttemptStatus::Failed { step: Step::Forecast },
        }
    }

    fn finish(mut self, status: AttemptStatus) -> Self {
        self.status = status;
        self
    }
}

// A failure tagged with the step it happened in.
struct StepFailure {
    step: Step,
    source: OracleError,
}

trait AtStep<T> {
    fn at(self, step: Step) -> Result<T, StepFailure>;
}

impl<T> AtStep<T> for Result<T, OracleError> {
    fn at(self, step: Step) -> Result<T, StepFailure> {
        self.map_err(|source| StepFailure { step, source })
    }
}

enum Submission {
    Confirmed(Receipt),
    AlreadyResolved,
}

pub struct ResolutionExecutor {
    chain: Arc<dyn ChainClient>,
    contracts: Arc<ContractBindings>,
    forecaster: Arc<dyn ForecastProvider>,
    signer: LocalWallet,
    settings: ExecutionSettings,
}

impl ResolutionExecutor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        contracts: Arc<ContractBindings>,
        forecaster: Arc<dyn ForecastProvider>,
        signer: LocalWallet,
        settings: ExecutionSettings,
    ) -> Self {
        let signer = signer.with_chain_id(chain.chain_id());
        Self {
            chain,
            contracts,
            forecaster,
            signer,
            settings,
        }
    }

    pub fn account(&self) -> Address {
        self.signer.address()
    }

    /// Try to resolve `round`. At most one transaction is submitted, plus one
    /// same-nonce replacement when the stuck-transaction policy allows it.
    pub async fn execute(&self, round: &Round) -> ResolutionAttempt {
        let mut attempt = ResolutionAttempt::new(round.id);

        let forecast = match self.forecaster.forecast().await {
            Ok(Some(forecast)) => forecast,
            Ok(None) => {
                warn!(round_id = round.id, step = %Step::Forecast, "No forecast available yet, skipping");
                return attempt.finish(AttemptStatus::NoForecast);
            }
            Err(e) => {
                error!(round_id = round.id, step = %Step::Forecast, error = %e, "Forecast fetch failed");
                return attempt.finish(AttemptStatus::ForecastFailed);
            }
        };

        attempt.predicted_price = Some(forecast.predicted_price);
        info!(
            round_id = round.id,
            predicted_price = %forecast.predicted_price,
            as_of = %forecast.as_of,
            "Resolving round"
        );

        let Some(price) = to_fixed_point(forecast.predicted_price) else {
            error!(
                round_id = round.id,
                step = %Step::Convert,
                predicted_price = %forecast.predicted_price,
                "Predicted price cannot be expressed in fixed-point units"
            );
            return attempt.finish(AttemptStatus::Failed { step: Step::Convert });
        };
        attempt.price_fixed_point = Some(price);

        let status = match self.submit_and_confirm(round.id, price, &mut attempt).await {
            Ok(Submission::AlreadyResolved) => {
                info!(round_id = round.id, "Round already resolved on-chain, nothing to submit");
                AttemptStatus::AlreadyResolved
            }
            Ok(Submission::Confirmed(receipt)) => self.classify(round.id, receipt),
            Err(StepFailure {
                source: OracleError::TransactionTimeout { tx_hash, waited },
                ..
            }) => {
                warn!(
                    round_id = round.id,
                    step = %Step::Confirm,
                    tx_hash = ?tx_hash,
                    waited_secs = waited.as_secs(),
                    "Transaction unconfirmed, round will be re-checked next cycle"
                );
                AttemptStatus::TimedOut
            }
            Err(StepFailure { step, source }) => {
                error!(round_id = round.id, step = %step, error = %source, "Resolution attempt failed");
                AttemptStatus::Failed { step }
            }
        };

        attempt.finish(status)
    }

    fn classify(&self, round_id: u64, receipt: Receipt) -> AttemptStatus {
        if receipt.succeeded() {
            info!(
                round_id,
                tx_hash = ?receipt.tx_hash,
                gas_used = %receipt.gas_used,
                "Round resolved"
            );
            if let Some(base) = &self.settings.explorer_tx_url {
                info!(round_id, "Explorer: {}{:?}", base, receipt.tx_hash);
            }
            AttemptStatus::Resolved {
                gas_used: receipt.gas_used,
            }
        } else {
            let revert = OracleError::ContractRevert {
                round_id,
                tx_hash: receipt.tx_hash,
            };
            warn!(round_id, step = %Step::Confirm, gas_used = %receipt.gas_used, "{}; not resubmitting", revert);
            AttemptStatus::Reverted
        }
    }

    async fn submit_and_confirm(
        &self,
        round_id: u64,
        price: U256,
        attempt: &mut ResolutionAttempt,
    ) -> Result<Submission, StepFailure> {
        let quote = self.chain.gas_price().await;
        if let Err(e) = &quote {
            warn!(
                round_id,
                step = %Step::GasPrice,
                error = %e,
                floor_wei = %self.settings.gas_price_floor,
                "Gas price quote failed, using floor"
            );
        }
        let gas_price = gas_price_or_floor(
            quote,
            self.settings.gas_price_floor,
            self.settings.gas_premium_percent,
        );
        attempt.gas_price_wei = Some(gas_price);

        let nonce = self.chain.nonce(self.account()).await.at(Step::Nonce)?;
        attempt.nonce = Some(nonce);

        let current = self
            .contracts
            .round_info(self.chain.as_ref(), round_id)
            .await
            .at(Step::Recheck)?;
        if current.resolved {
            return Ok(Submission::AlreadyResolved);
        }

        let call = self.contracts.update_price_call(round_id, price).at(Step::Build)?;
        let tx_hash = self.sign_and_send(&call, gas_price, nonce).await?;
        attempt.tx_hash = Some(tx_hash);
        info!(
            round_id,
            tx_hash = ?tx_hash,
            gas_price_wei = %gas_price,
            nonce = %nonce,
            "Transaction submitted"
        );

        match self
            .chain
            .wait_for_receipt(tx_hash, self.settings.receipt_timeout)
            .await
        {
            Ok(receipt) => Ok(Submission::Confirmed(receipt)),
            Err(e @ OracleError::TransactionTimeout { .. }) => match self.settings.stuck_tx_policy {
                StuckTxPolicy::Recheck => Err(StepFailure {
                    step: Step::Confirm,
                    source: e,
                }),
                StuckTxPolicy::ReplaceSameNonce { bump_percent } => {
                    self.replace(round_id, &call, gas_price, nonce, tx_hash, bump_percent, attempt)
                        .await
                }
            },
            Err(e) => Err(StepFailure {
                step: Step::Confirm,
                source: e,
            }),
        }
    }

    // Re-sign the identical call at the same nonce with a higher gas price.
    // Only one of the two transactions can ever be mined.
    #[allow(clippy::too_many_arguments)]
    async fn replace(
        &self,
        round_id: u64,
        call: &ContractCall,
        previous_gas_price: U256,
        nonce: U256,
        original: H256,
        bump_percent: u64,
        attempt: &mut ResolutionAttempt,
    ) -> Result<Submission, StepFailure> {
        let gas_price = bumped_gas_price(previous_gas_price, bump_percent);
        warn!(
            round_id,
            tx_hash = ?original,
            nonce = %nonce,
            gas_price_wei = %gas_price,
            "Transaction stuck, replacing at the same nonce"
        );

        let replacement = match self.sign_and_send(call, gas_price, nonce).await {
            Ok(hash) => hash,
            Err(failure) => {
                // Usually "nonce too low": the original got mined meanwhile.
                warn!(round_id, step = %failure.step, error = %failure.source, "Replacement rejected, checking original");
                return match self.chain.receipt(original).await.at(Step::Confirm)? {
                    Some(receipt) => Ok(Submission::Confirmed(receipt)),
                    None => Err(StepFailure {
                        step: Step::Confirm,
                        source: OracleError::TransactionTimeout {
                            tx_hash: original,
                            waited: self.settings.receipt_timeout,
                        },
                    }),
                };
            }
        };
        attempt.tx_hash = Some(replacement);
        attempt.gas_price_wei = Some(gas_price);

        // Either one may be mined; the other is dropped by the node.
        let receipt = self
            .chain
            .wait_for_any_receipt(&[original, replacement], self.settings.receipt_timeout)
            .await
            .at(Step::Confirm)?;
        if receipt.tx_hash == original {
            info!(round_id, tx_hash = ?original, "Original transaction mined, replacement dropped");
            attempt.tx_hash = Some(original);
            attempt.gas_price_wei = Some(previous_gas_price);
        }
        Ok(Submission::Confirmed(receipt))
    }

    async fn sign_and_send(
        &self,
        call: &ContractCall,
        gas_price: U256,
        nonce: U256,
    ) -> Result<H256, StepFailure> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.account())
            .to(call.to)
            .data(call.data.clone())
            .gas(self.settings.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain.chain_id())
            .into();

        let signature = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| OracleError::Signing(e.to_string()))
            .at(Step::Sign)?;
        let raw: Bytes = tx.rlp_signed(&signature);

        self.chain.send_raw_transaction(raw).await.at(Step::Submit)
    }
}
