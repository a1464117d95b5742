use crate::chain::ChainClient;
use crate::contracts::ContractBindings;
use crate::error::{Result, Step};
use crate::pricing::format_ether;
use crate::round::Round;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads the current round and decides whether it needs resolving.
pub struct RoundScanner {
    chain: Arc<dyn ChainClient>,
    contracts: Arc<ContractBindings>,
}

impl RoundScanner {
    pub fn new(chain: Arc<dyn ChainClient>, contracts: Arc<ContractBindings>) -> Self {
        Self { chain, contracts }
    }

    /// The current round if it is due at `now`.
    ///
    /// Read failures are logged and reported as "not due"; they never reach
    /// the caller.
    pub async fn check_due(&self, now: DateTime<Utc>) -> Option<Round> {
        match self.current_round().await {
            Ok(round) => {
                info!(
                    round_id = round.id,
                    target_time = %round.target_time,
                    pool_eth = %format_ether(round.total_pool),
                    resolved = round.resolved,
                    "Checked current round"
                );
                if round.is_due(now) {
                    Some(round)
                } else {
                    debug!(round_id = round.id, "Round not due");
                    None
                }
            }
            Err(e) => {
                warn!(step = %Step::Scan, error = %e, "Round scan failed, treating as not due");
                None
            }
        }
    }

    pub async fn current_round(&self) -> Result<Round> {
        let round_id = self.contracts.current_round_id(self.chain.as_ref()).await?;
        self.contracts.round_info(self.chain.as_ref(), round_id).await
    }
}
