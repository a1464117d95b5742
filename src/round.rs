use chrono::{DateTime, Utc};
use ethers::types::U256;

/// A betting round as reported by the market contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub id: u64,
    pub target_time: DateTime<Utc>,
    /// Settlement price in fixed-point units. `None` until resolved.
    pub actual_price: Option<U256>,
    pub resolved: bool,
    /// Total stake in wei.
    pub total_pool: U256,
}

impl Round {
    pub fn new(id: u64, target_time: DateTime<Utc>, total_pool: U256) -> Self {
        Self {
            id,
            target_time,
            actual_price: None,
            resolved: false,
            total_pool,
        }
    }

    pub fn with_resolution(mut self, price: U256) -> Self {
        self.actual_price = Some(price);
        self.resolved = true;
        self
    }

    /// Unresolved, past its target time, and carrying stake.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.resolved && now >= self.target_time && !self.total_pool.is_zero()
    }
}
