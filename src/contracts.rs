// Typed encode/decode for the betting market (read) and price oracle (write).

use crate::chain::ChainClient;
use crate::config::parse_address;
use crate::error::{ConfigError, OracleError, Result, Step};
use crate::round::Round;
use chrono::{TimeZone, Utc};
use ethers::abi::parse_abi;
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, U256};

const BETTING_ABI: &[&str] = &[
    "function currentRoundId() external view returns (uint256)",
    "function getRoundInfo(uint256 roundId) external view returns (uint256 id, uint256 targetTime, uint256 actualPrice, bool resolved, uint256 totalPool)",
];

const ORACLE_ABI: &[&str] = &["function updatePrice(uint256 roundId, uint256 price) external"];

/// An encoded call, not yet signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
}

type RoundInfo = (U256, U256, U256, bool, U256);

#[derive(Debug, Clone)]
pub struct ContractBindings {
    betting_address: Address,
    oracle_address: Address,
    betting: BaseContract,
    oracle: BaseContract,
}

impl ContractBindings {
    pub fn new(betting_address: Address, oracle_address: Address) -> Result<Self> {
        let betting = parse_abi(BETTING_ABI).map_err(|e| ConfigError::InvalidValue {
            field: "betting_abi",
            reason: e.to_string(),
        })?;
        let oracle = parse_abi(ORACLE_ABI).map_err(|e| ConfigError::InvalidValue {
            field: "oracle_abi",
            reason: e.to_string(),
        })?;

        Ok(Self {
            betting_address,
            oracle_address,
            betting: BaseContract::from(betting),
            oracle: BaseContract::from(oracle),
        })
    }

    /// Bind from unparsed address strings, failing on missing or malformed input.
    pub fn from_strs(betting_address: Option<&str>, oracle_address: Option<&str>) -> Result<Self> {
        let betting = parse_address("betting_address", betting_address.map(str::to_string))?;
        let oracle = parse_address("oracle_address", oracle_address.map(str::to_string))?;
        Self::new(betting, oracle)
    }

    pub fn betting_address(&self) -> Address {
        self.betting_address
    }

    pub fn oracle_address(&self) -> Address {
        self.oracle_address
    }

    pub fn current_round_id_call(&self) -> Result<ContractCall> {
        let data = self
            .betting
            .encode("currentRoundId", ())
            .map_err(|e| OracleError::chain_call(Step::Scan, e))?;
        Ok(ContractCall {
            to: self.betting_address,
            data,
        })
    }

    pub fn decode_current_round_id(&self, output: &Bytes) -> Result<u64> {
        let id: U256 = self
            .betting
            .decode_output("currentRoundId", output)
            .map_err(|e| OracleError::chain_call(Step::Scan, e))?;
        u256_to_u64(id, "round id")
    }

    pub fn round_info_call(&self, round_id: u64) -> Result<ContractCall> {
        let data = self
            .betting
            .encode("getRoundInfo", U256::from(round_id))
            .map_err(|e| OracleError::chain_call(Step::Scan, e))?;
        Ok(ContractCall {
            to: self.betting_address,
            data,
        })
    }

    pub fn decode_round_info(&self, output: &Bytes) -> Result<Round> {
        let (id, target_time, actual_price, resolved, total_pool): RoundInfo = self
            .betting
            .decode_output("getRoundInfo", output)
            .map_err(|e| OracleError::chain_call(Step::Scan, e))?;

        let target_secs = i64::try_from(u256_to_u64(target_time, "target time")?)
            .map_err(|_| OracleError::chain_call(Step::Scan, "target time out of range"))?;
        let target_time = Utc
            .timestamp_opt(target_secs, 0)
            .single()
            .ok_or_else(|| OracleError::chain_call(Step::Scan, "target time out of range"))?;

        Ok(Round {
            id: u256_to_u64(id, "round id")?,
            target_time,
            actual_price: (!actual_price.is_zero()).then_some(actual_price),
            resolved,
            total_pool,
        })
    }

    /// Unsigned `updatePrice(roundId, price)` on the oracle.
    pub fn update_price_call(&self, round_id: u64, price: U256) -> Result<ContractCall> {
        let data = self
            .oracle
            .encode("updatePrice", (U256::from(round_id), price))
            .map_err(|e| OracleError::chain_call(Step::Build, e))?;
        Ok(ContractCall {
            to: self.oracle_address,
            data,
        })
    }

    pub async fn current_round_id(&self, chain: &dyn ChainClient) -> Result<u64> {
        let call = self.current_round_id_call()?;
        let output = chain.call(call.to, call.data).await?;
        self.decode_current_round_id(&output)
    }

    pub async fn round_info(&self, chain: &dyn ChainClient, round_id: u64) -> Result<Round> {
        let call = self.round_info_call(round_id)?;
        let output = chain.call(call.to, call.data).await?;
        self.decode_round_info(&output)
    }
}

fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(OracleError::chain_call(
            Step::Scan,
            format!("{} {} does not fit in 64 bits", what, value),
        ));
    }
    Ok(value.as_u64())
}
