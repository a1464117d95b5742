#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256, rlp::Rlp};
use round_oracle::chain::{ChainClient, Receipt};
use round_oracle::config::{ExecutionSettings, ScheduleSettings};
use round_oracle::contracts::ContractBindings;
use round_oracle::error::{OracleError, Result, Step};
use round_oracle::executor::ResolutionExecutor;
use round_oracle::forecast::{Forecast, ForecastProvider};
use round_oracle::round::Round;
use round_oracle::scanner::RoundScanner;
use round_oracle::scheduler::Scheduler;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BETTING: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
pub const ORACLE: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const SIGNER_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
pub const CHAIN_ID: u64 = 11_155_111;
pub const GAS_USED: u64 = 48_213;

pub fn ether(units: u64) -> U256 {
    U256::from(units) * U256::exp10(18)
}

pub fn gwei(units: u64) -> U256 {
    U256::from(units) * U256::exp10(9)
}

/// How the fake ledger treats the next submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mining {
    Success,
    Revert,
    /// Never mined within the receipt timeout.
    Stuck,
    /// Accepted, but the earlier transaction at the same nonce gets mined instead.
    Superseded,
}

/// A transaction the fake ledger accepted.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub hash: H256,
    pub to: Address,
    pub nonce: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub round_id: u64,
    pub price: U256,
}

#[derive(Debug)]
pub struct LedgerState {
    pub current_round: u64,
    pub rounds: HashMap<u64, Round>,
    /// `None` makes the gas price quote fail.
    pub gas_price: Option<U256>,
    pub nonce: U256,
    pub nonce_reads: usize,
    pub block_ok: bool,
    pub reads_ok: bool,
    pub submit_ok: bool,
    /// Refuse submissions once this many were accepted.
    pub accept_at_most: Option<usize>,
    pub mining: VecDeque<Mining>,
    pub sent: Vec<SentTx>,
    receipts: HashMap<H256, Receipt>,
}

/// In-memory stand-in for the RPC endpoint and both contracts.
pub struct MockChain {
    pub state: Mutex<LedgerState>,
}

impl MockChain {
    pub fn with_round(round: Round) -> Arc<Self> {
        let mut rounds = HashMap::new();
        let current_round = round.id;
        rounds.insert(round.id, round);
        Arc::new(Self {
            state: Mutex::new(LedgerState {
                current_round,
                rounds,
                gas_price: Some(gwei(20)),
                nonce: U256::from(5),
                nonce_reads: 0,
                block_ok: true,
                reads_ok: true,
                submit_ok: true,
                accept_at_most: None,
                mining: VecDeque::new(),
                sent: Vec::new(),
                receipts: HashMap::new(),
            }),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut LedgerState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn round(&self, id: u64) -> Round {
        self.state.lock().unwrap().rounds[&id].clone()
    }

    pub fn nonce_reads(&self) -> usize {
        self.state.lock().unwrap().nonce_reads
    }
}

fn round_tokens(round: &Round) -> Vec<Token> {
    vec![
        Token::Uint(U256::from(round.id)),
        Token::Uint(U256::from(round.target_time.timestamp() as u64)),
        Token::Uint(round.actual_price.unwrap_or_default()),
        Token::Bool(round.resolved),
        Token::Uint(round.total_pool),
    ]
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn block_number(&self) -> Result<u64> {
        if self.state.lock().unwrap().block_ok {
            Ok(4_200_000)
        } else {
            Err(OracleError::Connection("connection refused".into()))
        }
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        Ok(ether(1))
    }

    async fn gas_price(&self) -> Result<U256> {
        self.state
            .lock()
            .unwrap()
            .gas_price
            .ok_or_else(|| OracleError::chain_call(Step::GasPrice, "request timed out"))
    }

    async fn nonce(&self, _address: Address) -> Result<U256> {
        let mut state = self.state.lock().unwrap();
        state.nonce_reads += 1;
        Ok(state.nonce)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        if !state.reads_ok {
            return Err(OracleError::chain_call(Step::Scan, "execution timeout"));
        }
        let selector = &data[..4];
        if selector == id("currentRoundId()") {
            return Ok(encode(&[Token::Uint(U256::from(state.current_round))]).into());
        }
        if selector == id("getRoundInfo(uint256)") {
            let round_id = U256::from_big_endian(&data[4..36]).as_u64();
            let round = state
                .rounds
                .get(&round_id)
                .ok_or_else(|| OracleError::chain_call(Step::Scan, "execution reverted"))?;
            return Ok(encode(&round_tokens(round)).into());
        }
        Err(OracleError::chain_call(Step::Scan, "unknown selector"))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        let over_limit = state
            .accept_at_most
            .map_or(false, |limit| state.sent.len() >= limit);
        if !state.submit_ok || over_limit {
            return Err(OracleError::chain_call(Step::Submit, "nonce too low"));
        }

        let (tx, _signature) = TypedTransaction::decode_signed(&Rlp::new(&raw))
            .map_err(|e| OracleError::chain_call(Step::Submit, e))?;
        let data = tx.data().cloned().unwrap_or_default();
        assert_eq!(&data[..4], &id("updatePrice(uint256,uint256)")[..]);
        let args = decode(&[ParamType::Uint(256), ParamType::Uint(256)], &data[4..])
            .map_err(|e| OracleError::chain_call(Step::Submit, e))?;

        let hash = H256::from(keccak256(&raw));
        let sent = SentTx {
            hash,
            to: *tx.to_addr().expect("oracle address"),
            nonce: *tx.nonce().expect("nonce"),
            gas: *tx.gas().expect("gas limit"),
            gas_price: tx.gas_price().expect("gas price"),
            round_id: args[0].clone().into_uint().expect("round id").as_u64(),
            price: args[1].clone().into_uint().expect("price"),
        };

        let mining = state.mining.pop_front().unwrap_or(Mining::Success);
        match mining {
            Mining::Success => {
                if let Some(round) = state.rounds.get_mut(&sent.round_id) {
                    round.resolved = true;
                    round.actual_price = Some(sent.price);
                }
                state.receipts.insert(
                    hash,
                    Receipt {
                        tx_hash: hash,
                        status: 1,
                        gas_used: U256::from(GAS_USED),
                    },
                );
            }
            Mining::Revert => {
                state.receipts.insert(
                    hash,
                    Receipt {
                        tx_hash: hash,
                        status: 0,
                        gas_used: U256::from(23_000),
                    },
                );
            }
            Mining::Stuck => {}
            Mining::Superseded => {
                let earlier = state
                    .sent
                    .iter()
                    .find(|tx| tx.nonce == sent.nonce)
                    .map(|tx| tx.hash)
                    .expect("earlier transaction at this nonce");
                if let Some(round) = state.rounds.get_mut(&sent.round_id) {
                    round.resolved = true;
                    round.actual_price = Some(sent.price);
                }
                state.receipts.insert(
                    earlier,
                    Receipt {
                        tx_hash: earlier,
                        status: 1,
                        gas_used: U256::from(GAS_USED),
                    },
                );
            }
        }

        state.sent.push(sent);
        Ok(hash)
    }

    async fn wait_for_any_receipt(&self, tx_hashes: &[H256], timeout: Duration) -> Result<Receipt> {
        for hash in tx_hashes {
            if let Some(receipt) = self.receipt(*hash).await? {
                return Ok(receipt);
            }
        }
        Err(OracleError::TransactionTimeout {
            tx_hash: tx_hashes.last().copied().unwrap_or_default(),
            waited: timeout,
        })
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<Receipt>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).copied())
    }
}

/// Forecast double returning a fixed answer.
pub struct StubForecast {
    answer: Mutex<std::result::Result<Option<Decimal>, String>>,
    delay: Option<Duration>,
    pub calls: Mutex<usize>,
}

impl StubForecast {
    pub fn price(price: Decimal) -> Arc<Self> {
        Self::answer(Ok(Some(price)))
    }

    pub fn answer(answer: std::result::Result<Option<Decimal>, String>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            delay: None,
            calls: Mutex::new(0),
        })
    }

    /// Answers with `price` only after `delay`.
    pub fn slow(price: Decimal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(Some(price))),
            delay: Some(delay),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ForecastProvider for StubForecast {
    async fn forecast(&self) -> Result<Option<Forecast>> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = self.answer.lock().unwrap().clone();
        match answer {
            Ok(Some(predicted_price)) => Ok(Some(Forecast {
                predicted_price,
                as_of: Utc::now(),
                model_version: Some("v1.0.0".to_string()),
            })),
            Ok(None) => Ok(None),
            Err(reason) => Err(OracleError::Forecast(reason)),
        }
    }
}

pub fn bindings() -> Arc<ContractBindings> {
    Arc::new(ContractBindings::from_strs(Some(BETTING), Some(ORACLE)).unwrap())
}

pub fn signer() -> LocalWallet {
    SIGNER_KEY.parse().unwrap()
}

pub fn due_round(id: u64, now: DateTime<Utc>) -> Round {
    Round::new(id, now - chrono::Duration::seconds(1), ether(5))
}

pub fn executor(
    chain: Arc<MockChain>,
    forecast: Arc<StubForecast>,
    settings: ExecutionSettings,
) -> ResolutionExecutor {
    ResolutionExecutor::new(chain, bindings(), forecast, signer(), settings)
}

pub fn scheduler(chain: Arc<MockChain>, forecast: Arc<StubForecast>) -> Scheduler {
    let contracts = bindings();
    let scanner = RoundScanner::new(chain.clone(), contracts.clone());
    let executor = ResolutionExecutor::new(
        chain.clone(),
        contracts,
        forecast,
        signer(),
        ExecutionSettings::default(),
    );
    Scheduler::new(chain, scanner, executor, ScheduleSettings::default())
}
