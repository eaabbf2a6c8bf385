//! In-memory chain and payment ledger doubles for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use chrono::Utc;

use crate::chain::{ChainClient, FeeEstimate, TransferRequest, TxReceipt, TRANSFER_GAS_UNITS};
use crate::error::{Error, Result};
use crate::payment::{LedgerBalance, PaymentManager, WithdrawRequest, WithdrawStatus};

/// A transaction the mock chain accepted
#[derive(Debug, Clone)]
pub struct SentTx {
    pub hash: TxHash,
    pub request: TransferRequest,
}

struct ChainState {
    balances: HashMap<Address, U256>,
    pending_nonces: HashMap<Address, u64>,
    fees: FeeEstimate,
    scripted_send_errors: VecDeque<String>,
    fail_balance_reads: bool,
    fail_nonce_reads: bool,
    fail_fee_reads: bool,
    send_attempts: u64,
    nonce_reads: u64,
    sent: Vec<SentTx>,
}

/// Chain double that enforces nonce ordering and moves balances
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                balances: HashMap::new(),
                pending_nonces: HashMap::new(),
                fees: FeeEstimate::Legacy {
                    gas_price: 1_000_000_000,
                },
                scripted_send_errors: VecDeque::new(),
                fail_balance_reads: false,
                fail_nonce_reads: false,
                fail_fee_reads: false,
                send_attempts: 0,
                nonce_reads: 0,
                sent: Vec::new(),
            }),
        }
    }

    pub fn set_balance(&self, address: Address, wei: U256) {
        self.state.lock().unwrap().balances.insert(address, wei);
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().unwrap().pending_nonces.insert(address, nonce);
    }

    pub fn set_fees(&self, fees: FeeEstimate) {
        self.state.lock().unwrap().fees = fees;
    }

    pub fn fail_next_sends_nonce_too_low(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state
                .scripted_send_errors
                .push_back("nonce too low: next nonce is higher".to_string());
        }
    }

    pub fn fail_next_send_with(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .scripted_send_errors
            .push_back(message.to_string());
    }

    pub fn fail_balance_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_balance_reads = fail;
    }

    pub fn fail_nonce_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_nonce_reads = fail;
    }

    pub fn fail_fee_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_fee_reads = fail;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn send_attempts(&self) -> u64 {
        self.state.lock().unwrap().send_attempts
    }

    pub fn nonce_reads(&self) -> u64 {
        self.state.lock().unwrap().nonce_reads
    }

    /// Credit `wei` to `address`, as an executed withdrawal would
    pub fn credit(&self, address: Address, wei: U256) {
        let mut state = self.state.lock().unwrap();
        let balance = state.balances.entry(address).or_default();
        *balance += wei;
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain_id(&self) -> u64 {
        175188
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        let state = self.state.lock().unwrap();
        if state.fail_balance_reads {
            return Err(Error::Rpc("balance unavailable".to_string()));
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.nonce_reads += 1;
        if state.fail_nonce_reads {
            return Err(Error::Rpc("nonce unavailable".to_string()));
        }
        Ok(state.pending_nonces.get(&address).copied().unwrap_or(0))
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate> {
        let state = self.state.lock().unwrap();
        if state.fail_fee_reads {
            return Err(Error::Rpc("fee estimation unavailable".to_string()));
        }
        Ok(state.fees)
    }

    async fn send_transaction(
        &self,
        _signer: &PrivateKeySigner,
        request: &TransferRequest,
    ) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.send_attempts += 1;

        if let Some(message) = state.scripted_send_errors.pop_front() {
            return Err(Error::TransactionSend(message));
        }

        let pending = state.pending_nonces.get(&request.from).copied().unwrap_or(0);
        let nonce = request.nonce.unwrap_or(pending);
        if nonce < pending {
            return Err(Error::TransactionSend(format!(
                "nonce too low: next nonce {pending}, tx nonce {nonce}"
            )));
        }
        state.pending_nonces.insert(request.from, nonce + 1);

        let gas = request
            .fees
            .map(|f| f.max_fee(request.gas_limit.unwrap_or(TRANSFER_GAS_UNITS)))
            .unwrap_or_default();
        let from = state.balances.entry(request.from).or_default();
        *from = from.saturating_sub(request.value + gas);
        let to = state.balances.entry(request.to).or_default();
        *to += request.value;

        let hash = TxHash::left_padding_from(&(state.sent.len() as u64 + 1).to_be_bytes());
        state.sent.push(SentTx {
            hash,
            request: request.clone(),
        });
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let state = self.state.lock().unwrap();
        if state.sent.iter().any(|s| s.hash == tx_hash) {
            Ok(TxReceipt {
                tx_hash,
                block_number: Some(1),
                success: true,
            })
        } else {
            Err(Error::Rpc(format!("unknown transaction {tx_hash}")))
        }
    }
}

struct PaymentState {
    balances: HashMap<Address, LedgerBalance>,
    statuses: HashMap<Address, WithdrawStatus>,
    status_reads: HashMap<Address, u32>,
    fail_status_after_first: HashSet<Address>,
    fail_balance_reads: HashSet<Address>,
    fail_requests: bool,
    fail_withdraws: bool,
    /// Seconds left after a new request; zero makes it executable at once
    delay_secs: u64,
    requests: Vec<(Address, U256)>,
    withdrawals: Vec<(Address, U256)>,
}

/// Payment ledger double with a configurable withdrawal delay
pub struct MockPaymentManager {
    state: Mutex<PaymentState>,
    chain: Option<Arc<MockChain>>,
}

impl MockPaymentManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaymentState {
                balances: HashMap::new(),
                statuses: HashMap::new(),
                status_reads: HashMap::new(),
                fail_status_after_first: HashSet::new(),
                fail_balance_reads: HashSet::new(),
                fail_requests: false,
                fail_withdraws: false,
                delay_secs: 600,
                requests: Vec::new(),
                withdrawals: Vec::new(),
            }),
            chain: None,
        }
    }

    /// Executed withdrawals credit the native balance on `chain`
    pub fn with_chain(mut self, chain: Arc<MockChain>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn set_available(&self, user: Address, wei: U256) {
        self.state.lock().unwrap().balances.insert(
            user,
            LedgerBalance {
                total: wei,
                available: wei,
            },
        );
    }

    pub fn set_delay_secs(&self, secs: u64) {
        self.state.lock().unwrap().delay_secs = secs;
    }

    /// Put an outstanding request on record for `user`
    pub fn set_pending(&self, user: Address, amount: U256, time_remaining_secs: u64) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(
            user,
            WithdrawStatus {
                can_execute: time_remaining_secs == 0,
                request: WithdrawRequest {
                    is_pending: true,
                    amount,
                    requested_at: Some(Utc::now()),
                },
                time_remaining_secs: Some(time_remaining_secs),
            },
        );
        let balance = state.balances.entry(user).or_default();
        balance.total = balance.total.max(amount);
    }

    pub fn fail_status_reads_after_first(&self, user: Address) {
        self.state.lock().unwrap().fail_status_after_first.insert(user);
    }

    pub fn fail_balance_reads_for(&self, user: Address) {
        self.state.lock().unwrap().fail_balance_reads.insert(user);
    }

    pub fn fail_requests(&self, fail: bool) {
        self.state.lock().unwrap().fail_requests = fail;
    }

    pub fn fail_withdraws(&self, fail: bool) {
        self.state.lock().unwrap().fail_withdraws = fail;
    }

    pub fn requests(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn withdrawals(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().withdrawals.clone()
    }
}

#[async_trait]
impl PaymentManager for MockPaymentManager {
    async fn get_balance(&self, user: Address) -> Result<LedgerBalance> {
        let state = self.state.lock().unwrap();
        if state.fail_balance_reads.contains(&user) {
            return Err(Error::Contract("balance unavailable".to_string()));
        }
        Ok(state.balances.get(&user).copied().unwrap_or_default())
    }

    async fn request_withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash> {
        let user = signer.address();
        let mut state = self.state.lock().unwrap();
        if state.fail_requests {
            return Err(Error::Contract("requestWithdraw reverted".to_string()));
        }

        state.requests.push((user, amount));
        let delay = state.delay_secs;
        state.statuses.insert(
            user,
            WithdrawStatus {
                can_execute: delay == 0,
                request: WithdrawRequest {
                    is_pending: true,
                    amount,
                    requested_at: Some(Utc::now()),
                },
                time_remaining_secs: Some(delay),
            },
        );
        let balance = state.balances.entry(user).or_default();
        balance.available = balance.available.saturating_sub(amount);

        Ok(TxHash::left_padding_from(&(state.requests.len() as u64).to_be_bytes()))
    }

    async fn can_execute_withdraw(&self, user: Address) -> Result<WithdrawStatus> {
        let mut state = self.state.lock().unwrap();
        let reads = {
            let reads = state.status_reads.entry(user).or_insert(0);
            *reads += 1;
            *reads
        };
        if reads > 1 && state.fail_status_after_first.contains(&user) {
            return Err(Error::Contract("latestWithdrawRequest unavailable".to_string()));
        }
        Ok(state.statuses.get(&user).cloned().unwrap_or_default())
    }

    async fn withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash> {
        let user = signer.address();
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_withdraws {
                return Err(Error::Contract("withdraw reverted".to_string()));
            }
            state.withdrawals.push((user, amount));
            state.statuses.remove(&user);
            let balance = state.balances.entry(user).or_default();
            balance.total = balance.total.saturating_sub(amount);
        }

        if let Some(chain) = &self.chain {
            chain.credit(user, amount);
        }

        let count = self.state.lock().unwrap().withdrawals.len() as u64;
        Ok(TxHash::left_padding_from(&(0x1000 + count).to_be_bytes()))
    }
}
