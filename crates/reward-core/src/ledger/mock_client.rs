//! Deterministic in-memory ledger for tests and offline runs.

use super::{LedgerClient, LedgerError, TransferKey, TransferReceipt, TransferRequest};
use crate::{TxRef, WalletAddress};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A transfer the mock ledger has executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTransfer {
    pub tx_ref: TxRef,
    pub to: WalletAddress,
    pub amount: u64,
}

#[derive(Debug, Default)]
pub struct MockLedgerClient {
    balances: Mutex<HashMap<String, u64>>,
    issued: Mutex<HashMap<TransferKey, IssuedTransfer>>,
    fail_next_balance: Mutex<Option<LedgerError>>,
    fail_next_transfer: Mutex<Option<LedgerError>>,
    lose_next_receipt: Mutex<Option<LedgerError>>,
    balance_calls: AtomicU64,
    transfer_calls: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: &str, balance: u64) -> Self {
        self.set_balance(address, balance);
        self
    }

    pub fn set_balance(&self, address: &str, balance: u64) {
        lock(&self.balances).insert(address.trim().to_string(), balance);
    }

    /// Pretend a transfer for `key` already landed on-chain without the caller
    /// having recorded it (process died between transfer and bookkeeping).
    pub fn seed_landed(&self, key: TransferKey, to: WalletAddress, amount: u64) -> TxRef {
        let tx_ref = Self::make_tx_ref(&key);
        lock(&self.issued).insert(
            key,
            IssuedTransfer {
                tx_ref: tx_ref.clone(),
                to,
                amount,
            },
        );
        tx_ref
    }

    /// The next balance read fails with `err`.
    pub fn fail_next_balance(&self, err: LedgerError) {
        *lock(&self.fail_next_balance) = Some(err);
    }

    /// The next transfer fails with `err` without executing.
    pub fn fail_next_transfer(&self, err: LedgerError) {
        *lock(&self.fail_next_transfer) = Some(err);
    }

    /// The next transfer executes but the caller sees `err` instead of the receipt.
    pub fn lose_next_receipt(&self, err: LedgerError) {
        *lock(&self.lose_next_receipt) = Some(err);
    }

    pub fn balance_calls(&self) -> u64 {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn transfer_calls(&self) -> u64 {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    pub fn issued(&self, key: &TransferKey) -> Option<IssuedTransfer> {
        lock(&self.issued).get(key).cloned()
    }

    pub fn issued_count(&self) -> usize {
        lock(&self.issued).len()
    }

    fn make_tx_ref(key: &TransferKey) -> TxRef {
        let digest = blake3::hash(key.as_bytes());
        TxRef(format!("0x{}", digest.to_hex()))
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn read_balance(&self, address: &WalletAddress) -> Result<u64, LedgerError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.fail_next_balance).take() {
            return Err(err);
        }
        Ok(lock(&self.balances)
            .get(address.as_str())
            .copied()
            .unwrap_or(0))
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.fail_next_transfer).take() {
            return Err(err);
        }

        let mut issued = lock(&self.issued);
        if let Some(existing) = issued.get(&request.key) {
            return Ok(TransferReceipt {
                tx_ref: existing.tx_ref.clone(),
                already_known: true,
            });
        }

        let tx_ref = Self::make_tx_ref(&request.key);
        issued.insert(
            request.key,
            IssuedTransfer {
                tx_ref: tx_ref.clone(),
                to: request.to.clone(),
                amount: request.amount,
            },
        );
        drop(issued);

        if let Some(err) = lock(&self.lose_next_receipt).take() {
            return Err(err);
        }
        Ok(TransferReceipt {
            tx_ref,
            already_known: false,
        })
    }

    async fn find_transfer(&self, key: &TransferKey) -> Result<Option<TxRef>, LedgerError> {
        Ok(lock(&self.issued).get(key).map(|t| t.tx_ref.clone()))
    }
}
