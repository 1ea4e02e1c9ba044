#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_sign_loss)]

//! Durable reward rounds and wallet observations on sled.
//!
//! Layout:
//! - `meta`: schema version and the round / observation sequences
//! - `rounds`: `round_id (u64 BE) -> RewardRound (json)`
//! - `wallet_observations`: `seq (u64 BE) -> WalletRecord (json)`
//! - `wallet_index`: `len(identity) (u32 BE) || identity || seq (u64 BE) -> wallet address`
//!
//! Rounds are never deleted. Every mutating call flushes before returning.

use std::path::Path;

use reward_core::{
    DirectoryError, Identity, RewardRound, RoundId, TxRef, WalletAddress, WalletDirectory,
    WalletRecord,
};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Transactional, Tree};
use thiserror::Error;
use time::Date;
use tracing::{debug, info};

pub const SCHEMA_VERSION: &str = "2";
const META_SCHEMA_KEY: &[u8] = b"schema_version";
const META_ROUND_SEQ_KEY: &[u8] = b"round_seq";
const META_WALLET_SEQ_KEY: &[u8] = b"wallet_seq";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Serde(String),
    #[error("schema mismatch: expected {expected}, found {found:?}")]
    SchemaMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("round {0} not found")]
    NotFound(RoundId),
    #[error("round {round_id} already paid with {existing}, refusing {attempted}")]
    TxConflict {
        round_id: RoundId,
        existing: TxRef,
        attempted: TxRef,
    },
    #[error("round {0} has no computed reward")]
    NotResolved(RoundId),
    #[error("round {0} is already paid")]
    AlreadyPaid(RoundId),
}

impl StoreError {
    /// I/O failures of the backing database may clear up on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Sled(sled::Error::Io(_)))
    }
}

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

fn finish<T>(r: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    match r {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StoreError::Sled(e)),
    }
}

fn abort<T>(e: StoreError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

fn encode<T: Serialize>(v: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(v).map_err(|e| StoreError::Serde(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serde(e.to_string()))
}

fn decode_u64(bytes: &[u8]) -> u64 {
    bytes
        .try_into()
        .map(u64::from_be_bytes)
        .unwrap_or_default()
}

/// Length-prefixed so no identity's prefix covers another identity's keys.
fn wallet_index_prefix(identity: &Identity) -> Vec<u8> {
    let bytes = identity.as_str().as_bytes();
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    let mut k = Vec::with_capacity(4 + bytes.len() + 8);
    k.extend_from_slice(&len.to_be_bytes());
    k.extend_from_slice(bytes);
    k
}

fn wallet_index_key(identity: &Identity, seq: u64) -> Vec<u8> {
    let mut k = wallet_index_prefix(identity);
    k.extend_from_slice(&seq.to_be_bytes());
    k
}

/// Bump the sequence at `key` inside a transaction and return the new value.
fn tx_next_seq(meta: &TransactionalTree, key: &[u8]) -> TxResult<u64> {
    let current = meta.get(key)?.map(|v| decode_u64(&v)).unwrap_or(0);
    let next = current.saturating_add(1);
    meta.insert(key, &next.to_be_bytes()[..])?;
    Ok(next)
}

fn tx_load_round(rounds: &TransactionalTree, round_id: RoundId) -> TxResult<RewardRound> {
    match rounds.get(round_id.to_be_bytes())? {
        Some(bytes) => decode(&bytes).or_else(abort),
        None => abort(StoreError::NotFound(round_id)),
    }
}

fn tx_save_round(rounds: &TransactionalTree, round: &RewardRound) -> TxResult<()> {
    let bytes = encode(round).or_else(abort)?;
    rounds.insert(&round.round_id.to_be_bytes()[..], bytes)?;
    Ok(())
}

/// Number of rounds in each persisted status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundCounts {
    pub pending: u64,
    pub resolved: u64,
    pub blocked: u64,
    pub paid: u64,
}

impl RoundCounts {
    pub fn total(&self) -> u64 {
        self.pending
            .saturating_add(self.resolved)
            .saturating_add(self.blocked)
            .saturating_add(self.paid)
    }
}

/// Outcome of [`RewardStore::record_payout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutRecord {
    Recorded,
    /// The same transaction was already on file.
    AlreadyRecorded,
}

pub struct RewardStore {
    db: sled::Db,
    meta: Tree,
    rounds: Tree,
    wallet_observations: Tree,
    wallet_index: Tree,
}

impl RewardStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store, discarded on drop.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let store = Self {
            meta: db.open_tree("meta")?,
            rounds: db.open_tree("rounds")?,
            wallet_observations: db.open_tree("wallet_observations")?,
            wallet_index: db.open_tree("wallet_index")?,
            db,
        };
        store.init_schema()?;
        store.init_sequences()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        match self.meta.get(META_SCHEMA_KEY)? {
            Some(val) => {
                let current = String::from_utf8_lossy(&val).to_string();
                if current != SCHEMA_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        expected: SCHEMA_VERSION.to_string(),
                        found: Some(current),
                    });
                }
            }
            None => {
                self.meta
                    .insert(META_SCHEMA_KEY, SCHEMA_VERSION.as_bytes())?;
                info!(schema = SCHEMA_VERSION, "initialized schema version");
            }
        }
        Ok(())
    }

    /// Seed missing sequences from the highest existing key.
    fn init_sequences(&self) -> Result<(), StoreError> {
        for (key, tree) in [
            (META_ROUND_SEQ_KEY, &self.rounds),
            (META_WALLET_SEQ_KEY, &self.wallet_observations),
        ] {
            if self.meta.get(key)?.is_none() {
                let max = tree.last()?.map(|(k, _)| decode_u64(&k)).unwrap_or(0);
                self.meta.insert(key, &max.to_be_bytes()[..])?;
            }
        }
        self.db.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Wait until every committed write is on disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.flush()
    }

    /// Reserve the next round id. Ids strictly increase and are never reused,
    /// even if the reserving caller never creates the round.
    pub fn next_round_id(&self) -> Result<RoundId, StoreError> {
        let next = finish(
            self.meta
                .transaction(|meta| tx_next_seq(meta, META_ROUND_SEQ_KEY)),
        )?;
        self.flush()?;
        Ok(RoundId(next))
    }

    /// Open a round with only its winner and origin known.
    pub fn create_pending_round(
        &self,
        subject: &Identity,
        display_name: &str,
        post_ref: Option<&str>,
        created_date: Date,
    ) -> Result<RoundId, StoreError> {
        let round_id = self.insert_pending_round(subject, display_name, post_ref, created_date)?;
        self.flush()?;
        Ok(round_id)
    }

    /// Commit a new pending round without waiting for the disk.
    ///
    /// An error means nothing was committed, so the call can be repeated;
    /// follow a success with [`RewardStore::sync`].
    pub fn insert_pending_round(
        &self,
        subject: &Identity,
        display_name: &str,
        post_ref: Option<&str>,
        created_date: Date,
    ) -> Result<RoundId, StoreError> {
        let round_id = finish((&self.meta, &self.rounds).transaction(|(meta, rounds)| {
            let id = RoundId(tx_next_seq(meta, META_ROUND_SEQ_KEY)?);
            let round = RewardRound::new_pending(
                id,
                subject.clone(),
                display_name,
                post_ref.map(str::to_string),
                created_date,
            );
            tx_save_round(rounds, &round)?;
            Ok(id)
        }))?;
        debug!(round_id = %round_id, identity = %subject, "round created");
        Ok(round_id)
    }

    /// Record wallet, holdings and computed reward on an existing round.
    pub fn resolve_round(
        &self,
        round_id: RoundId,
        wallet: &WalletAddress,
        held_balance: u64,
        reward_amount: u64,
        resolved_date: Date,
    ) -> Result<RewardRound, StoreError> {
        let round = finish(self.rounds.transaction(|rounds| {
            let mut round = tx_load_round(rounds, round_id)?;
            if round.tx_ref.is_some() {
                return abort(StoreError::AlreadyPaid(round_id));
            }
            round.wallet = Some(wallet.clone());
            round.held_balance = Some(held_balance);
            round.reward_amount = Some(reward_amount);
            round.resolved_date = Some(resolved_date);
            tx_save_round(rounds, &round)?;
            Ok(round)
        }))?;
        self.flush()?;
        Ok(round)
    }

    /// Attach the ledger transaction to a resolved round.
    ///
    /// Recording the same `tx_ref` again is a no-op; a different one is rejected.
    pub fn record_payout(
        &self,
        round_id: RoundId,
        tx_ref: &TxRef,
    ) -> Result<PayoutRecord, StoreError> {
        let outcome = finish(self.rounds.transaction(|rounds| {
            let mut round = tx_load_round(rounds, round_id)?;
            match &round.tx_ref {
                Some(existing) if existing == tx_ref => return Ok(PayoutRecord::AlreadyRecorded),
                Some(existing) => {
                    return abort(StoreError::TxConflict {
                        round_id,
                        existing: existing.clone(),
                        attempted: tx_ref.clone(),
                    })
                }
                None => {}
            }
            if round.reward_amount.is_none() {
                return abort(StoreError::NotResolved(round_id));
            }
            round.tx_ref = Some(tx_ref.clone());
            round.payout_blocked = None;
            tx_save_round(rounds, &round)?;
            Ok(PayoutRecord::Recorded)
        }))?;
        if outcome == PayoutRecord::Recorded {
            self.flush()?;
        }
        Ok(outcome)
    }

    /// Note that the winner was asked to register a wallet.
    pub fn mark_registration_requested(&self, round_id: RoundId) -> Result<(), StoreError> {
        finish(self.rounds.transaction(|rounds| {
            let mut round = tx_load_round(rounds, round_id)?;
            if round.registration_requested {
                return Ok(());
            }
            round.registration_requested = true;
            tx_save_round(rounds, &round)
        }))?;
        self.flush()
    }

    /// Park a resolved round until an operator clears it.
    pub fn block_payout(&self, round_id: RoundId, reason: &str) -> Result<(), StoreError> {
        finish(self.rounds.transaction(|rounds| {
            let mut round = tx_load_round(rounds, round_id)?;
            if round.tx_ref.is_some() {
                return abort(StoreError::AlreadyPaid(round_id));
            }
            round.payout_blocked = Some(reason.to_string());
            tx_save_round(rounds, &round)
        }))?;
        self.flush()
    }

    /// Clear a block; returns whether the round was blocked.
    pub fn unblock_payout(&self, round_id: RoundId) -> Result<bool, StoreError> {
        let was_blocked = finish(self.rounds.transaction(|rounds| {
            let mut round = tx_load_round(rounds, round_id)?;
            let was_blocked = round.payout_blocked.take().is_some();
            if was_blocked {
                tx_save_round(rounds, &round)?;
            }
            Ok(was_blocked)
        }))?;
        self.flush()?;
        Ok(was_blocked)
    }

    pub fn round(&self, round_id: RoundId) -> Result<Option<RewardRound>, StoreError> {
        self.rounds
            .get(round_id.to_be_bytes())?
            .map(|v| decode(&v))
            .transpose()
    }

    /// All rounds in id order.
    pub fn rounds(&self) -> Result<Vec<RewardRound>, StoreError> {
        self.rounds
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    fn rounds_where(
        &self,
        pred: impl Fn(&RewardRound) -> bool,
    ) -> Result<Vec<RewardRound>, StoreError> {
        let mut out: Vec<RewardRound> = self.rounds()?.into_iter().filter(|r| pred(r)).collect();
        out.sort_by_key(|r| (r.created_date, r.round_id));
        Ok(out)
    }

    /// Rounds whose winner has no wallet yet, oldest first.
    pub fn pending_rounds(&self) -> Result<Vec<RewardRound>, StoreError> {
        self.rounds_where(RewardRound::is_pending)
    }

    /// Resolved, untransferred, unblocked rounds, oldest first.
    pub fn unpaid_rounds(&self) -> Result<Vec<RewardRound>, StoreError> {
        self.rounds_where(RewardRound::is_unpaid)
    }

    pub fn blocked_rounds(&self) -> Result<Vec<RewardRound>, StoreError> {
        self.rounds_where(|r| r.payout_blocked.is_some() && r.tx_ref.is_none())
    }

    /// Winner of the most recently created round (by date, then id).
    pub fn last_winner(&self) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .rounds()?
            .into_iter()
            .max_by_key(|r| (r.created_date, r.round_id))
            .map(|r| r.subject))
    }

    pub fn counts(&self) -> Result<RoundCounts, StoreError> {
        let mut counts = RoundCounts::default();
        for round in self.rounds()? {
            let slot = match round.status() {
                reward_core::RoundStatus::Pending => &mut counts.pending,
                reward_core::RoundStatus::Resolved => &mut counts.resolved,
                reward_core::RoundStatus::Blocked => &mut counts.blocked,
                reward_core::RoundStatus::Paid => &mut counts.paid,
            };
            *slot = slot.saturating_add(1);
        }
        Ok(counts)
    }

    /// Append a wallet observation; the newest one per identity is current.
    pub fn record_wallet(
        &self,
        platform: &str,
        identity: &Identity,
        wallet: &WalletAddress,
        observed_date: Date,
    ) -> Result<WalletRecord, StoreError> {
        let record = finish(
            (&self.meta, &self.wallet_observations, &self.wallet_index).transaction(
                |(meta, observations, index)| {
                    let seq = tx_next_seq(meta, META_WALLET_SEQ_KEY)?;
                    let record = WalletRecord {
                        seq,
                        platform: platform.to_string(),
                        identity: identity.clone(),
                        wallet: wallet.clone(),
                        observed_date,
                    };
                    let bytes = encode(&record).or_else(abort)?;
                    observations.insert(&seq.to_be_bytes()[..], bytes)?;
                    index.insert(wallet_index_key(identity, seq), wallet.as_str().as_bytes())?;
                    Ok(record)
                },
            ),
        )?;
        self.flush()?;
        info!(
            event = "wallet_recorded",
            identity = %identity,
            seq = record.seq,
            "wallet observation stored"
        );
        Ok(record)
    }

    /// Most recently observed wallet for `identity`.
    pub fn latest_wallet(&self, identity: &Identity) -> Result<Option<WalletAddress>, StoreError> {
        let prefix = wallet_index_prefix(identity);
        let Some(entry) = self.wallet_index.scan_prefix(&prefix).next_back() else {
            return Ok(None);
        };
        let (_, value) = entry?;
        let addr = String::from_utf8(value.to_vec()).map_err(|e| StoreError::Serde(e.to_string()))?;
        Ok(Some(WalletAddress(addr)))
    }

    /// Every observation for `identity`, oldest first.
    pub fn wallet_history(&self, identity: &Identity) -> Result<Vec<WalletRecord>, StoreError> {
        let prefix = wallet_index_prefix(identity);
        let mut out = Vec::new();
        for entry in self.wallet_index.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let seq = decode_u64(&key[prefix.len()..]);
            if let Some(bytes) = self.wallet_observations.get(seq.to_be_bytes())? {
                out.push(decode(&bytes)?);
            }
        }
        Ok(out)
    }
}

impl WalletDirectory for RewardStore {
    fn latest_wallet(&self, identity: &Identity) -> Result<Option<WalletAddress>, DirectoryError> {
        RewardStore::latest_wallet(self, identity).map_err(|e| match e {
            StoreError::Serde(msg) => DirectoryError::Corrupt(msg),
            other => DirectoryError::Unavailable(other.to_string()),
        })
    }
}
