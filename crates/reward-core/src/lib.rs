#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_sign_loss)]

//! Core types and collaborator contracts for the reward round engine.
//!
//! A reward round picks the most engaged community member, pays a token
//! reward proportional to their holdings and announces it. This crate holds
//! the pieces that do no I/O of their own:
//! - identifiers and persisted records ([`RewardRound`], [`WalletRecord`])
//! - the pure payout formula ([`calculator`])
//! - the contracts the engine is parameterized over ([`ledger`],
//!   [`engagement`], [`notify`], [`WalletDirectory`])

pub mod calculator;
pub mod engagement;
pub mod ledger;
pub mod notify;

use serde::{Deserialize, Serialize};
use std::fmt;
use time::Date;

pub use calculator::calculate_reward;

/// Monotonically increasing round number, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub const FIRST: RoundId = RoundId(1);

    pub fn next(self) -> RoundId {
        RoundId(self.0.saturating_add(1))
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform identity of a community member (numeric user id or username).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// On-chain wallet address as registered by the member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(pub String);

impl WalletAddress {
    /// Build an address from user input, trimming surrounding whitespace.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger transaction reference returned by a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A winner proposed by an engagement source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub identity: Identity,
    /// Name used when addressing the winner in announcements.
    pub display_name: String,
    /// Originating post or message, used for reply-style notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_ref: Option<String>,
}

impl Candidate {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: Identity(identity.into()),
            display_name: display_name.into(),
            content_ref: None,
        }
    }

    pub fn with_content_ref(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }
}

/// One persisted reward cycle.
///
/// Field presence encodes progress:
/// - `wallet` and `tx_ref` both unset: pending (winner has no wallet on file)
/// - `reward_amount` set, `tx_ref` unset: resolved, transfer outstanding
/// - `tx_ref` set: paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRound {
    pub round_id: RoundId,
    pub subject: Identity,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_balance: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<TxRef>,
    pub created_date: Date,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_date: Option<Date>,
    /// Set when the ledger permanently rejected the transfer; cleared by an operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_blocked: Option<String>,
    /// The winner was asked to register a wallet when the round opened.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub registration_requested: bool,
}

impl RewardRound {
    pub fn new_pending(
        round_id: RoundId,
        subject: Identity,
        display_name: impl Into<String>,
        post_ref: Option<String>,
        created_date: Date,
    ) -> Self {
        Self {
            round_id,
            subject,
            display_name: display_name.into(),
            post_ref,
            wallet: None,
            held_balance: None,
            reward_amount: None,
            tx_ref: None,
            created_date,
            resolved_date: None,
            payout_blocked: None,
            registration_requested: false,
        }
    }

    /// Winner has no wallet on file and nothing was paid.
    pub fn is_pending(&self) -> bool {
        self.wallet.is_none() && self.tx_ref.is_none()
    }

    /// Reward computed but no transaction recorded yet.
    pub fn is_resolved(&self) -> bool {
        self.reward_amount.is_some() && self.tx_ref.is_none()
    }

    /// Resolved, unpaid and not waiting on an operator.
    pub fn is_unpaid(&self) -> bool {
        self.is_resolved() && self.payout_blocked.is_none()
    }

    pub fn is_paid(&self) -> bool {
        self.tx_ref.is_some()
    }

    pub fn status(&self) -> RoundStatus {
        if self.is_paid() {
            RoundStatus::Paid
        } else if self.payout_blocked.is_some() {
            RoundStatus::Blocked
        } else if self.is_resolved() {
            RoundStatus::Resolved
        } else {
            RoundStatus::Pending
        }
    }

    /// Check the field-presence invariants of a persisted round.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.tx_ref.is_some() && (self.reward_amount.is_none() || self.wallet.is_none()) {
            return Err(format!(
                "round {}: tx_ref set without reward_amount and wallet",
                self.round_id
            ));
        }
        if self.reward_amount.is_some() && (self.wallet.is_none() || self.held_balance.is_none())
        {
            return Err(format!(
                "round {}: reward_amount set without wallet and held_balance",
                self.round_id
            ));
        }
        Ok(())
    }
}

/// Coarse persisted status of a round, derived from field presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Resolved,
    Blocked,
    Paid,
}

impl RoundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Resolved => "resolved",
            RoundStatus::Blocked => "blocked",
            RoundStatus::Paid => "paid",
        }
    }
}

/// Progress of one round through the payout workflow.
///
/// ```text
/// Selected -> Pending                                   (no wallet on file)
/// Selected -> BalanceRead -> Resolved -> Paid -> Announced
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Selected,
    Pending,
    BalanceRead,
    Resolved,
    Paid,
    Announced,
}

impl RoundState {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundState::Selected => "selected",
            RoundState::Pending => "pending",
            RoundState::BalanceRead => "balance_read",
            RoundState::Resolved => "resolved",
            RoundState::Paid => "paid",
            RoundState::Announced => "announced",
        }
    }

    /// The payout is durable (announcement may or may not have gone out).
    pub fn is_paid(self) -> bool {
        matches!(self, RoundState::Paid | RoundState::Announced)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only observation that `identity` registered `wallet` on `platform`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Auto-incrementing observation sequence; the highest one per identity wins.
    pub seq: u64,
    pub platform: String,
    pub identity: Identity,
    pub wallet: WalletAddress,
    pub observed_date: Date,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("wallet directory unavailable: {0}")]
    Unavailable(String),
    #[error("wallet directory corrupt: {0}")]
    Corrupt(String),
}

impl DirectoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Unavailable(_))
    }
}

/// Read side of the wallet registration log.
pub trait WalletDirectory: Send + Sync {
    /// Most recently observed wallet for `identity`, if any.
    fn latest_wallet(&self, identity: &Identity) -> Result<Option<WalletAddress>, DirectoryError>;
}
