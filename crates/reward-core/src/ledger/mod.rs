//! Token ledger contract.
//!
//! The engine only needs three things from a chain: the token balance of an
//! address, a transfer, and a way to ask whether a transfer for a given round
//! already landed. Transports (HTTP gateway, in-memory mock) are adapters that
//! implement [`LedgerClient`].
//!
//! Every transfer carries a [`TransferKey`] derived from the round it pays, so
//! a gateway that has already executed a key reports the earlier transaction
//! instead of paying twice.

pub mod mock_client;

#[cfg(feature = "ledger-http")]
pub mod http_client;

use crate::{RoundId, TxRef, WalletAddress};
use async_trait::async_trait;
use base64::Engine as _;
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic idempotency key for the transfer paying one round.
///
/// Serialized as base64url (no padding).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey(pub [u8; 32]);

impl TransferKey {
    /// `blake3("reward-round" || namespace || 0x00 || round_id_be)`
    pub fn derive(namespace: &str, round_id: RoundId) -> Self {
        let mut h = Hasher::new();
        h.update(b"reward-round");
        h.update(namespace.as_bytes());
        h.update(&[0u8]);
        h.update(&round_id.to_be_bytes());
        Self(*h.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferKey({})", self.to_base64url())
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl Serialize for TransferKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for TransferKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            serde::de::Error::custom(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub key: TransferKey,
    pub to: WalletAddress,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_ref: TxRef,
    /// The ledger had already executed this key (idempotent replay).
    #[serde(default)]
    pub already_known: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// The chain rejected the transfer (insufficient funds, gas, bad address).
    #[error("chain rejected transfer: {0}")]
    Chain(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Network failures, timeouts and 5xx responses may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Network(_) | LedgerError::Timeout => true,
            LedgerError::HttpStatus { status, .. } => *status >= 500,
            LedgerError::Config(_) | LedgerError::Chain(_) | LedgerError::Decode(_) => false,
        }
    }

    pub fn is_chain_rejection(&self) -> bool {
        matches!(self, LedgerError::Chain(_))
    }
}

/// Async ledger capabilities required by the payout engine.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Whole-token balance of `address` (truncated).
    async fn read_balance(&self, address: &WalletAddress) -> Result<u64, LedgerError>;

    /// Execute a transfer. Replaying a key that already landed must report the
    /// earlier transaction with `already_known = true`.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError>;

    /// Look up a transfer previously executed for `key`.
    async fn find_transfer(&self, key: &TransferKey) -> Result<Option<TxRef>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_key_depends_on_namespace_and_round() {
        let a = TransferKey::derive("prod", RoundId(1));
        assert_eq!(a, TransferKey::derive("prod", RoundId(1)));
        assert_ne!(a, TransferKey::derive("prod", RoundId(2)));
        assert_ne!(a, TransferKey::derive("staging", RoundId(1)));
    }

    #[test]
    fn transfer_key_json_is_base64url() {
        let key = TransferKey::derive("prod", RoundId(9));
        let json = serde_json::to_string(&key).expect("encode");
        assert_eq!(json, format!("\"{}\"", key.to_base64url()));
        let back: TransferKey = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, key);
        assert!(serde_json::from_str::<TransferKey>("\"AAAA\"").is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(LedgerError::Timeout.is_transient());
        assert!(LedgerError::Network("reset".into()).is_transient());
        assert!(LedgerError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!LedgerError::HttpStatus {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!LedgerError::Chain("insufficient funds".into()).is_transient());
        assert!(LedgerError::Chain("x".into()).is_chain_rejection());
    }
}
