use crate::metrics;
use async_trait::async_trait;
use reward_core::ledger::{LedgerClient, LedgerError, TransferKey, TransferReceipt, TransferRequest};
use reward_core::{TxRef, WalletAddress};
use std::sync::Arc;
use tracing::warn;

/// Ledger wrapper that counts requests per method and outcome.
pub struct InstrumentedLedger {
    inner: Arc<dyn LedgerClient>,
}

impl InstrumentedLedger {
    pub fn new(inner: Arc<dyn LedgerClient>) -> Self {
        metrics::init();
        Self { inner }
    }

    fn record<T>(&self, method: &'static str, r: &Result<T, LedgerError>) {
        let status = match r {
            Ok(_) => "ok".to_string(),
            Err(LedgerError::HttpStatus { status, .. }) => status.to_string(),
            Err(LedgerError::Timeout) => "timeout".to_string(),
            Err(LedgerError::Network(_)) => "network".to_string(),
            Err(LedgerError::Chain(_)) => "chain_rejected".to_string(),
            Err(LedgerError::Decode(_)) => "decode_error".to_string(),
            Err(LedgerError::Config(_)) => "config".to_string(),
        };
        metrics::LEDGER_REQUESTS_TOTAL
            .with_label_values(&[method, status.as_str()])
            .inc();
        if let Err(e) = r {
            warn!(method, error = %e, "ledger request failed");
        }
    }
}

#[async_trait]
impl LedgerClient for InstrumentedLedger {
    async fn read_balance(&self, address: &WalletAddress) -> Result<u64, LedgerError> {
        let r = self.inner.read_balance(address).await;
        self.record("read_balance", &r);
        r
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        let r = self.inner.transfer(request).await;
        let method = match &r {
            Ok(receipt) if receipt.already_known => "transfer_already_known",
            _ => "transfer",
        };
        self.record(method, &r);
        r
    }

    async fn find_transfer(&self, key: &TransferKey) -> Result<Option<TxRef>, LedgerError> {
        let r = self.inner.find_transfer(key).await;
        self.record("find_transfer", &r);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reward_core::ledger::mock_client::MockLedgerClient;
    use reward_core::RoundId;

    #[tokio::test]
    async fn counts_requests_by_outcome() {
        let mock = Arc::new(MockLedgerClient::new());
        mock.fail_next_balance(LedgerError::Timeout);
        let ledger = InstrumentedLedger::new(mock.clone());
        let addr = WalletAddress::new("0xAA");

        let before = metrics::LEDGER_REQUESTS_TOTAL
            .with_label_values(&["read_balance", "timeout"])
            .get();
        assert!(ledger.read_balance(&addr).await.is_err());
        assert!(ledger.read_balance(&addr).await.is_ok());
        assert_eq!(
            metrics::LEDGER_REQUESTS_TOTAL
                .with_label_values(&["read_balance", "timeout"])
                .get(),
            before + 1
        );

        let key = TransferKey::derive("t", RoundId(1));
        assert_eq!(ledger.find_transfer(&key).await.expect("lookup"), None);
        assert_eq!(mock.balance_calls(), 2);
    }
}
