use reward_core::engagement::EngagementError;
use reward_core::ledger::LedgerError;
use reward_core::notify::NotifyError;
use reward_core::DirectoryError;
use reward_storage::StoreError;
use thiserror::Error;

/// Coarse failure taxonomy used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A round id that does not exist; a consistency bug.
    NotFound,
    /// Network or database trouble; the next pass picks the round up again.
    TransientIo,
    /// The ledger rejected the transfer; needs an operator.
    PermanentChain,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::TransientIo => "transient_io",
            ErrorClass::PermanentChain => "permanent_chain",
            ErrorClass::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("wallet directory: {0}")]
    Directory(#[from] DirectoryError),
    #[error("engagement source: {0}")]
    Engagement(#[from] EngagementError),
    #[error("notifier: {0}")]
    Notify(#[from] NotifyError),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            EngineError::Store(e) if e.is_transient() => ErrorClass::TransientIo,
            EngineError::Store(_) => ErrorClass::Internal,
            EngineError::Ledger(e) if e.is_chain_rejection() => ErrorClass::PermanentChain,
            EngineError::Ledger(e) if e.is_transient() => ErrorClass::TransientIo,
            EngineError::Ledger(_) => ErrorClass::Internal,
            EngineError::Directory(e) if e.is_transient() => ErrorClass::TransientIo,
            EngineError::Engagement(e) if e.is_transient() => ErrorClass::TransientIo,
            EngineError::Notify(e) if e.is_transient() => ErrorClass::TransientIo,
            EngineError::Directory(_) | EngineError::Engagement(_) | EngineError::Notify(_) => {
                ErrorClass::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reward_core::RoundId;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(
            EngineError::from(StoreError::NotFound(RoundId(3))).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            EngineError::from(LedgerError::Chain("gas".into())).class(),
            ErrorClass::PermanentChain
        );
        assert_eq!(
            EngineError::from(LedgerError::Timeout).class(),
            ErrorClass::TransientIo
        );
        assert_eq!(
            EngineError::from(DirectoryError::Unavailable("io".into())).class(),
            ErrorClass::TransientIo
        );
        assert_eq!(
            EngineError::from(LedgerError::Decode("bad json".into())).class(),
            ErrorClass::Internal
        );
    }
}
