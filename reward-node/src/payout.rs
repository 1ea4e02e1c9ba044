//! Drives a single round from winner selection to announcement.
//!
//! Every transition is persisted before the next one starts, so a round can be
//! resumed from its durable state after a crash:
//!
//! ```text
//! Selected -> Pending                                     (no wallet on file)
//! Selected -> BalanceRead -> Resolved -> Paid -> Announced
//! ```

use crate::announce::{PayoutTemplate, Templates};
use crate::error::EngineError;
use crate::metrics;
use crate::retry::{with_backoff, RetryPolicy};
use reward_core::calculate_reward;
use reward_core::engagement::ExcludedSet;
use reward_core::ledger::{LedgerClient, TransferKey, TransferRequest};
use reward_core::notify::{Notifier, NotifyTarget};
use reward_core::{
    Candidate, Identity, RewardRound, RoundId, RoundState, TxRef, WalletAddress, WalletDirectory,
};
use reward_storage::{PayoutRecord, RewardStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use time::Date;
use tracing::{info, warn};

/// Engine parameters. Replaces process-wide globals; passed in at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub total_reward: u64,
    /// Holdings at or above this earn the full reward.
    pub amount_held: u64,
    /// Scopes ledger idempotency keys to one deployment.
    pub namespace: String,
    /// Activity window handed to the engagement source.
    pub window: Duration,
    /// Identities never eligible (team, bots).
    pub excluded_seed: ExcludedSet,
    pub retry: RetryPolicy,
    pub templates: Templates,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            total_reward: 100,
            amount_held: 100,
            namespace: "reward-node".to_string(),
            window: Duration::from_secs(4 * 60 * 60),
            excluded_seed: ExcludedSet::new(),
            retry: RetryPolicy::default(),
            templates: Templates::default(),
        }
    }
}

/// Where a round ended up after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundResult {
    pub round_id: RoundId,
    pub subject: Identity,
    pub state: RoundState,
    pub amount: Option<u64>,
    pub tx_ref: Option<TxRef>,
}

impl RoundResult {
    fn from_round(round: &RewardRound, state: RoundState) -> Self {
        Self {
            round_id: round.round_id,
            subject: round.subject.clone(),
            state,
            amount: round.reward_amount,
            tx_ref: round.tx_ref.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PayoutCoordinator {
    store: Arc<RewardStore>,
    directory: Arc<dyn WalletDirectory>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<EngineSettings>,
}

impl PayoutCoordinator {
    pub fn new(
        store: Arc<RewardStore>,
        directory: Arc<dyn WalletDirectory>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        metrics::init();
        Self {
            store,
            directory,
            ledger,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<RewardStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn transfer_key(&self, round_id: RoundId) -> TransferKey {
        TransferKey::derive(&self.settings.namespace, round_id)
    }

    /// Current wallet for `identity`, retrying transient directory failures.
    pub async fn lookup_wallet(
        &self,
        identity: &Identity,
    ) -> Result<Option<WalletAddress>, EngineError> {
        let dir = &self.directory;
        let wallet = with_backoff(&self.settings.retry, "latest_wallet", move || async move {
            dir.latest_wallet(identity)
        })
        .await?;
        Ok(wallet)
    }

    /// Open a round for `candidate` and take it as far as it can go.
    ///
    /// With `exclude_from_lookup_failures`, a wallet lookup that keeps failing
    /// is treated as "no wallet on file" so the winner still gets a round.
    pub async fn process_winner(
        &self,
        candidate: &Candidate,
        today: Date,
        exclude_from_lookup_failures: bool,
    ) -> Result<RoundResult, EngineError> {
        let wallet = match self.lookup_wallet(&candidate.identity).await {
            Ok(w) => w,
            Err(e) if exclude_from_lookup_failures => {
                warn!(
                    event = "wallet_lookup_failed",
                    identity = %candidate.identity,
                    error = %e,
                    "treating winner as unregistered"
                );
                None
            }
            Err(e) => return Err(e),
        };

        // The insert and the flush retry separately so a failed flush never
        // opens a second round.
        let store = &self.store;
        let round_id = with_backoff(&self.settings.retry, "create_pending_round", move || {
            async move {
                store.insert_pending_round(
                    &candidate.identity,
                    &candidate.display_name,
                    candidate.content_ref.as_deref(),
                    today,
                )
            }
        })
        .await?;
        with_backoff(&self.settings.retry, "sync", move || async move { store.sync() }).await?;
        info!(
            event = "round_state",
            round_id = %round_id,
            identity = %candidate.identity,
            state = %RoundState::Selected,
            "round opened"
        );

        let Some(wallet) = wallet else {
            return self.request_registration(round_id, candidate).await;
        };

        let round = self.resolve(round_id, &wallet, today).await?;
        self.pay(round, PayoutTemplate::Standard).await
    }

    async fn request_registration(
        &self,
        round_id: RoundId,
        candidate: &Candidate,
    ) -> Result<RoundResult, EngineError> {
        info!(
            event = "round_state",
            round_id = %round_id,
            identity = %candidate.identity,
            state = %RoundState::Pending,
            "no wallet on file"
        );
        metrics::ROUNDS_TOTAL
            .with_label_values(&[RoundState::Pending.as_str()])
            .inc();
        let text = self
            .settings
            .templates
            .registration(round_id, &candidate.display_name);
        let store = &self.store;
        if let Err(e) = with_backoff(&self.settings.retry, "mark_registration", move || {
            async move { store.mark_registration_requested(round_id) }
        })
        .await
        {
            warn!(event = "mark_registration_failed", round_id = %round_id, error = %e);
        }
        let target = NotifyTarget::for_content(candidate.content_ref.as_deref());
        self.announce("registration", round_id, &target, &text).await;
        Ok(RoundResult {
            round_id,
            subject: candidate.identity.clone(),
            state: RoundState::Pending,
            amount: None,
            tx_ref: None,
        })
    }

    /// BalanceRead -> Resolved: read holdings, compute and persist the reward.
    pub async fn resolve(
        &self,
        round_id: RoundId,
        wallet: &WalletAddress,
        today: Date,
    ) -> Result<RewardRound, EngineError> {
        let ledger = &self.ledger;
        let held = with_backoff(&self.settings.retry, "read_balance", move || {
            ledger.read_balance(wallet)
        })
        .await?;
        info!(
            event = "round_state",
            round_id = %round_id,
            state = %RoundState::BalanceRead,
            held,
            "balance read"
        );

        let amount = calculate_reward(self.settings.total_reward, self.settings.amount_held, held);
        let store = &self.store;
        let round = with_backoff(&self.settings.retry, "resolve_round", move || async move {
            store.resolve_round(round_id, wallet, held, amount, today)
        })
        .await?;
        info!(
            event = "round_state",
            round_id = %round_id,
            state = %RoundState::Resolved,
            amount,
            "reward resolved"
        );
        Ok(round)
    }

    /// Resolved -> Paid -> Announced for a round resolved in this pass.
    pub async fn pay(
        &self,
        round: RewardRound,
        template: PayoutTemplate,
    ) -> Result<RoundResult, EngineError> {
        self.settle(round, template, false).await
    }

    /// Finish a round resolved in an earlier pass. The ledger is asked whether
    /// the round's transfer already landed before a new one is attempted.
    pub async fn resume(&self, round: RewardRound) -> Result<RoundResult, EngineError> {
        self.settle(round, PayoutTemplate::Retrospective, true).await
    }

    /// At most one transfer is attempted per call.
    async fn settle(
        &self,
        round: RewardRound,
        template: PayoutTemplate,
        check_ledger: bool,
    ) -> Result<RoundResult, EngineError> {
        let round_id = round.round_id;
        if round.is_paid() {
            info!(round_id = %round_id, "transfer already recorded; announcing only");
            return Ok(self.announce_payout(round, template).await);
        }
        let (Some(wallet), Some(amount)) = (round.wallet.clone(), round.reward_amount) else {
            return Err(StoreError::NotResolved(round_id).into());
        };

        let key = self.transfer_key(round_id);
        let landed = if check_ledger {
            let ledger = &self.ledger;
            let key = &key;
            with_backoff(&self.settings.retry, "find_transfer", move || {
                ledger.find_transfer(key)
            })
            .await?
        } else {
            None
        };

        let tx_ref = match landed {
            Some(tx) => {
                info!(
                    event = "transfer_recovered",
                    round_id = %round_id,
                    tx_ref = %tx,
                    "transfer already on ledger"
                );
                metrics::PAYOUTS_TOTAL.with_label_values(&["recovered"]).inc();
                tx
            }
            None => self.transfer_once(round_id, key, wallet, amount).await?,
        };

        let store = &self.store;
        let tx = &tx_ref;
        let recorded = with_backoff(&self.settings.retry, "record_payout", move || async move {
            store.record_payout(round_id, tx)
        })
        .await?;
        if recorded == PayoutRecord::Recorded {
            metrics::PAID_AMOUNT_TOTAL.inc_by(amount);
        }
        info!(
            event = "round_state",
            round_id = %round_id,
            state = %RoundState::Paid,
            tx_ref = %tx_ref,
            amount,
            "payout recorded"
        );

        let paid = self
            .store
            .round(round_id)?
            .ok_or(StoreError::NotFound(round_id))?;
        Ok(self.announce_payout(paid, template).await)
    }

    async fn transfer_once(
        &self,
        round_id: RoundId,
        key: TransferKey,
        to: WalletAddress,
        amount: u64,
    ) -> Result<TxRef, EngineError> {
        let request = TransferRequest { key, to, amount };
        match self.ledger.transfer(&request).await {
            Ok(receipt) => {
                let result = if receipt.already_known {
                    "already_known"
                } else {
                    "paid"
                };
                metrics::PAYOUTS_TOTAL.with_label_values(&[result]).inc();
                Ok(receipt.tx_ref)
            }
            Err(e) if e.is_chain_rejection() => {
                metrics::PAYOUTS_TOTAL
                    .with_label_values(&["chain_rejected"])
                    .inc();
                warn!(
                    event = "payout_blocked",
                    round_id = %round_id,
                    error = %e,
                    "ledger rejected transfer; round needs an operator"
                );
                let store = &self.store;
                let reason = e.to_string();
                let reason = reason.as_str();
                with_backoff(&self.settings.retry, "block_payout", move || async move {
                    store.block_payout(round_id, reason)
                })
                .await?;
                Err(e.into())
            }
            Err(e) => {
                metrics::PAYOUTS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(
                    event = "payout_deferred",
                    round_id = %round_id,
                    error = %e,
                    "transfer failed; round stays unpaid for the next sweep"
                );
                Err(e.into())
            }
        }
    }

    async fn announce_payout(&self, round: RewardRound, template: PayoutTemplate) -> RoundResult {
        let (Some(amount), Some(tx_ref)) = (round.reward_amount, round.tx_ref.as_ref()) else {
            return RoundResult::from_round(&round, RoundState::Resolved);
        };
        let template = match template {
            PayoutTemplate::Retrospective if !round.registration_requested => {
                PayoutTemplate::Delayed
            }
            other => other,
        };
        let text = self.settings.templates.settled(
            template,
            round.round_id,
            &round.display_name,
            amount,
            tx_ref,
            round.created_date,
        );
        let target = NotifyTarget::for_content(round.post_ref.as_deref());
        let state = if self
            .announce(template.as_str(), round.round_id, &target, &text)
            .await
        {
            RoundState::Announced
        } else {
            RoundState::Paid
        };
        info!(
            event = "round_state",
            round_id = %round.round_id,
            state = %state,
            "round settled"
        );
        metrics::ROUNDS_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
        RoundResult::from_round(&round, state)
    }

    /// Best-effort send; failures are logged and counted, never propagated.
    pub(crate) async fn announce(
        &self,
        template: &'static str,
        round_id: RoundId,
        target: &NotifyTarget,
        text: &str,
    ) -> bool {
        let notifier = &self.notifier;
        match with_backoff(&self.settings.retry, "notify", move || {
            notifier.send(target, text)
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                metrics::NOTIFY_FAILURES_TOTAL
                    .with_label_values(&[template])
                    .inc();
                warn!(
                    event = "notify_failed",
                    round_id = %round_id,
                    template,
                    error = %e,
                    "announcement not delivered"
                );
                false
            }
        }
    }

    /// Post a message that is not tied to a round.
    pub(crate) async fn broadcast(&self, template: &'static str, text: &str) -> bool {
        let notifier = &self.notifier;
        let target = &NotifyTarget::Channel;
        match with_backoff(&self.settings.retry, "notify", move || {
            notifier.send(target, text)
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                metrics::NOTIFY_FAILURES_TOTAL
                    .with_label_values(&[template])
                    .inc();
                warn!(event = "notify_failed", template, error = %e, "broadcast not delivered");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reward_core::ledger::mock_client::MockLedgerClient;
    use reward_core::ledger::LedgerError;
    use reward_core::notify::NotifyError;
    use std::sync::Mutex;
    use time::macros::date;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(NotifyTarget, String)>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, target: &NotifyTarget, text: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .expect("lock")
                .push((target.clone(), text.to_string()));
            Ok(())
        }
    }

    fn settings() -> Arc<EngineSettings> {
        Arc::new(EngineSettings {
            retry: RetryPolicy::none(),
            namespace: "unit".to_string(),
            ..EngineSettings::default()
        })
    }

    fn coordinator(
        ledger: Arc<MockLedgerClient>,
        notifier: Arc<Recorder>,
    ) -> (PayoutCoordinator, Arc<RewardStore>) {
        let store = Arc::new(RewardStore::open_temporary().expect("store"));
        let c = PayoutCoordinator::new(store.clone(), store.clone(), ledger, notifier, settings());
        (c, store)
    }

    #[tokio::test]
    async fn resumed_round_without_landed_transfer_pays_once() {
        let ledger = Arc::new(MockLedgerClient::new().with_balance("0xAA", 100));
        let notifier = Arc::new(Recorder::default());
        let (c, store) = coordinator(ledger.clone(), notifier.clone());

        let id = store
            .create_pending_round(&Identity::new("u1"), "u1", None, date!(2024 - 01 - 01))
            .expect("create");
        let round = c
            .resolve(id, &WalletAddress::new("0xAA"), date!(2024 - 01 - 01))
            .await
            .expect("resolve");
        assert_eq!(round.reward_amount, Some(100));

        let out = c.resume(round).await.expect("resume");
        assert_eq!(out.state, RoundState::Announced);
        assert_eq!(ledger.transfer_calls(), 1);
        let text = notifier.sent.lock().expect("lock")[0].1.clone();
        assert!(text.contains("Delayed Payout"));
        assert!(!text.contains("has registered"));
    }

    #[tokio::test]
    async fn transient_transfer_failure_leaves_round_unpaid() {
        let ledger = Arc::new(MockLedgerClient::new().with_balance("0xAA", 0));
        ledger.fail_next_transfer(LedgerError::Network("reset".into()));
        let notifier = Arc::new(Recorder::default());
        let (c, store) = coordinator(ledger.clone(), notifier);
        store
            .record_wallet(
                "telegram",
                &Identity::new("u1"),
                &WalletAddress::new("0xAA"),
                date!(2024 - 01 - 01),
            )
            .expect("wallet");

        let err = c
            .process_winner(&Candidate::new("u1", "u1"), date!(2024 - 01 - 02), false)
            .await
            .expect_err("transfer fails");
        assert!(matches!(err, EngineError::Ledger(LedgerError::Network(_))));
        let unpaid = store.unpaid_rounds().expect("unpaid");
        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].reward_amount, Some(20));
        assert_eq!(ledger.transfer_calls(), 1);
    }

    #[tokio::test]
    async fn pay_rejects_unresolved_round() {
        let ledger = Arc::new(MockLedgerClient::new());
        let (c, store) = coordinator(ledger.clone(), Arc::new(Recorder::default()));
        let id = store
            .create_pending_round(&Identity::new("u9"), "u9", None, date!(2024 - 01 - 01))
            .expect("create");
        let round = store.round(id).expect("read").expect("exists");
        let err = c
            .pay(round, PayoutTemplate::Standard)
            .await
            .expect_err("unresolved");
        assert!(matches!(err, EngineError::Store(StoreError::NotResolved(_))));
        assert_eq!(ledger.transfer_calls(), 0);
    }
}
