//! Sweeps rounds that could not be finished when they were opened.
//!
//! Pending rounds are retried once their winner registers a wallet; resolved
//! but unpaid rounds (crash or transient transfer failure) are resumed. Both
//! are announced with the retrospective template.

use crate::announce::PayoutTemplate;
use crate::metrics;
use crate::payout::{PayoutCoordinator, RoundResult};
use reward_core::{RewardRound, RoundId};
use std::collections::BTreeSet;
use time::Date;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pending rounds whose winner now has a wallet and got paid.
    pub pending_settled: Vec<RoundResult>,
    /// Resolved rounds whose transfer was completed or recovered.
    pub unpaid_settled: Vec<RoundResult>,
    /// Pending rounds still waiting on a wallet.
    pub still_pending: usize,
    pub failed: usize,
}

impl ReconcileReport {
    /// Rounds brought to Paid or Announced by this sweep.
    pub fn reconciled(&self) -> usize {
        self.pending_settled.len() + self.unpaid_settled.len()
    }
}

#[derive(Clone)]
pub struct PendingReconciler {
    coordinator: PayoutCoordinator,
}

impl PendingReconciler {
    pub fn new(coordinator: PayoutCoordinator) -> Self {
        Self { coordinator }
    }

    /// One sweep over pending then unpaid rounds, oldest first.
    ///
    /// A failing round is logged and skipped; it stays in its last durable
    /// state for the next sweep.
    pub async fn reconcile_all(&self, today: Date) -> ReconcileReport {
        self.reconcile_skipping(today, BTreeSet::new()).await
    }

    /// Like [`Self::reconcile_all`], but rounds in `attempted` already had
    /// their transfer attempt this pass and are not resumed again.
    pub async fn reconcile_skipping(
        &self,
        today: Date,
        mut attempted: BTreeSet<RoundId>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        match self.coordinator.store().pending_rounds() {
            Ok(rounds) => {
                for round in rounds {
                    let round_id = round.round_id;
                    if self.reconcile_pending(round, today, &mut report).await {
                        attempted.insert(round_id);
                    }
                }
            }
            Err(e) => {
                report.failed += 1;
                warn!(event = "recon_list_failed", kind = "pending", error = %e);
            }
        }

        match self.coordinator.store().unpaid_rounds() {
            Ok(rounds) => {
                for round in rounds.into_iter().filter(|r| !attempted.contains(&r.round_id)) {
                    self.reconcile_unpaid(round, &mut report).await;
                }
            }
            Err(e) => {
                report.failed += 1;
                warn!(event = "recon_list_failed", kind = "unpaid", error = %e);
            }
        }

        info!(
            event = "recon_sweep_done",
            reconciled = report.reconciled(),
            still_pending = report.still_pending,
            failed = report.failed,
            "reconciliation sweep finished"
        );
        report
    }

    /// Returns whether the round got as far as resolution.
    async fn reconcile_pending(
        &self,
        round: RewardRound,
        today: Date,
        report: &mut ReconcileReport,
    ) -> bool {
        let round_id = round.round_id;
        let wallet = match self.coordinator.lookup_wallet(&round.subject).await {
            Ok(Some(w)) => w,
            Ok(None) => {
                debug!(round_id = %round_id, identity = %round.subject, "still no wallet");
                report.still_pending += 1;
                return false;
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    event = "recon_round_failed",
                    round_id = %round_id,
                    identity = %round.subject,
                    step = "latest_wallet",
                    class = e.class().as_str(),
                    error = %e
                );
                return false;
            }
        };

        let resolved = match self.coordinator.resolve(round_id, &wallet, today).await {
            Ok(r) => r,
            Err(e) => {
                report.failed += 1;
                warn!(
                    event = "recon_round_failed",
                    round_id = %round_id,
                    identity = %round.subject,
                    step = "resolve",
                    class = e.class().as_str(),
                    error = %e
                );
                return false;
            }
        };
        match self
            .coordinator
            .pay(resolved, PayoutTemplate::Retrospective)
            .await
        {
            Ok(result) => {
                metrics::RECONCILED_TOTAL.with_label_values(&["pending"]).inc();
                report.pending_settled.push(result);
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    event = "recon_round_failed",
                    round_id = %round_id,
                    identity = %round.subject,
                    step = "pay",
                    class = e.class().as_str(),
                    error = %e
                );
            }
        }
        true
    }

    async fn reconcile_unpaid(&self, round: RewardRound, report: &mut ReconcileReport) {
        let round_id = round.round_id;
        let subject = round.subject.clone();
        match self.coordinator.resume(round).await {
            Ok(result) => {
                metrics::RECONCILED_TOTAL.with_label_values(&["unpaid"]).inc();
                report.unpaid_settled.push(result);
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    event = "recon_round_failed",
                    round_id = %round_id,
                    identity = %subject,
                    step = "resume",
                    class = e.class().as_str(),
                    error = %e
                );
            }
        }
    }
}
