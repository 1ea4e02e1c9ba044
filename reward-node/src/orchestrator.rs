//! One scheduled pass: pick a winner, pay them, then drain the backlog.

use crate::metrics;
use crate::payout::{PayoutCoordinator, RoundResult};
use crate::recon::{PendingReconciler, ReconcileReport};
use crate::retry::with_backoff;
use reward_core::engagement::{EngagementSource, ExcludedSet, Selection};
use reward_core::{Candidate, Identity, RoundId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use time::Date;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A candidate was selected and handed to the payout coordinator.
    Winner,
    /// Nobody was active in the window.
    Quiet,
    /// There was activity but nobody eligible could be picked.
    NoEligible,
    /// The engagement source failed after retries.
    SelectionFailed,
}

impl CycleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleOutcome::Winner => "winner",
            CycleOutcome::Quiet => "quiet",
            CycleOutcome::NoEligible => "no_eligible",
            CycleOutcome::SelectionFailed => "selection_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub candidate: Option<Candidate>,
    /// The winner's round, when processing got far enough to report one.
    pub round: Option<RoundResult>,
    pub winner_failed: bool,
    pub reconcile: ReconcileReport,
}

impl CycleReport {
    pub fn reconciled(&self) -> usize {
        self.reconcile.reconciled()
    }
}

fn is_excluded(excluded: &ExcludedSet, candidate: &Candidate) -> bool {
    excluded.contains(&candidate.identity)
        || excluded.contains(&Identity::new(candidate.display_name.as_str()))
}

pub struct RoundOrchestrator {
    source: Arc<dyn EngagementSource>,
    coordinator: PayoutCoordinator,
    reconciler: PendingReconciler,
    exclude_from_lookup_failures: bool,
}

impl RoundOrchestrator {
    pub fn new(source: Arc<dyn EngagementSource>, coordinator: PayoutCoordinator) -> Self {
        let reconciler = PendingReconciler::new(coordinator.clone());
        Self {
            source,
            coordinator,
            reconciler,
            exclude_from_lookup_failures: false,
        }
    }

    /// Treat a winner whose wallet lookup keeps failing as unregistered.
    pub fn with_lookup_failure_exclusion(mut self, enabled: bool) -> Self {
        self.exclude_from_lookup_failures = enabled;
        self
    }

    pub fn coordinator(&self) -> &PayoutCoordinator {
        &self.coordinator
    }

    pub fn reconciler(&self) -> &PendingReconciler {
        &self.reconciler
    }

    /// Cycle with the configured window and exclusion seed.
    pub async fn run_configured(&self, today: Date) -> CycleReport {
        let settings = self.coordinator.settings();
        self.run_cycle(settings.window, &settings.excluded_seed, today)
            .await
    }

    /// Never fails: every error is logged and reflected in the report.
    pub async fn run_cycle(
        &self,
        window: Duration,
        excluded: &ExcludedSet,
        today: Date,
    ) -> CycleReport {
        let mut excluded = excluded.clone();
        match self.coordinator.store().last_winner() {
            Ok(Some(last)) => {
                info!(identity = %last, "excluding previous winner");
                excluded.insert(last);
            }
            Ok(None) => {}
            Err(e) => warn!(event = "last_winner_failed", error = %e),
        }

        let (outcome, candidate) = self.select(window, &excluded).await;

        let mut round = None;
        let mut winner_failed = false;
        let mut attempted: BTreeSet<RoundId> = BTreeSet::new();
        if let (CycleOutcome::Winner, Some(c)) = (outcome, candidate.as_ref()) {
            let unpaid_before = self.unpaid_ids();
            match self
                .coordinator
                .process_winner(c, today, self.exclude_from_lookup_failures)
                .await
            {
                Ok(result) => {
                    attempted.insert(result.round_id);
                    round = Some(result);
                }
                Err(e) => {
                    winner_failed = true;
                    // A round left unpaid by this failure already had its transfer attempt.
                    attempted.extend(self.unpaid_ids().difference(&unpaid_before).copied());
                    warn!(
                        event = "winner_failed",
                        identity = %c.identity,
                        class = e.class().as_str(),
                        error = %e,
                        "winner processing failed; continuing with reconciliation"
                    );
                }
            }
        }

        let reconcile = self.reconciler.reconcile_skipping(today, attempted).await;
        self.update_gauges();

        metrics::CYCLES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        info!(
            event = "cycle_done",
            outcome = outcome.as_str(),
            winner_failed,
            reconciled = reconcile.reconciled(),
            "cycle finished"
        );
        CycleReport {
            outcome,
            candidate,
            round,
            winner_failed,
            reconcile,
        }
    }

    async fn select(
        &self,
        window: Duration,
        excluded: &ExcludedSet,
    ) -> (CycleOutcome, Option<Candidate>) {
        let source = &self.source;
        let picked = with_backoff(
            &self.coordinator.settings().retry,
            "select_candidate",
            move || source.select_candidate(window, excluded),
        )
        .await;
        let templates = &self.coordinator.settings().templates;
        match picked {
            Ok(Selection::Winner(c)) if is_excluded(excluded, &c) => {
                info!(
                    source = self.source.kind(),
                    identity = %c.identity,
                    "selected identity is excluded this cycle"
                );
                self.coordinator
                    .broadcast("no_eligible", &templates.no_eligible_winner())
                    .await;
                (CycleOutcome::NoEligible, Some(c))
            }
            Ok(Selection::NoneEligible) => {
                info!(source = self.source.kind(), "activity but no eligible candidate");
                self.coordinator
                    .broadcast("no_eligible", &templates.no_eligible_winner())
                    .await;
                (CycleOutcome::NoEligible, None)
            }
            Ok(Selection::Winner(c)) => {
                info!(
                    source = self.source.kind(),
                    identity = %c.identity,
                    name = %c.display_name,
                    "winner selected"
                );
                (CycleOutcome::Winner, Some(c))
            }
            Ok(Selection::Empty) => {
                info!(source = self.source.kind(), "no activity in window");
                self.coordinator
                    .broadcast("quiet_period", &templates.quiet_period())
                    .await;
                (CycleOutcome::Quiet, None)
            }
            Err(e) => {
                warn!(
                    event = "selection_failed",
                    source = self.source.kind(),
                    error = %e
                );
                (CycleOutcome::SelectionFailed, None)
            }
        }
    }

    fn unpaid_ids(&self) -> BTreeSet<RoundId> {
        self.coordinator
            .store()
            .unpaid_rounds()
            .map(|rounds| rounds.into_iter().map(|r| r.round_id).collect())
            .unwrap_or_default()
    }

    fn update_gauges(&self) {
        match self.coordinator.store().counts() {
            Ok(c) => {
                for (status, n) in [
                    ("pending", c.pending),
                    ("resolved", c.resolved),
                    ("blocked", c.blocked),
                    ("paid", c.paid),
                ] {
                    metrics::ROUNDS_BY_STATUS
                        .with_label_values(&[status])
                        .set(i64::try_from(n).unwrap_or(i64::MAX));
                }
            }
            Err(e) => warn!(event = "round_counts_failed", error = %e),
        }
    }
}
