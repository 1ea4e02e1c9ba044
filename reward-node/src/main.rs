#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

use clap::{Parser, Subcommand};
use reward_core::engagement::{
    ActivityFeed, ChatEngagement, EngagementSource, MessageCountScorer, PostEngagement,
};
use reward_core::ledger::mock_client::MockLedgerClient;
use reward_core::ledger::LedgerClient;
use reward_core::notify::Notifier;
use reward_core::{calculate_reward, Identity, RoundId, WalletAddress};
use reward_node::config::{self, EngagementKind, NotifierKind, RewardNodeConfig};
use reward_node::feeds::SnapshotFeed;
use reward_node::instrumented::InstrumentedLedger;
use reward_node::notify::{LoggingNotifier, TelegramNotifier};
use reward_node::{http_server, metrics, CycleReport, PayoutCoordinator, RoundOrchestrator};
use reward_storage::RewardStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reward round engine")]
struct Args {
    /// Path to a TOML config file. If omitted, uses `REWARD_NODE_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger mode:
    /// - mock: offline in-memory ledger (default)
    /// - http: explorer + signer gateway adapter (requires config)
    #[arg(long, value_enum, default_value_t = LedgerMode::Mock)]
    ledger_mode: LedgerMode,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq, Eq)]
enum LedgerMode {
    Mock,
    Http,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a cycle every `schedule.interval_secs` until SIGINT/SIGTERM.
    Run,
    /// Run a single cycle (default).
    Cycle,
    /// Sweep pending and unpaid rounds only.
    Reconcile,
    /// Print the reward for a holding.
    Calc {
        #[arg(long)]
        held: u64,
        /// Overrides `reward.total_reward`.
        #[arg(long)]
        total: Option<u64>,
        /// Overrides `reward.amount_held`.
        #[arg(long)]
        amount_held: Option<u64>,
    },
    /// Wallet registration log.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCommand,
    },
    /// Inspect and unblock rounds.
    Rounds {
        #[command(subcommand)]
        cmd: RoundsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum WalletCommand {
    /// Record a wallet observation (latest one wins).
    Register {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        address: String,
        /// Defaults to `node.platform`.
        #[arg(long)]
        platform: Option<String>,
    },
    /// Print the current wallet and registration history.
    Show {
        #[arg(long)]
        identity: String,
    },
}

#[derive(Debug, Subcommand)]
enum RoundsCommand {
    List,
    Pending,
    Unpaid,
    /// Clear an operator block so the next sweep retries the transfer.
    Unblock {
        #[arg(long)]
        round_id: u64,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = cfg_path
        .as_deref()
        .map(config::load_config)
        .transpose()
        .unwrap_or_else(|e| exit_err(&e))
        .unwrap_or_default();
    if let Err(e) = cfg.validate(args.ledger_mode == LedgerMode::Http) {
        exit_err(&format!("invalid config: {e}"));
    }

    init_logging(&cfg);
    info!(
        node = cfg.node.label.as_str(),
        ledger_mode = ?args.ledger_mode,
        "starting reward-node"
    );

    match args.command.unwrap_or(Command::Cycle) {
        Command::Calc {
            held,
            total,
            amount_held,
        } => {
            let total = total.unwrap_or(cfg.reward.total_reward);
            let amount_held = amount_held.unwrap_or(cfg.reward.amount_held);
            println!("{}", calculate_reward(total, amount_held, held));
        }
        Command::Wallet { cmd } => {
            let store = open_store(&cfg);
            run_wallet(&cfg, &store, cmd);
        }
        Command::Rounds { cmd } => {
            let store = open_store(&cfg);
            run_rounds(&store, cmd);
        }
        Command::Cycle => {
            let orchestrator = build_orchestrator(&cfg, args.ledger_mode);
            let report = orchestrator.run_configured(today()).await;
            print_json(&cycle_json(&report));
        }
        Command::Reconcile => {
            let orchestrator = build_orchestrator(&cfg, args.ledger_mode);
            let report = orchestrator.reconciler().reconcile_all(today()).await;
            print_json(&serde_json::json!({
                "reconciled": report.reconciled(),
                "still_pending": report.still_pending,
                "failed": report.failed,
            }));
        }
        Command::Run => {
            let orchestrator = build_orchestrator(&cfg, args.ledger_mode);
            run_loop(&cfg, orchestrator).await;
        }
    }
}

async fn run_loop(cfg: &RewardNodeConfig, orchestrator: RoundOrchestrator) {
    // Graceful shutdown: SIGINT/SIGTERM sets a shared stop flag.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone());
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, stop);
    }

    metrics::init();
    let server = {
        let bind = cfg.server.bind_address.clone();
        let label = cfg.node.label.clone();
        let metrics_enabled = cfg.server.metrics_enabled;
        let stop = stop.clone();
        std::thread::spawn(move || {
            if let Err(e) = http_server::serve(&bind, &label, metrics_enabled, stop) {
                warn!(error = %e, "http server exited");
            }
        })
    };

    let interval = Duration::from_secs(cfg.schedule.interval_secs.max(1));
    info!(
        event = "run_loop_started",
        interval_secs = interval.as_secs()
    );
    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        let report = orchestrator.run_configured(today()).await;
        info!(event = "cycle_report", report = %cycle_json(&report));
        while !stop.load(Ordering::Relaxed) && started.elapsed() < interval {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    info!(event = "run_loop_stopped");
    let _ = server.join();
}

fn build_orchestrator(cfg: &RewardNodeConfig, mode: LedgerMode) -> RoundOrchestrator {
    let store = Arc::new(open_store(cfg));
    let ledger: Arc<dyn LedgerClient> =
        Arc::new(InstrumentedLedger::new(build_ledger(cfg, mode)));

    let notifier: Arc<dyn Notifier> = match cfg.notifier.kind {
        NotifierKind::Log => Arc::new(LoggingNotifier),
        NotifierKind::Telegram => Arc::new(
            TelegramNotifier::new(cfg.notifier.telegram.clone())
                .unwrap_or_else(|e| exit_err(&e.to_string())),
        ),
    };

    let feed: Arc<dyn ActivityFeed> = Arc::new(SnapshotFeed::new(&cfg.engagement.snapshot_path));
    let source: Arc<dyn EngagementSource> = match cfg.engagement.kind {
        EngagementKind::Posts => Arc::new(PostEngagement::new(feed)),
        EngagementKind::Chat => Arc::new(
            ChatEngagement::new(feed, Arc::new(MessageCountScorer))
                .with_max_messages(cfg.engagement.max_messages),
        ),
    };

    let coordinator = PayoutCoordinator::new(
        store.clone(),
        store,
        ledger,
        notifier,
        Arc::new(cfg.engine_settings()),
    );
    RoundOrchestrator::new(source, coordinator)
        .with_lookup_failure_exclusion(cfg.node.exclude_from_lookup_failures)
}

fn build_ledger(cfg: &RewardNodeConfig, mode: LedgerMode) -> Arc<dyn LedgerClient> {
    match mode {
        LedgerMode::Mock => Arc::new(MockLedgerClient::new()),
        LedgerMode::Http => http_ledger(cfg),
    }
}

#[cfg(feature = "ledger-http")]
fn http_ledger(cfg: &RewardNodeConfig) -> Arc<dyn LedgerClient> {
    use reward_core::ledger::http_client::HttpLedgerClient;
    let http_cfg = cfg
        .ledger
        .http_config(&cfg.reward.token_symbol)
        .unwrap_or_else(|e| exit_err(&e));
    Arc::new(HttpLedgerClient::new(http_cfg).unwrap_or_else(|e| exit_err(&e.to_string())))
}

#[cfg(not(feature = "ledger-http"))]
fn http_ledger(_cfg: &RewardNodeConfig) -> Arc<dyn LedgerClient> {
    exit_err("reward-node was built without the `ledger-http` feature")
}

fn run_wallet(cfg: &RewardNodeConfig, store: &RewardStore, cmd: WalletCommand) {
    match cmd {
        WalletCommand::Register {
            identity,
            address,
            platform,
        } => {
            let platform = platform.unwrap_or_else(|| cfg.node.platform.clone());
            let record = store
                .record_wallet(
                    &platform,
                    &Identity::new(identity),
                    &WalletAddress::new(address),
                    today(),
                )
                .unwrap_or_else(|e| exit_err(&e.to_string()));
            print_json(&record);
        }
        WalletCommand::Show { identity } => {
            let identity = Identity::new(identity);
            let current = store
                .latest_wallet(&identity)
                .unwrap_or_else(|e| exit_err(&e.to_string()));
            let history = store
                .wallet_history(&identity)
                .unwrap_or_else(|e| exit_err(&e.to_string()));
            print_json(&serde_json::json!({
                "identity": identity,
                "current": current,
                "history": history,
            }));
        }
    }
}

fn run_rounds(store: &RewardStore, cmd: RoundsCommand) {
    let rounds = match cmd {
        RoundsCommand::List => store.rounds(),
        RoundsCommand::Pending => store.pending_rounds(),
        RoundsCommand::Unpaid => store.unpaid_rounds(),
        RoundsCommand::Unblock { round_id } => {
            let round_id = RoundId(round_id);
            let was_blocked = store
                .unblock_payout(round_id)
                .unwrap_or_else(|e| exit_err(&e.to_string()));
            print_json(&serde_json::json!({
                "round_id": round_id,
                "was_blocked": was_blocked,
            }));
            return;
        }
    }
    .unwrap_or_else(|e| exit_err(&e.to_string()));
    print_json(&rounds);
}

fn cycle_json(report: &CycleReport) -> serde_json::Value {
    serde_json::json!({
        "outcome": report.outcome.as_str(),
        "candidate": report.candidate.as_ref().map(|c| c.identity.as_str()),
        "round_id": report.round.as_ref().map(|r| r.round_id),
        "state": report.round.as_ref().map(|r| r.state.as_str()),
        "amount": report.round.as_ref().and_then(|r| r.amount),
        "tx_ref": report.round.as_ref().and_then(|r| r.tx_ref.as_ref().map(|t| t.as_str())),
        "winner_failed": report.winner_failed,
        "reconciled": report.reconciled(),
    })
}

fn open_store(cfg: &RewardNodeConfig) -> RewardStore {
    RewardStore::open(&cfg.storage.db_dir).unwrap_or_else(|e| exit_err(&e.to_string()))
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => exit_err(&format!("failed to encode output: {e}")),
    }
}

fn resolve_config_path(cli: Option<&Path>) -> Option<String> {
    if let Some(p) = cli {
        return Some(p.to_string_lossy().to_string());
    }
    std::env::var("REWARD_NODE_CONFIG").ok()
}

fn init_logging(cfg: &RewardNodeConfig) {
    // Prefer explicit config logging.level unless user set RUST_LOG.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.logging.level.clone()));

    if cfg.logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn exit_err(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(2);
}
