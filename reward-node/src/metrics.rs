use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

static START: Lazy<Instant> = Lazy::new(Instant::now);

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("reward_cycles_total", "Total orchestrator cycles"),
        &["outcome"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static ROUNDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("reward_rounds_total", "Rounds by final state of the pass"),
        &["state"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static PAYOUTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("reward_payouts_total", "Payout attempts by result"),
        &["result"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static PAID_AMOUNT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("reward_paid_amount_total", "Total tokens paid out")
        .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static RECONCILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("reward_reconciled_total", "Rounds settled by the reconciler"),
        &["kind"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static ROUNDS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("reward_rounds_by_status", "Persisted rounds by status"),
        &["status"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub static NOTIFY_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("reward_notify_failures_total", "Failed announcements"),
        &["template"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static LEDGER_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("ledger_requests_total", "Total ledger requests"),
        &["method", "status"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static PROCESS_UPTIME_SECONDS: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::with_opts(Opts::new(
        "process_uptime_seconds",
        "Process uptime in seconds",
    ))
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

/// Force registration so `/metrics` lists every family from the start.
pub fn init() {
    let _ = &*CYCLES_TOTAL;
    let _ = &*ROUNDS_TOTAL;
    let _ = &*PAYOUTS_TOTAL;
    let _ = &*PAID_AMOUNT_TOTAL;
    let _ = &*RECONCILED_TOTAL;
    let _ = &*ROUNDS_BY_STATUS;
    let _ = &*NOTIFY_FAILURES_TOTAL;
    let _ = &*LEDGER_REQUESTS_TOTAL;
    let _ = &*PROCESS_UPTIME_SECONDS;
}

pub fn gather_text() -> String {
    PROCESS_UPTIME_SECONDS.set(START.elapsed().as_secs_f64());
    let mf = REGISTRY.gather();
    let mut out = Vec::new();
    if TextEncoder::new().encode(&mf, &mut out).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_lists_registered_families() {
        init();
        PAYOUTS_TOTAL.with_label_values(&["paid"]).inc();
        let text = gather_text();
        assert!(text.contains("reward_payouts_total"));
        assert!(text.contains("process_uptime_seconds"));
    }
}
