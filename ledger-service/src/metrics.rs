use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::ledger::constants::{CURRENT_SCHEMA_VERSION, DEFAULT_DB_PATH};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TicketOutcome {
    Accepted,
    BadRequest,
    RoundClosed,
    Conflict,
    Unavailable,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PayoutOutcome {
    Settled,
    Failed,
    NoMatch,
}

pub struct Metrics {
    tickets_total: HashMap<TicketOutcome, u64>,
    draws_total: HashMap<PayoutOutcome, u64>,
    payout_retries_total: HashMap<PayoutOutcome, u64>,
}

static METRICS: OnceCell<Mutex<Metrics>> = OnceCell::new();

fn get() -> &'static Mutex<Metrics> {
    METRICS.get_or_init(|| {
        Mutex::new(Metrics {
            tickets_total: HashMap::new(),
            draws_total: HashMap::new(),
            payout_retries_total: HashMap::new(),
        })
    })
}

pub fn record_ticket_outcome(outcome: TicketOutcome) {
    let mut m = get().lock().expect("metrics mutex poisoned");
    *m.tickets_total.entry(outcome).or_insert(0) += 1;
}

pub fn record_draw_outcome(outcome: PayoutOutcome) {
    let mut m = get().lock().expect("metrics mutex poisoned");
    *m.draws_total.entry(outcome).or_insert(0) += 1;
}

pub fn record_retry_outcome(outcome: PayoutOutcome) {
    let mut m = get().lock().expect("metrics mutex poisoned");
    *m.payout_retries_total.entry(outcome).or_insert(0) += 1;
}

fn ticket_outcome_label(outcome: &TicketOutcome) -> &'static str {
    match outcome {
        TicketOutcome::Accepted => "accepted",
        TicketOutcome::BadRequest => "bad_request",
        TicketOutcome::RoundClosed => "round_closed",
        TicketOutcome::Conflict => "conflict",
        TicketOutcome::Unavailable => "unavailable",
    }
}

fn payout_outcome_label(outcome: &PayoutOutcome) -> &'static str {
    match outcome {
        PayoutOutcome::Settled => "settled",
        PayoutOutcome::Failed => "failed",
        PayoutOutcome::NoMatch => "no_match",
    }
}

pub fn snapshot_as_json() -> serde_json::Value {
    use serde_json::json;
    let m = get().lock().expect("metrics mutex poisoned");

    let tickets: Vec<serde_json::Value> = m
        .tickets_total
        .iter()
        .map(|(outcome, count)| {
            json!({ "outcome": ticket_outcome_label(outcome), "count": count })
        })
        .collect();

    let draws: Vec<serde_json::Value> = m
        .draws_total
        .iter()
        .map(|(outcome, count)| {
            json!({ "outcome": payout_outcome_label(outcome), "count": count })
        })
        .collect();

    let retries: Vec<serde_json::Value> = m
        .payout_retries_total
        .iter()
        .map(|(outcome, count)| {
            json!({ "outcome": payout_outcome_label(outcome), "count": count })
        })
        .collect();

    let (db_path_str, db_bytes) = storage_db_info();
    let db_mb = db_bytes.map(|b| round2(bytes_to_mb(b)));
    let fs_free_mb = filesystem_free_mb_from_db_path(&db_path_str);

    json!({
        "tickets_total": tickets,
        "draws_total": draws,
        "payout_retries_total": retries,
        "storage": {
            "db_path": db_path_str,
            "db_size_mb": db_mb,
            "free_storage_mb": fs_free_mb,
            "schema_version": CURRENT_SCHEMA_VERSION,
        },
        "build": {
            "version": env!("CARGO_PKG_VERSION"),
            "git_hash": option_env!("LEDGER_BUILD_GIT_HASH"),
            "built_at_unix": env!("LEDGER_BUILD_TIME_UNIX"),
        }
    })
}

fn storage_db_info() -> (String, Option<u64>) {
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db_bytes =
        std::fs::metadata(&db_path)
            .ok()
            .and_then(|m| if m.is_file() { Some(m.len()) } else { None });

    (db_path, db_bytes)
}

fn bytes_to_mb(bytes: u64) -> f64 {
    let mb = 1024.0 * 1024.0;
    (bytes as f64) / mb
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn filesystem_free_mb_from_db_path(db_path: &str) -> Option<f64> {
    use sysinfo::Disks;
    let disks = Disks::new_with_refreshed_list();
    let path = std::path::Path::new(db_path);
    let mount = path.canonicalize().ok().and_then(|p| {
        disks
            .iter()
            .filter(|d| p.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
    });

    if let Some(d) = mount {
        let available = bytes_to_mb(d.available_space());
        Some(round2(available))
    } else {
        None
    }
}
