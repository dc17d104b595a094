mod admin;
mod api;
mod auth_middleware;
mod draw;
mod ledger;
mod metrics;
mod payout;
mod reconcile;
mod state;
mod types;
mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ledger::constants::DEFAULT_DB_PATH;
use crate::ledger::document::{DEFAULT_ROUND_DURATION_HOURS, DEFAULT_TICKET_PRICE_SOL};
use crate::ledger::gist::GistStore;
use crate::ledger::sqlite::SqliteStore;
use crate::ledger::{LedgerOps, MemoryStore, ReplicatedLedger, StorageBackend};
use crate::payout::{DisabledPayout, HttpPayoutClient, PayoutService};
use crate::reconcile::PayoutReconciler;
use crate::state::AppState;
use crate::utils::env_parse;

const DEFAULT_BACKUP_API_BASE: &str = "https://api.github.com";
const DEFAULT_INSTANCE: &str = "main";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Lottery Ledger Service");

    // Primary store: SQLite, unless DB_PATH is explicitly emptied
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let primary: Option<Arc<dyn StorageBackend>> = if db_path.is_empty() {
        warn!("DB_PATH is empty; primary SQLite store disabled");
        None
    } else {
        Some(Arc::new(SqliteStore::connect(&db_path).await?))
    };

    // Backup store: GitHub gist, enabled by a token
    let backup: Option<Arc<dyn StorageBackend>> = match std::env::var("BACKUP_GIST_TOKEN") {
        Ok(token) if !token.is_empty() => {
            let gist_id = std::env::var("BACKUP_GIST_ID")
                .ok()
                .filter(|id| !id.is_empty());
            let api_base = std::env::var("BACKUP_API_BASE")
                .unwrap_or_else(|_| DEFAULT_BACKUP_API_BASE.to_string());
            match &gist_id {
                Some(id) => info!("Backup gist store enabled (gist {})", id),
                None => info!("Backup gist store enabled (gist created on first write)"),
            }
            Some(Arc::new(GistStore::new(api_base, token, gist_id)?))
        }
        _ => {
            info!("BACKUP_GIST_TOKEN not set; backup store disabled");
            None
        }
    };

    let replicated = match (primary, backup) {
        (Some(primary), backup) => ReplicatedLedger::new(primary, backup),
        (None, Some(backup)) => {
            // Gist conditional writes are best-effort, so promoting it
            // to primary weakens conflict detection.
            warn!("Running with the gist store as the only backend");
            ReplicatedLedger::new(backup, None)
        }
        (None, None) => {
            warn!("No durable backend configured; ledger data is held in memory and lost on restart");
            ReplicatedLedger::new(Arc::new(MemoryStore::new()), None)
        }
    };
    info!(
        "Ledger backends: primary={}, backup={}",
        replicated.primary_name(),
        replicated.backup_name().unwrap_or("none")
    );

    let round_duration = Duration::hours(env_parse(
        "ROUND_DURATION_HOURS",
        DEFAULT_ROUND_DURATION_HOURS,
    ));
    let ticket_price = env_parse("TICKET_PRICE_SOL", DEFAULT_TICKET_PRICE_SOL);
    let ops = Arc::new(LedgerOps::new(replicated, round_duration, ticket_price));

    // Payout service client
    let payout: Arc<dyn PayoutService> = match std::env::var("PAYOUT_SERVICE_URL") {
        Ok(url) if !url.is_empty() => {
            info!("Payout service at {}", url);
            Arc::new(HttpPayoutClient::new(url)?)
        }
        _ => {
            warn!("PAYOUT_SERVICE_URL not set; payouts will fail until configured");
            Arc::new(DisabledPayout)
        }
    };

    let reconciler = PayoutReconciler::new(ops.clone(), payout.clone());

    let default_instance =
        std::env::var("LOTTERY_INSTANCE").unwrap_or_else(|_| DEFAULT_INSTANCE.to_string());
    let admin_token = std::env::var("ADMIN_AUTH_TOKEN").ok().filter(|t| !t.is_empty());
    if admin_token.is_none() {
        warn!("ADMIN_AUTH_TOKEN not set; admin endpoints will reject all requests");
    }

    let app_state = AppState {
        ops,
        payout,
        reconciler,
        default_instance,
        admin_token,
    };

    // Build application with routes
    let admin_routes = Router::new()
        .route("/round", put(admin::set_round))
        .route("/round/end", post(admin::end_round))
        .route("/payouts/pending", get(admin::pending_payouts))
        .route("/payouts/retry", post(admin::retry_payout))
        .route("/stats", get(admin::get_stats))
        .route_layer(from_fn_with_state(
            app_state.clone(),
            auth_middleware::require_admin,
        ));

    let public_routes = Router::new()
        .route("/healthz", get(api::health_check))
        .route("/round", get(api::get_round))
        .route("/tickets", post(api::buy_ticket))
        .layer(CorsLayer::permissive());

    let app = Router::new()
        .merge(public_routes)
        .nest("/admin", admin_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    // Run the server
    let port: u16 = env_parse("PORT", 3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
