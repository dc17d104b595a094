//! Admin endpoints: round control, payout reconciliation, service stats

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Duration;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::draw;
use crate::ledger::operations::DrawSettlement;
use crate::ledger::Round;
use crate::metrics::{self, PayoutOutcome};
use crate::reconcile::RetryOutcome;
use crate::state::AppState;
use crate::types::{InstanceQuery, RetryPayoutRequest, SetRoundRequest};
use crate::utils::{ledger_error_status, resolve_instance, validate_wallet};

/// Handle PUT /admin/round requests
pub async fn set_round(
    State(state): State<AppState>,
    Json(request): Json<SetRoundRequest>,
) -> Result<Json<Value>, StatusCode> {
    let instance = resolve_instance(request.instance.as_ref(), &state)?;
    info!(
        "PUT /admin/round - Opening round {} on instance {}",
        request.round_number, instance
    );

    let duration = request
        .duration_hours
        .map(Duration::hours)
        .unwrap_or_else(|| state.ops.round_duration());
    let mut round = Round::open(request.round_number, duration);
    if let Some(end_time) = request.end_time {
        round.end_time = end_time;
    }

    let doc = state.ops.set_round(instance, round).await.map_err(|err| {
        warn!("Failed to set round on instance {}: {}", instance, err);
        ledger_error_status(&err)
    })?;

    Ok(Json(json!({
        "status": "ok",
        "instance": instance,
        "round": doc.current_round,
    })))
}

/// Handle POST /admin/round/end requests
///
/// Ends the current round: picks a winner, attempts the payout, and
/// closes the round. Responds 200 whether or not the payout settled;
/// a failed payout leaves the winner pending for the reconciler.
pub async fn end_round(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<Value>, StatusCode> {
    let instance = resolve_instance(query.instance.as_ref(), &state)?;
    info!("POST /admin/round/end - Ending round on instance {}", instance);

    let report = draw::end_round(&state.ops, state.payout.as_ref(), instance)
        .await
        .map_err(|err| {
            warn!("Failed to end round on instance {}: {}", instance, err);
            ledger_error_status(&err)
        })?;

    match &report.settlement {
        DrawSettlement::Paid { signature } => {
            metrics::record_draw_outcome(PayoutOutcome::Settled);
            Ok(Json(json!({
                "status": "ended",
                "instance": instance,
                "winner": report.winner,
                "payout": {
                    "settled": true,
                    "signature": signature,
                    "updated": report.stamped,
                },
            })))
        }
        DrawSettlement::Failed { error } => {
            metrics::record_draw_outcome(PayoutOutcome::Failed);
            Ok(Json(json!({
                "status": "ended",
                "instance": instance,
                "winner": report.winner,
                "payout": {
                    "settled": false,
                    "error": error,
                },
            })))
        }
    }
}

/// Handle GET /admin/payouts/pending requests
pub async fn pending_payouts(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<Value>, StatusCode> {
    let instance = resolve_instance(query.instance.as_ref(), &state)?;
    info!(
        "GET /admin/payouts/pending - Pending payouts requested for instance {}",
        instance
    );

    let pending = state.reconciler.list_pending(instance).await.map_err(|err| {
        warn!("Failed to list pending payouts on instance {}: {}", instance, err);
        ledger_error_status(&err)
    })?;

    Ok(Json(json!({
        "instance": instance,
        "count": pending.len(),
        "pending": pending,
    })))
}

/// Handle POST /admin/payouts/retry requests
///
/// Upstream payout failures surface as 502 with the service's error
/// text so operators see exactly what the payout service said.
pub async fn retry_payout(
    State(state): State<AppState>,
    Json(request): Json<RetryPayoutRequest>,
) -> Response {
    let instance = match resolve_instance(request.instance.as_ref(), &state) {
        Ok(instance) => instance,
        Err(status) => return status.into_response(),
    };
    info!(
        "POST /admin/payouts/retry - Retry for round {} wallet {} on instance {}",
        request.round_id, request.wallet_address, instance
    );

    if validate_wallet(&request.wallet_address).is_err() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state
        .reconciler
        .retry(instance, &request.round_id, &request.wallet_address)
        .await
    {
        Ok(RetryOutcome::Settled { signature, updated }) => {
            metrics::record_retry_outcome(PayoutOutcome::Settled);
            (
                StatusCode::OK,
                Json(json!({
                    "status": "settled",
                    "signature": signature,
                    "updated": updated,
                })),
            )
                .into_response()
        }
        Ok(RetryOutcome::NoPendingMatch) => {
            metrics::record_retry_outcome(PayoutOutcome::NoMatch);
            info!(
                "No pending payout matches round {} wallet {}",
                request.round_id, request.wallet_address
            );
            StatusCode::NOT_FOUND.into_response()
        }
        Ok(RetryOutcome::PayoutFailed { error }) => {
            metrics::record_retry_outcome(PayoutOutcome::Failed);
            warn!("Payout retry for round {} failed: {}", request.round_id, error);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "status": "payout_failed",
                    "error": error,
                })),
            )
                .into_response()
        }
        Err(err) => {
            warn!("Payout retry errored on instance {}: {}", instance, err);
            ledger_error_status(&err).into_response()
        }
    }
}

/// Handle GET /admin/stats requests
pub async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    info!("GET /admin/stats - Stats requested");

    let mut stats = metrics::snapshot_as_json();
    stats["replication"] = json!({
        "primary": state.ops.ledger().primary_name(),
        "backup": state.ops.ledger().backup_name(),
    });
    Json(stats)
}
