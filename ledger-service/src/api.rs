//! Public lottery endpoints: health, current round, ticket purchase

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::ledger::{LedgerError, TicketDraft};
use crate::metrics::{self, TicketOutcome};
use crate::state::AppState;
use crate::types::{BuyTicketRequest, InstanceQuery};
use crate::utils::{ledger_error_status, resolve_instance, validate_wallet};

/// Health check endpoint
pub async fn health_check() -> &'static str {
    info!("GET /healthz - Health check requested");
    "ok"
}

/// Handle GET /round requests
pub async fn get_round(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<Value>, StatusCode> {
    let instance = resolve_instance(query.instance.as_ref(), &state)?;
    info!("GET /round - Round requested for instance {}", instance);

    let doc = state.ops.read_document(instance).await.map_err(|err| {
        info!("Round lookup failed for instance {}: {}", instance, err);
        ledger_error_status(&err)
    })?;

    let ticket_count = doc.tickets_for_round(&doc.current_round.id).len();

    Ok(Json(json!({
        "instance": instance,
        "round": doc.current_round,
        "ticketCount": ticket_count,
    })))
}

/// Handle POST /tickets requests
pub async fn buy_ticket(
    State(state): State<AppState>,
    Json(request): Json<BuyTicketRequest>,
) -> Result<Json<Value>, StatusCode> {
    let instance = resolve_instance(request.instance.as_ref(), &state).map_err(|status| {
        metrics::record_ticket_outcome(TicketOutcome::BadRequest);
        status
    })?;
    info!(
        "POST /tickets - Purchase from wallet {} on instance {}",
        request.wallet_address, instance
    );

    if validate_wallet(&request.wallet_address).is_err() {
        metrics::record_ticket_outcome(TicketOutcome::BadRequest);
        return Err(StatusCode::BAD_REQUEST);
    }
    if let Some(amount) = request.amount {
        if !amount.is_finite() || amount <= 0.0 {
            info!("Rejected ticket with amount {}", amount);
            metrics::record_ticket_outcome(TicketOutcome::BadRequest);
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let draft = TicketDraft {
        wallet_address: request.wallet_address.clone(),
        amount: request.amount,
        purchase_signature: request.purchase_signature.clone(),
    };

    match state.ops.add_ticket(instance, draft).await {
        Ok((ticket, round)) => {
            metrics::record_ticket_outcome(TicketOutcome::Accepted);
            info!(
                "Ticket {} accepted for round {} (pot now {} SOL)",
                ticket.id, round.round_number, round.pot_size
            );
            Ok(Json(json!({
                "status": "accepted",
                "ticket": ticket,
                "round": round,
            })))
        }
        Err(err) => {
            let outcome = match &err {
                LedgerError::RoundClosed { .. } | LedgerError::RoundExpired { .. } => {
                    TicketOutcome::RoundClosed
                }
                LedgerError::Conflict { .. } => TicketOutcome::Conflict,
                LedgerError::Unavailable(_) => TicketOutcome::Unavailable,
                _ => TicketOutcome::BadRequest,
            };
            metrics::record_ticket_outcome(outcome);
            info!("Ticket purchase failed for instance {}: {}", instance, err);
            Err(ledger_error_status(&err))
        }
    }
}
