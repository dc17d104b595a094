//! Round-end flow: draw a winner, then move the money.
//!
//! The pending winner record is persisted before the payout call, so a
//! crash anywhere after that point leaves a record the reconciler can
//! see. Payout success or failure is then folded back into the ledger
//! and the round is closed.

use tracing::{error, info, warn};

use crate::ledger::operations::DrawSettlement;
use crate::ledger::{LedgerError, LedgerOps, Winner};
use crate::payout::PayoutService;

#[derive(Debug)]
pub struct DrawReport {
    pub winner: Winner,
    pub settlement: DrawSettlement,
    pub stamped: usize,
}

impl DrawReport {
    pub fn settled(&self) -> bool {
        matches!(self.settlement, DrawSettlement::Paid { .. })
    }
}

/// End the current round of `instance`: persist a pending winner, pay
/// out the pot, record the result and close the round.
pub async fn end_round(
    ops: &LedgerOps,
    payout: &dyn PayoutService,
    instance: &str,
) -> Result<DrawReport, LedgerError> {
    let winner = ops.begin_draw(instance).await?;

    if let Some(signature) = winner.payout_signature.clone() {
        // Settled while the round was stuck in `drawing`: the pot has
        // already been paid, so the round just closes.
        info!(
            "winner {} for round {} already settled ({}); closing without payout",
            winner.wallet_address, winner.round_id, signature
        );
        return Ok(DrawReport {
            winner,
            settlement: DrawSettlement::Paid { signature },
            stamped: 0,
        });
    }

    info!(
        "drew {} for round {} (prize {} SOL)",
        winner.wallet_address, winner.round_id, winner.prize_amount
    );

    let settlement = match payout
        .send_payout(&winner.wallet_address, winner.prize_amount)
        .await
    {
        Ok(signature) => DrawSettlement::Paid { signature },
        Err(err) => {
            warn!(
                "payout for round {} failed, winner stays pending: {}",
                winner.round_id, err
            );
            DrawSettlement::Failed {
                error: err.to_string(),
            }
        }
    };

    let stamped = match ops
        .complete_draw(instance, &winner.round_id, &winner.wallet_address, &settlement)
        .await
    {
        Ok(stamped) => stamped,
        Err(err) => {
            if let DrawSettlement::Paid { signature } = &settlement {
                // Paid but unrecorded: the record stays pending and the
                // operator must reconcile against this signature.
                error!(
                    "payout {} for round {} succeeded but could not be recorded: {}",
                    signature, winner.round_id, err
                );
            }
            return Err(err);
        }
    };

    Ok(DrawReport {
        winner,
        settlement,
        stamped,
    })
}
