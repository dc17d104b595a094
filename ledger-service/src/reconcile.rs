//! Payout reconciliation.
//!
//! A winner whose record carries no signature, or carries a payout
//! error, is pending: the money may or may not have moved. The
//! reconciler lists those records and retries them on demand. The
//! pending check doubles as the idempotency guard: a settled winner
//! never reaches the payout service again.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::ledger::{LedgerError, LedgerOps, Winner};
use crate::payout::PayoutService;

#[derive(Debug)]
pub enum RetryOutcome {
    /// Payout went through; `updated` pending records were stamped.
    Settled { signature: String, updated: usize },
    /// Nothing pending matched (round, wallet). No payout was attempted.
    NoPendingMatch,
    /// The payout service refused or failed; the ledger was not touched.
    PayoutFailed { error: String },
}

#[derive(Clone)]
pub struct PayoutReconciler {
    ops: Arc<LedgerOps>,
    payout: Arc<dyn PayoutService>,
}

impl PayoutReconciler {
    pub fn new(ops: Arc<LedgerOps>, payout: Arc<dyn PayoutService>) -> Self {
        Self { ops, payout }
    }

    /// All winners still awaiting a settled payout, in award order. An
    /// instance with no document has nothing pending.
    pub async fn list_pending(&self, instance: &str) -> Result<Vec<Winner>, LedgerError> {
        match self.ops.read_document(instance).await {
            Ok(doc) => Ok(doc.pending_winners().into_iter().cloned().collect()),
            Err(LedgerError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Retry the payout for (round, wallet).
    ///
    /// The payout service is called at most once, with the first
    /// matching record's prize amount. On success the signature is
    /// stamped onto every matching pending record; the conditional-write
    /// retry inside `stamp_payout` reuses that signature and never calls
    /// the payout service again. On payout failure nothing is written.
    pub async fn retry(
        &self,
        instance: &str,
        round_id: &str,
        wallet_address: &str,
    ) -> Result<RetryOutcome, LedgerError> {
        let doc = match self.ops.read_document(instance).await {
            Ok(doc) => doc,
            Err(LedgerError::NotFound) => return Ok(RetryOutcome::NoPendingMatch),
            Err(err) => return Err(err),
        };

        let matches = doc.pending_matches(round_id, wallet_address);
        let Some(first) = matches.first() else {
            return Ok(RetryOutcome::NoPendingMatch);
        };
        let amount = first.prize_amount;
        info!(
            "retrying payout of {} SOL to {} for round {} ({} pending record(s))",
            amount,
            wallet_address,
            round_id,
            matches.len()
        );

        let signature = match self.payout.send_payout(wallet_address, amount).await {
            Ok(signature) => signature,
            Err(err) => {
                return Ok(RetryOutcome::PayoutFailed {
                    error: err.to_string(),
                })
            }
        };

        let updated = match self
            .ops
            .stamp_payout(instance, round_id, wallet_address, &signature)
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                // The money moved but the ledger could not record it; the
                // records stay pending and a blind retry would pay again.
                error!(
                    "payout {} for round {} wallet {} succeeded but stamping failed: {}",
                    signature, round_id, wallet_address, err
                );
                return Err(err);
            }
        };

        if updated == 0 {
            warn!(
                "payout {} for round {} wallet {} found no pending records left to stamp",
                signature, round_id, wallet_address
            );
        }
        Ok(RetryOutcome::Settled { signature, updated })
    }
}
