//! Shared application state

use std::sync::Arc;

use crate::ledger::LedgerOps;
use crate::payout::PayoutService;
use crate::reconcile::PayoutReconciler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ops: Arc<LedgerOps>,
    pub payout: Arc<dyn PayoutService>,
    pub reconciler: PayoutReconciler,
    /// Instance served when a request names none.
    pub default_instance: String,
    /// Admin endpoints are refused outright while this is unset.
    pub admin_token: Option<String>,
}
