//! The ledger aggregate: one document per lottery instance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticket price added to the pot when a purchase carries no explicit amount.
pub const DEFAULT_TICKET_PRICE_SOL: f64 = 0.01;

/// Window length for a lazily created round.
pub const DEFAULT_ROUND_DURATION_HOURS: i64 = 24;

/// Generate a fresh entity id (uuid v4, no dashes).
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lifecycle of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Active,
    Drawing,
    Ended,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "active",
            RoundStatus::Drawing => "drawing",
            RoundStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The round currently accepting tickets. Exactly one per document;
/// superseded in place when a new round starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: String,
    pub round_number: u64,
    pub pot_size: f64,
    pub total_tickets: u64,
    pub end_time: DateTime<Utc>,
    pub status: RoundStatus,
}

impl Round {
    /// A fresh, empty round open for the given window.
    pub fn open(round_number: u64, duration: Duration) -> Self {
        Self {
            id: new_id(),
            round_number,
            pot_size: 0.0,
            total_tickets: 0,
            end_time: Utc::now() + duration,
            status: RoundStatus::Active,
        }
    }

    /// Whether the round still accepts ticket purchases.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Active && now <= self.end_time
    }
}

/// A purchased ticket. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub wallet_address: String,
    pub round_id: String,
    pub purchased_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_signature: Option<String>,
}

/// A drawn winner. Immutable except the payout fields, which the round-end
/// flow and the reconciler mutate in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub round_id: String,
    pub wallet_address: String,
    pub prize_amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_error: Option<String>,
}

impl Winner {
    /// Settled: a signature is recorded and no payout error remains.
    pub fn is_settled(&self) -> bool {
        self.payout_signature.is_some() && self.payout_error.is_none()
    }

    /// Pending winners are eligible for reconciliation.
    pub fn is_pending(&self) -> bool {
        !self.is_settled()
    }
}

/// The single aggregate persisted per lottery instance. Top-level JSON keys
/// are `version`, `currentRound`, `tickets`, `winners`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    /// Monotonic document version; the conditional-write token.
    #[serde(default)]
    pub version: u64,
    pub current_round: Round,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub winners: Vec<Winner>,
}

impl LedgerDocument {
    /// A fresh document created lazily on first write: round number 1,
    /// empty history. The version is assigned by the replicated write.
    pub fn bootstrap(round_duration: Duration) -> Self {
        Self {
            version: 0,
            current_round: Round::open(1, round_duration),
            tickets: Vec::new(),
            winners: Vec::new(),
        }
    }

    /// Append a ticket and fold its contribution into the round counters.
    pub fn append_ticket(&mut self, ticket: Ticket, amount: f64) {
        self.current_round.total_tickets += 1;
        self.current_round.pot_size += amount;
        self.tickets.push(ticket);
    }

    /// Tickets belonging to the given round, in purchase order.
    pub fn tickets_for_round(&self, round_id: &str) -> Vec<&Ticket> {
        self.tickets
            .iter()
            .filter(|t| t.round_id == round_id)
            .collect()
    }

    /// Winners eligible for reconciliation, in award order.
    pub fn pending_winners(&self) -> Vec<&Winner> {
        self.winners.iter().filter(|w| w.is_pending()).collect()
    }

    /// Pending winner records matching (round, wallet). Duplicate records
    /// for the same pair are possible and all are returned.
    pub fn pending_matches(&self, round_id: &str, wallet_address: &str) -> Vec<&Winner> {
        self.winners
            .iter()
            .filter(|w| {
                w.is_pending() && w.round_id == round_id && w.wallet_address == wallet_address
            })
            .collect()
    }

    /// Write the signature onto every pending record matching (round,
    /// wallet) and clear any payout error. Settling the current round's
    /// own winner while the round is still mid-draw also closes the
    /// round. Returns how many records were stamped.
    pub fn stamp_payout(&mut self, round_id: &str, wallet_address: &str, signature: &str) -> usize {
        let mut stamped = 0;
        for w in self.winners.iter_mut().filter(|w| {
            w.is_pending() && w.round_id == round_id && w.wallet_address == wallet_address
        }) {
            w.payout_signature = Some(signature.to_string());
            w.payout_error = None;
            stamped += 1;
        }
        if stamped > 0
            && self.current_round.id == round_id
            && self.current_round.status == RoundStatus::Drawing
        {
            self.current_round.status = RoundStatus::Ended;
        }
        stamped
    }

    /// Record a payout failure on every pending record matching (round,
    /// wallet). Returns how many records were marked.
    pub fn stamp_payout_error(
        &mut self,
        round_id: &str,
        wallet_address: &str,
        error: &str,
    ) -> usize {
        let mut marked = 0;
        for w in self.winners.iter_mut().filter(|w| {
            w.is_pending() && w.round_id == round_id && w.wallet_address == wallet_address
        }) {
            w.payout_error = Some(error.to_string());
            marked += 1;
        }
        marked
    }
}
