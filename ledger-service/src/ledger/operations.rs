//! Ledger operations: every mutation is read, transform, conditional
//! write, retried a bounded number of times when another writer got
//! there first. Domain checks run inside the transform so each retry
//! re-evaluates them against a fresh copy of the document.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use super::backend::{Lookup, PutOutcome};
use super::document::{new_id, LedgerDocument, Round, RoundStatus, Ticket, Winner};
use super::replicated::ReplicatedLedger;

/// Conflict retries per operation before giving up.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),
    #[error("write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("no ledger document for this instance")]
    NotFound,
    #[error("round is not accepting tickets (status: {status})")]
    RoundClosed { status: RoundStatus },
    #[error("round ended at {end_time}")]
    RoundExpired { end_time: DateTime<Utc> },
    #[error("round has no tickets to draw from")]
    NoTickets,
}

/// Purchase request before it becomes a ledger Ticket.
#[derive(Debug, Clone)]
pub struct TicketDraft {
    pub wallet_address: String,
    pub amount: Option<f64>,
    pub purchase_signature: Option<String>,
}

/// How a finished draw's payout went.
#[derive(Debug, Clone)]
pub enum DrawSettlement {
    Paid { signature: String },
    Failed { error: String },
}

pub struct LedgerOps {
    ledger: ReplicatedLedger,
    round_duration: Duration,
    ticket_price: f64,
}

impl LedgerOps {
    pub fn new(ledger: ReplicatedLedger, round_duration: Duration, ticket_price: f64) -> Self {
        Self {
            ledger,
            round_duration,
            ticket_price,
        }
    }

    pub fn ledger(&self) -> &ReplicatedLedger {
        &self.ledger
    }

    pub fn round_duration(&self) -> Duration {
        self.round_duration
    }

    /// Read the instance's document; absence and unavailability are
    /// distinct errors.
    pub async fn read_document(&self, instance: &str) -> Result<LedgerDocument, LedgerError> {
        match self.ledger.read(instance).await {
            Lookup::Found(doc) => Ok(doc),
            Lookup::NotFound => Err(LedgerError::NotFound),
            Lookup::Unavailable(reason) => Err(LedgerError::Unavailable(reason)),
        }
    }

    /// Append a ticket to the current round, initializing the document
    /// on first use. The ticket id and timestamp are fixed up front so
    /// conflict retries write the same ticket.
    pub async fn add_ticket(
        &self,
        instance: &str,
        draft: TicketDraft,
    ) -> Result<(Ticket, Round), LedgerError> {
        let amount = draft.amount.unwrap_or(self.ticket_price);
        let ticket_id = new_id();
        let purchased_at = Utc::now();

        let (doc, ticket) = self
            .update_document(instance, true, |doc| {
                let now = Utc::now();
                if doc.current_round.status != RoundStatus::Active {
                    return Err(LedgerError::RoundClosed {
                        status: doc.current_round.status,
                    });
                }
                if now > doc.current_round.end_time {
                    return Err(LedgerError::RoundExpired {
                        end_time: doc.current_round.end_time,
                    });
                }

                let ticket = Ticket {
                    id: ticket_id.clone(),
                    wallet_address: draft.wallet_address.clone(),
                    round_id: doc.current_round.id.clone(),
                    purchased_at,
                    purchase_signature: draft.purchase_signature.clone(),
                };
                doc.append_ticket(ticket.clone(), amount);
                Ok(ticket)
            })
            .await?;

        Ok((ticket, doc.current_round))
    }

    /// Replace the current round wholesale, preserving ticket and winner
    /// history. Creates the document when absent.
    pub async fn set_round(
        &self,
        instance: &str,
        round: Round,
    ) -> Result<LedgerDocument, LedgerError> {
        let (doc, _) = self
            .update_document(instance, true, |doc| {
                doc.current_round = round.clone();
                Ok(())
            })
            .await?;
        Ok(doc)
    }

    /// Append a winner record as-is.
    pub async fn record_winner(
        &self,
        instance: &str,
        winner: Winner,
    ) -> Result<LedgerDocument, LedgerError> {
        let (doc, _) = self
            .update_document(instance, false, |doc| {
                doc.winners.push(winner.clone());
                Ok(())
            })
            .await?;
        Ok(doc)
    }

    /// Stamp a payout signature onto every pending winner matching
    /// (round, wallet). Returns how many records were stamped; zero means
    /// another writer settled them first.
    pub async fn stamp_payout(
        &self,
        instance: &str,
        round_id: &str,
        wallet_address: &str,
        signature: &str,
    ) -> Result<usize, LedgerError> {
        let (_, stamped) = self
            .update_document(instance, false, |doc| {
                Ok(doc.stamp_payout(round_id, wallet_address, signature))
            })
            .await?;
        Ok(stamped)
    }

    /// Record a payout failure on every pending winner matching (round,
    /// wallet).
    pub async fn stamp_payout_error(
        &self,
        instance: &str,
        round_id: &str,
        wallet_address: &str,
        error: &str,
    ) -> Result<usize, LedgerError> {
        let (_, marked) = self
            .update_document(instance, false, |doc| {
                Ok(doc.stamp_payout_error(round_id, wallet_address, error))
            })
            .await?;
        Ok(marked)
    }

    /// Pick a winner for the current round and persist the pending record
    /// before any money moves. The round transitions to `drawing`; a
    /// crashed draw that left the round in `drawing` with a pending
    /// winner resumes with that winner instead of picking a second one,
    /// and one whose winner was settled in the meantime (reconciler)
    /// closes the round and returns that settled winner. Callers must
    /// check the returned record before paying: a settled winner is
    /// already paid for.
    pub async fn begin_draw(&self, instance: &str) -> Result<Winner, LedgerError> {
        let (_, winner) = self
            .update_document(instance, false, |doc| {
                if doc.current_round.status == RoundStatus::Ended {
                    return Err(LedgerError::RoundClosed {
                        status: RoundStatus::Ended,
                    });
                }

                if doc.current_round.status == RoundStatus::Drawing {
                    let resumed = doc
                        .winners
                        .iter()
                        .find(|w| w.round_id == doc.current_round.id && w.is_pending())
                        .cloned();
                    if let Some(winner) = resumed {
                        return Ok(winner);
                    }
                    // The draw this round was stuck in has been settled
                    // out of band; re-drawing would pay the pot twice.
                    let settled = doc
                        .winners
                        .iter()
                        .find(|w| w.round_id == doc.current_round.id && w.is_settled())
                        .cloned();
                    if let Some(winner) = settled {
                        doc.current_round.status = RoundStatus::Ended;
                        return Ok(winner);
                    }
                }

                let winner_wallet = {
                    let tickets = doc.tickets_for_round(&doc.current_round.id);
                    match tickets.choose(&mut rand::thread_rng()) {
                        Some(ticket) => ticket.wallet_address.clone(),
                        None => return Err(LedgerError::NoTickets),
                    }
                };

                let winner = Winner {
                    round_id: doc.current_round.id.clone(),
                    wallet_address: winner_wallet,
                    prize_amount: doc.current_round.pot_size,
                    timestamp: Utc::now(),
                    payout_signature: None,
                    payout_error: None,
                };
                doc.current_round.status = RoundStatus::Drawing;
                doc.winners.push(winner.clone());
                Ok(winner)
            })
            .await?;
        Ok(winner)
    }

    /// Close out a draw: stamp the payout result onto the pending winner
    /// (fan-out) and end the round, in one write.
    pub async fn complete_draw(
        &self,
        instance: &str,
        round_id: &str,
        wallet_address: &str,
        settlement: &DrawSettlement,
    ) -> Result<usize, LedgerError> {
        let (_, stamped) = self
            .update_document(instance, false, |doc| {
                let stamped = match settlement {
                    DrawSettlement::Paid { signature } => {
                        doc.stamp_payout(round_id, wallet_address, signature)
                    }
                    DrawSettlement::Failed { error } => {
                        doc.stamp_payout_error(round_id, wallet_address, error)
                    }
                };
                if doc.current_round.id == round_id
                    && doc.current_round.status == RoundStatus::Drawing
                {
                    doc.current_round.status = RoundStatus::Ended;
                }
                Ok(stamped)
            })
            .await?;
        Ok(stamped)
    }

    /// The shared read-transform-write loop. `init_missing` controls
    /// whether an absent document is bootstrapped or an error. Domain
    /// errors from the transform abort without writing.
    async fn update_document<T, F>(
        &self,
        instance: &str,
        init_missing: bool,
        mut transform: F,
    ) -> Result<(LedgerDocument, T), LedgerError>
    where
        F: FnMut(&mut LedgerDocument) -> Result<T, LedgerError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut doc, expected) = match self.ledger.read(instance).await {
                Lookup::Found(doc) => {
                    let version = doc.version;
                    (doc, Some(version))
                }
                Lookup::NotFound if init_missing => {
                    (LedgerDocument::bootstrap(self.round_duration), None)
                }
                Lookup::NotFound => return Err(LedgerError::NotFound),
                Lookup::Unavailable(reason) => return Err(LedgerError::Unavailable(reason)),
            };

            let value = transform(&mut doc)?;
            doc.version = expected.map_or(1, |v| v + 1);

            match self.ledger.write(instance, &doc, expected).await {
                PutOutcome::Applied => return Ok((doc, value)),
                PutOutcome::Conflict => {
                    debug!(
                        "write conflict on instance {} (attempt {}/{})",
                        instance, attempt, MAX_WRITE_ATTEMPTS
                    );
                }
                PutOutcome::Unavailable(reason) => return Err(LedgerError::Unavailable(reason)),
            }
        }

        Err(LedgerError::Conflict {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }
}
