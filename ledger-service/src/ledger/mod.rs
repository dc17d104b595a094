pub mod backend;
pub mod constants;
pub mod document;
pub mod gist;
pub mod memory;
pub mod migrator;
pub mod operations;
pub mod replicated;
pub mod sql;
pub mod sqlite;

pub use backend::{Lookup, PutOutcome, StorageBackend};
pub use document::{LedgerDocument, Round, RoundStatus, Ticket, Winner};
pub use memory::MemoryStore;
pub use operations::{LedgerError, LedgerOps, TicketDraft};
pub use replicated::ReplicatedLedger;
