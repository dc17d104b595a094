//! Storage backend contract shared by the primary, backup and fallback
//! stores.

use async_trait::async_trait;

use super::document::LedgerDocument;

/// Result of a backend read. Backends never surface transport errors: an
/// unreachable or misbehaving store reports `Unavailable` with a reason
/// string that is logged, so "nothing stored" stays distinguishable from
/// "storage degraded".
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(LedgerDocument),
    NotFound,
    Unavailable(String),
}

/// Result of a backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The stored version no longer matches what the caller read.
    Conflict,
    Unavailable(String),
}

/// Whole-document get/put for one lottery instance. No partial updates:
/// the entire document is read and rewritten on every mutation.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn get(&self, instance: &str) -> Lookup;

    /// `expected = None` creates the document only if absent; `Some(v)`
    /// replaces it only while the stored version is still `v`. Backends
    /// without native conditional writes accept unconditionally.
    async fn put(&self, instance: &str, doc: &LedgerDocument, expected: Option<u64>)
        -> PutOutcome;
}
