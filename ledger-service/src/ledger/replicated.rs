//! Dual-backend replication.
//!
//! Reads prefer the primary store and fall back to the backup; writes go
//! to both concurrently and succeed when at least one accepts. The
//! primary is the conflict authority: while it is reachable, its CAS
//! verdict decides the write. While it is down, writes that land only on
//! the backup are accepted in degraded mode and the conflict check is
//! best-effort.

use std::sync::Arc;

use tracing::{info, warn};

use super::backend::{Lookup, PutOutcome, StorageBackend};
use super::document::LedgerDocument;

pub struct ReplicatedLedger {
    primary: Arc<dyn StorageBackend>,
    backup: Option<Arc<dyn StorageBackend>>,
}

impl ReplicatedLedger {
    pub fn new(primary: Arc<dyn StorageBackend>, backup: Option<Arc<dyn StorageBackend>>) -> Self {
        Self { primary, backup }
    }

    pub fn primary_name(&self) -> &'static str {
        self.primary.name()
    }

    pub fn backup_name(&self) -> Option<&'static str> {
        self.backup.as_ref().map(|b| b.name())
    }

    /// Read one instance's document, preferring the primary store.
    ///
    /// A document found only in the backup while the primary reports
    /// `NotFound` is copied back (create-only, so a concurrent writer
    /// cannot be clobbered). No repair happens while the primary is
    /// merely unreachable: its copy may be newer than the backup's.
    pub async fn read(&self, instance: &str) -> Lookup {
        let primary_result = self.primary.get(instance).await;

        let primary_reason = match primary_result {
            Lookup::Found(doc) => return Lookup::Found(doc),
            Lookup::NotFound => None,
            Lookup::Unavailable(reason) => Some(reason),
        };

        let Some(backup) = &self.backup else {
            return match primary_reason {
                None => Lookup::NotFound,
                Some(reason) => Lookup::Unavailable(reason),
            };
        };

        match (backup.get(instance).await, primary_reason) {
            // Primary has no document, backup does: serve it and repair.
            (Lookup::Found(doc), None) => {
                match self.primary.put(instance, &doc, None).await {
                    PutOutcome::Applied => {
                        info!(
                            "repaired {} document for instance {} from {}",
                            self.primary.name(),
                            instance,
                            backup.name()
                        );
                    }
                    PutOutcome::Conflict => {
                        // Another reader or writer beat us to it.
                    }
                    PutOutcome::Unavailable(reason) => {
                        warn!(
                            "repair of instance {} to {} failed: {}",
                            instance,
                            self.primary.name(),
                            reason
                        );
                    }
                }
                Lookup::Found(doc)
            }
            // Primary is down, backup has a copy: serve it, do not
            // repair. The primary may hold a newer document.
            (Lookup::Found(doc), Some(reason)) => {
                warn!(
                    "serving instance {} from {} while {} is unavailable: {}",
                    instance,
                    backup.name(),
                    self.primary.name(),
                    reason
                );
                Lookup::Found(doc)
            }
            (Lookup::NotFound, None) => Lookup::NotFound,
            // One side is unreachable and the other has nothing: absence
            // cannot be proven, and reporting it would invite a fresh
            // bootstrap over whatever the unreachable side holds.
            (Lookup::NotFound, Some(reason)) => Lookup::Unavailable(reason),
            (Lookup::Unavailable(backup_reason), None) => Lookup::Unavailable(backup_reason),
            (Lookup::Unavailable(backup_reason), Some(primary_reason)) => Lookup::Unavailable(
                format!("primary: {primary_reason}; backup: {backup_reason}"),
            ),
        }
    }

    /// Write one instance's document to both stores concurrently.
    ///
    /// `expected` is the version the caller read (`None` to create). The
    /// document's own version must already be bumped past it. Returns
    /// `Applied` when at least one store accepted, with the primary's
    /// verdict taking precedence while it is reachable.
    pub async fn write(
        &self,
        instance: &str,
        doc: &LedgerDocument,
        expected: Option<u64>,
    ) -> PutOutcome {
        let backup_result = match &self.backup {
            Some(backup) => {
                let (primary_result, backup_result) = tokio::join!(
                    self.primary.put(instance, doc, expected),
                    backup.put(instance, doc, expected),
                );
                match primary_result {
                    PutOutcome::Applied => {
                        if let PutOutcome::Unavailable(reason) = backup_result {
                            warn!(
                                "backup write of instance {} to {} failed: {}",
                                instance,
                                backup.name(),
                                reason
                            );
                        }
                        return PutOutcome::Applied;
                    }
                    PutOutcome::Conflict => {
                        // The concurrently issued backup write may hold a
                        // losing copy until the retried write overwrites it.
                        return PutOutcome::Conflict;
                    }
                    PutOutcome::Unavailable(reason) => {
                        warn!(
                            "primary write of instance {} to {} failed: {}",
                            instance,
                            self.primary.name(),
                            reason
                        );
                        backup_result
                    }
                }
            }
            None => self.primary.put(instance, doc, expected).await,
        };

        match backup_result {
            PutOutcome::Applied => {
                if self.backup.is_some() {
                    warn!(
                        "instance {} persisted only to backup; conflict checks are \
                         best-effort until the primary recovers",
                        instance
                    );
                }
                PutOutcome::Applied
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::ledger::memory::MemoryStore;

    /// MemoryStore wrapper whose reads and writes can be failed on
    /// demand.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, instance: &str) -> Lookup {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Lookup::Unavailable("injected read failure".to_string());
            }
            self.inner.get(instance).await
        }

        async fn put(
            &self,
            instance: &str,
            doc: &LedgerDocument,
            expected: Option<u64>,
        ) -> PutOutcome {
            if self.fail_writes.load(Ordering::SeqCst) {
                return PutOutcome::Unavailable("injected write failure".to_string());
            }
            self.inner.put(instance, doc, expected).await
        }
    }

    fn doc_with_version(version: u64) -> LedgerDocument {
        let mut doc = LedgerDocument::bootstrap(chrono::Duration::hours(24));
        doc.version = version;
        doc
    }

    #[tokio::test]
    async fn read_prefers_primary() {
        let primary = Arc::new(MemoryStore::new());
        let backup = Arc::new(MemoryStore::new());
        primary.put("main", &doc_with_version(5), None).await;
        backup.put("main", &doc_with_version(3), None).await;

        let ledger = ReplicatedLedger::new(primary, Some(backup));
        match ledger.read("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 5),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_primary_document_is_repaired_from_backup() {
        let primary = Arc::new(MemoryStore::new());
        let backup = Arc::new(MemoryStore::new());
        backup.put("main", &doc_with_version(7), None).await;

        let ledger = ReplicatedLedger::new(primary.clone(), Some(backup));
        match ledger.read("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 7),
            other => panic!("expected Found, got {other:?}"),
        }

        // The backup copy must now exist in the primary as well.
        match primary.get("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 7),
            other => panic!("expected repaired primary, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_primary_is_served_from_backup_without_repair() {
        let primary = Arc::new(FlakyStore::default());
        let backup = Arc::new(MemoryStore::new());
        backup.put("main", &doc_with_version(2), None).await;
        primary.fail_reads(true);
        primary.fail_writes(true);

        let ledger = ReplicatedLedger::new(primary.clone(), Some(backup));
        match ledger.read("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 2),
            other => panic!("expected Found, got {other:?}"),
        }

        // Once the outage ends the primary must still be empty: a repair
        // would have overwritten a possibly newer copy.
        primary.fail_reads(false);
        assert!(matches!(primary.get("main").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn absence_is_not_reported_while_backup_is_down() {
        let primary = Arc::new(MemoryStore::new());
        let backup = Arc::new(FlakyStore::default());
        backup.fail_reads(true);

        let ledger = ReplicatedLedger::new(primary, Some(backup));
        assert!(matches!(
            ledger.read("main").await,
            Lookup::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn both_empty_reads_not_found() {
        let ledger = ReplicatedLedger::new(
            Arc::new(MemoryStore::new()),
            Some(Arc::new(MemoryStore::new())),
        );
        assert!(matches!(ledger.read("main").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn write_succeeds_when_backup_is_down() {
        let primary = Arc::new(MemoryStore::new());
        let backup = Arc::new(FlakyStore::default());
        backup.fail_writes(true);

        let ledger = ReplicatedLedger::new(primary.clone(), Some(backup));
        let outcome = ledger.write("main", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Applied);
        assert!(matches!(primary.get("main").await, Lookup::Found(_)));
    }

    #[tokio::test]
    async fn write_succeeds_degraded_when_primary_is_down() {
        let primary = Arc::new(FlakyStore::default());
        let backup = Arc::new(MemoryStore::new());
        primary.fail_writes(true);

        let ledger = ReplicatedLedger::new(primary, Some(backup.clone()));
        let outcome = ledger.write("main", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Applied);
        assert!(matches!(backup.get("main").await, Lookup::Found(_)));
    }

    /// Accepts every write, like the last-writer-wins gist backend.
    #[derive(Default)]
    struct AcceptAllStore;

    #[async_trait]
    impl StorageBackend for AcceptAllStore {
        fn name(&self) -> &'static str {
            "accept-all"
        }

        async fn get(&self, _instance: &str) -> Lookup {
            Lookup::NotFound
        }

        async fn put(
            &self,
            _instance: &str,
            _doc: &LedgerDocument,
            _expected: Option<u64>,
        ) -> PutOutcome {
            PutOutcome::Applied
        }
    }

    #[tokio::test]
    async fn primary_conflict_wins_over_backup_accept() {
        let primary = Arc::new(MemoryStore::new());
        primary.put("main", &doc_with_version(3), None).await;

        let ledger = ReplicatedLedger::new(primary, Some(Arc::new(AcceptAllStore)));
        // Stale expectation: the backup takes the write anyway, but the
        // reachable primary's verdict is the one that counts.
        let outcome = ledger.write("main", &doc_with_version(2), Some(1)).await;
        assert_eq!(outcome, PutOutcome::Conflict);
    }

    #[tokio::test]
    async fn write_fails_when_both_stores_are_down() {
        let primary = Arc::new(FlakyStore::default());
        let backup = Arc::new(FlakyStore::default());
        primary.fail_writes(true);
        backup.fail_writes(true);

        let ledger = ReplicatedLedger::new(primary, Some(backup));
        let outcome = ledger.write("main", &doc_with_version(1), None).await;
        assert!(matches!(outcome, PutOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn primary_only_ledger_round_trips() {
        let ledger = ReplicatedLedger::new(Arc::new(MemoryStore::new()), None);

        let outcome = ledger.write("main", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Applied);
        match ledger.read("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 1),
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
