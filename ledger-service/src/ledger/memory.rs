//! Process-local store. Holds documents only for the lifetime of the
//! process; used as the last-resort primary when no durable backend is
//! configured, and as the workhorse backend in unit tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::backend::{Lookup, PutOutcome, StorageBackend};
use super::document::LedgerDocument;

#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, LedgerDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, instance: &str) -> Lookup {
        let documents = self.documents.lock().await;
        match documents.get(instance) {
            Some(doc) => Lookup::Found(doc.clone()),
            None => Lookup::NotFound,
        }
    }

    async fn put(
        &self,
        instance: &str,
        doc: &LedgerDocument,
        expected: Option<u64>,
    ) -> PutOutcome {
        let mut documents = self.documents.lock().await;
        let stored_version = documents.get(instance).map(|stored| stored.version);
        let accepted = match (stored_version, expected) {
            (None, None) => true,
            (Some(stored), Some(expected)) => stored == expected,
            _ => false,
        };
        if !accepted {
            return PutOutcome::Conflict;
        }
        documents.insert(instance.to_string(), doc.clone());
        PutOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::document::LedgerDocument;

    fn doc_with_version(version: u64) -> LedgerDocument {
        let mut doc = LedgerDocument::bootstrap(chrono::Duration::hours(24));
        doc.version = version;
        doc
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let store = MemoryStore::new();
        assert!(matches!(store.get("main").await, Lookup::NotFound));

        let outcome = store.put("main", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Applied);

        match store.get("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 1),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_conflicts_when_document_exists() {
        let store = MemoryStore::new();
        store.put("main", &doc_with_version(1), None).await;

        let outcome = store.put("main", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Conflict);
    }

    #[tokio::test]
    async fn conditional_replace_checks_stored_version() {
        let store = MemoryStore::new();
        store.put("main", &doc_with_version(3), None).await;

        let stale = store.put("main", &doc_with_version(4), Some(2)).await;
        assert_eq!(stale, PutOutcome::Conflict);

        let current = store.put("main", &doc_with_version(4), Some(3)).await;
        assert_eq!(current, PutOutcome::Applied);

        match store.get("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 4),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let store = MemoryStore::new();
        store.put("main", &doc_with_version(1), None).await;

        assert!(matches!(store.get("devnet").await, Lookup::NotFound));
        let outcome = store.put("devnet", &doc_with_version(1), None).await;
        assert_eq!(outcome, PutOutcome::Applied);
    }
}
