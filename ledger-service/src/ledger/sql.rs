//! SQL statement constants for the primary store

pub const CREATE_MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
)
"#;

pub const CREATE_LEDGER_DOCUMENTS_TABLE_SQL: &str = r#"
CREATE TABLE ledger_documents (
    instance TEXT NOT NULL,
    version INTEGER NOT NULL,
    body TEXT NOT NULL, -- JSON
    updated_at TEXT NOT NULL,
    PRIMARY KEY (instance)
)
"#;

pub const SELECT_DOCUMENT_SQL: &str = r#"
SELECT version, body FROM ledger_documents WHERE instance = ?
"#;

pub const INSERT_DOCUMENT_SQL: &str = r#"
INSERT INTO ledger_documents (instance, version, body, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT (instance) DO NOTHING
"#;

pub const UPDATE_DOCUMENT_SQL: &str = r#"
UPDATE ledger_documents
SET version = ?, body = ?, updated_at = ?
WHERE instance = ? AND version = ?
"#;
