//! Ledger storage constants and metadata

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptions
pub const MIGRATION_DESCRIPTIONS: &[&str] = &["Initial ledger document schema"];

/// Default database file name
pub const DEFAULT_DB_PATH: &str = "lottery.db";
