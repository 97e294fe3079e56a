//! Centralized database schema definitions.
//!
//! All Prospectus state lives in a single SQLite database (`prospectus.db`).
//! Every table is insert-only apart from the two flags noted inline:
//! 1. document_versions: uploaded snapshots per document lineage.
//! 2. template_versions: append-only template history keyed by (template_id, version).
//! 3. generation_runs: immutable generation results with their template snapshot.
//! 4. deal_profiles: saved raw/normalized input sets.

pub const PROSPECTUS_DB_NAME: &str = "prospectus.db";
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const PROSPECTUS_SCHEMA_VERSION: u32 = 1;

pub const META_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const VERSIONS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS document_versions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        content_ref TEXT NOT NULL,
        file_name TEXT NOT NULL,
        doc_type TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        lock_state TEXT NOT NULL DEFAULT 'unlocked', -- unlocked, locked (only transition: unlocked -> locked)
        locked_at TEXT,
        supersedes TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(document_id, sequence)
    )
";
pub const VERSIONS_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_document_versions_lineage ON document_versions(document_id, sequence)";

pub const TEMPLATES_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS template_versions (
        template_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft', -- draft, approved
        sections TEXT NOT NULL, -- JSON array of sections
        schema_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY(template_id, version)
    )
";

pub const TEMPLATES_DB_SCHEMA_ARCHIVE: &str = "
    CREATE TABLE IF NOT EXISTS template_archive (
        template_id TEXT PRIMARY KEY,
        archived_at TEXT NOT NULL
    )
";

pub const GENERATION_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS generation_runs (
        id TEXT PRIMARY KEY,
        version_id TEXT,
        template_id TEXT NOT NULL,
        template_version INTEGER NOT NULL,
        template_snapshot TEXT NOT NULL, -- JSON Template
        inputs TEXT NOT NULL, -- JSON ValidatedInput
        artifact TEXT NOT NULL, -- JSON array of rendered sections
        artifact_hash TEXT NOT NULL,
        unresolved TEXT NOT NULL, -- JSON array of field names
        created_at TEXT NOT NULL
    )
";
pub const GENERATION_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_generation_runs_template ON generation_runs(template_id)";

pub const PROFILES_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS deal_profiles (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        schema_id TEXT NOT NULL,
        template_id TEXT,
        inputs_raw TEXT NOT NULL,
        inputs_normalized TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";

pub const PROFILES_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_deal_profiles_lookup ON deal_profiles(document_id, schema_id, created_at)";

pub const ANALYSIS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS prospectus_analyses (
        id TEXT PRIMARY KEY,
        version_id TEXT NOT NULL,
        analysis TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";

pub const ANALYSIS_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_prospectus_analyses_version ON prospectus_analyses(version_id, created_at)";
