//! Version store: immutable snapshots of uploaded documents.
//!
//! Each upload appends a `DocumentVersion` to its lineage (`document_id`) with
//! `sequence = max + 1`. Content is stored once, content-addressed by sha256,
//! under `<store>/blobs/`. Locking is a compare-and-set on `lock_state` and is
//! irreversible; `reopen` is the explicit admin path that appends a fresh
//! unlocked copy instead of unlocking.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::generation;
use clap::{Parser, Subcommand};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    Locked,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Unlocked => "unlocked",
            LockState::Locked => "locked",
        }
    }
}

impl FromSql for LockState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "unlocked" => Ok(LockState::Unlocked),
            "locked" => Ok(LockState::Locked),
            other => Err(FromSqlError::Other(
                format!("unknown lock_state '{}'", other).into(),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Docx,
    Pdf,
    Unknown,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Docx => "docx",
            DocType::Pdf => "pdf",
            DocType::Unknown => "unknown",
        }
    }
}

impl FromSql for DocType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value.as_str()? {
            "docx" => DocType::Docx,
            "pdf" => DocType::Pdf,
            _ => DocType::Unknown,
        })
    }
}

/// Classify an upload by its file suffix, case-insensitively.
pub fn normalize_document_type(file_name: &str) -> DocType {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    match ext.as_deref() {
        Some("docx") => DocType::Docx,
        Some("pdf") => DocType::Pdf,
        _ => DocType::Unknown,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub sequence: i64,
    /// sha256 of the content; also the blob file name.
    pub content_ref: String,
    pub file_name: String,
    pub doc_type: DocType,
    pub size_bytes: i64,
    pub lock_state: LockState,
    pub locked_at: Option<String>,
    pub supersedes: Option<String>,
    pub created_at: String,
}

impl DocumentVersion {
    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub document_id: String,
    pub latest_sequence: i64,
    pub version_count: i64,
    pub locked_count: i64,
}

const VERSION_COLUMNS: &str = "id, document_id, sequence, content_ref, file_name, doc_type, size_bytes, lock_state, locked_at, supersedes, created_at";

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentVersion> {
    Ok(DocumentVersion {
        id: row.get(0)?,
        document_id: row.get(1)?,
        sequence: row.get(2)?,
        content_ref: row.get(3)?,
        file_name: row.get(4)?,
        doc_type: row.get(5)?,
        size_bytes: row.get(6)?,
        lock_state: row.get(7)?,
        locked_at: row.get(8)?,
        supersedes: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn blob_path(store: &Store, content_ref: &str) -> PathBuf {
    store.blobs_dir().join(content_ref)
}

/// Store `content` under its hash. An existing blob is kept only when its
/// bytes still match; a missing or damaged one is rewritten.
fn write_blob(store: &Store, content: &[u8]) -> Result<String, error::ProspectusError> {
    let content_ref = hash_bytes(content);
    let path = blob_path(store, &content_ref);
    let intact = match fs::read(&path) {
        Ok(existing) => hash_bytes(&existing) == content_ref,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(error::ProspectusError::IoError(e)),
    };
    if !intact {
        fs::create_dir_all(store.blobs_dir()).map_err(error::ProspectusError::IoError)?;
        let tmp = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        fs::write(&tmp, content).map_err(error::ProspectusError::IoError)?;
        fs::rename(&tmp, &path).map_err(error::ProspectusError::IoError)?;
    }
    Ok(content_ref)
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), error::ProspectusError> {
    conn.execute(schemas::VERSIONS_DB_SCHEMA, [])?;
    conn.execute(schemas::VERSIONS_DB_SCHEMA_INDEX, [])?;
    Ok(())
}

pub fn initialize_versions_db(root: &Path) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&db::prospectus_db_path(root), "prospectus", "versions.init", |conn| {
        ensure_schema(conn)
    })
}

pub(crate) fn fetch_version(
    conn: &Connection,
    version_id: &str,
) -> Result<Option<DocumentVersion>, error::ProspectusError> {
    let sql = format!("SELECT {} FROM document_versions WHERE id = ?1", VERSION_COLUMNS);
    let v = conn
        .query_row(&sql, params![version_id], version_from_row)
        .optional()?;
    Ok(v)
}

fn insert_version(
    conn: &Connection,
    document_id: &str,
    file_name: &str,
    content_ref: &str,
    size_bytes: i64,
    supersedes: Option<&str>,
) -> Result<DocumentVersion, error::ProspectusError> {
    let id = ulid::Ulid::new().to_string();
    let now = time::now_epoch_z();
    let doc_type = normalize_document_type(file_name);
    // Sequence is computed inside the INSERT so it cannot race another writer.
    conn.execute(
        "INSERT INTO document_versions(id, document_id, sequence, content_ref, file_name, doc_type, size_bytes, lock_state, supersedes, created_at)
         VALUES(?1, ?2,
                (SELECT COALESCE(MAX(sequence), 0) + 1 FROM document_versions WHERE document_id = ?2),
                ?3, ?4, ?5, ?6, 'unlocked', ?7, ?8)",
        params![id, document_id, content_ref, file_name, doc_type.as_str(), size_bytes, supersedes, now],
    )?;
    fetch_version(conn, &id)?
        .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} vanished after insert", id)))
}

/// Append a new version of `document_id` holding `content`.
pub fn create_version(
    store: &Store,
    document_id: &str,
    file_name: &str,
    content: &[u8],
) -> Result<DocumentVersion, error::ProspectusError> {
    let document_id = document_id.trim();
    if document_id.is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "document_id must not be empty".to_string(),
        ));
    }
    if file_name.trim().is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "file_name must not be empty".to_string(),
        ));
    }
    store.ensure_dirs()?;

    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.create", |conn| {
        ensure_schema(conn)?;
        // Blob write and row insert share the write lock with discard.
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let content_ref = write_blob(store, content)?;
        let version = insert_version(&tx, document_id, file_name.trim(), &content_ref, content.len() as i64, None)?;
        tx.commit()?;
        Ok(version)
    })
}

/// Lock a version. Fails with `AlreadyLocked` on a second call; never silently succeeds.
pub fn lock(store: &Store, version_id: &str) -> Result<DocumentVersion, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    let ts = time::now_epoch_z();
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.lock", |conn| {
        ensure_schema(conn)?;
        let changed = conn.execute(
            "UPDATE document_versions SET lock_state = 'locked', locked_at = ?1
             WHERE id = ?2 AND lock_state = 'unlocked'",
            params![ts, version_id],
        )?;
        match fetch_version(conn, version_id)? {
            None => Err(error::ProspectusError::NotFound(format!("Version {} not found", version_id))),
            Some(v) if changed == 0 => Err(error::ProspectusError::AlreadyLocked(format!(
                "Version {} (document {} v{}) is already locked",
                v.id, v.document_id, v.sequence
            ))),
            Some(v) => Ok(v),
        }
    })
}

pub fn get_version(store: &Store, version_id: &str) -> Result<Option<DocumentVersion>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.get", |conn| {
        ensure_schema(conn)?;
        fetch_version(conn, version_id)
    })
}

pub fn get_latest(store: &Store, document_id: &str) -> Result<Option<DocumentVersion>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.latest", |conn| {
        ensure_schema(conn)?;
        let sql = format!(
            "SELECT {} FROM document_versions WHERE document_id = ?1 ORDER BY sequence DESC LIMIT 1",
            VERSION_COLUMNS
        );
        let v = conn
            .query_row(&sql, params![document_id], version_from_row)
            .optional()?;
        Ok(v)
    })
}

/// All versions of a lineage, oldest first.
pub fn list_versions(store: &Store, document_id: &str) -> Result<Vec<DocumentVersion>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.list", |conn| {
        ensure_schema(conn)?;
        let sql = format!(
            "SELECT {} FROM document_versions WHERE document_id = ?1 ORDER BY sequence ASC",
            VERSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![document_id], version_from_row)?;
        db::collect_rows(rows)
    })
}

pub fn list_documents(store: &Store) -> Result<Vec<DocumentSummary>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.documents", |conn| {
        ensure_schema(conn)?;
        let mut stmt = conn.prepare(
            "SELECT document_id, MAX(sequence), COUNT(*),
                    SUM(CASE WHEN lock_state = 'locked' THEN 1 ELSE 0 END)
             FROM document_versions GROUP BY document_id ORDER BY document_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentSummary {
                document_id: row.get(0)?,
                latest_sequence: row.get(1)?,
                version_count: row.get(2)?,
                locked_count: row.get(3)?,
            })
        })?;
        db::collect_rows(rows)
    })
}

/// Read a version's bytes, verifying them against the recorded hash.
pub fn read_content(store: &Store, version_id: &str) -> Result<Vec<u8>, error::ProspectusError> {
    let version = get_version(store, version_id)?
        .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} not found", version_id)))?;
    let path = blob_path(store, &version.content_ref);
    let bytes = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            error::ProspectusError::Integrity(format!(
                "Blob {} for version {} is missing",
                version.content_ref, version.id
            ))
        } else {
            error::ProspectusError::IoError(e)
        }
    })?;
    if hash_bytes(&bytes) != version.content_ref {
        return Err(error::ProspectusError::Integrity(format!(
            "Blob {} for version {} does not match its hash",
            version.content_ref, version.id
        )));
    }
    Ok(bytes)
}

/// Scan every version's blob. Returns one message per failure.
pub fn verify_blobs(store: &Store) -> Result<Vec<String>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    let versions = broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.verify", |conn| {
        ensure_schema(conn)?;
        let sql = format!("SELECT {} FROM document_versions ORDER BY document_id, sequence", VERSION_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], version_from_row)?;
        db::collect_rows(rows)
    })?;

    let mut failures = Vec::new();
    for v in versions {
        let path = blob_path(store, &v.content_ref);
        if !path.exists() {
            failures.push(format!("Version {}: blob missing at {}", v.id, path.display()));
            continue;
        }
        let bytes = fs::read(&path).map_err(error::ProspectusError::IoError)?;
        if hash_bytes(&bytes) != v.content_ref {
            failures.push(format!("Version {}: content hash mismatch", v.id));
        }
    }
    Ok(failures)
}

/// Admin action: supersede a locked version with a new unlocked copy of its content.
/// The locked version itself is never modified.
pub fn reopen(store: &Store, version_id: &str) -> Result<DocumentVersion, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.reopen", |conn| {
        ensure_schema(conn)?;
        let source = fetch_version(conn, version_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} not found", version_id)))?;
        if !source.is_locked() {
            return Err(error::ProspectusError::NotLocked(format!(
                "Version {} is not locked; edit it by uploading a new version",
                version_id
            )));
        }
        insert_version(
            conn,
            &source.document_id,
            &source.file_name,
            &source.content_ref,
            source.size_bytes,
            Some(source.id.as_str()),
        )
    })
}

/// Delete an unlocked version that no generation run references.
/// The blob is removed in the same write transaction once no other version
/// points at it.
pub fn discard_version(store: &Store, version_id: &str) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "versions.discard", |conn| {
        ensure_schema(conn)?;
        generation::ensure_schema(conn)?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let version = fetch_version(&tx, version_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} not found", version_id)))?;
        let runs: i64 = tx.query_row(
            "SELECT COUNT(*) FROM generation_runs WHERE version_id = ?1",
            params![version_id],
            |row| row.get(0),
        )?;
        if runs > 0 {
            return Err(error::ProspectusError::InUse(format!(
                "Version {} is referenced by {} generation run(s)",
                version_id, runs
            )));
        }
        if version.is_locked() {
            return Err(error::ProspectusError::AlreadyLocked(format!(
                "Version {} is locked and cannot be deleted",
                version_id
            )));
        }
        tx.execute("DELETE FROM document_versions WHERE id = ?1", params![version_id])?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM document_versions WHERE content_ref = ?1",
            params![version.content_ref],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            match fs::remove_file(blob_path(store, &version.content_ref)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(error::ProspectusError::IoError(e)),
            }
        }
        tx.commit()?;
        Ok(())
    })
}

#[derive(Parser, Debug)]
#[clap(name = "doc", about = "Upload, version, lock and inspect documents.")]
pub struct DocCli {
    #[clap(subcommand)]
    pub command: DocCommand,
}

#[derive(Subcommand, Debug)]
pub enum DocCommand {
    /// Upload a file as the next version of a document.
    Upload {
        /// Document lineage identifier.
        #[clap(long)]
        document: String,
        /// File to upload.
        #[clap(value_name = "PATH")]
        path: PathBuf,
        /// Override the recorded file name.
        #[clap(long)]
        name: Option<String>,
    },
    /// Lock a version (irreversible).
    Lock { id: String },
    /// Show the latest version of a document.
    Latest {
        #[clap(long)]
        document: String,
    },
    /// List versions of a document, or all documents when omitted.
    List {
        #[clap(long)]
        document: Option<String>,
    },
    /// Show one version.
    Show { id: String },
    /// Write a version's content to a file (or report its size).
    Cat {
        id: String,
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Supersede a locked version with a new unlocked copy.
    Reopen { id: String },
    /// Delete an unlocked, unreferenced version.
    Discard { id: String },
    /// Check every stored blob against its hash.
    Verify,
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "doc",
        "version": "0.1.0",
        "description": "Versioned document store with irreversible locking",
        "commands": [
            { "name": "upload", "parameters": ["document", "path", "name"] },
            { "name": "lock", "parameters": ["id"] },
            { "name": "latest", "parameters": ["document"] },
            { "name": "list", "parameters": ["document"] },
            { "name": "show", "parameters": ["id"] },
            { "name": "cat", "parameters": ["id", "out"] },
            { "name": "reopen", "parameters": ["id"] },
            { "name": "discard", "parameters": ["id"] },
            { "name": "verify", "parameters": [] }
        ],
        "storage": [schemas::PROSPECTUS_DB_NAME, "blobs/"]
    })
}

fn print_version(v: &DocumentVersion) {
    use colored::Colorize;
    let lock = if v.is_locked() {
        "locked".bright_red().to_string()
    } else {
        "unlocked".bright_green().to_string()
    };
    println!(
        "{} {} v{} [{}|{}] {} ({} bytes, sha256 {})",
        v.id,
        v.document_id.bright_cyan(),
        v.sequence,
        lock,
        v.doc_type.as_str(),
        v.file_name,
        v.size_bytes,
        output::short_hash(&v.content_ref)
    );
    if let Some(prev) = &v.supersedes {
        println!("  supersedes {}", prev);
    }
}

pub fn run_doc_cli(store: &Store, format: OutputFormat, cli: DocCli) -> Result<(), error::ProspectusError> {
    match cli.command {
        DocCommand::Upload { document, path, name } => {
            let content = fs::read(&path).map_err(error::ProspectusError::IoError)?;
            let file_name = match name {
                Some(n) => n,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| error::ProspectusError::PathError(format!("{} has no file name", path.display())))?,
            };
            let v = create_version(store, &document, &file_name, &content)?;
            let out = time::command_envelope("doc.upload", "ok", serde_json::json!({ "version": v }));
            output::emit(format, &out, |_| print_version(&v));
        }
        DocCommand::Lock { id } => {
            let v = lock(store, &id)?;
            let out = time::command_envelope("doc.lock", "ok", serde_json::json!({ "version": v }));
            output::emit(format, &out, |_| print_version(&v));
        }
        DocCommand::Latest { document } => {
            let v = get_latest(store, &document)?;
            let status = if v.is_some() { "ok" } else { "not_found" };
            let out = time::command_envelope("doc.latest", status, serde_json::json!({ "version": v }));
            output::emit(format, &out, |_| match &v {
                Some(v) => print_version(v),
                None => println!("No versions for document {}.", document),
            });
        }
        DocCommand::List { document: Some(document) } => {
            let items = list_versions(store, &document)?;
            let out = time::command_envelope("doc.list", "ok", serde_json::json!({ "items": items }));
            output::emit(format, &out, |_| {
                if items.is_empty() {
                    println!("No versions for document {}.", document);
                }
                for v in &items {
                    print_version(v);
                }
            });
        }
        DocCommand::List { document: None } => {
            let items = list_documents(store)?;
            let out = time::command_envelope("doc.list", "ok", serde_json::json!({ "documents": items }));
            output::emit(format, &out, |_| {
                if items.is_empty() {
                    println!("No documents found.");
                }
                for d in &items {
                    println!(
                        "- {} (latest v{}, {} version(s), {} locked)",
                        d.document_id, d.latest_sequence, d.version_count, d.locked_count
                    );
                }
            });
        }
        DocCommand::Show { id } => {
            let v = get_version(store, &id)?
                .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} not found", id)))?;
            let out = time::command_envelope("doc.show", "ok", serde_json::json!({ "version": v }));
            output::emit(format, &out, |_| print_version(&v));
        }
        DocCommand::Cat { id, out: target } => {
            let bytes = read_content(store, &id)?;
            if let Some(target) = &target {
                fs::write(target, &bytes).map_err(error::ProspectusError::IoError)?;
            }
            let out = time::command_envelope(
                "doc.cat",
                "ok",
                serde_json::json!({ "id": id, "bytes": bytes.len(), "written_to": target }),
            );
            output::emit(format, &out, |_| match &target {
                Some(t) => println!("Wrote {} bytes to {}", bytes.len(), t.display()),
                None => println!("{} bytes (use --out to write them)", bytes.len()),
            });
        }
        DocCommand::Reopen { id } => {
            let v = reopen(store, &id)?;
            let out = time::command_envelope("doc.reopen", "ok", serde_json::json!({ "version": v }));
            output::emit(format, &out, |_| print_version(&v));
        }
        DocCommand::Discard { id } => {
            discard_version(store, &id)?;
            let out = time::command_envelope("doc.discard", "ok", serde_json::json!({ "id": id }));
            output::emit(format, &out, |_| println!("Discarded version {}", id));
        }
        DocCommand::Verify => {
            let failures = verify_blobs(store)?;
            let status = if failures.is_empty() { "ok" } else { "failed" };
            let out = time::command_envelope("doc.verify", status, serde_json::json!({ "failures": failures }));
            output::emit(format, &out, |_| {
                if failures.is_empty() {
                    println!("All document blobs verified.");
                }
                for f in &failures {
                    println!("✗ {}", f);
                }
            });
            if !failures.is_empty() {
                return Err(error::ProspectusError::Integrity(format!(
                    "{} blob(s) failed verification",
                    failures.len()
                )));
            }
        }
    }
    Ok(())
}
