use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::ProspectusError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::ProspectusError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::ProspectusError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::ProspectusError::RusqliteError)?;
    Ok(conn)
}

pub fn prospectus_db_path(root: &Path) -> PathBuf {
    root.join(schemas::PROSPECTUS_DB_NAME)
}

/// Create the meta table and stamp the schema version on first run.
pub fn initialize_meta_db(root: &Path) -> Result<(), error::ProspectusError> {
    std::fs::create_dir_all(root).map_err(error::ProspectusError::IoError)?;
    let broker = DbBroker::new(root);
    let db_path = prospectus_db_path(root);

    broker.with_conn(&db_path, "prospectus", "meta.init", |conn| {
        conn.execute(schemas::META_DB_SCHEMA, [])?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                conn.execute(
                    "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                    params![schemas::PROSPECTUS_SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v != schemas::PROSPECTUS_SCHEMA_VERSION.to_string() => {
                return Err(error::ProspectusError::DatabaseInitializationError(format!(
                    "unsupported schema version {} (expected {})",
                    v,
                    schemas::PROSPECTUS_SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }
        Ok(())
    })
}

/// Collect rows from a prepared `query_map` into a Vec, propagating row errors.
pub fn collect_rows<T, I>(rows: I) -> Result<Vec<T>, error::ProspectusError>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
