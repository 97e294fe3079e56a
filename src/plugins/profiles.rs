//! Deal profiles: saved raw and normalized input sets per document lineage.
//!
//! Profiles are insert-only. The latest profile for a lineage and schema
//! (optionally narrowed to a template) is the one most recently saved.

use crate::core::broker::DbBroker;
use crate::core::config::ProspectusConfig;
use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::normalize;
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DealProfile {
    pub id: String,
    pub document_id: String,
    pub schema_id: String,
    pub template_id: Option<String>,
    pub inputs_raw: JsonValue,
    pub inputs_normalized: JsonValue,
    pub created_at: String,
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), error::ProspectusError> {
    conn.execute(schemas::PROFILES_DB_SCHEMA, [])?;
    conn.execute(schemas::PROFILES_DB_SCHEMA_INDEX, [])?;
    Ok(())
}

pub fn initialize_profiles_db(root: &Path) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&db::prospectus_db_path(root), "prospectus", "profiles.init", |conn| {
        ensure_schema(conn)
    })
}

fn json_text(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<JsonValue> {
    let body: String = row.get(idx)?;
    serde_json::from_str(&body).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DealProfile> {
    Ok(DealProfile {
        id: row.get(0)?,
        document_id: row.get(1)?,
        schema_id: row.get(2)?,
        template_id: row.get(3)?,
        inputs_raw: json_text(row, 4)?,
        inputs_normalized: json_text(row, 5)?,
        created_at: row.get(6)?,
    })
}

pub fn save_profile(
    store: &Store,
    document_id: &str,
    schema_id: &str,
    template_id: Option<&str>,
    inputs_raw: &JsonValue,
    inputs_normalized: &JsonValue,
) -> Result<DealProfile, error::ProspectusError> {
    if document_id.trim().is_empty() || schema_id.trim().is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "document_id and schema_id must not be empty".to_string(),
        ));
    }
    if !inputs_raw.is_object() || !inputs_normalized.is_object() {
        return Err(error::ProspectusError::ValidationError(
            "profile inputs must be JSON objects".to_string(),
        ));
    }
    let profile = DealProfile {
        id: ulid::Ulid::new().to_string(),
        document_id: document_id.to_string(),
        schema_id: schema_id.to_string(),
        template_id: template_id.map(|s| s.to_string()),
        inputs_raw: inputs_raw.clone(),
        inputs_normalized: inputs_normalized.clone(),
        created_at: time::now_epoch_z(),
    };
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "profiles.save", |conn| {
        ensure_schema(conn)?;
        conn.execute(
            "INSERT INTO deal_profiles(id, document_id, schema_id, template_id, inputs_raw, inputs_normalized, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                profile.id,
                profile.document_id,
                profile.schema_id,
                profile.template_id,
                serde_json::to_string(&profile.inputs_raw)?,
                serde_json::to_string(&profile.inputs_normalized)?,
                profile.created_at
            ],
        )?;
        Ok(())
    })?;
    Ok(profile)
}

pub fn get_latest_profile(
    store: &Store,
    document_id: &str,
    schema_id: &str,
    template_id: Option<&str>,
) -> Result<Option<DealProfile>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "profiles.latest", |conn| {
        ensure_schema(conn)?;
        let profile = conn
            .query_row(
                "SELECT id, document_id, schema_id, template_id, inputs_raw, inputs_normalized, created_at
                 FROM deal_profiles
                 WHERE document_id = ?1 AND schema_id = ?2 AND (?3 IS NULL OR template_id = ?3)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![document_id, schema_id, template_id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "profile", about = "Save and recall deal input profiles.")]
pub struct ProfileCli {
    #[clap(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Save raw inputs (normalized on the way in) as a new profile.
    Save {
        #[clap(long)]
        document: String,
        #[clap(long)]
        schema: String,
        #[clap(long)]
        template: Option<String>,
        /// JSON object with raw deal inputs.
        #[clap(long)]
        inputs: PathBuf,
    },
    /// Show the most recently saved profile.
    Latest {
        #[clap(long)]
        document: String,
        #[clap(long)]
        schema: String,
        #[clap(long)]
        template: Option<String>,
    },
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "profile",
        "version": "0.1.0",
        "description": "Saved deal input profiles, latest wins",
        "commands": [
            { "name": "save", "parameters": ["document", "schema", "template", "inputs"] },
            { "name": "latest", "parameters": ["document", "schema", "template"] }
        ],
        "storage": [schemas::PROSPECTUS_DB_NAME]
    })
}

fn print_profile(p: &DealProfile) {
    use colored::Colorize;
    println!(
        "{} {} schema {} template {} at {}",
        p.id,
        p.document_id.bright_cyan(),
        p.schema_id,
        p.template_id.as_deref().unwrap_or("-"),
        p.created_at
    );
    println!("  {}", output::compact_line(&p.inputs_normalized.to_string(), 100));
}

pub fn run_profile_cli(
    store: &Store,
    config: &ProspectusConfig,
    format: OutputFormat,
    cli: ProfileCli,
) -> Result<(), error::ProspectusError> {
    match cli.command {
        ProfileCommand::Save {
            document,
            schema,
            template,
            inputs,
        } => {
            let body = fs::read_to_string(&inputs).map_err(error::ProspectusError::IoError)?;
            let raw: JsonValue = serde_json::from_str(&body)?;
            let normalized = normalize::normalize_inputs(&raw, &normalize::NormalizeConfig::from(config))?;
            let p = save_profile(
                store,
                &document,
                &schema,
                template.as_deref(),
                &raw,
                &normalized.normalized,
            )?;
            let out = time::command_envelope(
                "profile.save",
                "ok",
                serde_json::json!({ "profile": p, "missing": normalized.missing }),
            );
            output::emit(format, &out, |_| print_profile(&p));
        }
        ProfileCommand::Latest {
            document,
            schema,
            template,
        } => {
            let p = get_latest_profile(store, &document, &schema, template.as_deref())?;
            let status = if p.is_some() { "ok" } else { "not_found" };
            let out = time::command_envelope("profile.latest", status, serde_json::json!({ "profile": p }));
            output::emit(format, &out, |_| match &p {
                Some(p) => print_profile(p),
                None => println!("No profile for {} / {}.", document, schema),
            });
        }
    }
    Ok(())
}
