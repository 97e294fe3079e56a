//! Generation engine.
//!
//! `generate` binds a locked document version (or none), a snapshot of a
//! template's current version and a `ValidatedInput` into an immutable
//! `GenerationRun`. No value is ever synthesized: an absent or missing field
//! is rendered as `[[MISSING: field]]` and recorded in the run's unresolved
//! list. The lock check, template snapshot and run insert share one
//! `BEGIN IMMEDIATE` transaction.

use crate::core::broker::DbBroker;
use crate::core::config::ProspectusConfig;
use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::normalize;
use crate::plugins::placeholders;
use crate::plugins::templates::{self, Section, SectionKind, Template, TemplateStatus};
use crate::plugins::versions::{self, hash_bytes};
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Known(String),
    Missing,
}

/// Field name to tagged value. Shape-checked by the caller, never fact-checked here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ValidatedInput {
    fields: BTreeMap<String, FieldValue>,
}

impl ValidatedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(mut self, field: &str, value: &str) -> Self {
        self.insert(field, FieldValue::Known(value.to_string()));
        self
    }

    pub fn missing(mut self, field: &str) -> Self {
        self.insert(field, FieldValue::Missing);
        self
    }

    pub fn insert(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Known, non-blank value of `field`; `None` for absent, missing, blank
    /// or a value that is itself a `[[MISSING: ...]]` marker.
    pub fn resolve(&self, field: &str) -> Option<String> {
        match self.fields.get(field) {
            Some(FieldValue::Known(v)) if !v.trim().is_empty() && !placeholders::is_missing_value(v) => {
                Some(v.trim().to_string())
            }
            _ => None,
        }
    }

    /// Flatten a JSON object into dotted paths.
    ///
    /// `null`, blank strings, marker strings, empty arrays and
    /// `{"missing": true}` become `Missing`; arrays render one item per line.
    pub fn from_json(value: &JsonValue) -> Result<Self, error::ProspectusError> {
        let obj = value.as_object().ok_or_else(|| {
            error::ProspectusError::ValidationError("inputs must be a JSON object".to_string())
        })?;
        let mut input = Self::new();
        for (k, v) in obj {
            flatten_into(&mut input, k, v);
        }
        Ok(input)
    }
}

fn is_missing_marker(obj: &serde_json::Map<String, JsonValue>) -> bool {
    obj.len() == 1 && obj.get("missing") == Some(&JsonValue::Bool(true))
}

fn scalar_text(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::Null => None,
        JsonValue::String(s) => {
            let t = s.trim();
            (!t.is_empty() && !placeholders::is_missing_value(t)).then(|| t.to_string())
        }
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn flatten_into(input: &mut ValidatedInput, path: &str, value: &JsonValue) {
    match value {
        JsonValue::Object(obj) if is_missing_marker(obj) => input.insert(path, FieldValue::Missing),
        JsonValue::Object(obj) => {
            for (k, v) in obj {
                flatten_into(input, &format!("{}.{}", path, k), v);
            }
        }
        JsonValue::Array(items) => {
            let lines: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if lines.is_empty() {
                input.insert(path, FieldValue::Missing);
            } else {
                input.insert(path, FieldValue::Known(lines.join("\n")));
            }
        }
        scalar => match scalar_text(scalar) {
            Some(text) => input.insert(path, FieldValue::Known(text)),
            None => input.insert(path, FieldValue::Missing),
        },
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RenderedSection {
    pub name: String,
    pub kind: String,
    pub text: String,
    /// Fields rendered as placeholders in this section.
    #[serde(default)]
    pub missing: Vec<String>,
}

/// Informational: a fact the run could not fill. Never aborts generation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MissingFieldWarning {
    pub field: String,
    pub section: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationRun {
    pub id: String,
    pub version_id: Option<String>,
    pub template_id: String,
    pub template_version: i64,
    pub template_snapshot: Template,
    pub inputs: ValidatedInput,
    pub artifact: Vec<RenderedSection>,
    pub artifact_hash: String,
    pub unresolved: Vec<String>,
    pub created_at: String,
}

impl GenerationRun {
    pub fn warnings(&self) -> Vec<MissingFieldWarning> {
        self.artifact
            .iter()
            .flat_map(|s| {
                s.missing.iter().map(|f| MissingFieldWarning {
                    field: f.clone(),
                    section: s.name.clone(),
                })
            })
            .collect()
    }

    /// Artifact sections joined by blank lines.
    pub fn artifact_text(&self) -> String {
        self.artifact
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "false" | "no" | "0")
}

/// Render sections in declared order. Returns the artifact and the sorted,
/// de-duplicated unresolved fields.
pub fn render_sections(sections: &[Section], inputs: &ValidatedInput) -> (Vec<RenderedSection>, Vec<String>) {
    let mut artifact = Vec::with_capacity(sections.len());
    for section in sections {
        let (kind, text, mut missing) = match &section.kind {
            SectionKind::FactField { field } => match inputs.resolve(field) {
                Some(v) => ("fact_field", v, Vec::new()),
                None => ("fact_field", placeholders::missing_marker(field), vec![field.clone()]),
            },
            SectionKind::FreeText { text } => {
                let (rendered, missing) = placeholders::substitute(text, |p| inputs.resolve(p));
                ("free_text", rendered, missing)
            }
            SectionKind::ConditionalBlock { field, text } => match inputs.resolve(field) {
                // Undecidable without the fact: mark it rather than guess.
                None => (
                    "conditional_block",
                    placeholders::missing_marker(field),
                    vec![field.clone()],
                ),
                Some(v) if is_truthy(&v) => {
                    let (rendered, missing) = placeholders::substitute(text, |p| inputs.resolve(p));
                    ("conditional_block", rendered, missing)
                }
                Some(_) => continue,
            },
        };
        // Markers already present in template text are unresolved too.
        for field in placeholders::extract_missing_markers(&text) {
            if !missing.contains(&field) {
                missing.push(field);
            }
        }
        artifact.push(RenderedSection {
            name: section.name.clone(),
            kind: kind.to_string(),
            text,
            missing,
        });
    }

    let mut unresolved: Vec<String> = artifact.iter().flat_map(|s| s.missing.iter().cloned()).collect();
    unresolved.sort();
    unresolved.dedup();
    (artifact, unresolved)
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Refuse templates whose current version is still a draft.
    pub require_approved: bool,
}

impl From<&ProspectusConfig> for GenerateOptions {
    fn from(config: &ProspectusConfig) -> Self {
        Self {
            require_approved: config.require_approved_templates,
        }
    }
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), error::ProspectusError> {
    conn.execute(schemas::GENERATION_DB_SCHEMA, [])?;
    conn.execute(schemas::GENERATION_DB_SCHEMA_INDEX, [])?;
    Ok(())
}

pub fn initialize_generation_db(root: &Path) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&db::prospectus_db_path(root), "prospectus", "generation.init", |conn| {
        ensure_schema(conn)
    })
}

const RUN_COLUMNS: &str = "id, version_id, template_id, template_version, template_snapshot, inputs, artifact, artifact_hash, unresolved, created_at";

fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let body: String = row.get(idx)?;
    serde_json::from_str(&body).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationRun> {
    Ok(GenerationRun {
        id: row.get(0)?,
        version_id: row.get(1)?,
        template_id: row.get(2)?,
        template_version: row.get(3)?,
        template_snapshot: json_column(row, 4)?,
        inputs: json_column(row, 5)?,
        artifact: json_column(row, 6)?,
        artifact_hash: row.get(7)?,
        unresolved: json_column(row, 8)?,
        created_at: row.get(9)?,
    })
}

pub fn generate(
    store: &Store,
    version_id: Option<&str>,
    template_id: &str,
    inputs: &ValidatedInput,
) -> Result<GenerationRun, error::ProspectusError> {
    generate_with_options(store, version_id, template_id, inputs, &GenerateOptions::default())
}

pub fn generate_with_options(
    store: &Store,
    version_id: Option<&str>,
    template_id: &str,
    inputs: &ValidatedInput,
    options: &GenerateOptions,
) -> Result<GenerationRun, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "generation.generate", |conn| {
        versions::ensure_schema(conn)?;
        templates::ensure_schema(conn)?;
        ensure_schema(conn)?;

        // Held from the lock check through the insert: a concurrent lock or
        // template edit cannot interleave with this run.
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        if let Some(vid) = version_id {
            let version = versions::fetch_version(&tx, vid)?
                .ok_or_else(|| error::ProspectusError::NotFound(format!("Version {} not found", vid)))?;
            if !version.is_locked() {
                return Err(error::ProspectusError::NotLocked(format!(
                    "Version {} (document {} v{}) must be locked before generation",
                    version.id, version.document_id, version.sequence
                )));
            }
        }

        let snapshot = templates::fetch_current(&tx, template_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", template_id)))?;
        if snapshot.archived {
            return Err(error::ProspectusError::ValidationError(format!(
                "Template {} is archived",
                template_id
            )));
        }
        if options.require_approved && snapshot.status != TemplateStatus::Approved {
            return Err(error::ProspectusError::ValidationError(format!(
                "Template {} v{} is not approved",
                template_id, snapshot.version
            )));
        }

        let (artifact, unresolved) = render_sections(&snapshot.sections, inputs);
        let artifact_json = serde_json::to_string(&artifact)?;
        let run = GenerationRun {
            id: ulid::Ulid::new().to_string(),
            version_id: version_id.map(|s| s.to_string()),
            template_id: snapshot.id.clone(),
            template_version: snapshot.version,
            artifact_hash: hash_bytes(artifact_json.as_bytes()),
            template_snapshot: snapshot,
            inputs: inputs.clone(),
            artifact,
            unresolved,
            created_at: time::now_epoch_z(),
        };

        tx.execute(
            "INSERT INTO generation_runs(id, version_id, template_id, template_version, template_snapshot, inputs, artifact, artifact_hash, unresolved, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id,
                run.version_id,
                run.template_id,
                run.template_version,
                serde_json::to_string(&run.template_snapshot)?,
                serde_json::to_string(&run.inputs)?,
                artifact_json,
                run.artifact_hash,
                serde_json::to_string(&run.unresolved)?,
                run.created_at
            ],
        )?;
        tx.commit()?;
        Ok(run)
    })
}

pub fn get_run(store: &Store, run_id: &str) -> Result<Option<GenerationRun>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "generation.get", |conn| {
        ensure_schema(conn)?;
        let sql = format!("SELECT {} FROM generation_runs WHERE id = ?1", RUN_COLUMNS);
        let run = conn.query_row(&sql, params![run_id], run_from_row).optional()?;
        Ok(run)
    })
}

/// Runs oldest first, optionally restricted to one template.
pub fn list_runs(store: &Store, template_id: Option<&str>) -> Result<Vec<GenerationRun>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "generation.list", |conn| {
        ensure_schema(conn)?;
        let sql = format!(
            "SELECT {} FROM generation_runs WHERE (?1 IS NULL OR template_id = ?1) ORDER BY created_at, rowid",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![template_id], run_from_row)?;
        db::collect_rows(rows)
    })
}

pub fn render_artifact_text(run: &GenerationRun) -> String {
    run.artifact_text()
}

/// "Missing Information" summary listing field names (not markers).
pub fn render_missing_report(run: &GenerationRun) -> String {
    if run.unresolved.is_empty() {
        return String::new();
    }
    let mut out = String::from("Missing Information\n\n");
    for f in &run.unresolved {
        out.push_str(&format!("- {}\n", f));
    }
    out
}

/// Write the missing-information summary followed by the artifact text.
/// Defaults to `<store>/generated/<run_id>.txt`.
pub fn export_run(store: &Store, run_id: &str, target: Option<&Path>) -> Result<PathBuf, error::ProspectusError> {
    let run = get_run(store, run_id)?
        .ok_or_else(|| error::ProspectusError::NotFound(format!("Run {} not found", run_id)))?;
    let path = match target {
        Some(p) => p.to_path_buf(),
        None => store.generated_dir().join(format!("{}.txt", run.id)),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(error::ProspectusError::IoError)?;
    }
    let report = render_missing_report(&run);
    let text = render_artifact_text(&run);
    let body = if report.is_empty() {
        text
    } else {
        format!("{}\n{}", report, text)
    };
    fs::write(&path, body).map_err(error::ProspectusError::IoError)?;
    Ok(path)
}

#[derive(clap::Args, Debug)]
pub struct GenerateCli {
    /// Template to generate from (its current version is snapshotted).
    #[clap(long)]
    pub template: String,
    /// Locked document version the run is based on.
    #[clap(long)]
    pub version: Option<String>,
    /// JSON object with the input facts.
    #[clap(long)]
    pub inputs: PathBuf,
    /// Derive formatted offer fields before generation.
    #[clap(long)]
    pub normalize: bool,
}

#[derive(Parser, Debug)]
#[clap(name = "run", about = "Inspect generation runs.")]
pub struct RunCli {
    #[clap(subcommand)]
    pub command: RunCommand,
}

#[derive(Subcommand, Debug)]
pub enum RunCommand {
    /// Show a run's artifact and unresolved fields.
    Show { id: String },
    /// List runs.
    List {
        #[clap(long)]
        template: Option<String>,
    },
    /// Write a run's artifact to a text file.
    Export {
        id: String,
        #[clap(long)]
        out: Option<PathBuf>,
    },
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "generation",
        "version": "0.1.0",
        "description": "Template-bound generation that never invents facts",
        "commands": [
            { "name": "generate", "parameters": ["template", "version", "inputs", "normalize"] },
            { "name": "run show", "parameters": ["id"] },
            { "name": "run list", "parameters": ["template"] },
            { "name": "run export", "parameters": ["id", "out"] }
        ],
        "storage": [schemas::PROSPECTUS_DB_NAME, "generated/"]
    })
}

fn print_run(run: &GenerationRun, with_artifact: bool) {
    use colored::Colorize;
    println!(
        "{} template {} v{} source {} ({} section(s), hash {})",
        run.id,
        run.template_id,
        run.template_version,
        run.version_id.as_deref().unwrap_or("-"),
        run.artifact.len(),
        output::short_hash(&run.artifact_hash)
    );
    if run.unresolved.is_empty() {
        println!("  {} all fields resolved", "✓".bright_green());
    } else {
        println!(
            "  {} unresolved: {}",
            "⚠".bright_yellow(),
            output::preview_fields(&run.unresolved, 8)
        );
    }
    if with_artifact {
        for s in &run.artifact {
            println!("--- {} ---", s.name.bright_cyan());
            println!("{}", s.text);
        }
    }
}

pub fn run_generate_cli(
    store: &Store,
    config: &ProspectusConfig,
    format: OutputFormat,
    cli: GenerateCli,
) -> Result<(), error::ProspectusError> {
    let body = fs::read_to_string(&cli.inputs).map_err(error::ProspectusError::IoError)?;
    let raw: JsonValue = serde_json::from_str(&body)?;
    let inputs = if cli.normalize {
        normalize::normalize_inputs(&raw, &normalize::NormalizeConfig::from(config))?.input
    } else {
        ValidatedInput::from_json(&raw)?
    };
    let run = generate_with_options(
        store,
        cli.version.as_deref(),
        &cli.template,
        &inputs,
        &GenerateOptions::from(config),
    )?;
    let warnings = run.warnings();
    let out = time::command_envelope(
        "generate",
        "ok",
        serde_json::json!({ "run": run, "warnings": warnings }),
    );
    output::emit(format, &out, |_| print_run(&run, true));
    Ok(())
}

pub fn run_run_cli(store: &Store, format: OutputFormat, cli: RunCli) -> Result<(), error::ProspectusError> {
    match cli.command {
        RunCommand::Show { id } => {
            let run = get_run(store, &id)?
                .ok_or_else(|| error::ProspectusError::NotFound(format!("Run {} not found", id)))?;
            let out = time::command_envelope(
                "run.show",
                "ok",
                serde_json::json!({ "run": run, "warnings": run.warnings() }),
            );
            output::emit(format, &out, |_| print_run(&run, true));
        }
        RunCommand::List { template } => {
            let items = list_runs(store, template.as_deref())?;
            let out = time::command_envelope("run.list", "ok", serde_json::json!({ "items": items }));
            output::emit(format, &out, |_| {
                if items.is_empty() {
                    println!("No generation runs found.");
                }
                for r in &items {
                    print_run(r, false);
                }
            });
        }
        RunCommand::Export { id, out: target } => {
            let path = export_run(store, &id, target.as_deref())?;
            let out = time::command_envelope("run.export", "ok", serde_json::json!({ "id": id, "path": path }));
            output::emit(format, &out, |_| println!("Exported run {} to {}", id, path.display()));
        }
    }
    Ok(())
}
