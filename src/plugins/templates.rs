//! Template registry.
//!
//! Templates are stored append-only, one row per `(template_id, version)`.
//! `update_template` always appends the next version, so any generation run
//! that captured an earlier version keeps an exact provenance record.
//! Deletion is refused while runs reference the template, unless the
//! template has been archived first.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::generation;
use crate::plugins::placeholders;
use crate::plugins::versions::hash_bytes;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Draft,
    Approved,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::Approved => "approved",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TemplateStatus::Draft),
            "approved" => Some(TemplateStatus::Approved),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionKind {
    /// Static text; `{{path}}` placeholders are filled from inputs.
    FreeText { text: String },
    /// A single fact taken verbatim from inputs.
    FactField { field: String },
    /// `text` is included only when `field` is known and truthy.
    ConditionalBlock { field: String, text: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    #[serde(flatten)]
    pub kind: SectionKind,
}

impl Section {
    pub fn free_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SectionKind::FreeText { text: text.to_string() },
        }
    }

    /// Fact section whose input field shares the section name.
    pub fn fact(name: &str) -> Self {
        Self::fact_field(name, name)
    }

    pub fn fact_field(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SectionKind::FactField { field: field.to_string() },
        }
    }

    pub fn conditional(name: &str, field: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SectionKind::ConditionalBlock {
                field: field.to_string(),
                text: text.to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub status: TemplateStatus,
    pub version: i64,
    pub sections: Vec<Section>,
    pub schema_hash: String,
    pub archived: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub status: Option<TemplateStatus>,
    pub sections: Option<Vec<Section>>,
}

impl TemplateUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none() && self.sections.is_none()
    }
}

/// Every input field the sections reference, sorted and de-duplicated.
pub fn extract_placeholders(sections: &[Section]) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for s in sections {
        match &s.kind {
            SectionKind::FreeText { text } => {
                fields.extend(placeholders::extract_placeholders(text));
            }
            SectionKind::FactField { field } => {
                fields.insert(field.clone());
            }
            SectionKind::ConditionalBlock { field, text } => {
                fields.insert(field.clone());
                fields.extend(placeholders::extract_placeholders(text));
            }
        }
    }
    fields.into_iter().collect()
}

pub fn validate_sections(sections: &[Section]) -> Result<(), error::ProspectusError> {
    if sections.is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "template must declare at least one section".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for s in sections {
        if s.name.trim().is_empty() {
            return Err(error::ProspectusError::ValidationError(
                "section name must not be empty".to_string(),
            ));
        }
        if !seen.insert(s.name.as_str()) {
            return Err(error::ProspectusError::ValidationError(format!(
                "duplicate section name '{}'",
                s.name
            )));
        }
        let field = match &s.kind {
            SectionKind::FreeText { .. } => None,
            SectionKind::FactField { field } | SectionKind::ConditionalBlock { field, .. } => Some(field),
        };
        if let Some(field) = field {
            if !placeholders::is_valid_field_name(field) {
                return Err(error::ProspectusError::ValidationError(format!(
                    "section '{}' has invalid field name '{}'",
                    s.name, field
                )));
            }
        }
    }
    Ok(())
}

fn schema_hash(sections: &[Section]) -> Result<String, error::ProspectusError> {
    Ok(hash_bytes(serde_json::to_string(sections)?.as_bytes()))
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), error::ProspectusError> {
    conn.execute(schemas::TEMPLATES_DB_SCHEMA, [])?;
    conn.execute(schemas::TEMPLATES_DB_SCHEMA_ARCHIVE, [])?;
    Ok(())
}

pub fn initialize_templates_db(root: &Path) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&db::prospectus_db_path(root), "prospectus", "templates.init", |conn| {
        ensure_schema(conn)
    })
}

const TEMPLATE_SELECT: &str = "SELECT t.template_id, t.name, t.status, t.version, t.sections, t.schema_hash,
            a.archived_at IS NOT NULL, t.created_at
     FROM template_versions t
     LEFT JOIN template_archive a ON a.template_id = t.template_id";

fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
    let status: String = row.get(2)?;
    let status = TemplateStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown template status '{}'", status).into(),
        )
    })?;
    let sections: String = row.get(4)?;
    let sections: Vec<Section> = serde_json::from_str(&sections)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        status,
        version: row.get(3)?,
        sections,
        schema_hash: row.get(5)?,
        archived: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn fetch_current(conn: &Connection, template_id: &str) -> Result<Option<Template>, error::ProspectusError> {
    let sql = format!(
        "{} WHERE t.template_id = ?1 ORDER BY t.version DESC LIMIT 1",
        TEMPLATE_SELECT
    );
    let t = conn.query_row(&sql, params![template_id], template_from_row).optional()?;
    Ok(t)
}

fn insert_template_version(conn: &Connection, t: &Template) -> Result<(), error::ProspectusError> {
    conn.execute(
        "INSERT INTO template_versions(template_id, version, name, status, sections, schema_hash, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            t.id,
            t.version,
            t.name,
            t.status.as_str(),
            serde_json::to_string(&t.sections)?,
            t.schema_hash,
            t.created_at
        ],
    )?;
    Ok(())
}

pub fn create_template(
    store: &Store,
    name: &str,
    status: TemplateStatus,
    sections: Vec<Section>,
) -> Result<Template, error::ProspectusError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "template name must not be empty".to_string(),
        ));
    }
    validate_sections(&sections)?;
    let template = Template {
        id: ulid::Ulid::new().to_string(),
        name: name.to_string(),
        status,
        version: 1,
        schema_hash: schema_hash(&sections)?,
        sections,
        archived: false,
        created_at: time::now_epoch_z(),
    };

    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.create", |conn| {
        ensure_schema(conn)?;
        insert_template_version(conn, &template)
    })?;
    Ok(template)
}

/// Current (highest) version of a template, archived or not.
pub fn get_template(store: &Store, template_id: &str) -> Result<Option<Template>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.get", |conn| {
        ensure_schema(conn)?;
        fetch_current(conn, template_id)
    })
}

pub fn get_template_version(
    store: &Store,
    template_id: &str,
    version: i64,
) -> Result<Option<Template>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.get_version", |conn| {
        ensure_schema(conn)?;
        let sql = format!("{} WHERE t.template_id = ?1 AND t.version = ?2", TEMPLATE_SELECT);
        let t = conn
            .query_row(&sql, params![template_id, version], template_from_row)
            .optional()?;
        Ok(t)
    })
}

/// Current version of every template; archived ones only when asked.
pub fn list_templates(store: &Store, include_archived: bool) -> Result<Vec<Template>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.list", |conn| {
        ensure_schema(conn)?;
        let sql = format!(
            "{} WHERE t.version = (SELECT MAX(version) FROM template_versions WHERE template_id = t.template_id)
               AND (?1 OR a.archived_at IS NULL)
             ORDER BY t.name, t.template_id",
            TEMPLATE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![include_archived], template_from_row)?;
        db::collect_rows(rows)
    })
}

/// Full history of a template, oldest first.
pub fn list_template_versions(store: &Store, template_id: &str) -> Result<Vec<Template>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.versions", |conn| {
        ensure_schema(conn)?;
        let sql = format!("{} WHERE t.template_id = ?1 ORDER BY t.version ASC", TEMPLATE_SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![template_id], template_from_row)?;
        db::collect_rows(rows)
    })
}

/// Append the next version of a template. Earlier versions are never rewritten.
pub fn update_template(
    store: &Store,
    template_id: &str,
    update: TemplateUpdate,
) -> Result<Template, error::ProspectusError> {
    if update.is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "template update changes nothing".to_string(),
        ));
    }
    if let Some(sections) = &update.sections {
        validate_sections(sections)?;
    }
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(error::ProspectusError::ValidationError(
                "template name must not be empty".to_string(),
            ));
        }
    }

    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.update", |conn| {
        ensure_schema(conn)?;
        let current = fetch_current(conn, template_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", template_id)))?;
        if current.archived {
            return Err(error::ProspectusError::ValidationError(format!(
                "Template {} is archived and cannot be edited",
                template_id
            )));
        }
        let sections = update.sections.unwrap_or(current.sections);
        let next = Template {
            id: current.id,
            name: update.name.map(|n| n.trim().to_string()).unwrap_or(current.name),
            status: update.status.unwrap_or(current.status),
            version: current.version + 1,
            schema_hash: schema_hash(&sections)?,
            sections,
            archived: false,
            created_at: time::now_epoch_z(),
        };
        insert_template_version(conn, &next)?;
        Ok(next)
    })
}

/// Hide a template from discovery. Allowed while runs reference it.
pub fn archive_template(store: &Store, template_id: &str) -> Result<Template, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    let ts = time::now_epoch_z();
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.archive", |conn| {
        ensure_schema(conn)?;
        if fetch_current(conn, template_id)?.is_none() {
            return Err(error::ProspectusError::NotFound(format!("Template {} not found", template_id)));
        }
        conn.execute(
            "INSERT OR IGNORE INTO template_archive(template_id, archived_at) VALUES(?1, ?2)",
            params![template_id, ts],
        )?;
        fetch_current(conn, template_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", template_id)))
    })
}

/// Remove every stored version of a template.
/// Fails with `InUse` while a retained run references it and it is still discoverable.
pub fn delete_template(store: &Store, template_id: &str) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "templates.delete", |conn| {
        ensure_schema(conn)?;
        generation::ensure_schema(conn)?;
        let current = fetch_current(conn, template_id)?
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", template_id)))?;
        let runs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM generation_runs WHERE template_id = ?1",
            params![template_id],
            |row| row.get(0),
        )?;
        if runs > 0 && !current.archived {
            return Err(error::ProspectusError::InUse(format!(
                "Template {} is the source of {} generation run(s); archive it before deleting",
                template_id, runs
            )));
        }
        conn.execute("DELETE FROM template_versions WHERE template_id = ?1", params![template_id])?;
        conn.execute("DELETE FROM template_archive WHERE template_id = ?1", params![template_id])?;
        Ok(())
    })
}

#[derive(Parser, Debug)]
#[clap(name = "template", about = "Manage the template library.")]
pub struct TemplateCli {
    #[clap(subcommand)]
    pub command: TemplateCommand,
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    /// Create a template from a JSON file holding its section list.
    Create {
        #[clap(long)]
        name: String,
        #[clap(long, value_enum, default_value = "draft")]
        status: TemplateStatus,
        /// JSON array of sections.
        #[clap(long)]
        sections: PathBuf,
    },
    /// Show the current (or a specific) version.
    Show {
        id: String,
        #[clap(long)]
        version: Option<i64>,
    },
    /// List templates.
    List {
        /// Include archived templates.
        #[clap(long)]
        all: bool,
    },
    /// Show the version history of a template.
    Versions { id: String },
    /// Append a new version with changed fields.
    Update {
        id: String,
        #[clap(long)]
        name: Option<String>,
        #[clap(long, value_enum)]
        status: Option<TemplateStatus>,
        #[clap(long)]
        sections: Option<PathBuf>,
    },
    /// Hide a template from discovery.
    Archive { id: String },
    /// Delete a template (refused while in use and not archived).
    Delete { id: String },
    /// List the input fields a template needs.
    Placeholders { id: String },
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "template",
        "version": "0.1.0",
        "description": "Append-only template registry with run-aware deletion",
        "commands": [
            { "name": "create", "parameters": ["name", "status", "sections"] },
            { "name": "show", "parameters": ["id", "version"] },
            { "name": "list", "parameters": ["all"] },
            { "name": "versions", "parameters": ["id"] },
            { "name": "update", "parameters": ["id", "name", "status", "sections"] },
            { "name": "archive", "parameters": ["id"] },
            { "name": "delete", "parameters": ["id"] },
            { "name": "placeholders", "parameters": ["id"] }
        ],
        "storage": [schemas::PROSPECTUS_DB_NAME]
    })
}

fn read_sections(path: &Path) -> Result<Vec<Section>, error::ProspectusError> {
    let body = fs::read_to_string(path).map_err(error::ProspectusError::IoError)?;
    Ok(serde_json::from_str(&body)?)
}

fn print_template(t: &Template) {
    use colored::Colorize;
    let archived = if t.archived { " (archived)" } else { "" };
    println!(
        "{} {} v{} [{}]{} sections={} hash={}",
        t.id,
        t.name.bright_cyan(),
        t.version,
        t.status.as_str(),
        archived.bright_yellow(),
        t.sections.len(),
        output::short_hash(&t.schema_hash)
    );
}

pub fn run_template_cli(store: &Store, format: OutputFormat, cli: TemplateCli) -> Result<(), error::ProspectusError> {
    match cli.command {
        TemplateCommand::Create { name, status, sections } => {
            let t = create_template(store, &name, status, read_sections(&sections)?)?;
            let out = time::command_envelope("template.create", "ok", serde_json::json!({ "template": t }));
            output::emit(format, &out, |_| print_template(&t));
        }
        TemplateCommand::Show { id, version } => {
            let t = match version {
                Some(v) => get_template_version(store, &id, v)?,
                None => get_template(store, &id)?,
            }
            .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", id)))?;
            let out = time::command_envelope("template.show", "ok", serde_json::json!({ "template": t }));
            output::emit(format, &out, |_| {
                print_template(&t);
                for s in &t.sections {
                    match &s.kind {
                        SectionKind::FreeText { text } => {
                            println!("  - {} [text] {}", s.name, output::compact_line(text, 60))
                        }
                        SectionKind::FactField { field } => println!("  - {} [fact] {}", s.name, field),
                        SectionKind::ConditionalBlock { field, text } => println!(
                            "  - {} [if {}] {}",
                            s.name,
                            field,
                            output::compact_line(text, 60)
                        ),
                    }
                }
            });
        }
        TemplateCommand::List { all } => {
            let items = list_templates(store, all)?;
            let out = time::command_envelope("template.list", "ok", serde_json::json!({ "items": items }));
            output::emit(format, &out, |_| {
                if items.is_empty() {
                    println!("No templates available.");
                }
                for t in &items {
                    print_template(t);
                }
            });
        }
        TemplateCommand::Versions { id } => {
            let items = list_template_versions(store, &id)?;
            if items.is_empty() {
                return Err(error::ProspectusError::NotFound(format!("Template {} not found", id)));
            }
            let out = time::command_envelope("template.versions", "ok", serde_json::json!({ "items": items }));
            output::emit(format, &out, |_| {
                for t in &items {
                    print_template(t);
                }
            });
        }
        TemplateCommand::Update { id, name, status, sections } => {
            let sections = match sections {
                Some(p) => Some(read_sections(&p)?),
                None => None,
            };
            let t = update_template(store, &id, TemplateUpdate { name, status, sections })?;
            let out = time::command_envelope("template.update", "ok", serde_json::json!({ "template": t }));
            output::emit(format, &out, |_| print_template(&t));
        }
        TemplateCommand::Archive { id } => {
            let t = archive_template(store, &id)?;
            let out = time::command_envelope("template.archive", "ok", serde_json::json!({ "template": t }));
            output::emit(format, &out, |_| print_template(&t));
        }
        TemplateCommand::Delete { id } => {
            delete_template(store, &id)?;
            let out = time::command_envelope("template.delete", "ok", serde_json::json!({ "id": id }));
            output::emit(format, &out, |_| println!("Deleted template {}", id));
        }
        TemplateCommand::Placeholders { id } => {
            let t = get_template(store, &id)?
                .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", id)))?;
            let fields = extract_placeholders(&t.sections);
            let out = time::command_envelope("template.placeholders", "ok", serde_json::json!({ "fields": fields }));
            output::emit(format, &out, |_| {
                for f in &fields {
                    println!("{}", f);
                }
            });
        }
    }
    Ok(())
}
