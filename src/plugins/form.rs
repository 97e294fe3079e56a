//! Input forms derived from a template.
//!
//! A template's placeholders decide which raw input fields a deal needs.
//! Placeholders filled by normalization (`offer.price_range`, `offer.size`)
//! request the raw fields they are computed from instead of themselves.

use crate::core::config::ProspectusConfig;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::generation::ValidatedInput;
use crate::plugins::normalize;
use crate::plugins::placeholders;
use crate::plugins::templates;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const BUILTIN_SCHEMA_ID: &str = "offer_v1";

/// Derived placeholder to the raw paths normalization reads for it.
pub const DERIVED_PLACEHOLDER_DEPENDENCIES: &[(&str, &[&str])] = &[
    ("offer.price_range", &["offer.price_range_low", "offer.price_range_high"]),
    ("offer.size", &["offer.offer_shares"]),
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Number,
    List,
}

impl FieldType {
    fn empty_value(&self) -> JsonValue {
        match self {
            FieldType::Text => JsonValue::String(String::new()),
            FieldType::List => JsonValue::Array(Vec::new()),
            FieldType::Integer | FieldType::Number => JsonValue::Null,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> FieldType {
    FieldType::Text
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InputSchema {
    pub schema_id: String,
    pub fields: Vec<FieldSpec>,
}

const BUILTIN_FIELDS: &[(&str, &str, FieldType, bool)] = &[
    ("issuer.name", "Issuer name", FieldType::Text, true),
    ("offer.offer_shares", "Offer shares", FieldType::Integer, true),
    ("offer.percentage_offered", "Percentage offered", FieldType::Number, true),
    ("offer.nominal_value_per_share", "Nominal value per share", FieldType::Number, true),
    ("offer.price_range_low", "Price range low", FieldType::Number, true),
    ("offer.price_range_high", "Price range high", FieldType::Number, true),
    ("key_dates", "Key dates", FieldType::Text, false),
    ("business_description", "Business description", FieldType::Text, false),
    ("risk_factors", "Risk factors", FieldType::List, false),
    ("tranche_1.min_subscription", "Tranche 1 minimum subscription", FieldType::Number, false),
    ("tranche_1.increment", "Tranche 1 increment", FieldType::Number, false),
    ("tranche_2.min_subscription", "Tranche 2 minimum subscription", FieldType::Number, false),
];

impl InputSchema {
    pub fn builtin() -> Self {
        Self {
            schema_id: BUILTIN_SCHEMA_ID.to_string(),
            fields: BUILTIN_FIELDS
                .iter()
                .map(|(path, label, field_type, required)| FieldSpec {
                    path: path.to_string(),
                    label: Some(label.to_string()),
                    field_type: *field_type,
                    required: *required,
                })
                .collect(),
        }
    }

    pub fn from_json(value: &JsonValue) -> Result<Self, error::ProspectusError> {
        let schema: InputSchema = serde_json::from_value(value.clone())?;
        if schema.schema_id.trim().is_empty() {
            return Err(error::ProspectusError::ValidationError(
                "schema_id must not be empty".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for field in &schema.fields {
            if !placeholders::is_valid_field_name(&field.path) {
                return Err(error::ProspectusError::ValidationError(format!(
                    "Invalid field path '{}'",
                    field.path
                )));
            }
            if !seen.insert(field.path.as_str()) {
                return Err(error::ProspectusError::ValidationError(format!(
                    "Duplicate field path '{}'",
                    field.path
                )));
            }
        }
        Ok(schema)
    }

    /// `None` means the built-in schema.
    pub fn load(path: Option<&Path>) -> Result<Self, error::ProspectusError> {
        match path {
            None => Ok(Self::builtin()),
            Some(p) => {
                let body = fs::read_to_string(p).map_err(error::ProspectusError::IoError)?;
                Self::from_json(&serde_json::from_str(&body)?)
            }
        }
    }

    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.path == path)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    pub schema_id: String,
    /// Placeholders of the template the form was built for.
    pub placeholders: Vec<String>,
    /// Requested fields in schema order.
    pub fields: Vec<FieldSpec>,
    pub requested_paths: Vec<String>,
    pub required_paths: Vec<String>,
}

fn derived_dependencies(placeholder: &str) -> &'static [&'static str] {
    DERIVED_PLACEHOLDER_DEPENDENCIES
        .iter()
        .find(|(p, _)| *p == placeholder)
        .map(|(_, deps)| *deps)
        .unwrap_or(&[])
}

/// Fields a template with `template_placeholders` needs from `schema`.
/// Placeholders neither in the schema nor derived request nothing.
pub fn build_form_spec(template_placeholders: &[String], schema: &InputSchema) -> FormSpec {
    let mut requested: BTreeSet<String> = BTreeSet::new();
    for placeholder in template_placeholders {
        if schema.field(placeholder).is_some() {
            requested.insert(placeholder.clone());
            continue;
        }
        requested.extend(derived_dependencies(placeholder).iter().map(|p| p.to_string()));
    }
    let fields: Vec<FieldSpec> = schema
        .fields
        .iter()
        .filter(|f| requested.contains(&f.path))
        .cloned()
        .collect();
    let required: BTreeSet<String> = fields.iter().filter(|f| f.required).map(|f| f.path.clone()).collect();
    let mut placeholders: Vec<String> = template_placeholders.to_vec();
    placeholders.sort();
    placeholders.dedup();
    FormSpec {
        schema_id: schema.schema_id.clone(),
        placeholders,
        fields,
        requested_paths: requested.into_iter().collect(),
        required_paths: required.into_iter().collect(),
    }
}

/// Form spec for the current version of a template.
pub fn template_form_spec(
    store: &Store,
    template_id: &str,
    schema: &InputSchema,
) -> Result<FormSpec, error::ProspectusError> {
    let template = templates::get_template(store, template_id)?
        .ok_or_else(|| error::ProspectusError::NotFound(format!("Template {} not found", template_id)))?;
    Ok(build_form_spec(&templates::extract_placeholders(&template.sections), schema))
}

/// Nested raw inputs from flat `path -> value` entries. Every schema field is
/// present; unset ones get their type's empty value. List fields accept a
/// newline-separated string.
pub fn build_raw_inputs(
    schema: &InputSchema,
    field_values: &Map<String, JsonValue>,
) -> Result<JsonValue, error::ProspectusError> {
    for key in field_values.keys() {
        if schema.field(key).is_none() {
            return Err(error::ProspectusError::ValidationError(format!(
                "Field '{}' is not part of schema {}",
                key, schema.schema_id
            )));
        }
    }
    let mut payload = JsonValue::Object(Map::new());
    payload["schema_id"] = JsonValue::String(schema.schema_id.clone());
    for field in &schema.fields {
        let value = match (field.field_type, field_values.get(&field.path)) {
            (FieldType::List, Some(JsonValue::String(text))) => JsonValue::Array(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| JsonValue::String(l.to_string()))
                    .collect(),
            ),
            (_, Some(v)) => v.clone(),
            (t, None) => t.empty_value(),
        };
        normalize::deep_set(&mut payload, &field.path, value);
    }
    Ok(payload)
}

/// Template placeholders with no usable value, sorted.
pub fn find_unresolved_placeholders(template_placeholders: &[String], input: &ValidatedInput) -> Vec<String> {
    let unresolved: BTreeSet<String> = template_placeholders
        .iter()
        .filter(|p| input.resolve(p).is_none())
        .cloned()
        .collect();
    unresolved.into_iter().collect()
}

/// One message per required path that has neither a resolved value nor a
/// non-blank raw value.
pub fn validate_required_paths(required_paths: &[String], raw: &JsonValue, input: &ValidatedInput) -> Vec<String> {
    let mut errors = Vec::new();
    for path in required_paths {
        if input.resolve(path).is_some() {
            continue;
        }
        let present = match normalize::deep_get(raw, path) {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::String(s)) => !s.trim().is_empty() && !placeholders::is_missing_value(s),
            Some(_) => true,
        };
        if !present {
            errors.push(format!("{} is required.", path));
        }
    }
    errors
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FormCheck {
    pub template_id: String,
    pub schema_id: String,
    pub errors: Vec<String>,
    pub unresolved: Vec<String>,
}

#[derive(Parser, Debug)]
#[clap(name = "form", about = "Input forms derived from template placeholders.")]
pub struct FormCli {
    #[clap(subcommand)]
    pub command: FormCommand,
}

#[derive(Subcommand, Debug)]
pub enum FormCommand {
    /// Show the fields a template needs.
    Spec {
        #[clap(long)]
        template: String,
        /// JSON input schema (defaults to the built-in offer schema).
        #[clap(long)]
        schema: Option<PathBuf>,
    },
    /// Expand flat `path -> value` JSON into nested raw inputs.
    Fill {
        /// JSON object keyed by dotted field path.
        #[clap(long)]
        values: PathBuf,
        #[clap(long)]
        schema: Option<PathBuf>,
    },
    /// Check raw inputs against a template's required fields.
    Check {
        #[clap(long)]
        template: String,
        /// JSON object with raw deal inputs.
        #[clap(long)]
        inputs: PathBuf,
        #[clap(long)]
        schema: Option<PathBuf>,
    },
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "form",
        "version": "0.1.0",
        "description": "Template-driven input forms and required-field checks",
        "commands": [
            { "name": "spec", "parameters": ["template", "schema"] },
            { "name": "fill", "parameters": ["values", "schema"] },
            { "name": "check", "parameters": ["template", "inputs", "schema"] }
        ],
        "builtin_schema": BUILTIN_SCHEMA_ID,
        "derived_placeholders": DERIVED_PLACEHOLDER_DEPENDENCIES
            .iter()
            .map(|(p, deps)| (p.to_string(), deps.to_vec()))
            .collect::<BTreeMap<_, _>>()
    })
}

fn read_json(path: &Path) -> Result<JsonValue, error::ProspectusError> {
    let body = fs::read_to_string(path).map_err(error::ProspectusError::IoError)?;
    Ok(serde_json::from_str(&body)?)
}

pub fn run_form_cli(
    store: &Store,
    config: &ProspectusConfig,
    format: OutputFormat,
    cli: FormCli,
) -> Result<(), error::ProspectusError> {
    match cli.command {
        FormCommand::Spec { template, schema } => {
            let input_schema = InputSchema::load(schema.as_deref())?;
            let spec = template_form_spec(store, &template, &input_schema)?;
            let out = time::command_envelope("form.spec", "ok", serde_json::json!({ "form": spec }));
            output::emit(format, &out, |_| {
                use colored::Colorize;
                println!("schema {} for template {}", spec.schema_id.bright_cyan(), template);
                for f in &spec.fields {
                    let marker = if f.required { "*".bright_red() } else { " ".normal() };
                    println!(
                        "{} {} ({:?}) {}",
                        marker,
                        f.path,
                        f.field_type,
                        f.label.as_deref().unwrap_or("")
                    );
                }
                if spec.fields.is_empty() {
                    println!("No schema fields requested.");
                }
            });
        }
        FormCommand::Fill { values, schema } => {
            let input_schema = InputSchema::load(schema.as_deref())?;
            let flat = read_json(&values)?;
            let flat = flat.as_object().ok_or_else(|| {
                error::ProspectusError::ValidationError("values must be a JSON object".to_string())
            })?;
            let raw = build_raw_inputs(&input_schema, flat)?;
            let out = time::command_envelope("form.fill", "ok", serde_json::json!({ "inputs": raw }));
            output::emit(format, &out, |_| {
                println!("{}", serde_json::to_string_pretty(&raw).unwrap_or_default());
            });
        }
        FormCommand::Check {
            template,
            inputs,
            schema,
        } => {
            let input_schema = InputSchema::load(schema.as_deref())?;
            let spec = template_form_spec(store, &template, &input_schema)?;
            let raw = read_json(&inputs)?;
            let normalized = normalize::normalize_inputs(&raw, &normalize::NormalizeConfig::from(config))?;
            let check = FormCheck {
                template_id: template,
                schema_id: spec.schema_id.clone(),
                errors: validate_required_paths(&spec.required_paths, &raw, &normalized.input),
                unresolved: find_unresolved_placeholders(&spec.placeholders, &normalized.input),
            };
            let status = if check.errors.is_empty() { "ok" } else { "incomplete" };
            let out = time::command_envelope("form.check", status, serde_json::json!({ "check": check }));
            output::emit(format, &out, |_| {
                use colored::Colorize;
                for e in &check.errors {
                    println!("{} {}", "✗".bright_red(), e);
                }
                if check.errors.is_empty() {
                    println!("{} required fields present", "✓".bright_green());
                }
                println!("unresolved: {}", output::preview_fields(&check.unresolved, 8));
            });
        }
    }
    Ok(())
}
