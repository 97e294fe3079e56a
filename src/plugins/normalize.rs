//! Deterministic formatting of numeric deal facts.
//!
//! Derived fields are computed only from facts present in the raw input.
//! A derived field whose source is absent or unparseable is written back as
//! `{"missing": true}` so it flows into generation as a placeholder.

use crate::core::config::ProspectusConfig;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::time;
use crate::plugins::generation::ValidatedInput;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    pub currency: String,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            currency: "AED".to_string(),
        }
    }
}

impl From<&ProspectusConfig> for NormalizeConfig {
    fn from(config: &ProspectusConfig) -> Self {
        Self {
            currency: config.currency.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct NormalizedInputs {
    pub normalized: JsonValue,
    pub input: ValidatedInput,
    /// Derived fields that could not be computed, sorted.
    pub missing: Vec<String>,
}

pub fn format_int_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Half-even rounding to cents, always printed with two decimals.
fn format_cents(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    rounded.to_string()
}

/// `"AED 1.30 – AED 1.50"`; `None` unless `low < high`.
pub fn format_price_range(currency: &str, low: Decimal, high: Decimal) -> Option<String> {
    (low < high).then(|| format!("{} {} – {} {}", currency, format_cents(low), currency, format_cents(high)))
}

pub fn format_nominal_value(currency: &str, amount: Decimal) -> String {
    format!("{} {}", currency, format_cents(amount))
}

/// Whole percentages print without decimals, fractional ones without trailing zeros.
pub fn format_percent(p: Decimal) -> String {
    if p.fract().is_zero() {
        format!("{}%", p.trunc().normalize())
    } else {
        format!("{}%", p.normalize())
    }
}

fn parse_decimal_text(text: &str) -> Option<Decimal> {
    let cleaned = text.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Numbers, or numeric strings with optional thousands separators.
fn parse_number(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => parse_decimal_text(&n.to_string()),
        JsonValue::String(s) => parse_decimal_text(s),
        _ => None,
    }
}

pub(crate) fn deep_get<'a>(data: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(data, |cur, part| cur.as_object()?.get(part))
}

pub(crate) fn deep_set(data: &mut JsonValue, path: &str, value: JsonValue) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = data;
    for part in &parts[..parts.len() - 1] {
        if !current.is_object() {
            *current = JsonValue::Object(Map::new());
        }
        let Some(obj) = current.as_object_mut() else { return };
        let entry = obj.entry(part.to_string()).or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        current = entry;
    }
    if let Some(obj) = current.as_object_mut() {
        obj.insert(parts[parts.len() - 1].to_string(), value);
    }
}

/// First present source among `paths` (legacy `_aed` keys are accepted).
fn source<'a>(raw: &'a JsonValue, paths: &[&str]) -> Option<&'a JsonValue> {
    paths.iter().find_map(|p| deep_get(raw, p))
}

pub fn normalize_inputs(raw: &JsonValue, config: &NormalizeConfig) -> Result<NormalizedInputs, error::ProspectusError> {
    if !raw.is_object() {
        return Err(error::ProspectusError::ValidationError(
            "raw inputs must be a JSON object".to_string(),
        ));
    }
    if config.currency.trim().is_empty() {
        return Err(error::ProspectusError::ValidationError(
            "currency must not be empty".to_string(),
        ));
    }
    let cur = config.currency.trim();
    let mut normalized = raw.clone();
    let mut derived: Vec<(&str, Option<String>)> = Vec::new();

    deep_set(&mut normalized, "offer.currency", JsonValue::String(cur.to_string()));

    let shares = source(raw, &["offer.offer_shares"])
        .and_then(parse_number)
        .filter(|v| v.is_sign_positive() && !v.is_zero() && v.fract().is_zero())
        .and_then(|v| v.to_u64())
        .map(format_int_commas);
    derived.push(("offer.offer_shares", shares.clone()));
    derived.push(("offer.size", shares));

    let low = source(raw, &["offer.price_range_low", "offer.price_range_low_aed"]).and_then(parse_number);
    let high = source(raw, &["offer.price_range_high", "offer.price_range_high_aed"]).and_then(parse_number);
    let range = match (low, high) {
        (Some(l), Some(h)) => format_price_range(cur, l, h),
        _ => None,
    };
    derived.push(("offer.price_range", range));

    let nominal = source(
        raw,
        &["offer.nominal_value_per_share", "offer.nominal_value_per_share_aed"],
    )
    .and_then(parse_number)
    .map(|v| format_nominal_value(cur, v));
    derived.push(("offer.nominal_value_per_share", nominal));

    let pct = source(raw, &["offer.percentage_offered"])
        .and_then(parse_number)
        .map(format_percent);
    derived.push(("offer.percentage_offered", pct));

    // Spelling out share counts is a drafting decision, never derived.
    derived.push(("offer.offer_shares_words", None));

    let mut missing = BTreeSet::new();
    for (path, value) in derived {
        match value {
            Some(text) => deep_set(&mut normalized, path, JsonValue::String(text)),
            None => {
                missing.insert(path.to_string());
                deep_set(&mut normalized, path, serde_json::json!({ "missing": true }));
            }
        }
    }

    let input = ValidatedInput::from_json(&normalized)?;
    Ok(NormalizedInputs {
        normalized,
        input,
        missing: missing.into_iter().collect(),
    })
}

#[derive(clap::Args, Debug)]
pub struct NormalizeCli {
    /// JSON object with raw deal inputs.
    #[clap(long)]
    pub inputs: PathBuf,
    /// Override the configured currency code.
    #[clap(long)]
    pub currency: Option<String>,
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "normalize",
        "version": "0.1.0",
        "description": "Derive formatted offer fields from raw deal inputs",
        "commands": [
            { "name": "normalize", "parameters": ["inputs", "currency"] }
        ],
        "derived_fields": [
            "offer.offer_shares",
            "offer.size",
            "offer.price_range",
            "offer.nominal_value_per_share",
            "offer.percentage_offered",
            "offer.offer_shares_words"
        ]
    })
}

pub fn run_normalize_cli(
    config: &ProspectusConfig,
    format: OutputFormat,
    cli: NormalizeCli,
) -> Result<(), error::ProspectusError> {
    let body = fs::read_to_string(&cli.inputs).map_err(error::ProspectusError::IoError)?;
    let raw: JsonValue = serde_json::from_str(&body)?;
    let mut cfg = NormalizeConfig::from(config);
    if let Some(currency) = cli.currency {
        cfg.currency = currency;
    }
    let result = normalize_inputs(&raw, &cfg)?;
    let out = time::command_envelope(
        "normalize",
        "ok",
        serde_json::json!({ "normalized": result.normalized, "missing": result.missing }),
    );
    output::emit(format, &out, |_| {
        for (field, value) in result.input.iter() {
            match value {
                crate::plugins::generation::FieldValue::Known(v) => {
                    println!("{} = {}", field, output::compact_line(v, 80))
                }
                crate::plugins::generation::FieldValue::Missing => println!("{} = <missing>", field),
            }
        }
        println!("missing: {}", output::preview_fields(&result.missing, 8));
    });
    Ok(())
}
