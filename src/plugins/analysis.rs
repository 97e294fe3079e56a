//! Block analysis of a version's text content.
//!
//! Each paragraph (and each cell of a `|`-delimited table row) is classified
//! as `deal_specific`, `boilerplate` or `mixed` from deal signals (issuer
//! name, share count, percentages, currency amounts, grouped integers, dates,
//! offer keywords) and boilerplate signals (legal headings, long low-numeric
//! text). Analyses are stored per version; the latest one wins.

use crate::core::broker::DbBroker;
use crate::core::config::ProspectusConfig;
use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::normalize;
use crate::plugins::versions;
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

const LEGAL_HEADINGS: &[&str] = &[
    "selling restrictions",
    "definitions",
    "forward-looking statements",
    "general information",
];

const DEAL_KEYWORDS: &[&str] = &[
    "nominal value",
    "offer price range",
    "offer shares",
    "offered",
    "subscription",
    "price range",
];

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?%").expect("percent pattern is valid"));

static COMMA_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})+\b").expect("grouped integer pattern is valid"));

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}\s+[A-Za-z]+\s+\d{4}\b").expect("date pattern is valid"));

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

static NUMERIC_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:[.,]\d+)?%?").expect("numeric token pattern is valid"));

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break pattern is valid"));

fn currency_amount_re(currency: &str) -> Result<Regex, error::ProspectusError> {
    Regex::new(&format!(r"(?i)\b{}\s+\d+(?:,\d{{3}})*(?:\.\d+)?\b", regex::escape(currency)))
        .map_err(|e| error::ProspectusError::ValidationError(format!("Invalid currency '{}': {}", currency, e)))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Boilerplate,
    DealSpecific,
    Mixed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Paragraph,
    TableCell,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockSignals {
    pub deal_indicators: Vec<String>,
    pub boilerplate_indicators: Vec<String>,
    pub numeric_density: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalyzedBlock {
    pub block_id: String,
    pub block_type: BlockType,
    pub text: String,
    pub heading_level_guess: Option<u8>,
    pub location_path: String,
    pub classification: Classification,
    pub signals: BlockSignals,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockCounts {
    pub boilerplate: usize,
    pub deal_specific: usize,
    pub mixed: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProspectusAnalysis {
    pub id: String,
    pub version_id: String,
    pub total_blocks: usize,
    pub counts: BlockCounts,
    pub summary: String,
    pub blocks: Vec<AnalyzedBlock>,
    pub created_at: String,
}

/// Known deal facts that sharpen classification.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub issuer_name: Option<String>,
    pub offer_shares: Option<u64>,
    pub currency: String,
}

impl From<&ProspectusConfig> for AnalysisOptions {
    fn from(config: &ProspectusConfig) -> Self {
        Self {
            issuer_name: None,
            offer_shares: None,
            currency: config.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TextBlock {
    block_type: BlockType,
    text: String,
    heading_level_guess: Option<u8>,
    location_path: String,
}

fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Markdown-style `#` headings; the level is the number of leading hashes.
fn guess_heading_level(paragraph: &str) -> Option<u8> {
    let hashes = paragraph.chars().take_while(|c| *c == '#').count();
    let rest = &paragraph[hashes..];
    (hashes > 0 && hashes <= 6 && rest.starts_with(' ')).then_some(hashes as u8)
}

fn is_table(paragraph: &str) -> bool {
    paragraph.lines().all(|l| l.trim_start().starts_with('|'))
}

fn is_separator_row(row: &str) -> bool {
    row.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn split_blocks(content: &str) -> Vec<TextBlock> {
    let content = content.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    for (p_index, paragraph) in PARAGRAPH_BREAK_RE.split(&content).enumerate() {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if is_table(paragraph) {
            let rows = paragraph.lines().map(str::trim).filter(|r| !is_separator_row(r));
            for (r_index, row) in rows.enumerate() {
                let cells = row.trim_matches('|').split('|');
                for (c_index, cell) in cells.enumerate() {
                    let text = normalize_space(cell);
                    if text.is_empty() {
                        continue;
                    }
                    blocks.push(TextBlock {
                        block_type: BlockType::TableCell,
                        text,
                        heading_level_guess: None,
                        location_path: format!("document/tables/{}/rows/{}/cells/{}", p_index, r_index, c_index),
                    });
                }
            }
            continue;
        }
        let heading = guess_heading_level(paragraph);
        let body = match heading {
            Some(level) => &paragraph[level as usize..],
            None => paragraph,
        };
        blocks.push(TextBlock {
            block_type: BlockType::Paragraph,
            text: normalize_space(body),
            heading_level_guess: heading,
            location_path: format!("document/paragraphs/{}", p_index),
        });
    }
    blocks
}

fn classify_block(text: &str, options: &AnalysisOptions, currency_re: &Regex) -> (Classification, BlockSignals) {
    let lowered = text.to_lowercase();
    let mut deal: BTreeSet<&str> = BTreeSet::new();
    let mut boilerplate: BTreeSet<&str> = BTreeSet::new();

    if let Some(issuer) = options.issuer_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if text.contains(issuer) {
            deal.insert("issuer_name_exact");
        } else if lowered.contains(&issuer.to_lowercase()) {
            deal.insert("issuer_name_casefold");
        }
    }
    if let Some(shares) = options.offer_shares.filter(|n| *n > 0)
        && text.contains(&normalize::format_int_commas(shares))
    {
        deal.insert("offer_shares");
    }
    if PERCENT_RE.is_match(text) {
        deal.insert("percentage");
    }
    if currency_re.is_match(text) {
        deal.insert("currency_amount");
    }
    if COMMA_INT_RE.is_match(text) {
        deal.insert("comma_integer");
    }
    if DATE_RE.is_match(text) {
        deal.insert("date");
    }
    if DEAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        deal.insert("deal_keyword");
    }
    if LEGAL_HEADINGS.iter().any(|h| lowered.contains(h)) {
        boilerplate.insert("legal_heading");
    }

    let tokens = WORD_RE.find_iter(text).count();
    let numeric = NUMERIC_TOKEN_RE.find_iter(text).count();
    let density = if tokens == 0 { 0.0 } else { numeric as f64 / tokens as f64 };
    if tokens > 30 && density < 0.05 {
        boilerplate.insert("dense_legal_low_numeric");
    }

    let classification = match (deal.is_empty(), boilerplate.is_empty()) {
        (false, false) => Classification::Mixed,
        (false, true) => Classification::DealSpecific,
        (true, _) => Classification::Boilerplate,
    };
    let signals = BlockSignals {
        deal_indicators: deal.into_iter().map(String::from).collect(),
        boilerplate_indicators: boilerplate.into_iter().map(String::from).collect(),
        numeric_density: (density * 10_000.0).round() / 10_000.0,
    };
    (classification, signals)
}

/// Classify every block of `content`. The result is not persisted.
pub fn analyze_text(
    version_id: &str,
    content: &str,
    options: &AnalysisOptions,
) -> Result<ProspectusAnalysis, error::ProspectusError> {
    let currency_re = currency_amount_re(options.currency.trim())?;
    let mut counts = BlockCounts::default();
    let mut blocks = Vec::new();
    for (index, block) in split_blocks(content).into_iter().enumerate() {
        let (classification, signals) = classify_block(&block.text, options, &currency_re);
        match classification {
            Classification::Boilerplate => counts.boilerplate += 1,
            Classification::DealSpecific => counts.deal_specific += 1,
            Classification::Mixed => counts.mixed += 1,
        }
        let prefix = match block.block_type {
            BlockType::Paragraph => "p",
            BlockType::TableCell => "c",
        };
        blocks.push(AnalyzedBlock {
            block_id: format!("{}-{}", prefix, index),
            block_type: block.block_type,
            text: block.text,
            heading_level_guess: block.heading_level_guess,
            location_path: block.location_path,
            classification,
            signals,
        });
    }
    let summary = format!(
        "Prospectus analysis completed: {} boilerplate blocks, {} deal-specific blocks, {} mixed blocks.",
        counts.boilerplate, counts.deal_specific, counts.mixed
    );
    Ok(ProspectusAnalysis {
        id: ulid::Ulid::new().to_string(),
        version_id: version_id.to_string(),
        total_blocks: blocks.len(),
        counts,
        summary,
        blocks,
        created_at: time::now_epoch_z(),
    })
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), error::ProspectusError> {
    conn.execute(schemas::ANALYSIS_DB_SCHEMA, [])?;
    conn.execute(schemas::ANALYSIS_DB_SCHEMA_INDEX, [])?;
    Ok(())
}

pub fn initialize_analysis_db(root: &Path) -> Result<(), error::ProspectusError> {
    let broker = DbBroker::new(root);
    broker.with_conn(&db::prospectus_db_path(root), "prospectus", "analysis.init", |conn| {
        ensure_schema(conn)
    })
}

/// Analyze a version's content and store the result. Content must be UTF-8 text.
pub fn analyze_version(
    store: &Store,
    version_id: &str,
    options: &AnalysisOptions,
) -> Result<ProspectusAnalysis, error::ProspectusError> {
    let bytes = versions::read_content(store, version_id)?;
    let content = String::from_utf8(bytes).map_err(|_| {
        error::ProspectusError::ValidationError(format!(
            "Version {} is not UTF-8 text and cannot be analyzed",
            version_id
        ))
    })?;
    let analysis = analyze_text(version_id, &content, options)?;

    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "analysis.save", |conn| {
        ensure_schema(conn)?;
        conn.execute(
            "INSERT INTO prospectus_analyses(id, version_id, analysis, created_at) VALUES(?1, ?2, ?3, ?4)",
            params![
                analysis.id,
                analysis.version_id,
                serde_json::to_string(&analysis)?,
                analysis.created_at
            ],
        )?;
        Ok(())
    })?;
    Ok(analysis)
}

pub fn get_latest_analysis(
    store: &Store,
    version_id: &str,
) -> Result<Option<ProspectusAnalysis>, error::ProspectusError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&db::prospectus_db_path(&store.root), &store.actor, "analysis.latest", |conn| {
        ensure_schema(conn)?;
        let analysis = conn
            .query_row(
                "SELECT analysis FROM prospectus_analyses WHERE version_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![version_id],
                |row| {
                    let body: String = row.get(0)?;
                    serde_json::from_str::<ProspectusAnalysis>(&body)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
                },
            )
            .optional()?;
        Ok(analysis)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "analysis", about = "Classify a version's text into deal-specific and boilerplate blocks.")]
pub struct AnalysisCli {
    #[clap(subcommand)]
    pub command: AnalysisCommand,
}

#[derive(Subcommand, Debug)]
pub enum AnalysisCommand {
    /// Analyze a version and store the result.
    Run {
        version_id: String,
        /// Issuer name to look for.
        #[clap(long)]
        issuer: Option<String>,
        /// Offer share count to look for (matched with thousands separators).
        #[clap(long)]
        offer_shares: Option<u64>,
        /// Print every block, not only the summary.
        #[clap(long)]
        blocks: bool,
    },
    /// Show the latest stored analysis of a version.
    Latest {
        version_id: String,
        #[clap(long)]
        blocks: bool,
    },
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "analysis",
        "version": "0.1.0",
        "description": "Deal-specific vs boilerplate classification of version text",
        "commands": [
            { "name": "run", "parameters": ["version_id", "issuer", "offer_shares", "blocks"] },
            { "name": "latest", "parameters": ["version_id", "blocks"] }
        ],
        "classifications": ["boilerplate", "deal_specific", "mixed"],
        "storage": [schemas::PROSPECTUS_DB_NAME]
    })
}

fn print_analysis(a: &ProspectusAnalysis, with_blocks: bool) {
    use colored::Colorize;
    println!("{} version {} at {}", a.id, a.version_id.bright_cyan(), a.created_at);
    println!("  {}", a.summary);
    if with_blocks {
        for b in &a.blocks {
            let label = match b.classification {
                Classification::DealSpecific => "deal".bright_yellow(),
                Classification::Mixed => "mixed".bright_magenta(),
                Classification::Boilerplate => "boiler".normal(),
            };
            println!("  {:<6} {:<8} {}", b.block_id, label, output::compact_line(&b.text, 80));
        }
    }
}

pub fn run_analysis_cli(
    store: &Store,
    config: &ProspectusConfig,
    format: OutputFormat,
    cli: AnalysisCli,
) -> Result<(), error::ProspectusError> {
    match cli.command {
        AnalysisCommand::Run {
            version_id,
            issuer,
            offer_shares,
            blocks,
        } => {
            let options = AnalysisOptions {
                issuer_name: issuer,
                offer_shares,
                ..AnalysisOptions::from(config)
            };
            let a = analyze_version(store, &version_id, &options)?;
            let out = time::command_envelope("analysis.run", "ok", serde_json::json!({ "analysis": a }));
            output::emit(format, &out, |_| print_analysis(&a, blocks));
        }
        AnalysisCommand::Latest { version_id, blocks } => {
            let a = get_latest_analysis(store, &version_id)?;
            let status = if a.is_some() { "ok" } else { "not_found" };
            let out = time::command_envelope("analysis.latest", status, serde_json::json!({ "analysis": a }));
            output::emit(format, &out, |_| match &a {
                Some(a) => print_analysis(a, blocks),
                None => println!("No analysis for version {}.", version_id),
            });
        }
    }
    Ok(())
}
