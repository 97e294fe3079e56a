//! Prospectus: versioned document lifecycle and fact-safe generation.
//!
//! Prospectus keeps uploaded source documents as immutable, lockable
//! versions, manages prospectus templates with copy-on-write history and
//! generates draft artifacts from a locked version, a template snapshot and
//! validated inputs. Generation never invents a fact: anything unknown is
//! rendered as `[[MISSING: field]]` and listed on the run.
//!
//! # Architecture
//!
//! All state lives under `<project>/.prospectus/data/`:
//! - `prospectus.db`: SQLite (WAL) with versions, templates, runs, profiles and analyses
//! - `blobs/`: document content, content-addressed by sha256
//! - `broker.events.jsonl`: one audit event per state access
//!
//! Every state access goes through `DbBroker`, which serializes connections
//! in-process and writes the audit trail.
//!
//! ## Subsystems (Plugins)
//!
//! - `versions`: document versions with irreversible locking
//! - `templates`: template registry with append-only versions
//! - `generation`: generation runs over a frozen template snapshot
//! - `normalize`: deterministic formatting of numeric deal facts
//! - `profiles`: saved input sets per document lineage
//! - `form`: template-driven input forms and required-field checks
//! - `analysis`: deal-specific vs boilerplate classification of version text
//!
//! # Examples
//!
//! ```bash
//! prospectus init
//! prospectus doc upload --document ipo-2026 ./draft.docx
//! prospectus doc lock <version-id>
//! prospectus template create --name "Offer summary" --sections sections.json
//! prospectus generate --template <template-id> --version <version-id> --inputs deal.json
//! ```

pub mod core;
pub mod plugins;
mod subsystems;

use crate::core::{
    broker,
    config::{self, ProspectusConfig},
    error,
    output::{self, OutputFormat},
    store::{self, Store},
    time,
};
use crate::plugins::{analysis, form, generation, normalize, profiles, templates, versions};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "prospectus",
    version = env!("CARGO_PKG_VERSION"),
    about = "Versioned prospectus documents, templates and fact-safe generation"
)]
struct Cli {
    /// Project directory (defaults to the nearest ancestor containing `.prospectus/`).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct InitCli {
    /// Directory to initialize (defaults to `--root` or the current directory).
    #[clap(short, long)]
    dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct AuditCli {
    /// Only events whose operation starts with this prefix (e.g. `versions.`).
    #[clap(long)]
    op: Option<String>,
    /// Show at most the last N events.
    #[clap(long)]
    limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `.prospectus/` with config and an initialized store.
    Init(InitCli),
    /// Document versions: upload, lock, inspect.
    Doc(versions::DocCli),
    /// Template registry.
    Template(templates::TemplateCli),
    /// Generate an artifact from a locked version and a template.
    Generate(generation::GenerateCli),
    /// Inspect generation runs.
    Run(generation::RunCli),
    /// Normalize raw deal inputs without generating.
    Normalize(normalize::NormalizeCli),
    /// Saved deal input profiles.
    Profile(profiles::ProfileCli),
    /// Input forms derived from a template's placeholders.
    Form(form::FormCli),
    /// Classify a version's text into deal-specific and boilerplate blocks.
    Analysis(analysis::AnalysisCli),
    /// Show the state access audit log.
    Audit(AuditCli),
    /// Print machine-readable command schemas for every subsystem.
    Schema,
    /// Print the version.
    Version,
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init(_) => "init",
        Command::Doc(_) => "doc",
        Command::Template(_) => "template",
        Command::Generate(_) => "generate",
        Command::Run(_) => "run",
        Command::Normalize(_) => "normalize",
        Command::Profile(_) => "profile",
        Command::Form(_) => "form",
        Command::Analysis(_) => "analysis",
        Command::Audit(_) => "audit",
        Command::Schema => "schema",
        Command::Version => "version",
    }
}

/// Project directory for commands that operate on an existing workspace.
fn resolve_project_root(root: Option<PathBuf>) -> Result<PathBuf, error::ProspectusError> {
    match root {
        Some(r) => Ok(r),
        None => {
            let current_dir = std::env::current_dir()?;
            store::find_project_root(&current_dir)
        }
    }
}

fn open_project(root: Option<PathBuf>) -> Result<(Store, ProspectusConfig), error::ProspectusError> {
    let project_root = resolve_project_root(root)?;
    let cfg = config::load_config(&project_root)?;
    let store = Store::for_project(&project_root).with_actor(&cfg.actor);
    Ok((store, cfg))
}

fn init_project(dir: &Path, format: OutputFormat) -> Result<(), error::ProspectusError> {
    std::fs::create_dir_all(dir)?;
    let target_dir = std::fs::canonicalize(dir)?;
    config::write_default_config(&target_dir)?;
    let cfg = config::load_config(&target_dir)?;
    let store = Store::for_project(&target_dir).with_actor(&cfg.actor);
    store.ensure_dirs()?;
    let initialized = subsystems::initialize_all_dbs(&store.root)?;

    let out = time::command_envelope(
        "init",
        "ok",
        serde_json::json!({
            "project_root": target_dir,
            "store_root": store.root,
            "subsystems": initialized,
        }),
    );
    output::emit(format, &out, |_| {
        use colored::Colorize;
        println!("{} Initialized Prospectus in {}", "✓".bright_green(), target_dir.display());
        println!("  store: {}", store.root.display());
        println!("  subsystems: {}", initialized.join(", "));
    });
    Ok(())
}

fn print_audit(format: OutputFormat, store: &Store, cli: AuditCli) -> Result<(), error::ProspectusError> {
    let events = broker::read_audit_log(&store.root, cli.op.as_deref(), cli.limit)?;
    let out = time::command_envelope("audit", "ok", serde_json::json!({ "events": events }));
    output::emit(format, &out, |_| {
        use colored::Colorize;
        for ev in &events {
            let status = if ev.status == "success" {
                ev.status.bright_green()
            } else {
                ev.status.bright_red()
            };
            println!("{} {} {} {} [{}]", ev.ts, ev.actor, ev.op, ev.db_id, status);
        }
        if events.is_empty() {
            println!("No audit events.");
        }
    });
    Ok(())
}

fn all_schemas() -> serde_json::Value {
    serde_json::json!({
        "broker": broker::schema(),
        "doc": versions::schema(),
        "template": templates::schema(),
        "generation": generation::schema(),
        "normalize": normalize::schema(),
        "profile": profiles::schema(),
        "form": form::schema(),
        "analysis": analysis::schema(),
    })
}

fn dispatch(root: Option<PathBuf>, format: OutputFormat, command: Command) -> Result<(), error::ProspectusError> {
    match command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Schema => {
            output::emit(OutputFormat::Json, &all_schemas(), |_| {});
            Ok(())
        }
        Command::Init(init) => {
            let dir = match init.dir.or(root) {
                Some(d) => d,
                None => std::env::current_dir()?,
            };
            init_project(&dir, format)
        }
        Command::Normalize(cli) => {
            // Works without a project; config comes from the project when one is found.
            let cfg = match resolve_project_root(root) {
                Ok(p) => config::load_config(&p)?,
                Err(error::ProspectusError::NotFound(_)) => ProspectusConfig::default(),
                Err(e) => return Err(e),
            };
            normalize::run_normalize_cli(&cfg, format, cli)
        }
        other => {
            let (store, cfg) = open_project(root)?;
            store.ensure_dirs()?;
            match other {
                Command::Doc(cli) => versions::run_doc_cli(&store, format, cli),
                Command::Template(cli) => templates::run_template_cli(&store, format, cli),
                Command::Generate(cli) => generation::run_generate_cli(&store, &cfg, format, cli),
                Command::Run(cli) => generation::run_run_cli(&store, format, cli),
                Command::Profile(cli) => profiles::run_profile_cli(&store, &cfg, format, cli),
                Command::Form(cli) => form::run_form_cli(&store, &cfg, format, cli),
                Command::Analysis(cli) => analysis::run_analysis_cli(&store, &cfg, format, cli),
                Command::Audit(cli) => print_audit(format, &store, cli),
                Command::Init(_)
                | Command::Normalize(_)
                | Command::Schema
                | Command::Version => Ok(()),
            }
        }
    }
}

pub fn run() -> Result<(), error::ProspectusError> {
    let cli = Cli::parse();
    let format = cli.format;
    let cmd = command_name(&cli.command);
    let result = dispatch(cli.root, format, cli.command);
    if let (Err(e), OutputFormat::Json) = (&result, format) {
        output::emit(format, &time::error_envelope(cmd, e), |_| {});
    }
    result
}
