use std::ops::Range;
use std::path::{Path, PathBuf};

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

use lexgraph::catalog::{Catalog, build_catalog};
use lexgraph::error::ParseDiagnostic;
use lexgraph::model::standard_catalog;
use lexgraph::schema::parser::parse_schema_diagnostic;
use lexgraph::xml::parse_xml_diagnostic;
use lexgraph::{
    DelintReport, MigrationManager, MigrationReport, ObjectRepository, ProgressEvent, delint,
    load_project_str, save_project,
};

#[derive(Parser)]
#[command(
    name = "lexgraph",
    about = "lexgraph — versioned data migration for lexical project files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate a project file to a newer model version
    Migrate {
        /// Path to the project file
        project: PathBuf,
        /// Target version (defaults to the newest known version)
        #[arg(long)]
        to: Option<u32>,
        /// Run the steps in memory without writing the project or its sibling files
        #[arg(long)]
        dry_run: bool,
        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
        /// Class model to load the project against instead of the bundled one
        #[arg(long)]
        model: Option<PathBuf>,
        /// Folder holding the sibling files (defaults to the project file's directory)
        #[arg(long)]
        project_folder: Option<PathBuf>,
    },
    /// Parse a project file and report its version and pending steps
    Check {
        /// Path to the project file
        project: PathBuf,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Run consistency repair on a project file
    Delint {
        /// Path to the project file
        project: PathBuf,
        /// Report repairs without writing them
        #[arg(long)]
        dry_run: bool,
        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// List the registered migration steps
    Versions {
        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            project,
            to,
            dry_run,
            format,
            model,
            project_folder,
        } => cmd_migrate(
            &project,
            to,
            dry_run,
            &format,
            model.as_deref(),
            project_folder,
        ),
        Commands::Check { project, model } => cmd_check(&project, model.as_deref()),
        Commands::Delint {
            project,
            dry_run,
            format,
            model,
        } => cmd_delint(&project, dry_run, &format, model.as_deref()),
        Commands::Versions { format } => cmd_versions(&format),
    }?;

    Ok(())
}

#[instrument(skip(format, model, project_folder), fields(project = %project_path.display(), dry_run = dry_run))]
fn cmd_migrate(
    project_path: &Path,
    to: Option<u32>,
    dry_run: bool,
    format: &str,
    model: Option<&Path>,
    project_folder: Option<PathBuf>,
) -> Result<()> {
    let mut repo = open_project(project_path, model)?;
    if project_folder.is_some() {
        repo.set_project_folder(project_folder);
    }
    if dry_run {
        // Steps only touch sibling files through the project folder.
        repo.set_project_folder(None);
    }

    let manager = MigrationManager::standard();
    let target = to.unwrap_or_else(|| manager.newest_version());
    let mut progress = |event: ProgressEvent| {
        if let ProgressEvent::StepStarted {
            version,
            index,
            total,
            description,
        } = event
        {
            info!(version, step = index + 1, total, "{}", description);
        }
    };
    let report = manager
        .perform_migration(&mut repo, target, Some(&mut progress))
        .wrap_err_with(|| format!("migration of {} failed", project_path.display()))?;

    render_migration_report(&report, format)?;

    if dry_run {
        info!("dry run; project not written");
    } else if !report.is_noop() {
        save_project(&repo, project_path)
            .wrap_err_with(|| format!("failed to write project: {}", project_path.display()))?;
        info!(version = target, "project migrated");
    }
    Ok(())
}

#[instrument(skip(model), fields(project = %project_path.display()))]
fn cmd_check(project_path: &Path, model: Option<&Path>) -> Result<()> {
    let repo = open_project(project_path, model)?;
    let manager = MigrationManager::standard();
    let current = repo.current_model_version();
    let newest = manager.newest_version();

    println!("Project: {}", project_path.display());
    println!("  Objects: {}", repo.len());
    println!("  Version: {}", current);
    println!("  Newest:  {}", newest);

    if current > newest {
        return Err(eyre!(
            "project version {} is newer than this tool supports ({})",
            current,
            newest
        ));
    }
    let pending: Vec<_> = manager
        .steps()
        .filter(|s| s.version > current)
        .collect();
    if pending.is_empty() {
        println!("Up to date.");
    } else {
        let real = manager.needs_real_migration(current, newest)?;
        println!(
            "  Pending: {} step(s){}",
            pending.len(),
            if real { "" } else { " (version bump only)" }
        );
    }
    Ok(())
}

#[instrument(skip(format, model), fields(project = %project_path.display(), dry_run = dry_run))]
fn cmd_delint(project_path: &Path, dry_run: bool, format: &str, model: Option<&Path>) -> Result<()> {
    let mut repo = open_project(project_path, model)?;
    let report = delint(&mut repo);
    render_delint_report(&report, format)?;

    if !dry_run && !report.is_clean() {
        save_project(&repo, project_path)
            .wrap_err_with(|| format!("failed to write project: {}", project_path.display()))?;
        info!("repaired project written");
    }
    Ok(())
}

fn cmd_versions(format: &str) -> Result<()> {
    let manager = MigrationManager::standard();
    match format {
        "json" => {
            let steps: Vec<_> = manager
                .steps()
                .map(|s| {
                    serde_json::json!({
                        "version": s.version,
                        "description": s.description,
                        "bookkeeping_only": s.bookkeeping_only,
                    })
                })
                .collect();
            let out = serde_json::to_string_pretty(&steps)
                .wrap_err("failed to serialize step list JSON")?;
            println!("{}", out);
        }
        "table" => {
            println!("Oldest supported: {}", manager.oldest_supported_version());
            println!("{:<10} {:<6} {}", "VERSION", "KIND", "DESCRIPTION");
            for step in manager.steps() {
                let kind = if step.bookkeeping_only { "bump" } else { "data" };
                println!("{:<10} {:<6} {}", step.version, kind, step.description);
            }
        }
        other => return Err(eyre!("unknown format: {}", other)),
    }
    Ok(())
}

fn render_migration_report(report: &MigrationReport, format: &str) -> Result<()> {
    match format {
        "json" => {
            let out = serde_json::to_string_pretty(report)
                .wrap_err("failed to serialize migration report JSON")?;
            println!("{}", out);
        }
        "table" => {
            println!("Migration {} -> {}", report.from_version, report.to_version);
            if report.is_noop() {
                println!("No migration steps.");
                return Ok(());
            }
            println!(
                "{:<10} {:>8} {:>8} {:>8}  {}",
                "VERSION", "CREATED", "REMOVED", "MODIFIED", "DESCRIPTION"
            );
            for step in &report.steps {
                println!(
                    "{:<10} {:>8} {:>8} {:>8}  {}",
                    step.version, step.created, step.removed, step.modified, step.description
                );
            }
        }
        other => return Err(eyre!("unknown format: {}", other)),
    }
    Ok(())
}

fn render_delint_report(report: &DelintReport, format: &str) -> Result<()> {
    match format {
        "json" => {
            let out = serde_json::to_string_pretty(report)
                .wrap_err("failed to serialize delint report JSON")?;
            println!("{}", out);
        }
        "table" => {
            if report.is_clean() {
                println!("No problems found.");
                return Ok(());
            }
            println!("Objects removed:   {}", report.removed.len());
            println!("Links removed:     {}", report.links_removed);
            println!("Owners repaired:   {}", report.owners_repaired);
            println!("Empty elements:    {}", report.vacuous_removed);
            for guid in &report.removed {
                println!("- {}", guid);
            }
        }
        other => return Err(eyre!("unknown format: {}", other)),
    }
    Ok(())
}

/// Loads a project, rendering XML syntax errors against the source text.
fn open_project(path: &Path, model: Option<&Path>) -> Result<ObjectRepository> {
    let source = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read project: {}", path.display()))?;
    parse_xml_diagnostic(&source).map_err(|diag| {
        render_parse_diagnostic(path, &source, &diag);
        eyre!("project parse failed")
    })?;

    let catalog = match model {
        Some(model_path) => load_model(model_path)?,
        None => standard_catalog()?,
    };
    let mut repo = load_project_str(&source, catalog)
        .wrap_err_with(|| format!("failed to load project: {}", path.display()))?;
    repo.set_project_folder(path.parent().map(Path::to_path_buf));
    info!(objects = repo.len(), version = repo.current_model_version(), "project loaded");
    Ok(repo)
}

fn load_model(path: &Path) -> Result<Catalog> {
    let source = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read model: {}", path.display()))?;
    let schema = parse_schema_diagnostic(&source).map_err(|diag| {
        render_parse_diagnostic(path, &source, &diag);
        eyre!("model parse failed")
    })?;
    Ok(build_catalog(&schema)?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn normalize_span(span: Option<lexgraph::error::SourceSpan>, source: &str) -> Range<usize> {
    if source.is_empty() {
        return 0..0;
    }
    let len = source.len();
    match span {
        Some(s) => {
            let start = s.start.min(len.saturating_sub(1));
            let end = s.end.max(start.saturating_add(1)).min(len);
            start..end
        }
        None => 0..1.min(len),
    }
}

fn render_parse_diagnostic(path: &Path, source: &str, diag: &ParseDiagnostic) {
    let file_id = path.display().to_string();
    let span = normalize_span(diag.span, source);
    let mut report = Report::build(ReportKind::Error, file_id.clone(), span.start)
        .with_message("parse error")
        .with_label(
            Label::new((file_id.clone(), span.clone()))
                .with_color(Color::Red)
                .with_message(diag.message.clone()),
        );
    if diag.span.is_none() {
        report = report.with_note(diag.message.clone());
    }
    let _ = report
        .finish()
        .eprint((file_id.clone(), Source::from(source)));
}
