//! hr-sheet-import: CLI entry point.
//!
//! Imports employee registry, payroll and overtime spreadsheets into the
//! record store.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use hr_sheet_import::cache::RegistrationCache;
use hr_sheet_import::config::{Config, DEFAULT_CONFIG_FILE};
use hr_sheet_import::conflict::{ConfirmOutcome, MAX_ATTEMPTS};
use hr_sheet_import::excel;
use hr_sheet_import::pipeline::{ImportOutcome, ImportSession, Level, LoadedSheet, MessageLog};
use hr_sheet_import::store::RecordStore;
use hr_sheet_import::transform;
use hr_sheet_import::types::{ImportConflict, RowError, SheetKind};
use hr_sheet_import::validate;

#[derive(Parser)]
#[command(name = "hr-sheet-import")]
#[command(about = "Import HR registry, payroll and overtime spreadsheets")]
#[command(version)]
struct Cli {
    /// Config file (store URL/key, session user and password hash).
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a sheet and upload it to the store.
    Import {
        kind: SheetKind,
        file: PathBuf,
        /// Deletion password for a period conflict (prompted when absent).
        #[arg(long)]
        password: Option<String>,
    },
    /// Read and validate a sheet offline; nothing is sent.
    Check { kind: SheetKind, file: PathBuf },
    /// Write an empty template with the required headers.
    Template {
        kind: SheetKind,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let ok = match cli.command {
        Command::Template { kind, out } => write_template(kind, out)?,
        Command::Check { kind, file } => check(kind, &file)?,
        Command::Import { kind, file, password } => {
            let config = Config::from_file_and_env(&cli.config)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(import(&config, kind, &file, password))?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    Ok((name, bytes))
}

fn write_template(kind: SheetKind, out: Option<PathBuf>) -> anyhow::Result<bool> {
    let path = out.unwrap_or_else(|| PathBuf::from(kind.template_file_name()));
    excel::write_template(kind, &path).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} {} ({})", "✓".green(), path.display(), kind);
    println!("  {}", excel::template_headers(kind).join(", ").dimmed());
    Ok(true)
}

fn check(kind: SheetKind, file: &Path) -> anyhow::Result<bool> {
    let (name, bytes) = read_file(file)?;
    let transformed = match excel::read_source(&name, &bytes).and_then(|source| transform::transform(kind, &source)) {
        Ok(transformed) => transformed,
        Err(err) => {
            println!("  {} {}", "✗".red(), err.to_string().red());
            return Ok(false);
        }
    };

    println!("{}", format!("{name} ({kind})").bold());
    println!("  Layout: {}", transformed.strategy);
    println!("  Rows: {}", transformed.rows.len());
    if let Some(label) = transformed.meta.label() {
        println!("  Empresa: {label}");
    }
    if let Some(competence) = &transformed.meta.competence {
        println!("  Competencia: {competence}");
    }

    let errors = validate::collect_row_errors(&transformed.rows);
    print_row_errors(&errors);
    let blocked = validate::blocks_import(kind, &errors);
    if blocked {
        println!("  {} {} linha(s) com erro bloqueiam a importacao", "✗".red(), errors.len());
    } else {
        println!("  {} pronto para importar", "✓".green());
    }
    Ok(!blocked)
}

fn print_row_errors(errors: &[RowError]) {
    for error in errors {
        println!("  {} linha {}: {}", "!".yellow(), error.row_index, error.errors.join("; "));
    }
}

fn print_preview(sheet: &LoadedSheet) {
    println!(
        "  {} linha(s), layout {}",
        sheet.rows().len(),
        sheet.transformed.strategy.dimmed()
    );
    print_row_errors(&sheet.row_errors);
}

/// Mirrors new log entries to the terminal.
fn flush_log(log: &mut MessageLog) {
    for entry in log.drain_toasts() {
        let line = entry.to_string();
        match entry.level {
            Level::Success => println!("{}", line.green()),
            Level::Warning => println!("{}", line.yellow()),
            Level::Error => println!("{}", line.red()),
            Level::Info => println!("{line}"),
        }
    }
}

fn prompt_password(conflict: &ImportConflict) -> anyhow::Result<Option<String>> {
    print!("Senha para excluir {} ({}): ", conflict.period_ref, conflict.scope.as_str());
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn import(config: &Config, kind: SheetKind, file: &Path, password: Option<String>) -> anyhow::Result<bool> {
    let (name, bytes) = read_file(file)?;
    let mut session = ImportSession::new(
        config.http_store()?,
        RegistrationCache::new(),
        config.operator()?,
        MessageLog::new(config.log.capacity),
    );

    let loaded = session.select_file(kind, &name, &bytes).map(print_preview);
    flush_log(session.log_mut());
    if loaded.is_err() {
        return Ok(false);
    }

    let mut password = password;
    loop {
        let outcome = session.import().await;
        flush_log(session.log_mut());
        let conflict = match outcome {
            Ok(ImportOutcome::Imported(summary)) => {
                println!("{} {} ({})", "✓".green(), summary.audit_label, summary.kind);
                return Ok(true);
            }
            Ok(ImportOutcome::Conflict(conflict)) => conflict,
            Err(_) => return Ok(false),
        };
        if !resolve_conflict(&mut session, &conflict, password.take()).await? {
            return Ok(false);
        }
    }
}

/// Asks for the deletion password until the conflict is approved, locked or
/// the input ends.
async fn resolve_conflict<S: RecordStore>(
    session: &mut ImportSession<S>,
    conflict: &ImportConflict,
    mut supplied: Option<String>,
) -> anyhow::Result<bool> {
    println!(
        "{}",
        format!("Periodo {} ja existe; excluir para importar novamente.", conflict.period_ref).yellow()
    );
    loop {
        let Some(password) = supplied.take().map_or_else(|| prompt_password(conflict), |p| Ok(Some(p)))? else {
            session.cancel_conflict()?;
            flush_log(session.log_mut());
            return Ok(false);
        };
        let outcome = session.confirm_conflict(&password).await;
        flush_log(session.log_mut());
        match outcome {
            Ok(ConfirmOutcome::Approved(_)) => return Ok(true),
            Ok(ConfirmOutcome::Locked) | Err(_) => return Ok(false),
            Ok(ConfirmOutcome::Denied { attempts }) => {
                println!("  {}", format!("{attempts}/{MAX_ATTEMPTS}").dimmed());
            }
            Ok(ConfirmOutcome::PasswordRequired) => {}
        }
    }
}
