use std::ops::Range;
use std::path::{Path, PathBuf};

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use migchain::error::{ChainError, ParseDiagnostic, SourceSpan};
use migchain::report::RepairReport;
use migchain::store::RecoveryReport;
use migchain::{RepairConfig, RunMode, execute_repair, recover_repair};

const EXIT_ERROR: i32 = 3;

#[derive(Parser)]
#[command(
    name = "migchain",
    about = "Detect and repair broken Alembic migration chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DirArgs {
    /// Migrations directory (scripts live in <dir>/versions when present)
    dir: PathBuf,
    /// Output format: table or json
    #[arg(long, default_value = "table", value_parser = ["table", "json"])]
    format: String,
    /// Config file (defaults to <dir>/migchain.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the revision graph without changing anything
    Check(DirArgs),
    /// Show the repair that `fix` would apply
    DryRun(DirArgs),
    /// Repair multiple roots and diverged heads in place
    Fix(DirArgs),
    /// Roll back an interrupted `fix`
    Recover(DirArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            std::process::exit(EXIT_ERROR);
        }
        Err(err) => err.exit(),
    };

    let code = match cli.command {
        Commands::Check(args) => cmd_repair(&args, RunMode::Check).await,
        Commands::DryRun(args) => cmd_repair(&args, RunMode::DryRun).await,
        Commands::Fix(args) => cmd_repair(&args, RunMode::Fix).await,
        Commands::Recover(args) => cmd_recover(&args).await,
    };

    match code {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:?}", err);
            std::process::exit(EXIT_ERROR);
        }
    }
}

#[instrument(skip(args), fields(dir = %args.dir.display(), mode = mode.as_str(), format = %args.format))]
async fn cmd_repair(args: &DirArgs, mode: RunMode) -> Result<i32> {
    let config = RepairConfig::load(&args.dir, args.config.as_deref())?;
    debug!(?config, "loaded repair config");

    let execution = execute_repair(&args.dir, mode, &config)
        .await
        .map_err(report_chain_error)?;
    render_report(&execution.report, &args.format)?;

    let code = execution.status.exit_code();
    if code == 0 {
        info!(status = execution.status.as_str(), "migration chain ok");
    } else {
        warn!(status = execution.status.as_str(), "migration chain needs attention");
    }
    Ok(code)
}

#[instrument(skip(args), fields(dir = %args.dir.display(), format = %args.format))]
async fn cmd_recover(args: &DirArgs) -> Result<i32> {
    let config = RepairConfig::load(&args.dir, args.config.as_deref())?;
    let recovery = recover_repair(&args.dir, &config)
        .await
        .wrap_err_with(|| format!("recovery failed in {}", args.dir.display()))?;

    match args.format.as_str() {
        "json" => {
            let out = serde_json::to_string_pretty(&recovery)
                .wrap_err("failed to serialize recovery JSON")?;
            println!("{}", out);
        }
        _ => print_recovery_table(&args.dir, &recovery),
    }
    Ok(0)
}

fn render_report(report: &RepairReport, format: &str) -> Result<()> {
    match format {
        "json" => {
            let out = report.to_json().wrap_err("failed to serialize report JSON")?;
            println!("{}", out);
        }
        _ => print!("{}", report.render_text()),
    }
    Ok(())
}

fn print_recovery_table(dir: &Path, recovery: &RecoveryReport) {
    println!("Recovery");
    println!("  Directory: {}", dir.display());
    println!(
        "  Journal: {}",
        recovery.journal_state.as_deref().unwrap_or("(none)")
    );
    println!();
    if recovery.restored.is_empty() && recovery.removed.is_empty() {
        println!("Nothing to recover.");
        return;
    }
    println!("{:<10} {}", "ACTION", "PATH");
    for path in &recovery.restored {
        println!("{:<10} {}", "restored", path.display());
    }
    for path in &recovery.removed {
        println!("{:<10} {}", "removed", path.display());
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Render parse failures against their source before handing the error on.
fn report_chain_error(err: ChainError) -> color_eyre::eyre::Report {
    if let ChainError::Parse { path, reason, span } = &err {
        if let Ok(source) = std::fs::read_to_string(path) {
            let diag = ParseDiagnostic::new(reason.clone(), *span);
            render_parse_diagnostic(path, &source, &diag);
        }
    }
    color_eyre::eyre::Report::new(err)
}

/// Turn a byte span into the char range ariadne indexes by, clamped to a
/// non-empty range inside the source.
fn normalize_span(span: Option<SourceSpan>, source: &str) -> Range<usize> {
    let len = source.chars().count();
    if len == 0 {
        return 0..0;
    }
    match span {
        Some(s) => {
            let start = byte_to_char(source, s.start).min(len - 1);
            let end = byte_to_char(source, s.end).max(start + 1).min(len);
            start..end
        }
        None => 0..1,
    }
}

/// Char index of the char containing `byte`; offsets past the end map to the
/// char count.
fn byte_to_char(source: &str, byte: usize) -> usize {
    let mut byte = byte.min(source.len());
    while !source.is_char_boundary(byte) {
        byte -= 1;
    }
    source[..byte].chars().count()
}

fn render_parse_diagnostic(path: &Path, source: &str, diag: &ParseDiagnostic) {
    let file_id = path.display().to_string();
    let span = normalize_span(diag.span, source);
    let message = diag.to_string();
    let mut report = Report::build(ReportKind::Error, file_id.clone(), span.start)
        .with_message("descriptor parse error")
        .with_label(
            Label::new((file_id.clone(), span.clone()))
                .with_color(Color::Red)
                .with_message(message.clone()),
        );
    if diag.span.is_none() {
        report = report.with_note(message);
    }
    let _ = report
        .finish()
        .eprint((file_id.clone(), Source::from(source)));
}
