//! Tracedown CLI entrypoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use tracedown::{export_trace, Config, ExportOptions, ExportSummary, TraceArchive};

#[derive(Debug, Parser)]
#[command(name = "tracedown")]
#[command(about = "export recorded browser-automation traces to Markdown + HTML snapshots")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "tracedown.toml")]
    config: PathBuf,

    /// Log level.
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export a trace archive to a directory of Markdown + HTML snapshots
    Export {
        /// Trace archive (ZIP) to export.
        trace: PathBuf,

        /// Output directory. Defaults to `<out_dir>/<archive stem>` from the
        /// config.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List the entries of a trace archive
    Ls { trace: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        // Tracing is best-effort; if it fails, we still continue.
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let config = Config::load_optional(&cli.config);

    match run_command(&cli, &config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    Ok(())
}

fn run_command(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Export { trace, out } => {
            let out_dir = out.clone().unwrap_or_else(|| default_out_dir(config, trace));
            let summary = export_trace(trace, &ExportOptions { out_dir })?;
            print_export_summary(cli, &summary)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Ls { trace } => {
            let mut archive = TraceArchive::open(trace)?;
            let entries = archive.entries()?;
            print_json_or_text(cli, &entries)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn default_out_dir(config: &Config, trace: &PathBuf) -> PathBuf {
    let stem = trace
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trace");
    config.out_dir.join(stem)
}

fn print_export_summary(cli: &Cli, summary: &ExportSummary) -> anyhow::Result<()> {
    if cli.json {
        print_json_or_text(cli, summary)?;
    } else {
        println!("{}", summary.pretty());
    }
    Ok(())
}

fn print_json_or_text<T: serde::Serialize>(cli: &Cli, value: &T) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "code": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}
