//! Quarry CLI: runs and validates ETL job documents.

mod commands;

use clap::Parser;
use quarry_core::LoggingConfig;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Quarry: configuration-driven extract, transform and load
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Execute a job document
    Run {
        /// Job file (.json, .yaml or .yml)
        job: PathBuf,
        /// Return once streaming queries have started instead of waiting for them
        #[arg(long)]
        detach: bool,
    },
    /// Parse and validate a job document without running it
    Validate {
        /// Job file (.json, .yaml or .yml)
        job: PathBuf,
    },
    /// List the available transform functions
    Functions,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = quarry_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    let _guard = init_tracing(cli.verbose, cli.quiet, &config.logging)?;

    commands::handle_command(cli.command, &config).await
}

/// Install the stderr layer and, when `logging.file` is set, a JSON file layer.
///
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing(
    verbose: u8,
    quiet: bool,
    logging: &LoggingConfig,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 if quiet => "error",
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins unless a flag was given.
    let filter = if verbose == 0 && !quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let stderr_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    };

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let (dir, prefix) = log_file_parts(path);
            std::fs::create_dir_all(&dir)?;
            let file_appender = tracing_appender::rolling::daily(&dir, prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Split `logging.file` into the directory and the file-name prefix for the daily appender.
fn log_file_parts(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "quarry.log".to_string());
    (dir, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from(["quarry", "run", "job.yaml", "--detach", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { job, detach } => {
                assert_eq!(job, PathBuf::from("job.yaml"));
                assert!(detach);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["quarry"]).is_err());
    }

    #[test]
    fn test_log_file_parts() {
        assert_eq!(
            log_file_parts(Path::new("/var/log/quarry/run.log")),
            (PathBuf::from("/var/log/quarry"), "run.log".to_string())
        );
        assert_eq!(
            log_file_parts(Path::new("quarry.log")),
            (PathBuf::from("."), "quarry.log".to_string())
        );
    }
}
