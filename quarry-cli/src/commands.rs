//! Subcommand handlers.

use crate::Commands;
use anyhow::Context;
use quarry_core::{FunctionRegistry, Job, QuarryConfig, RunningQuery, SessionProvider};
use std::path::Path;
use tracing::{info, warn};

pub async fn handle_command(command: Commands, config: &QuarryConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run { job, detach } => run(&job, detach, config).await,
        Commands::Validate { job } => validate(&job, config),
        Commands::Functions => {
            for tag in FunctionRegistry::with_builtins().tags() {
                println!("{tag}");
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", render_config(config)?);
            Ok(())
        }
    }
}

fn load_job(path: &Path, config: &QuarryConfig) -> anyhow::Result<Job> {
    Job::load(
        path,
        config.job.substitute_env,
        &FunctionRegistry::with_builtins(),
    )
    .with_context(|| format!("Invalid job {}", path.display()))
}

async fn run(path: &Path, detach: bool, config: &QuarryConfig) -> anyhow::Result<()> {
    let mut job = load_job(path, config)?;
    let provider = SessionProvider::new(config.engine.clone());
    let registry = job
        .execute(&provider)
        .await
        .with_context(|| format!("Job {} failed", path.display()))?;

    println!(
        "Job completed ({} dataset(s) registered: {})",
        registry.len(),
        registry.names().join(", ")
    );

    let queries = registry.into_queries();
    if queries.is_empty() {
        return Ok(());
    }
    for (name, query) in &queries {
        println!("Streaming query '{name}' started (id {})", query.id());
    }

    if detach {
        // Background queries cannot outlive the process; stop them cleanly.
        stop_all(&queries).await;
        return Ok(());
    }

    tokio::select! {
        result = await_all(&queries) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, stopping streaming queries...");
            stop_all(&queries).await;
            Ok(())
        }
    }
}

/// Wait for every streaming query to terminate. Fails if any query failed.
async fn await_all(queries: &[(String, RunningQuery)]) -> anyhow::Result<()> {
    let mut failed = Vec::new();
    for (name, query) in queries {
        match query.await_termination().await {
            Ok(status) => {
                let progress = query.progress();
                info!(
                    query = %name,
                    %status,
                    batches = progress.batches,
                    rows = progress.rows,
                    "Streaming query terminated"
                );
                println!(
                    "Streaming query '{name}' {status} ({} batch(es), {} row(s))",
                    progress.batches, progress.rows
                );
            }
            Err(e) => {
                eprintln!("Streaming query '{name}' failed: {e}");
                failed.push(name.as_str());
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("streaming queries failed: {}", failed.join(", "))
    }
}

async fn stop_all(queries: &[(String, RunningQuery)]) {
    for (name, query) in queries {
        let status = query.stop().await;
        warn!(query = %name, %status, "Stopped streaming query");
    }
}

fn validate(path: &Path, config: &QuarryConfig) -> anyhow::Result<()> {
    let job = load_job(path, config)?;
    println!("{} is valid", path.display());
    println!("{}", describe_stages(&job));
    Ok(())
}

/// One line per stage: kind, name, method and upstreams.
fn describe_stages(job: &Job) -> String {
    job.stages()
        .iter()
        .map(|stage| {
            let kind = stage.kind().to_string();
            let upstreams = stage.upstreams();
            if upstreams.is_empty() {
                format!("  {kind:<9} {} [{}]", stage.name(), stage.method())
            } else {
                format!(
                    "  {kind:<9} {} [{}] <- {}",
                    stage.name(),
                    stage.method(),
                    upstreams.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_config(config: &QuarryConfig) -> anyhow::Result<String> {
    let mut out = String::new();
    if let Some(path) = quarry_core::config::user_config_path() {
        out.push_str(&format!("# user config: {}\n", path.display()));
    }
    out.push_str(&toml::to_string_pretty(config).context("Failed to render configuration")?);
    Ok(out)
}
