//! Querylane - cached, retrying, connection-scoped queries and lazy streaming over SQLite

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::io::Write;
use std::path::Path;
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;

use commands::{App, Command};
use config::Config;

/// Querylane - query execution and streaming over a SQLite user table
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "QUERYLANE_CONFIG", default_value = "config/querylane.toml")]
    config: String,

    /// Database file, overriding the configuration
    #[arg(long, env = "QUERYLANE_DATABASE")]
    database: Option<String>,

    /// Log each query before it runs
    #[arg(long, global = true, default_value_t = false)]
    log_queries: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration, logging to stderr until the configured subscriber exists
    let mut config = load_config(&args.config, std::io::stderr)?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if args.log_queries {
        config.logging.log_queries = true;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    if let Command::InitConfig { force } = args.command {
        if Path::new(&args.config).exists() && !force {
            bail!("{} already exists, pass --force to overwrite", args.config);
        }
        return config.save(&args.config);
    }

    let metrics = if config.metrics.enabled {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install metrics recorder")?,
        )
    } else {
        None
    };

    info!("Querylane v{} on {}", env!("CARGO_PKG_VERSION"), config.database.path);

    let app = App::new(&config)?;
    app.ensure_schema().await?;
    commands::run(&app, args.command).await?;

    if let Some(handle) = metrics {
        write_metrics(&handle, std::io::stderr().lock())?;
    }

    Ok(())
}

/// Load the configuration under a temporary subscriber so its warnings are
/// not lost before [`init_logging`] runs
fn load_config<W>(path: &str, make_writer: W) -> Result<Config>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || Config::load(path))
}

/// Write the Prometheus snapshot. Kept off stdout, which carries command output.
fn write_metrics<W: Write>(handle: &PrometheusHandle, mut out: W) -> Result<()> {
    out.write_all(handle.render().as_bytes())
        .context("Failed to write metrics snapshot")?;
    out.flush().context("Failed to write metrics snapshot")?;
    Ok(())
}

/// Initialize logging to stderr, leaving stdout to command output
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
