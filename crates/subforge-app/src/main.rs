//! Subforge - subscription aggregator and sing-box config generator.
//!
//! Commands:
//! - `serve`: run the HTTP API
//! - `generate`: assemble the document once and write it
//! - `refresh`: re-download every subscription, then generate
//! - `import <file>`: decode a local subscription file and print its nodes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use subforge_app::AppPaths;
use subforge_core::{ConfigService, RefreshOutcome};
use subforge_server::{AppState, Server, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
use subforge_storage::Database;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Subforge - merge proxy subscriptions into one sing-box config
#[derive(Parser, Debug)]
#[command(name = "subforge", version, about)]
struct Args {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory rule-set files are stored in
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    /// Where the generated config is written
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        /// Port to bind
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Assemble the config from stored data and write it
    Generate,
    /// Re-download every subscription, then generate
    Refresh,
    /// Decode a local subscription file and print its nodes as JSON
    Import {
        /// Subscription body (Clash YAML, sing-box JSON or a link list)
        file: PathBuf,
    },
}

/// Initialize logging: stderr, plus a daily rolling file when possible.
fn init_logging(
    args: &Args,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("subforge={},warn", log_level)));

    if let Some(log_dir) = log_dir {
        if std::fs::create_dir_all(log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("subforge")
                .filename_suffix("log")
                .build(log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::debug!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

fn resolve_paths(args: &Args) -> anyhow::Result<AppPaths> {
    let base = match AppPaths::platform() {
        Some(paths) => paths,
        None => AppPaths::under(std::env::current_dir()?),
    };
    Ok(base.with_overrides(args.db.clone(), args.rules_dir.clone(), args.output.clone()))
}

fn open_service(paths: &AppPaths) -> anyhow::Result<Arc<ConfigService>> {
    let db = Database::with_path(&paths.db)
        .with_context(|| format!("opening database {}", paths.db.display()))?;
    Ok(Arc::new(ConfigService::new(
        Arc::new(db),
        paths.rule_set_dir.clone(),
        paths.output.clone(),
    )))
}

async fn serve(paths: &AppPaths, host: String, port: u16) -> anyhow::Result<()> {
    let service = open_service(paths)?;
    let config = ServerConfig::with_db_path(&paths.db)
        .with_host(host)
        .with_port(port)
        .with_paths(paths.rule_set_dir.clone(), paths.output.clone());
    let server = Server::with_state(config, AppState::new(service))?;
    server.run().await?;
    Ok(())
}

fn generate(paths: &AppPaths) -> anyhow::Result<()> {
    let service = open_service(paths)?;
    let document = service.generate().context("generating config")?;
    println!(
        "wrote {} ({} proxies, {} outbounds)",
        paths.output.display(),
        document.proxy_count(),
        document.outbounds.len()
    );
    Ok(())
}

async fn refresh(paths: &AppPaths) -> anyhow::Result<()> {
    let service = open_service(paths)?;
    let mut failures = 0usize;
    for subscription in service.subscriptions()? {
        match service.refresh_subscription(subscription.id).await {
            Ok(RefreshOutcome::Updated { nodes }) => {
                println!("{}: {} nodes", subscription.name, nodes)
            }
            Ok(RefreshOutcome::Unchanged) => println!("{}: unchanged", subscription.name),
            Err(e) => {
                failures += 1;
                tracing::warn!(subscription = subscription.id, error = %e, "refresh failed");
                println!("{}: failed ({})", subscription.name, e);
            }
        }
    }
    generate(paths)?;
    if failures > 0 {
        anyhow::bail!("{} subscription(s) failed to refresh", failures);
    }
    Ok(())
}

fn import(file: &Path) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let registry = subforge_core::ProtocolRegistry::with_defaults();
    let (kind, nodes) = subforge_core::SubscriptionIngestor::new(&registry)
        .ingest(&content)
        .with_context(|| format!("decoding {}", file.display()))?;
    tracing::info!(format = %kind, nodes = nodes.len(), "decoded subscription file");
    println!("{}", serde_json::to_string_pretty(&nodes)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let paths = resolve_paths(&args)?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let log_dir = matches!(args.command, Command::Serve { .. }).then_some(paths.logs.as_path());
    let _log_guard = init_logging(&args, log_dir);

    tracing::debug!("Args: {:?}", args);

    match args.command {
        Command::Serve { host, port } => serve(&paths, host, port).await,
        Command::Generate => generate(&paths),
        Command::Refresh => refresh(&paths).await,
        Command::Import { ref file } => import(file),
    }
}
