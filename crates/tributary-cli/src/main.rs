//! Tributary shell (tributary)
//!
//! Starts a Tributary node in-process and attaches an interactive SQL shell
//! to it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Interactive shell, command log under ~/.tributary/data
//! tributary
//!
//! # Run statements and exit
//! tributary -e "CREATE STREAM ORDERS (ID VARCHAR) WITH (kafka_topic='orders', value_format='json'); LIST STREAMS;"
//!
//! # Run a script
//! tributary --file setup.sql
//! ```
//!
//! ## Configuration
//!
//! - `~/.tributary/config.toml`: output format, colour, data directory and
//!   node configuration file (see `config.rs`)
//! - `TRIBUTARY_DATA_DIR`: overrides the data directory
//! - `TRIBUTARY_CONFIG`: overrides the config file location
//! - `RUST_LOG`: log filter (default: info), logs go to stderr
//!
//! Non-interactive runs exit with status 1 when any statement failed.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tributary_core::Version;
use tributary_engine::{ClientSession, InMemoryEngine, LocalEndpoint, Node, NodeConfig, ServerEndpoint};
use tributary_log::{FileCommandLog, FileLogConfig};

mod config;
mod console;
mod repl;

use config::{Config, OutputFormat};
use console::Console;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "Tributary streaming-SQL shell", version)]
struct Cli {
    /// Directory holding the command log
    #[arg(long, env = "TRIBUTARY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shell configuration file
    #[arg(long, env = "TRIBUTARY_CONFIG")]
    config: Option<PathBuf>,

    /// Node configuration file (TOML) with server-wide property overrides
    #[arg(long)]
    node_config: Option<PathBuf>,

    /// Output format: TABULAR or JSON
    #[arg(short, long)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Execute the given statements and exit
    #[arg(short, long, conflicts_with = "file")]
    execute: Option<String>,

    /// Execute the statements in a file and exit
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let node_config = match cli.node_config.as_ref().or(config.node_config.as_ref()) {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("Failed to load node configuration {}", path.display()))?,
        None => NodeConfig::default(),
    };
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());
    let log = FileCommandLog::open(FileLogConfig::new(data_dir.join("commands.log")))
        .await
        .with_context(|| format!("Failed to open command log in {}", data_dir.display()))?;

    let node = Arc::new(
        Node::start(node_config, Arc::new(log), Arc::new(InMemoryEngine::new()))
            .await
            .context("Failed to start node")?,
    );
    let endpoint: Arc<dyn ServerEndpoint> = Arc::new(LocalEndpoint::new(node.clone()));

    let session = match ClientSession::connect(endpoint, &Version::current(), None).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            node.shutdown().await;
            std::process::exit(1);
        }
    };

    let format = cli.output.unwrap_or(config.output_format);
    let colored = config.colored && !cli.no_color && std::io::stdout().is_terminal();
    let mut repl = repl::Repl::new(session, Console::new(format, colored));

    let script = match (&cli.execute, &cli.file) {
        (Some(statements), _) => Some(statements.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        (None, None) if !std::io::stdin().is_terminal() => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read statements from stdin")?;
            Some(input)
        }
        (None, None) => None,
    };

    let failed = match script {
        Some(script) => repl.run_script(&script).await,
        None => {
            repl.run_interactive().await?;
            0
        }
    };
    if let Err(e) = repl.into_session().close().await {
        tracing::warn!(error = %e, "Failed to close session");
    }

    node.shutdown().await;
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
