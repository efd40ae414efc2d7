//! docdb-mcp CLI entry point

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use docdb_mcp::{
    config::Config,
    mcp::{get_tool_definitions, handle_tool_call, McpServer},
    store::{MongoConnector, StoreGateway},
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docdb-mcp")]
#[command(version, about = "MCP server exposing a MongoDB database to AI agents", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log output format (logs always go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// MongoDB connection string
    #[arg(long, env = "MONGODB_URI", global = true, hide_env_values = true)]
    uri: Option<String>,

    /// Database to expose
    #[arg(long, env = "MONGODB_DATABASE", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio (default)
    Serve,

    /// Connect and report server and database statistics
    Check,

    /// List the operations exposed to MCP clients
    Tools,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match cli.command {
        Some(Commands::Init { force }) => return handle_init(cli.config, force),
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "docdb-mcp", &mut std::io::stdout());
            return Ok(());
        }
        Some(Commands::Tools) => return print_tools(cli.json),
        _ => {}
    }

    let config = load_config(cli.config)?
        .with_overrides(cli.uri, cli.database)
        .context("Invalid connection settings")?;

    match cli.command {
        Some(Commands::Check) => handle_check(config, cli.json).await,
        _ => handle_serve(config).await,
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries the protocol; logs must never go there
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init(),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load_from(None).context("Failed to load config"),
    }
}

fn gateway_for(config: &Config) -> Arc<StoreGateway> {
    let connector = Arc::new(MongoConnector::from_config(config));
    Arc::new(StoreGateway::new(config, connector))
}

async fn handle_serve(config: Config) -> Result<()> {
    let gateway = gateway_for(&config);
    info!(
        uri = %gateway.target(),
        database = %gateway.database(),
        "Starting docdb-mcp"
    );

    // Connect in the background so `initialize` is answered immediately; a
    // failure here is retried by the first request that needs the store.
    let eager = gateway.clone();
    tokio::spawn(async move {
        if let Err(e) = eager.ensure_connected().await {
            warn!(error = %e, "Initial connection failed; will retry on first use");
        }
    });

    let server = McpServer::new(config, gateway.clone());
    tokio::select! {
        result = server.run() => result.context("MCP server failed")?,
        _ = shutdown_signal() => {}
    }

    gateway.shutdown().await;
    info!("docdb-mcp stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn handle_check(config: Config, json: bool) -> Result<()> {
    let gateway = gateway_for(&config);
    let result = handle_tool_call("verifyConnection", &Map::new(), &config, &gateway).await;
    gateway.shutdown().await;

    let body = result
        .body()
        .context("verifyConnection returned no readable payload")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if result.is_error {
        let message = body["error"]["message"].as_str().unwrap_or("unknown error");
        println!("✗ Connection check failed");
        println!("  {}", message);
    } else {
        print_check(&body);
    }

    if result.is_error {
        std::process::exit(1);
    }
    Ok(())
}

fn print_check(body: &Value) {
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    };

    println!("✓ Connected");
    println!("  URI: {}", text(&body["connectionUri"]));
    println!("  Database: {}", text(&body["currentDatabase"]));
    println!("  Server version: {}", text(&body["serverInfo"]["version"]));
    println!("  Host: {}", text(&body["serverInfo"]["host"]));
    println!("  Collections: {}", text(&body["databaseStats"]["collections"]));
    println!("  Data size: {} bytes", text(&body["databaseStats"]["dataSize"]));
    println!("  Indexes: {}", text(&body["databaseStats"]["indexes"]));
}

fn print_tools(json: bool) -> Result<()> {
    let tools = get_tool_definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    for tool in &tools {
        println!("{}", tool.name);
        println!("  {}", tool.description);
        let required: Vec<&str> = tool.input_schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(props) = tool.input_schema["properties"].as_object() {
            for name in props.keys() {
                let marker = if required.contains(&name.as_str()) { "*" } else { " " };
                println!("   {} {}", marker, name);
            }
        }
    }

    Ok(())
}

fn handle_init(config: Option<PathBuf>, force: bool) -> Result<()> {
    // A .toml path names the file; anything else names the directory
    let base_dir = config.map(|path| {
        if path.extension().map_or(false, |e| e == "toml") {
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir)
        } else {
            path
        }
    });

    let config = Config::init_at(base_dir, force)?;

    println!("✓ docdb-mcp initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("\nNext steps:");
    println!("  1. Set connection_uri and database_name in the config file (or MONGODB_URI / MONGODB_DATABASE)");
    println!("  2. Check connectivity: docdb-mcp check");
    println!("  3. Register `docdb-mcp serve` as an MCP server in your client");

    Ok(())
}
