use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mcp_sessions::client::McpClient;
use mcp_sessions::config::{default_config_path, find_config_file, load_config, Config};
use mcp_sessions::mcp::McpServer;
use mcp_sessions::models::ContentBlock;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mcp-sessions - Session-scoped MCP server and client over HTTP
#[derive(Parser, Debug)]
#[command(name = "mcp-sessions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session-scoped MCP JSON-RPC server and client", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format for client commands
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Plain)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint for client commands (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Per-attempt request timeout in seconds (overrides config)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable text
    Plain,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long, short)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Check that a server is reachable
    Ping,

    /// List the tools available to a fresh session
    #[command(alias = "ls")]
    Tools,

    /// Invoke a tool
    Call {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(long, short, default_value = "{}")]
        args: String,
    },

    /// Show server info and session statistics
    Stats,

    /// Write a default configuration file
    InitConfig {
        /// Destination (defaults to the user config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("mcp_sessions={}", level)),
    );

    let json = config.logging.is_json();
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(path.as_deref()).with_context(|| match &path {
        Some(p) => format!("Failed to load config from {}", p.display()),
        None => "Failed to load config from environment".to_string(),
    })?;

    if let Some(endpoint) = &cli.endpoint {
        config.client.endpoint = endpoint.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.client.timeout_secs = timeout;
    }
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = resolve_config(&cli)?;
    init_tracing(&cli, &config);

    if let Some(path) = cli.config.clone().or_else(find_config_file) {
        tracing::debug!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }

            let server = McpServer::new(&config);
            let (bound_addr, handle) = server.run_http(&config.server.bind_address()).await?;
            tracing::info!("MCP server listening on {}", bound_addr);

            handle
                .await
                .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
        }

        Commands::Ping => {
            let client = McpClient::new(&config.client)?;
            let result = client.ping().await?;
            match cli.output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Plain => {
                    let timestamp = result["timestamp"].as_str().unwrap_or("unknown");
                    println!("pong from {} at {}", config.client.endpoint, timestamp);
                }
            }
            client.terminate().await;
        }

        Commands::Tools => {
            let client = McpClient::new(&config.client)?;
            let tools = client.list_tools().await?;
            match cli.output {
                OutputFormat::Json => print_json(&serde_json::to_value(&tools)?)?,
                OutputFormat::Plain => {
                    for tool in &tools {
                        println!("{:<20} [{}] {}", tool.name, tool.category, tool.description);
                    }
                }
            }
            client.terminate().await;
        }

        Commands::Call { name, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let client = McpClient::new(&config.client)?;
            let response = client.call_tool(&name, arguments).await;
            client.terminate().await;
            let response = response?;

            match cli.output {
                OutputFormat::Json => print_json(&serde_json::to_value(&response)?)?,
                OutputFormat::Plain => {
                    for block in &response.content {
                        match block {
                            ContentBlock::Text { text } => println!("{}", text),
                            other => println!("{}", serde_json::to_string(other)?),
                        }
                    }
                }
            }
            if response.is_error {
                anyhow::bail!("Tool '{}' reported an error", name);
            }
        }

        Commands::Stats => {
            let client = McpClient::new(&config.client)?;
            let status = client.server_status().await?;
            match cli.output {
                OutputFormat::Json => print_json(&status)?,
                OutputFormat::Plain => {
                    let sessions = &status["sessions"];
                    println!(
                        "{} {} (protocol {})",
                        status["server"]["name"].as_str().unwrap_or("?"),
                        status["server"]["version"].as_str().unwrap_or("?"),
                        status["protocolVersion"].as_str().unwrap_or("?"),
                    );
                    println!(
                        "sessions: total={} active={} expired={}",
                        sessions["total"], sessions["active"], sessions["expired"]
                    );
                }
            }
        }

        Commands::InitConfig { path, force } => {
            let path = path.unwrap_or_else(default_config_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            if !cli.quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
    }

    Ok(())
}
