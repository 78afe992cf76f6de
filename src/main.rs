use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reqchain::chain::{chain_to_yaml, parse_chain_file, validate_chain, DependencyGraph};
use reqchain::config::Config;
use reqchain::engine::{ChainService, ExecutionResult, LinkState};
use reqchain::storage::SqliteStorage;

#[derive(Parser)]
#[command(name = "reqchain")]
#[command(about = "Request chain execution engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage chains
    Chains {
        #[command(subcommand)]
        action: ChainActions,
    },
    /// Start the API server
    Server {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Database maintenance and checks
    Db {
        #[command(subcommand)]
        action: DbActions,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
enum ChainActions {
    /// List all chains
    List,
    /// Create a chain from a YAML or JSON file
    Create {
        /// Path to chain definition file
        file: String,
    },
    /// Show chain details
    Show {
        /// Chain ID
        id: String,
        /// Print the stored definition as YAML
        #[arg(long)]
        yaml: bool,
    },
    /// Delete a chain and its history
    Delete {
        /// Chain ID
        id: String,
    },
    /// Execute a chain and wait for the result
    Run {
        /// Chain ID
        id: String,
        /// Variable overrides (key=value, value parsed as JSON when possible)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a chain file without storing it
    Validate {
        /// Path to chain definition file
        file: String,
    },
    /// Show the dependency layers and execution order of a chain
    Order {
        /// Chain ID
        id: String,
    },
    /// Show recent executions of a chain
    History {
        /// Chain ID
        id: String,
        /// Number of recent executions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum DbActions {
    /// Run integrity and journal checks
    Check,
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid variable format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "reqchain=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chains { action } => match action {
            ChainActions::List => cmd_chains_list().await?,
            ChainActions::Create { file } => cmd_chains_create(&file).await?,
            ChainActions::Show { id, yaml } => cmd_chains_show(&id, yaml).await?,
            ChainActions::Delete { id } => cmd_chains_delete(&id).await?,
            ChainActions::Run { id, vars, json } => cmd_chains_run(&id, &vars, json).await?,
            ChainActions::Validate { file } => cmd_chains_validate(&file)?,
            ChainActions::Order { id } => cmd_chains_order(&id).await?,
            ChainActions::History { id, limit } => cmd_chains_history(&id, limit).await?,
        },
        Commands::Server { port, host } => cmd_server(port, host).await?,
        Commands::Db { action } => match action {
            DbActions::Check => cmd_db_check().await?,
        },
        Commands::Completions { shell } => {
            cmd_completions(shell)?;
        }
    }

    Ok(())
}

/// Shell completion variants
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CompletionShell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Generate shell completions
fn cmd_completions(shell: CompletionShell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let shell: Shell = shell.into();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

// ============================================================================
// Chain Commands
// ============================================================================

async fn cmd_chains_list() -> anyhow::Result<()> {
    let service = get_service()?;
    let chains = service.list().await?;

    if chains.is_empty() {
        println!("No chains found.");
        println!();
        println!("Create one with: reqchain chains create <file.yaml>");
        return Ok(());
    }

    println!("{:<30} {:<30} {:<8} {:<10}", "ID", "NAME", "LINKS", "ENABLED");
    println!("{}", "-".repeat(80));

    for chain in chains {
        println!(
            "{:<30} {:<30} {:<8} {:<10}",
            chain.id,
            chain.name,
            chain.link_count,
            if chain.enabled { "yes" } else { "no" }
        );
    }

    Ok(())
}

async fn cmd_chains_create(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", file);
    }

    let chain = parse_chain_file(path)?;
    let links = chain.links.len();
    let service = get_service()?;
    let id = service.create(chain).await?;

    println!("✓ Chain '{}' created successfully", id);
    println!();
    println!("  Links: {}", links);
    println!();
    println!("Run with: reqchain chains run {}", id);

    Ok(())
}

async fn cmd_chains_show(id: &str, yaml: bool) -> anyhow::Result<()> {
    let service = get_service()?;
    let chain = service.get(id).await?;

    if yaml {
        print!("{}", chain_to_yaml(&chain)?);
        return Ok(());
    }

    println!("Chain: {} ({})", chain.name, chain.id);
    if let Some(description) = &chain.description {
        println!("Description: {}", description);
    }
    println!("Enabled: {}", chain.config.enabled);
    println!(
        "Mode: {}",
        if chain.config.enable_parallel_execution {
            "parallel"
        } else {
            "sequential"
        }
    );
    println!("Global timeout: {}s", chain.config.global_timeout_secs);
    if !chain.tags.is_empty() {
        println!("Tags: {}", chain.tags.join(", "));
    }
    println!();
    println!("Links:");
    for link in &chain.links {
        let deps = if link.depends_on.is_empty() {
            String::new()
        } else {
            format!(" (depends on: {})", link.depends_on.join(", "))
        };
        println!(
            "  - {} [{} {}]{}",
            link.id(),
            link.request.method.to_uppercase(),
            link.request.url,
            deps
        );
    }

    Ok(())
}

async fn cmd_chains_delete(id: &str) -> anyhow::Result<()> {
    let service = get_service()?;
    service.delete(id).await?;

    println!("✓ Chain '{}' deleted", id);

    Ok(())
}

async fn cmd_chains_run(id: &str, vars: &[(String, String)], json: bool) -> anyhow::Result<()> {
    let variables: HashMap<String, Value> = vars
        .iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
            (k.clone(), value)
        })
        .collect();

    let service = get_service()?;
    let result = service.execute(id, variables).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_execution(&result);
    }

    Ok(())
}

fn cmd_chains_validate(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", file);
    }

    let chain = parse_chain_file(path)?;
    validate_chain(&chain)?;
    let graph = DependencyGraph::build(&chain)?;

    println!("✓ Chain '{}' is valid", chain.id);
    println!();
    println!("  Links: {}", chain.links.len());
    println!("  Layers: {}", graph.layers().len());

    Ok(())
}

async fn cmd_chains_order(id: &str) -> anyhow::Result<()> {
    let service = get_service()?;
    let chain = service.get(id).await?;
    let graph = service.resolve(&chain)?;

    println!("Dependency layers for '{}':", id);
    println!();
    println!("{}", graph.to_text());
    println!();
    println!("Sequential execution order:");
    for (i, idx) in graph.execution_order().into_iter().enumerate() {
        println!("  {}. {}", i + 1, graph.id(idx));
    }

    Ok(())
}

async fn cmd_chains_history(id: &str, limit: usize) -> anyhow::Result<()> {
    let service = get_service()?;
    let executions = service.history(id, limit).await?;

    if executions.is_empty() {
        println!("No executions found for chain '{}'", id);
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<20} {:<10} {:<12}",
        "EXECUTION", "STATUS", "STARTED", "DURATION", "OK/FAIL/SKIP"
    );
    println!("{}", "-".repeat(100));

    for execution in executions {
        let (ok, failed, skipped) = execution.counts();
        println!(
            "{:<38} {:<16} {:<20} {:<10} {}/{}/{}",
            execution.execution_id,
            execution.status,
            execution.started_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{}ms", execution.duration_ms),
            ok,
            failed,
            skipped
        );
    }

    Ok(())
}

fn print_execution(result: &ExecutionResult) {
    println!("Execution: {}", result.execution_id);
    println!("Chain: {}", result.chain_id);
    println!("Status: {}", result.status);
    println!("Duration: {}ms", result.duration_ms);
    println!();
    println!("Links:");
    for id in &result.execution_order {
        if let Some(link) = result.link(id) {
            print_link(link);
        }
    }
    for link in result
        .link_results
        .values()
        .filter(|l| !result.execution_order.contains(&l.link_id))
    {
        print_link(link);
    }
}

fn print_link(link: &reqchain::engine::LinkResult) {
    let marker = match link.state {
        LinkState::Succeeded => "✓",
        LinkState::Skipped => "-",
        _ => "✗",
    };
    let status = link
        .http_status
        .map(|s| format!(" {}", s))
        .unwrap_or_default();
    println!(
        "  {} {} [{}{}] {}ms",
        marker, link.link_id, link.state, status, link.duration_ms
    );
    if let Some(error) = &link.error {
        println!("      {}", error);
    }
    let mut names: Vec<_> = link.extracted_vars.keys().collect();
    names.sort();
    for name in names {
        println!("      {} = {}", name, link.extracted_vars[name]);
    }
}

// ============================================================================
// Server Commands
// ============================================================================

async fn cmd_server(port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    use reqchain::api::{create_router, AppState};

    let config = Config::load();
    let port = port.unwrap_or(config.server.port);
    let host = host.unwrap_or_else(|| config.server.host.clone());

    reqchain::metrics::init_metrics();

    let service = build_service(&config)?;
    let app = create_router(AppState { service });

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;

    println!("reqchain server running on http://{}:{}", host, port);
    println!();
    println!("API endpoints:");
    println!("  GET    /health");
    println!("  GET    /metrics");
    println!("  GET    /chains");
    println!("  POST   /chains");
    println!("  GET    /chains/{{id}}");
    println!("  DELETE /chains/{{id}}");
    println!("  POST   /chains/{{id}}/execute");
    println!("  GET    /chains/{{id}}/history");
    println!();
    println!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down gracefully...");
}

// ============================================================================
// Database Commands
// ============================================================================

async fn cmd_db_check() -> anyhow::Result<()> {
    let service = get_service()?;
    let health = service.health().await?;

    println!("Database health");
    println!("  integrity_check: {}", health.integrity_check);
    println!("  journal_mode:    {}", health.journal_mode);
    println!("  busy_timeout:    {}ms", health.busy_timeout_ms);
    println!("  chains:          {}", health.chain_count);
    println!("  executions:      {}", health.execution_count);

    if !health.is_ok() {
        anyhow::bail!("Database integrity check failed");
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn build_service(config: &Config) -> anyhow::Result<ChainService> {
    let storage = SqliteStorage::open(&config.database_path())?;
    Ok(ChainService::from_config(Arc::new(storage), &config.engine)?)
}

fn get_service() -> anyhow::Result<ChainService> {
    build_service(&Config::load())
}
