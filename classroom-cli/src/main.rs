//! Classroom CLI - provision student repositories on GitHub
//!
//! Creates one repository per student or group for an assignment, links
//! access, seeds starter code, and tears repositories down again.

mod app;
mod commands;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use classroom_core::{Config, Secrets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    DestroyArgs, DestroyAssignmentArgs, EnqueueArgs, JobsArgs, ProvisionArgs, RosterArgs,
    StatusArgs, WorkerArgs,
};

/// Classroom repository provisioner
#[derive(Parser, Debug)]
#[command(name = "classroom")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the SQLite database (overrides config and env)
    #[arg(long, global = true, env = "CLASSROOM_DATABASE")]
    database: Option<PathBuf>,

    /// Number of concurrent workers (overrides config and env)
    #[arg(long, global = true, env = "CLASSROOM_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run provisioning workers
    #[command(visible_alias = "w")]
    Worker(WorkerArgs),

    /// Queue repository creation
    Enqueue(EnqueueArgs),

    /// Create one repository in the foreground
    Provision(ProvisionArgs),

    /// Destroy one repository binding
    Destroy(DestroyArgs),

    /// Destroy every repository of an assignment
    DestroyAssignment(DestroyAssignmentArgs),

    /// Inspect and requeue jobs
    Jobs(JobsArgs),

    /// Manage assignments, students and groups
    Roster(RosterArgs),

    /// Show repositories of an assignment
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.database.clone(), cli.workers)?;

    if cli.verbose {
        tracing::info!(
            database = %config.database.path.display(),
            workers = config.worker.concurrency,
            api_url = %config.github.api_url,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("classroom {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Worker(args)) => args.execute(&config).await?,
        Some(Commands::Enqueue(args)) => args.execute(&config).await?,
        Some(Commands::Provision(args)) => args.execute(&config).await?,
        Some(Commands::Destroy(args)) => args.execute(&config).await?,
        Some(Commands::DestroyAssignment(args)) => args.execute(&config).await?,
        Some(Commands::Jobs(args)) => args.execute(&config).await?,
        Some(Commands::Roster(args)) => args.execute(&config).await?,
        Some(Commands::Status(args)) => args.execute(&config).await?,
        Some(Commands::Config) => print_config(&config),
        None => {
            println!("Classroom - repository provisioning for assignments");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config) {
    println!("Classroom Configuration");
    println!("=======================");
    println!();
    println!("GitHub:");
    println!("  api_url: {}", config.github.api_url);
    println!(
        "  organization: {}",
        config.github.organization.as_deref().unwrap_or("(unset)")
    );
    println!(
        "  organization_id: {}",
        config
            .github
            .organization_id
            .map_or_else(|| "(unset)".to_string(), |id| id.to_string())
    );
    println!("  request_timeout: {:?}", config.github.request_timeout);
    println!("  rate_limit_buffer: {}", config.github.rate_limit_buffer);
    println!();
    println!("Queue:");
    println!("  max_attempts: {}", config.queue.max_attempts);
    println!("  base_delay: {:?}", config.queue.base_delay);
    println!("  max_delay: {:?}", config.queue.max_delay);
    println!("  lease: {:?}", config.queue.lease);
    println!();
    println!("Worker:");
    println!("  concurrency: {}", config.worker.concurrency);
    println!("  poll_interval: {:?}", config.worker.poll_interval);
    println!();
    println!("Database: {}", config.database.path.display());
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    let token = Secrets::load()
        .ok()
        .and_then(|s| s.github_token())
        .is_some();
    println!("GitHub token: {}", if token { "configured" } else { "missing" });
}
