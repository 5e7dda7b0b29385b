use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "demoforge", version, about = "Provision and tear down demo scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect the scenario catalog
    #[command(subcommand)]
    Scenarios(ScenariosCommand),
    /// Show what a run would create without calling anything
    Plan(RunArgs),
    /// Check organization properties and secrets a scenario expects
    Preflight(PreflightArgs),
    /// Provision a scenario and stream its progress
    Run(RunArgs),
    /// Inspect recorded sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Delete every resource a session created, newest first
    Cleanup(CleanupArgs),
    /// Clean up every expired session
    CleanupExpired(CleanupExpiredArgs),
    /// List branches of a repository
    Branches(RepositoryArgs),
    /// List open pull requests of a repository
    Pulls(RepositoryArgs),
}

#[derive(Debug, Subcommand)]
enum ScenariosCommand {
    /// List scenario ids and names
    List,
    /// Print a scenario definition and its lint findings
    Show { id: String },
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    /// List sessions, newest first
    List {
        #[arg(long)]
        org: Option<String>,
        /// Only sessions past their expiry
        #[arg(long)]
        expired: bool,
    },
    /// Print one session as JSON
    Show { id: String },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Scenario id
    scenario: String,
    /// Organization to provision into
    #[arg(long)]
    org: String,
    /// Parameter as NAME=VALUE; repeatable
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    params: Vec<String>,
    /// Environment target (defaults to the configured one)
    #[arg(long = "env")]
    environment: Option<String>,
    /// Days until the session expires
    #[arg(long)]
    ttl_days: Option<u32>,
    /// Owner of generated repositories
    #[arg(long)]
    owner: Option<String>,
    /// Run against no-op clients
    #[arg(long)]
    dry_run: bool,
    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct PreflightArgs {
    scenario: String,
    #[arg(long)]
    org: String,
    #[arg(long = "env")]
    environment: Option<String>,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    session: String,
    /// Report what would be deleted
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct CleanupExpiredArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RepositoryArgs {
    /// Repository as owner/name
    repository: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Scenarios(ScenariosCommand::List) => commands::list_scenarios(),
        Command::Scenarios(ScenariosCommand::Show { id }) => commands::show_scenario(&id),
        Command::Plan(args) => commands::plan(args),
        Command::Preflight(args) => commands::preflight(args).await,
        Command::Run(args) => commands::run(args).await,
        Command::Sessions(SessionsCommand::List { org, expired }) => commands::list_sessions(org, expired),
        Command::Sessions(SessionsCommand::Show { id }) => commands::show_session(&id),
        Command::Cleanup(args) => commands::cleanup(&args.session, args.dry_run).await,
        Command::CleanupExpired(args) => commands::cleanup_expired(args.dry_run).await,
        Command::Branches(args) => commands::branches(&args.repository).await,
        Command::Pulls(args) => commands::pulls(&args.repository).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}
