mod cmd;
mod output;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::cycle::CycleArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "plus-cycle",
    about = "Resolve the monthly Plus Server vote: tally ballots, move members between tiers, settle vouches",
    version,
    propagate_version = true
)]
struct Cli {
    /// SQLite database holding ballots, statuses and suggestions
    #[arg(long, global = true, env = "PLUS_DB", default_value = "plus.db")]
    db: PathBuf,

    /// Resolution config (YAML); built-in defaults when omitted
    #[arg(long, global = true, env = "PLUS_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the Plus voting tables if they do not exist
    Init,

    /// Resolve the cycle without writing anything
    Preview {
        /// Cycle time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Resolve the cycle and commit every effect in one transaction
    Run {
        /// Cycle time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Inspect the resolution config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init => cmd::init::run(&cli.db),
        Commands::Preview { at } => cmd::cycle::preview(CycleArgs {
            db: &cli.db,
            config,
            at,
            json: cli.json,
        }),
        Commands::Run { at } => cmd::cycle::run(CycleArgs {
            db: &cli.db,
            config,
            at,
            json: cli.json,
        }),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
