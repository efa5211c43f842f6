use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use agentlens_logging::{init_tracing, LogFormat};
use agentlens_sessions::SessionFilter;

mod commands;
mod config;
mod render;

use config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "agentlens",
    about = "Live ingestion and scoring of coding-agent session logs",
    version,
    author
)]
struct Cli {
    /// Config file (default: ./agentlens.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormatChoice,

    /// Also write JSON logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print file changes in the session directory until Ctrl+C
    Watch {
        /// Session log root (default: ~/.claude/projects)
        #[arg(short = 'd', long)]
        dir: Option<PathBuf>,

        /// File name glob
        #[arg(long)]
        pattern: Option<String>,

        /// Write debounce in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Output events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Follow session logs and print new events until Ctrl+C
    Tail {
        /// Session log root (default: ~/.claude/projects)
        #[arg(short = 'd', long)]
        dir: Option<PathBuf>,

        /// Only follow projects whose directory name contains this
        #[arg(long)]
        project: Option<String>,

        /// Output events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show aggregate statistics over stored sessions
    Stats {
        /// Session log root (default: ~/.claude/projects)
        #[arg(short = 'd', long)]
        dir: Option<PathBuf>,

        /// Filter by project name
        #[arg(long)]
        project: Option<String>,

        /// Number of tools to list (0 for all)
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rank agents by composite performance score
    Rank {
        /// Session log root (default: ~/.claude/projects)
        #[arg(short = 'd', long)]
        dir: Option<PathBuf>,

        /// Rank within each inferred domain
        #[arg(long)]
        by_domain: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_tracing(&cli.log_level, cli.log_format.into(), cli.log_dir.as_deref())
        .context("Failed to set up log directory")?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Watch {
            dir,
            pattern,
            debounce_ms,
            json,
        } => {
            let root = config.sessions_dir(dir)?;
            let pattern = config.pattern(pattern);
            let cancel = interrupt_token()?;
            commands::watch(root, &pattern, config.debounce(debounce_ms), json, cancel).await
        }
        Command::Tail { dir, project, json } => {
            let root = config.sessions_dir(dir)?;
            let cancel = interrupt_token()?;
            commands::tail(root, project, config.poll_interval(), json, cancel).await
        }
        Command::Stats {
            dir,
            project,
            top,
            json,
        } => {
            let store = config.store(dir)?;
            let filter = SessionFilter {
                project,
                ..Default::default()
            };
            commands::stats(&store, &filter, config.price_table(), top, json)
        }
        Command::Rank {
            dir,
            by_domain,
            json,
        } => {
            let store = config.store(dir)?;
            commands::rank(&store, config.price_table(), config.weights, by_domain, json)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Some(Config::load_from(path)?),
        None => {
            let working_dir = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&working_dir)?
        }
    };
    Ok(config.unwrap_or_default())
}

/// A token cancelled on Ctrl+C.
fn interrupt_token() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Shutting down...");
        handle.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(token)
}
