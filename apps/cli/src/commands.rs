//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use threatintel_collectors::CollectorRegistry;
use threatintel_core::{ProgressReporter, RunController, RunReport};
use threatintel_shared::{
    AppConfig, CollectorOutcome, MAX_DEADLINE_SECS, Outcome, RunConfig, SessionId, init_config,
    load_config, load_config_from,
};
use threatintel_storage::{MemorySessionStore, SessionStore, open_store};

use crate::render;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// threatintel: merge threat intelligence sources into one report per session.
#[derive(Parser)]
#[command(
    name = "threatintel",
    version,
    about = "Aggregate web, social, and feed threat intelligence into a fixed-format report.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.threatintel/threatintel.toml).
    #[arg(long, global = true, env = "THREATINTEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Session database location, overriding `storage.location`.
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run all collectors and produce a report for a session.
    Report {
        /// Session identifier.
        #[arg(short, long)]
        session: String,

        /// Global collection deadline in seconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_DEADLINE_SECS))]
        deadline_secs: Option<u64>,

        /// Print the run as JSON instead of markdown.
        #[arg(long)]
        json: bool,

        /// Keep the session history in memory only.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show the stored report history of a session.
    History {
        /// Session identifier.
        #[arg(short, long)]
        session: String,

        /// Print the turns as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List sessions with stored history.
    Sessions,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "threatintel=warn",
        1 => "threatintel=info",
        2 => "threatintel=debug",
        _ => "threatintel=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings {
        config: cli.config,
        db: cli.db,
    };
    match cli.command {
        Command::Report {
            session,
            deadline_secs,
            json,
            ephemeral,
        } => cmd_report(&settings, &session, deadline_secs, json, ephemeral).await,
        Command::History { session, json } => {
            cmd_history(&settings, &session, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sessions => {
            cmd_sessions(&settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Init => cmd_config_init()?,
                ConfigAction::Show => cmd_config_show(&settings)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Global flags that shape the loaded config.
struct Settings {
    config: Option<PathBuf>,
    db: Option<String>,
}

impl Settings {
    fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        if let Some(db) = &self.db {
            config.storage.location = db.clone();
        }
        Ok(config)
    }

    async fn store(&self, config: &AppConfig) -> Result<Arc<dyn SessionStore>> {
        Ok(open_store(&config.storage).await?)
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_report(
    settings: &Settings,
    session: &str,
    deadline_secs: Option<u64>,
    json: bool,
    ephemeral: bool,
) -> Result<ExitCode> {
    let mut config = settings.load()?;
    if let Some(secs) = deadline_secs {
        config.defaults.deadline_secs = secs;
    }

    let session = SessionId::new(session)?;
    let registry = CollectorRegistry::from_specs(&config.collectors)?;
    let store: Arc<dyn SessionStore> = if ephemeral {
        Arc::new(MemorySessionStore::new())
    } else {
        settings.store(&config).await?
    };

    info!(
        session = %session,
        collectors = registry.len(),
        deadline_secs = config.defaults.deadline_secs,
        "producing report"
    );

    let controller = RunController::new(registry, store, &RunConfig::from(&config));
    let reporter = CliProgress::new();
    let result = controller.produce_report(&session, &reporter).await?;

    if let Some(err) = &result.storage_error {
        eprintln!("warning: report was not saved to session history: {err}");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&run_json(&result))?);
    } else {
        print!("{}", render::render_report(&result.report));
    }

    match result.failure() {
        Some(failure) => {
            eprintln!("error: {failure}");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn run_json(result: &RunReport) -> serde_json::Value {
    serde_json::json!({
        "run_id": result.run_id,
        "session_id": result.session_id,
        "status": result.status,
        "report": result.report,
        "outcomes": result.outcomes,
        "storage_error": result.storage_error.as_ref().map(|e| e.to_string()),
        "elapsed_ms": result.duration.as_millis() as u64,
    })
}

async fn cmd_history(settings: &Settings, session: &str, json: bool) -> Result<()> {
    let config = settings.load()?;
    let session = SessionId::new(session)?;
    let store = settings.store(&config).await?;
    let turns = store.read_history(&session).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
        return Ok(());
    }

    if turns.is_empty() {
        println!("No history for session {session}.");
        return Ok(());
    }

    for turn in &turns {
        println!("{}", render::history_line(turn));
    }
    Ok(())
}

async fn cmd_sessions(settings: &Settings) -> Result<()> {
    let config = settings.load()?;
    let store = settings.store(&config).await?;
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions yet.");
    }
    for session in sessions {
        println!("{session}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(settings: &Settings) -> Result<()> {
    let config = settings.load()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn collector_reported(&self, outcome: &CollectorOutcome, reported: usize, total: usize) {
        let status = match &outcome.outcome {
            Outcome::Success(_) => "ok".to_string(),
            Outcome::TimedOut => "timed out".to_string(),
            Outcome::Failure { reason, .. } => format!("failed: {reason}"),
        };
        self.spinner.println(format!(
            "  [{reported}/{total}] {} {status}",
            outcome.collector
        ));
    }

    fn done(&self, summary: &str) {
        self.spinner.finish_and_clear();
        info!("{summary}");
    }
}
