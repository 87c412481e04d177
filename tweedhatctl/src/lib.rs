use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tweedhat_core::{
    load_scraper_config, scrape, BackendAttempt, ScrapeError, ScrapeRequest, ScrapeRun,
    ScraperConfig,
};

const DEFAULT_CONFIG: &str = "configs/scraper.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tweedhat_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Scrape(#[from] ScrapeError),
    #[error("logging setup failed: {0}")]
    Logging(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scrape posts from a public profile", long_about = None)]
pub struct Cli {
    /// Profile to scrape, with or without the leading @
    pub username: String,
    /// Stop after this many posts (0 scrapes until the timeline ends)
    #[arg(long = "max")]
    pub max_tweets: Option<usize>,
    /// Output file; relative paths land in the tweets directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub visible: bool,
    /// Verbose logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Login identifier used when the origin site asks for a login
    #[arg(long, env = "TWEEDHAT_EMAIL")]
    pub email: Option<String>,
    #[arg(long, env = "TWEEDHAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Use a throwaway browser profile
    #[arg(long, default_value_t = false)]
    pub no_profile: bool,
    /// Persistent browser profile directory
    #[arg(long)]
    pub profile_dir: Option<PathBuf>,
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Scraper configuration; defaults apply when omitted and configs/scraper.toml is absent
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    pub fn request(&self) -> ScrapeRequest {
        ScrapeRequest {
            username: self.username.clone(),
            max_tweets: self.max_tweets,
            email: self.email.clone(),
            password: self.password.clone(),
            use_profile: self.no_profile.then_some(false),
            profile_dir: self.profile_dir.clone(),
            user_agent: self.user_agent.clone(),
            headless: self.visible.then_some(false),
            output: self.output.clone(),
        }
    }
}

/// What a finished invocation reports.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Summary {
    Completed(ScrapeRun),
    NoResults {
        username: String,
        reason: String,
        attempts: Vec<BackendAttempt>,
    },
}

impl Summary {
    /// Profiles that yield nothing are a normal outcome; only crash-class
    /// errors stay errors.
    pub fn from_result(username: &str, result: std::result::Result<ScrapeRun, ScrapeError>) -> Result<Self> {
        match result {
            Ok(run) => Ok(Summary::Completed(run)),
            Err(err) if err.is_crash() => Err(err.into()),
            Err(err) => Ok(Summary::NoResults {
                username: username.trim().trim_start_matches('@').to_string(),
                reason: err.to_string(),
                attempts: err.attempts().to_vec(),
            }),
        }
    }

    fn display(&self) -> String {
        let mut out = String::new();
        match self {
            Summary::Completed(run) => {
                let _ = writeln!(
                    out,
                    "Saved {} posts from @{} via {} to {}",
                    run.tweet_count,
                    run.username,
                    run.backend,
                    run.output_path.display()
                );
                let _ = write!(
                    out,
                    "scroll cycles: {}  duplicates skipped: {}  login attempts: {}",
                    run.metrics.scroll_cycles,
                    run.metrics.duplicates_skipped,
                    run.metrics.login_attempts
                );
            }
            Summary::NoResults {
                username,
                reason,
                attempts,
            } => {
                let _ = write!(out, "No posts scraped for @{username}: {reason}");
                for attempt in attempts {
                    let outcome = match &attempt.failure {
                        Some(failure) => failure.to_string(),
                        None => format!("{} posts", attempt.records),
                    };
                    let _ = write!(out, "\n  {} {}: {}", attempt.backend, attempt.target, outcome);
                }
            }
        }
        out
    }
}

pub fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| AppError::Logging(err.to_string()))
}

/// Loads the configured file, or the default location when it exists.
pub fn load_config(path: Option<&Path>) -> Result<ScraperConfig> {
    match path {
        Some(path) => Ok(load_scraper_config(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(load_scraper_config(DEFAULT_CONFIG)?),
        None => {
            warn!(path = DEFAULT_CONFIG, "No scraper config found, using defaults");
            Ok(ScraperConfig::default())
        }
    }
}

pub fn run(cli: Cli) -> Result<Summary> {
    let config = load_config(cli.config.as_deref())?;
    let request = cli.request();
    info!(username = %request.username, config = ?cli.config, "tweedhatctl starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(scrape(request, &config));
    let summary = Summary::from_result(&cli.username, result)?;
    render(&summary, cli.format)?;
    Ok(summary)
}

fn render(summary: &Summary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", summary.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(summary)?;
            println!("{}", json);
            Ok(())
        }
    }
}
