//! Profile scraping: backend selection, pagination, extraction and output.

pub mod auth;
pub mod detect;
pub mod extract;
pub mod model;
pub mod pagination;
pub mod persist;
pub mod probe;
pub mod selector;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{
    BrowserError, BrowserLauncher, DeviceProfile, HumanCadence, LaunchOptions, ScrapeMetrics,
    SessionFactory,
};
use crate::config::ScraperConfig;

pub use auth::{AuthFailure, AuthOutcome, AuthState, AuthenticationFlow, Credentials};
pub use detect::{MarkerSet, PageState};
pub use extract::{FieldCascade, MirrorExtractor, OriginExtractor, TweetExtractor};
pub use model::{
    MediaRef, PushOutcome, ScrapeSession, Source, Stats, TweetRecord, UNKNOWN_ID,
    VIDEO_PREVIEW_TAG,
};
pub use pagination::{PaginationEngine, PaginationReport, StopReason};
pub use persist::{OutputDocument, PersistError, PersistenceWriter};
pub use probe::{HttpMediaProbe, MediaProbe, TrustingProbe};
pub use selector::{AttemptFailure, BackendAttempt, BackendSelector, Selection, Target};

/// Everything one scrape invocation needs besides the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    pub username: String,
    /// `None` or `Some(0)` scrape until the timeline runs out.
    pub max_tweets: Option<usize>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub use_profile: Option<bool>,
    pub profile_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub headless: Option<bool>,
    pub output: Option<PathBuf>,
}

impl ScrapeRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Username without surrounding whitespace or a leading `@`.
    pub fn normalized_username(&self) -> Option<String> {
        let name = self.username.trim().trim_start_matches('@').trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.email.clone(), self.password.clone())
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.headless,
            use_profile: self.use_profile,
            profile_dir: self.profile_dir.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// A completed scrape whose output file is on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRun {
    pub username: String,
    pub output_path: PathBuf,
    pub backend: Source,
    pub tweet_count: usize,
    pub scraped_at: DateTime<Utc>,
    pub attempts: Vec<BackendAttempt>,
    pub metrics: ScrapeMetrics,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("browser launch failed: {0}")]
    BrowserLaunch(#[source] BrowserError),
    #[error("no backend returned posts for {username} ({})", summarize(.attempts))]
    Exhausted {
        username: String,
        attempts: Vec<BackendAttempt>,
    },
    #[error("authentication challenge for {username}: {reason}")]
    AuthenticationChallenge {
        username: String,
        reason: String,
        attempts: Vec<BackendAttempt>,
    },
    #[error("profile {username} does not exist")]
    ProfileNotFound {
        username: String,
        attempts: Vec<BackendAttempt>,
    },
    #[error("profile {username} is protected")]
    ProfileProtected {
        username: String,
        attempts: Vec<BackendAttempt>,
    },
    #[error("failed to save results: {0}")]
    Persist(#[from] PersistError),
}

impl ScrapeError {
    /// Picks the most specific error for a run where no backend succeeded.
    pub fn from_attempts(username: &str, attempts: Vec<BackendAttempt>) -> Self {
        let username = username.to_string();
        let terminal = attempts
            .iter()
            .rev()
            .filter_map(|attempt| attempt.failure.as_ref())
            .find(|failure| failure.is_terminal())
            .cloned();
        match terminal {
            Some(AttemptFailure::AuthenticationChallenge(reason)) => {
                ScrapeError::AuthenticationChallenge {
                    username,
                    reason,
                    attempts,
                }
            }
            Some(AttemptFailure::ProfileNotFound) => ScrapeError::ProfileNotFound { username, attempts },
            Some(AttemptFailure::ProfileProtected) => {
                ScrapeError::ProfileProtected { username, attempts }
            }
            _ => ScrapeError::Exhausted { username, attempts },
        }
    }

    pub fn attempts(&self) -> &[BackendAttempt] {
        match self {
            ScrapeError::Exhausted { attempts, .. }
            | ScrapeError::AuthenticationChallenge { attempts, .. }
            | ScrapeError::ProfileNotFound { attempts, .. }
            | ScrapeError::ProfileProtected { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Errors that mean the tool itself could not do its job, as opposed to
    /// a profile that yielded nothing.
    pub fn is_crash(&self) -> bool {
        matches!(
            self,
            ScrapeError::InvalidRequest(_) | ScrapeError::BrowserLaunch(_) | ScrapeError::Persist(_)
        )
    }
}

fn summarize(attempts: &[BackendAttempt]) -> String {
    if attempts.is_empty() {
        return "no backend attempted".to_string();
    }
    attempts
        .iter()
        .map(|attempt| match &attempt.failure {
            Some(failure) => format!("{}: {failure}", attempt.backend),
            None => format!("{}: ok", attempt.backend),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Scrapes one profile with a real Chromium and writes the output file.
pub async fn scrape(request: ScrapeRequest, config: &ScraperConfig) -> Result<ScrapeRun, ScrapeError> {
    let config = Arc::new(config.clone());
    let launcher = BrowserLauncher::new(Arc::clone(&config), request.launch_options())
        .map_err(ScrapeError::BrowserLaunch)?;
    let probe = media_probe(&config, launcher.user_agent_for(DeviceProfile::Desktop));
    let writer = PersistenceWriter::new(&config.output);
    let mut cadence = HumanCadence::new(config.human.clone());
    scrape_with(&request, &config, &launcher, probe.as_ref(), &writer, &mut cadence).await
}

/// [`scrape`] with every collaborator supplied by the caller.
pub async fn scrape_with(
    request: &ScrapeRequest,
    config: &ScraperConfig,
    factory: &dyn SessionFactory,
    probe: &dyn MediaProbe,
    writer: &PersistenceWriter,
    cadence: &mut HumanCadence,
) -> Result<ScrapeRun, ScrapeError> {
    let username = request
        .normalized_username()
        .ok_or_else(|| ScrapeError::InvalidRequest("username is empty".to_string()))?;
    let credentials = request.credentials();
    if credentials.is_none() && (request.email.is_some() || request.password.is_some()) {
        warn!("Login needs both an identifier and a password, continuing without login");
    }
    info!(
        username = %username,
        max_tweets = ?request.max_tweets,
        login = credentials.is_some(),
        "Starting scrape"
    );

    let selector = BackendSelector::new(config, factory, probe);
    let target = Target {
        username: &username,
        max_tweets: request.max_tweets,
        credentials: credentials.as_ref(),
    };
    let selection = selector.run(target, cadence).await?;
    let output_path = writer.write(&selection.session, request.output.as_deref())?;

    Ok(ScrapeRun {
        tweet_count: selection.session.len(),
        backend: selection.session.backend_used(),
        scraped_at: selection.session.scraped_at(),
        username,
        output_path,
        attempts: selection.attempts,
        metrics: selection.metrics,
    })
}

fn media_probe(config: &ScraperConfig, user_agent: &str) -> Box<dyn MediaProbe> {
    if !config.mirror.probe_media {
        return Box::new(TrustingProbe);
    }
    let timeout = Duration::from_secs(config.mirror.probe_timeout_seconds);
    match HttpMediaProbe::new(timeout, user_agent) {
        Ok(probe) => Box::new(probe),
        Err(err) => {
            warn!(error = %err, "Media probe unavailable, trusting mirror media");
            Box::new(TrustingProbe)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(backend: Source, failure: Option<AttemptFailure>) -> BackendAttempt {
        BackendAttempt {
            backend,
            target: format!("https://{backend}.example/someone"),
            records: 0,
            failure,
        }
    }

    #[test]
    fn usernames_are_normalized() {
        assert_eq!(ScrapeRequest::new(" @someone ").normalized_username().as_deref(), Some("someone"));
        assert_eq!(ScrapeRequest::new("@").normalized_username(), None);
        assert_eq!(ScrapeRequest::new("").normalized_username(), None);
    }

    #[test]
    fn terminal_failure_wins_over_exhaustion() {
        let err = ScrapeError::from_attempts(
            "someone",
            vec![
                attempt(Source::Mirror, Some(AttemptFailure::Unavailable("redirect".into()))),
                attempt(Source::Origin, Some(AttemptFailure::ProfileProtected)),
            ],
        );
        assert!(matches!(err, ScrapeError::ProfileProtected { .. }));
        assert_eq!(err.attempts().len(), 2);
        assert!(!err.is_crash());
    }

    #[test]
    fn exhaustion_lists_every_backend() {
        let err = ScrapeError::from_attempts(
            "someone",
            vec![
                attempt(Source::Mirror, Some(AttemptFailure::RateLimited("media".into()))),
                attempt(Source::Origin, Some(AttemptFailure::LoginRequired)),
            ],
        );
        let message = err.to_string();
        assert!(message.contains("mirror: rate limited: media"));
        assert!(message.contains("origin: login required"));
    }

    #[test]
    fn crash_classification() {
        assert!(ScrapeError::InvalidRequest("x".into()).is_crash());
        assert!(ScrapeError::BrowserLaunch(BrowserError::Launch("no chrome".into())).is_crash());
        assert!(!ScrapeError::from_attempts("someone", Vec::new()).is_crash());
    }
}
