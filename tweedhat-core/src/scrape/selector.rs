//! Backend fallback: every configured mirror first, then the origin site.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::browser::{
    wait_for_first, BrowserResult, DeviceProfile, HumanCadence, Probe, ScrapeMetrics, ScrapePage,
    SessionFactory,
};
use crate::config::ScraperConfig;

use super::auth::{AuthenticationFlow, Credentials};
use super::detect::{host_changed, MarkerSet, PageState};
use super::extract::{MirrorExtractor, OriginExtractor, TweetExtractor};
use super::model::{ScrapeSession, Source};
use super::pagination::PaginationEngine;
use super::probe::MediaProbe;
use super::ScrapeError;

/// Why one backend attempt produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptFailure {
    Unavailable(String),
    RateLimited(String),
    LoginRequired,
    LoginFailed(String),
    AuthenticationChallenge(String),
    ProfileNotFound,
    ProfileProtected,
    SiteError,
}

impl AttemptFailure {
    /// Failures that end the run instead of falling through to the next backend.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptFailure::AuthenticationChallenge(_)
                | AttemptFailure::ProfileNotFound
                | AttemptFailure::ProfileProtected
        )
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            AttemptFailure::RateLimited(reason) => write!(f, "rate limited: {reason}"),
            AttemptFailure::LoginRequired => f.write_str("login required and no credentials given"),
            AttemptFailure::LoginFailed(reason) => write!(f, "login failed: {reason}"),
            AttemptFailure::AuthenticationChallenge(reason) => {
                write!(f, "authentication challenge: {reason}")
            }
            AttemptFailure::ProfileNotFound => f.write_str("profile does not exist"),
            AttemptFailure::ProfileProtected => f.write_str("profile is protected"),
            AttemptFailure::SiteError => f.write_str("site reported an error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendAttempt {
    pub backend: Source,
    pub target: String,
    pub records: usize,
    pub failure: Option<AttemptFailure>,
}

impl BackendAttempt {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Accepted batch plus the trail that led to it.
#[derive(Debug)]
pub struct Selection {
    pub session: ScrapeSession,
    pub attempts: Vec<BackendAttempt>,
    pub metrics: ScrapeMetrics,
}

/// Who is being scraped and how.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub username: &'a str,
    pub max_tweets: Option<usize>,
    pub credentials: Option<&'a Credentials>,
}

enum OriginStop {
    JavaScriptDisabled,
    Failed(AttemptFailure),
}

impl From<AttemptFailure> for OriginStop {
    fn from(failure: AttemptFailure) -> Self {
        OriginStop::Failed(failure)
    }
}

pub struct BackendSelector<'a> {
    config: &'a ScraperConfig,
    factory: &'a dyn SessionFactory,
    probe: &'a dyn MediaProbe,
    markers: MarkerSet,
    pagination: PaginationEngine,
}

impl<'a> BackendSelector<'a> {
    pub fn new(
        config: &'a ScraperConfig,
        factory: &'a dyn SessionFactory,
        probe: &'a dyn MediaProbe,
    ) -> Self {
        Self {
            config,
            factory,
            probe,
            markers: MarkerSet::new(&config.markers),
            pagination: PaginationEngine::new(&config.pagination),
        }
    }

    /// Runs the fallback chain on one browser session and always closes it,
    /// including a session reopened for the mobile retry.
    pub async fn run(
        &self,
        target: Target<'_>,
        cadence: &mut HumanCadence,
    ) -> Result<Selection, ScrapeError> {
        let mut metrics = ScrapeMetrics::default();
        let mut attempts = Vec::new();
        let mut page = self
            .factory
            .open(DeviceProfile::Desktop)
            .await
            .map_err(ScrapeError::BrowserLaunch)?;
        metrics.record_session_open();

        let outcome = self
            .run_backends(&mut page, target, cadence, &mut attempts, &mut metrics)
            .await;

        if let Err(err) = page.close().await {
            warn!(error = %err, "Failed to close browser session");
        }

        match outcome {
            Ok(Some(session)) => Ok(Selection {
                session,
                attempts,
                metrics,
            }),
            Ok(None) => Err(ScrapeError::from_attempts(target.username, attempts)),
            Err(err) => Err(ScrapeError::BrowserLaunch(err)),
        }
    }

    async fn run_backends(
        &self,
        page: &mut Box<dyn ScrapePage>,
        target: Target<'_>,
        cadence: &mut HumanCadence,
        attempts: &mut Vec<BackendAttempt>,
        metrics: &mut ScrapeMetrics,
    ) -> BrowserResult<Option<ScrapeSession>> {
        for base in &self.config.mirror.base_urls {
            let url = profile_url(base, target.username);
            info!(username = %target.username, backend = %Source::Mirror, url = %url, "Trying backend");
            let result = self
                .attempt_mirror(page.as_mut(), &url, target, cadence, metrics)
                .await;
            if let Some(session) = record_attempt(attempts, Source::Mirror, url, result) {
                return Ok(Some(session));
            }
        }

        let url = profile_url(&self.config.origin.base_url, target.username);
        info!(username = %target.username, backend = %Source::Origin, url = %url, "Trying backend");
        let result = self.attempt_origin(page, &url, target, cadence, metrics).await?;
        Ok(record_attempt(attempts, Source::Origin, url, result))
    }

    async fn attempt_mirror(
        &self,
        page: &mut dyn ScrapePage,
        url: &str,
        target: Target<'_>,
        cadence: &mut HumanCadence,
        metrics: &mut ScrapeMetrics,
    ) -> Result<ScrapeSession, AttemptFailure> {
        let requested = Url::parse(url)
            .map_err(|err| AttemptFailure::Unavailable(format!("invalid mirror url: {err}")))?;
        page.goto(url)
            .await
            .map_err(|err| AttemptFailure::Unavailable(format!("navigation failed: {err}")))?;
        metrics.record_navigation();

        let current = page.current_url().await.unwrap_or_default();
        if host_changed(url, &current) {
            return Err(AttemptFailure::Unavailable(format!("redirected to {current}")));
        }

        let extractor = MirrorExtractor::default();
        let probes = [Probe::Selector(extractor.container_selector())];
        let timeout = Duration::from_secs(self.config.mirror.ready_timeout_seconds);
        if wait_for_first(page, &probes, timeout, cadence.poll_interval())
            .await
            .is_none()
        {
            // Block markers only count on pages without a timeline; posts may quote them.
            let source = page.page_source().await.unwrap_or_default();
            if self.markers.is_blocked(&source) {
                metrics.record_bot_detection();
                page.screenshot("mirror_blocked").await;
                return Err(AttemptFailure::RateLimited("block page served".to_string()));
            }
            return Err(AttemptFailure::Unavailable("timeline never appeared".to_string()));
        }

        let session = self
            .paginate(page, &requested, &extractor, target, cadence, metrics)
            .await?;

        if self.config.mirror.probe_media {
            if let Some(uri) = session.tweets().iter().find_map(|tweet| tweet.first_media_uri()) {
                if !self.probe.serves_image(&uri).await {
                    metrics.record_bot_detection();
                    return Err(AttemptFailure::RateLimited(format!(
                        "media {uri} did not serve an image"
                    )));
                }
            }
        }
        Ok(session)
    }

    /// Origin attempt with at most one mobile retry. Only a failure to
    /// reopen the browser escapes as an error.
    async fn attempt_origin(
        &self,
        page: &mut Box<dyn ScrapePage>,
        url: &str,
        target: Target<'_>,
        cadence: &mut HumanCadence,
        metrics: &mut ScrapeMetrics,
    ) -> BrowserResult<Result<ScrapeSession, AttemptFailure>> {
        let mut retried = false;
        loop {
            match self.origin_once(page.as_mut(), url, target, cadence, metrics).await {
                Ok(session) => return Ok(Ok(session)),
                Err(OriginStop::Failed(failure)) => return Ok(Err(failure)),
                Err(OriginStop::JavaScriptDisabled) if retried => {
                    return Ok(Err(AttemptFailure::Unavailable(
                        "javascript disabled on mobile profile too".to_string(),
                    )));
                }
                Err(OriginStop::JavaScriptDisabled) => {
                    warn!(device = %page.device(), "JavaScript is disabled, retrying with mobile profile");
                    page.dump_html("javascript_disabled").await;
                    page.close().await?;
                    *page = self.factory.open(DeviceProfile::Mobile).await?;
                    metrics.record_session_open();
                    metrics.record_mobile_retry();
                    retried = true;
                }
            }
        }
    }

    async fn origin_once(
        &self,
        page: &mut dyn ScrapePage,
        url: &str,
        target: Target<'_>,
        cadence: &mut HumanCadence,
        metrics: &mut ScrapeMetrics,
    ) -> Result<ScrapeSession, OriginStop> {
        let requested = Url::parse(url)
            .map_err(|err| AttemptFailure::Unavailable(format!("invalid origin url: {err}")))?;
        if page.load_cookies().await {
            info!("Loaded saved cookies");
        }
        self.navigate(page, url, metrics).await?;

        match self.classify(page).await {
            PageState::JavaScriptDisabled => return Err(OriginStop::JavaScriptDisabled),
            PageState::AuthGate => {
                let Some(credentials) = target.credentials else {
                    page.screenshot("login_required").await;
                    return Err(AttemptFailure::LoginRequired.into());
                };
                metrics.record_login_attempt();
                let flow = AuthenticationFlow::new(
                    &self.config.auth,
                    &self.config.markers,
                    credentials,
                );
                let outcome = flow.run(page, cadence).await;
                match outcome.failure {
                    Some(failure) if failure.requires_manual_intervention() => {
                        return Err(AttemptFailure::AuthenticationChallenge(failure.to_string()).into());
                    }
                    Some(failure) => {
                        return Err(AttemptFailure::LoginFailed(failure.to_string()).into());
                    }
                    None => {}
                }
                self.navigate(page, url, metrics).await?;
                match self.classify(page).await {
                    PageState::JavaScriptDisabled => return Err(OriginStop::JavaScriptDisabled),
                    PageState::AuthGate => {
                        return Err(AttemptFailure::LoginFailed(
                            "still redirected to login after signing in".to_string(),
                        )
                        .into());
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        let extractor = OriginExtractor::default();
        self.await_profile(page, &extractor, cadence).await?;
        let session = self
            .paginate(page, &requested, &extractor, target, cadence, metrics)
            .await?;
        Ok(session)
    }

    async fn navigate(
        &self,
        page: &mut dyn ScrapePage,
        url: &str,
        metrics: &mut ScrapeMetrics,
    ) -> Result<(), AttemptFailure> {
        page.goto(url)
            .await
            .map_err(|err| AttemptFailure::Unavailable(format!("navigation failed: {err}")))?;
        metrics.record_navigation();
        Ok(())
    }

    async fn classify(&self, page: &mut dyn ScrapePage) -> PageState {
        let url = page.current_url().await.unwrap_or_default();
        let title = page.title().await.unwrap_or_default();
        let source = page.page_source().await.unwrap_or_default();
        self.markers.classify_origin(&url, &title, &source)
    }

    /// Waits for either a timeline container or a terminal profile marker.
    /// A rendered container always wins over marker text on the same page.
    async fn await_profile(
        &self,
        page: &mut dyn ScrapePage,
        extractor: &dyn TweetExtractor,
        cadence: &mut HumanCadence,
    ) -> Result<(), AttemptFailure> {
        let literals = MarkerSet::terminal_literals(&self.config.markers);
        let mut probes = vec![Probe::Selector(extractor.container_selector())];
        if let Some(alternate) = extractor.alternate_container_selector() {
            probes.push(Probe::Selector(alternate));
        }
        let containers = probes.len();
        probes.extend(literals.iter().map(|text| Probe::Text(text.as_str())));

        let timeout = Duration::from_secs(self.config.origin.ready_timeout_seconds);
        let Some(idx) = wait_for_first(page, &probes, timeout, cadence.poll_interval()).await
        else {
            page.screenshot("timeline_timeout").await;
            page.dump_html("timeline_timeout").await;
            return Err(AttemptFailure::Unavailable("timeline never appeared".to_string()));
        };
        let Some(literal) = idx
            .checked_sub(containers)
            .and_then(|marker| literals.get(marker))
        else {
            return Ok(());
        };
        page.screenshot("profile_unavailable").await;
        Err(match self.markers.classify_terminal(literal) {
            PageState::NotFound => AttemptFailure::ProfileNotFound,
            PageState::Protected => AttemptFailure::ProfileProtected,
            PageState::SiteError => AttemptFailure::SiteError,
            _ => AttemptFailure::Unavailable(format!("page shows {literal:?}")),
        })
    }

    async fn paginate(
        &self,
        page: &mut dyn ScrapePage,
        requested: &Url,
        extractor: &dyn TweetExtractor,
        target: Target<'_>,
        cadence: &mut HumanCadence,
        metrics: &mut ScrapeMetrics,
    ) -> Result<ScrapeSession, AttemptFailure> {
        let mut session = ScrapeSession::new(target.username, extractor.source(), target.max_tweets);
        match self
            .pagination
            .run(page, requested, extractor, &mut session, cadence)
            .await
        {
            Ok(report) => {
                metrics.record_scroll_cycles(report.cycles as u64);
                metrics.record_nodes(
                    report.nodes_seen as u64,
                    report.appended as u64,
                    report.duplicates as u64,
                    report.failed_nodes as u64,
                );
            }
            Err(err) if session.is_empty() => {
                return Err(AttemptFailure::Unavailable(format!("pagination failed: {err}")));
            }
            Err(err) => {
                warn!(error = %err, records = session.len(), "Pagination failed, keeping partial results");
                metrics.record_nodes(session.len() as u64, session.len() as u64, 0, 0);
            }
        }
        if session.is_empty() {
            return Err(AttemptFailure::Unavailable("no posts extracted".to_string()));
        }
        Ok(session)
    }
}

fn profile_url(base: &str, username: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), username)
}

fn record_attempt(
    attempts: &mut Vec<BackendAttempt>,
    backend: Source,
    target: String,
    result: Result<ScrapeSession, AttemptFailure>,
) -> Option<ScrapeSession> {
    match result {
        Ok(session) => {
            info!(backend = %backend, tweets = session.len(), "Backend succeeded");
            attempts.push(BackendAttempt {
                backend,
                target,
                records: session.len(),
                failure: None,
            });
            Some(session)
        }
        Err(failure) => {
            warn!(backend = %backend, target = %target, reason = %failure, "Backend attempt failed");
            attempts.push(BackendAttempt {
                backend,
                target,
                records: 0,
                failure: Some(failure),
            });
            None
        }
    }
}
