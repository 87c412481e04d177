use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, trace};
use url::Url;

use crate::browser::{wait_for_height_change, BrowserResult, HumanCadence, ScrapePage};
use crate::config::PaginationSection;

use super::extract::TweetExtractor;
use super::model::{PushOutcome, ScrapeSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CapReached,
    Converged,
    CeilingReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationReport {
    pub cycles: usize,
    pub nodes_seen: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub failed_nodes: usize,
    pub stop: StopReason,
}

/// Scroll-and-harvest loop over one timeline page.
#[derive(Debug, Clone)]
pub struct PaginationEngine {
    max_cycles: usize,
}

enum StepOutcome {
    Grew(f64),
    NextPage,
    Converged,
}

impl PaginationEngine {
    pub fn new(config: &PaginationSection) -> Self {
        Self {
            max_cycles: config.max_scroll_cycles.max(1),
        }
    }

    pub fn max_cycles(&self) -> usize {
        self.max_cycles
    }

    /// Harvests containers into `session` until the cap, convergence or the
    /// cycle ceiling. Records already pushed stay in `session` if a page
    /// operation fails midway. `requested` resolves relative links when the
    /// page cannot report its own URL.
    pub async fn run(
        &self,
        page: &mut dyn ScrapePage,
        requested: &Url,
        extractor: &dyn TweetExtractor,
        session: &mut ScrapeSession,
        cadence: &mut HumanCadence,
    ) -> BrowserResult<PaginationReport> {
        let mut report = PaginationReport {
            cycles: 0,
            nodes_seen: 0,
            appended: 0,
            duplicates: 0,
            failed_nodes: 0,
            stop: StopReason::CeilingReached,
        };
        let mut page_url = current_page_url(page, requested).await;
        let mut last_height = page.scroll_height().await?;
        let mut processed = 0usize;
        let mut converged = false;

        loop {
            report.cycles += 1;
            let snapshots = snapshot_containers(page, extractor).await?;
            if snapshots.len() < processed {
                debug!(
                    previous = processed,
                    current = snapshots.len(),
                    "container list shrank, rescanning from the top"
                );
                processed = 0;
            }

            for snapshot in &snapshots[processed..] {
                report.nodes_seen += 1;
                let Some(record) = extractor.extract(snapshot, &page_url) else {
                    report.failed_nodes += 1;
                    continue;
                };
                let id = record.id.clone();
                match session.push(record) {
                    PushOutcome::Appended => {
                        report.appended += 1;
                        trace!(id = %id, total = session.len(), "record appended");
                    }
                    PushOutcome::Duplicate => report.duplicates += 1,
                    PushOutcome::Full => break,
                }
                if session.is_full() {
                    break;
                }
            }
            processed = snapshots.len();

            if session.is_full() {
                report.stop = StopReason::CapReached;
                break;
            }
            if converged {
                report.stop = StopReason::Converged;
                break;
            }
            if report.cycles >= self.max_cycles {
                report.stop = StopReason::CeilingReached;
                break;
            }

            match self.scroll_step(page, extractor, last_height, cadence).await? {
                StepOutcome::Grew(height) => last_height = height,
                StepOutcome::NextPage => {
                    processed = 0;
                    page_url = current_page_url(page, requested).await;
                    last_height = page.scroll_height().await?;
                }
                StepOutcome::Converged => converged = true,
            }
        }

        info!(
            username = %session.username(),
            backend = %session.backend_used(),
            cycles = report.cycles,
            records = session.len(),
            duplicates = report.duplicates,
            stop = ?report.stop,
            "Pagination finished"
        );
        Ok(report)
    }

    async fn scroll_step(
        &self,
        page: &mut dyn ScrapePage,
        extractor: &dyn TweetExtractor,
        last_height: f64,
        cadence: &mut HumanCadence,
    ) -> BrowserResult<StepOutcome> {
        let interval = cadence.poll_interval();
        page.scroll_by(cadence.scroll_burst()).await?;
        sleep(cadence.scroll_settle()).await;
        page.scroll_to_bottom().await?;

        let window = cadence.render_window();
        if let Some(height) = wait_for_height_change(page, last_height, window, interval).await {
            return Ok(StepOutcome::Grew(height));
        }
        let extended = cadence.extended_window();
        if let Some(height) = wait_for_height_change(page, last_height, extended, interval).await
        {
            debug!(height, "height changed inside extended window");
            return Ok(StepOutcome::Grew(height));
        }
        if let Some(selector) = extractor.load_more_selector() {
            if page.follow_link(selector).await? {
                debug!(selector, "followed load-more link");
                return Ok(StepOutcome::NextPage);
            }
        }
        Ok(StepOutcome::Converged)
    }
}

async fn snapshot_containers(
    page: &mut dyn ScrapePage,
    extractor: &dyn TweetExtractor,
) -> BrowserResult<Vec<String>> {
    let primary = page.node_snapshots(extractor.container_selector()).await?;
    if !primary.is_empty() {
        return Ok(primary);
    }
    match extractor.alternate_container_selector() {
        Some(alternate) => page.node_snapshots(alternate).await,
        None => Ok(primary),
    }
}

async fn current_page_url(page: &mut dyn ScrapePage, fallback: &Url) -> Url {
    match page.current_url().await {
        Ok(raw) => Url::parse(&raw).unwrap_or_else(|_| fallback.clone()),
        Err(_) => fallback.clone(),
    }
}
