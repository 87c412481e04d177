use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use super::page::ScrapePage;

/// Fixed point in time after which a bounded poll gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Sleeps for `interval`, never past the deadline.
    pub async fn tick(&self, interval: Duration) {
        sleep(interval.min(self.remaining())).await;
    }
}

/// Something a page can be checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<'a> {
    Selector(&'a str),
    Text(&'a str),
}

impl Probe<'_> {
    async fn check(&self, page: &mut dyn ScrapePage) -> bool {
        let result = match self {
            Probe::Selector(selector) => page.element_present(selector).await,
            Probe::Text(text) => page.text_present(text).await,
        };
        match result {
            Ok(hit) => hit,
            Err(err) => {
                trace!(probe = ?self, error = %err, "probe failed, counting as miss");
                false
            }
        }
    }
}

/// Polls `probes` in order until one matches or `timeout` elapses.
///
/// Returns the index of the first matching probe. The probes are always
/// checked at least once, even with a zero timeout.
pub async fn wait_for_first(
    page: &mut dyn ScrapePage,
    probes: &[Probe<'_>],
    timeout: Duration,
    interval: Duration,
) -> Option<usize> {
    let deadline = Deadline::after(timeout);
    loop {
        for (idx, probe) in probes.iter().enumerate() {
            if probe.check(page).await {
                return Some(idx);
            }
        }
        if deadline.expired() {
            return None;
        }
        deadline.tick(interval).await;
    }
}

/// Polls the document height until it differs from `previous`.
pub async fn wait_for_height_change(
    page: &mut dyn ScrapePage,
    previous: f64,
    timeout: Duration,
    interval: Duration,
) -> Option<f64> {
    let deadline = Deadline::after(timeout);
    loop {
        match page.scroll_height().await {
            Ok(height) if (height - previous).abs() > f64::EPSILON => return Some(height),
            Ok(_) => {}
            Err(err) => trace!(error = %err, "height probe failed"),
        }
        if deadline.expired() {
            return None;
        }
        deadline.tick(interval).await;
    }
}
