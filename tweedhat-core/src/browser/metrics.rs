use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMetrics {
    pub sessions_opened: u64,
    pub navigations: u64,
    pub scroll_cycles: u64,
    pub nodes_seen: u64,
    pub records_appended: u64,
    pub duplicates_skipped: u64,
    pub failed_nodes: u64,
    pub login_attempts: u64,
    pub mobile_retries: u64,
    pub bot_detections: u64,
}

impl ScrapeMetrics {
    pub fn record_session_open(&mut self) {
        self.sessions_opened = self.sessions_opened.saturating_add(1);
    }

    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_scroll_cycles(&mut self, count: u64) {
        self.scroll_cycles = self.scroll_cycles.saturating_add(count);
    }

    pub fn record_nodes(&mut self, seen: u64, appended: u64, duplicates: u64, failed: u64) {
        self.nodes_seen = self.nodes_seen.saturating_add(seen);
        self.records_appended = self.records_appended.saturating_add(appended);
        self.duplicates_skipped = self.duplicates_skipped.saturating_add(duplicates);
        self.failed_nodes = self.failed_nodes.saturating_add(failed);
    }

    pub fn record_login_attempt(&mut self) {
        self.login_attempts = self.login_attempts.saturating_add(1);
    }

    pub fn record_mobile_retry(&mut self) {
        self.mobile_retries = self.mobile_retries.saturating_add(1);
    }

    pub fn record_bot_detection(&mut self) {
        self.bot_detections = self.bot_detections.saturating_add(1);
    }
}
