use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

use crate::config::HumanSimulationSection;

use super::error::BrowserResult;
use super::page::ScrapePage;

/// Randomized magnitudes for keystrokes, scroll bursts and render waits.
#[derive(Debug)]
pub struct HumanCadence {
    config: HumanSimulationSection,
    rng: StdRng,
}

impl HumanCadence {
    pub fn new(config: HumanSimulationSection) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(config: HumanSimulationSection, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    pub fn keystroke_delay(&mut self) -> Duration {
        self.random_duration(self.config.keystroke_delay_ms)
    }

    pub fn typing_pause(&mut self) -> Duration {
        self.random_duration(self.config.typing_pause_ms)
    }

    pub fn scroll_burst(&mut self) -> f64 {
        f64::from(self.random_in(self.config.scroll_burst_px))
    }

    pub fn scroll_settle(&mut self) -> Duration {
        self.random_duration(self.config.scroll_pause_ms)
    }

    pub fn render_window(&mut self) -> Duration {
        self.random_duration(self.config.render_wait_ms)
    }

    pub fn extended_window(&mut self) -> Duration {
        self.random_duration(self.config.extended_wait_ms)
    }

    pub async fn pause(&mut self) {
        let delay = self.typing_pause();
        sleep(delay).await;
    }

    /// Focuses `selector` and types `text` one character at a time.
    pub async fn type_text(
        &mut self,
        page: &mut dyn ScrapePage,
        selector: &str,
        text: &str,
    ) -> BrowserResult<()> {
        page.click(selector).await?;
        for ch in text.chars() {
            page.type_into(selector, ch.encode_utf8(&mut [0; 4])).await?;
            let delay = self.keystroke_delay();
            sleep(delay).await;
        }
        Ok(())
    }

    fn random_duration(&mut self, bounds: [u32; 2]) -> Duration {
        Duration::from_millis(u64::from(self.random_in(bounds)))
    }

    fn random_in(&mut self, bounds: [u32; 2]) -> u32 {
        let lower = bounds[0].min(bounds[1]);
        let upper = bounds[0].max(bounds[1]);
        self.rng.gen_range(lower..=upper)
    }
}
