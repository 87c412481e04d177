//! Scripted in-memory browser shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;

use tweedhat_core::browser::{
    BrowserError, BrowserResult, DeviceProfile, HumanCadence, ScrapePage, SessionFactory,
};
use tweedhat_core::config::{HumanSimulationSection, ScraperConfig};

pub const MIRROR: &str = "https://nitter.test";
pub const ORIGIN: &str = "https://x.test";
pub const MIRROR_ITEM: &str = ".timeline-item";
pub const ORIGIN_ITEM: &str = "article[data-testid='tweet']";
pub const HEIGHT_PER_BATCH: f64 = 1200.0;

/// What the browser shows at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub url: String,
    pub title: String,
    pub source: String,
    /// Rendered body text.
    pub texts: Vec<String>,
    /// Selectors that match at least one element.
    pub elements: Vec<String>,
    pub element_texts: Vec<(String, Vec<String>)>,
    /// Timeline nodes, revealed one batch per scroll to the bottom.
    pub batches: Vec<Vec<String>>,
    /// Only this many trailing batches stay in the DOM.
    pub window: Option<usize>,
    /// Control label or link selector leading to another screen.
    pub transitions: Vec<(String, Screen)>,
    pub signs_in: bool,
}

impl Screen {
    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_element(mut self, selector: &str) -> Self {
        self.elements.push(selector.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.texts.push(text.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_timeline(mut self, container: &str, batches: Vec<Vec<String>>) -> Self {
        self.elements.push(container.to_string());
        self.batches = batches;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_element_texts(mut self, selector: &str, texts: &[&str]) -> Self {
        self.elements.push(selector.to_string());
        self.element_texts.push((
            selector.to_string(),
            texts.iter().map(|text| text.to_string()).collect(),
        ));
        self
    }

    pub fn on(mut self, trigger: &str, next: Screen) -> Self {
        self.transitions.push((trigger.to_string(), next));
        self
    }

    pub fn signing_in(mut self) -> Self {
        self.signs_in = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub url: String,
    pub screen: Screen,
    /// Shown instead of `screen` until a screen that signs in was reached.
    pub signed_out: Option<Screen>,
}

impl Route {
    pub fn new(url: &str, screen: Screen) -> Self {
        Self {
            url: url.to_string(),
            screen,
            signed_out: None,
        }
    }

    pub fn gated(url: &str, signed_out: Screen, screen: Screen) -> Self {
        Self {
            url: url.to_string(),
            screen,
            signed_out: Some(signed_out),
        }
    }
}

/// Everything the fake sessions did, in order.
#[derive(Debug, Default)]
pub struct Journal {
    pub events: Vec<String>,
    pub typed: HashMap<String, String>,
    pub signed_in: bool,
}

impl Journal {
    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|seen| seen == event)
    }
}

pub type SharedJournal = Rc<RefCell<Journal>>;

pub struct FakePage {
    device: DeviceProfile,
    routes: Vec<Route>,
    screen: Screen,
    revealed: usize,
    journal: SharedJournal,
    closed: bool,
}

impl FakePage {
    pub fn new(device: DeviceProfile, routes: Vec<Route>, journal: SharedJournal) -> Self {
        Self {
            device,
            routes,
            screen: Screen::at("about:blank"),
            revealed: 0,
            journal,
            closed: false,
        }
    }

    /// A page already showing `screen`.
    pub fn showing(screen: Screen, journal: SharedJournal) -> Self {
        let mut page = Self::new(DeviceProfile::Desktop, Vec::new(), journal);
        page.show(screen);
        page
    }

    fn log(&self, event: String) {
        self.journal.borrow_mut().events.push(event);
    }

    fn show(&mut self, screen: Screen) {
        if screen.signs_in {
            self.journal.borrow_mut().signed_in = true;
        }
        self.revealed = usize::from(!screen.batches.is_empty());
        self.screen = screen;
    }

    fn transition(&mut self, trigger: &str) -> bool {
        let next = self
            .screen
            .transitions
            .iter()
            .find(|(label, _)| label == trigger)
            .map(|(_, screen)| screen.clone());
        match next {
            Some(screen) => {
                self.show(screen);
                true
            }
            None => false,
        }
    }

    fn visible_nodes(&self) -> Vec<String> {
        let first = match self.screen.window {
            Some(window) => self.revealed.saturating_sub(window),
            None => 0,
        };
        self.screen.batches[first..self.revealed]
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn ensure_open(&self) -> BrowserResult<()> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait(?Send)]
impl ScrapePage for FakePage {
    fn device(&self) -> DeviceProfile {
        self.device
    }

    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        self.log(format!("goto:{url}"));
        let signed_in = self.journal.borrow().signed_in;
        let route = self
            .routes
            .iter()
            .find(|route| route.url == url)
            .cloned()
            .ok_or_else(|| BrowserError::Unexpected(format!("no route for {url}")))?;
        let screen = match route.signed_out {
            Some(gate) if !signed_in => gate,
            _ => route.screen,
        };
        self.show(screen);
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        self.ensure_open()?;
        Ok(self.screen.url.clone())
    }

    async fn title(&mut self) -> BrowserResult<String> {
        Ok(self.screen.title.clone())
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        Ok(self.screen.source.clone())
    }

    async fn element_present(&mut self, selector: &str) -> BrowserResult<bool> {
        self.ensure_open()?;
        Ok(self.screen.elements.iter().any(|known| known == selector))
    }

    async fn text_present(&mut self, text: &str) -> BrowserResult<bool> {
        let needle = text.to_lowercase();
        Ok(self
            .screen
            .texts
            .iter()
            .any(|shown| shown.to_lowercase().contains(&needle)))
    }

    async fn node_snapshots(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        self.ensure_open()?;
        if self.screen.elements.iter().any(|known| known == selector) {
            Ok(self.visible_nodes())
        } else {
            Ok(Vec::new())
        }
    }

    async fn element_texts(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        Ok(self
            .screen
            .element_texts
            .iter()
            .find(|(known, _)| known == selector)
            .map(|(_, texts)| texts.clone())
            .unwrap_or_default())
    }

    async fn scroll_height(&mut self) -> BrowserResult<f64> {
        self.ensure_open()?;
        Ok(HEIGHT_PER_BATCH * self.revealed.max(1) as f64)
    }

    async fn scroll_by(&mut self, _delta_y: f64) -> BrowserResult<()> {
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> BrowserResult<()> {
        self.ensure_open()?;
        if self.revealed < self.screen.batches.len() {
            self.revealed += 1;
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<bool> {
        Ok(self.screen.elements.iter().any(|known| known == selector))
    }

    async fn type_into(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        self.journal
            .borrow_mut()
            .typed
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> BrowserResult<()> {
        self.log(format!("enter:{selector}"));
        self.transition("Enter");
        Ok(())
    }

    async fn click_control_with_text(&mut self, label: &str) -> BrowserResult<bool> {
        let hit = self.transition(label);
        if hit {
            self.log(format!("control:{label}"));
        }
        Ok(hit)
    }

    async fn follow_link(&mut self, selector: &str) -> BrowserResult<bool> {
        let hit = self.transition(selector);
        if hit {
            self.log(format!("follow:{selector}"));
        }
        Ok(hit)
    }

    async fn load_cookies(&mut self) -> bool {
        self.log("cookies:load".to_string());
        false
    }

    async fn save_cookies(&mut self) {
        self.log("cookies:save".to_string());
    }

    async fn screenshot(&mut self, tag: &str) {
        self.log(format!("screenshot:{tag}"));
    }

    async fn dump_html(&mut self, tag: &str) {
        self.log(format!("dump:{tag}"));
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if !self.closed {
            self.closed = true;
            self.log(format!("close:{}", self.device));
        }
        Ok(())
    }
}

/// Opens fake pages over per-device route tables.
pub struct FakeFactory {
    pub desktop: Vec<Route>,
    pub mobile: Vec<Route>,
    pub fail_launch: bool,
    pub journal: SharedJournal,
}

impl FakeFactory {
    pub fn new(desktop: Vec<Route>) -> Self {
        Self {
            desktop,
            mobile: Vec::new(),
            fail_launch: false,
            journal: SharedJournal::default(),
        }
    }

    pub fn with_mobile(mut self, mobile: Vec<Route>) -> Self {
        self.mobile = mobile;
        self
    }
}

#[async_trait(?Send)]
impl SessionFactory for FakeFactory {
    async fn open(&self, device: DeviceProfile) -> BrowserResult<Box<dyn ScrapePage>> {
        if self.fail_launch {
            return Err(BrowserError::Launch("chromium not found".to_string()));
        }
        self.journal.borrow_mut().events.push(format!("open:{device}"));
        let routes = match device {
            DeviceProfile::Desktop => self.desktop.clone(),
            DeviceProfile::Mobile => self.mobile.clone(),
        };
        Ok(Box::new(FakePage::new(device, routes, Rc::clone(&self.journal))))
    }
}

pub fn test_config() -> ScraperConfig {
    let mut config = ScraperConfig::default();
    config.mirror.base_urls = vec![MIRROR.to_string()];
    config.mirror.probe_media = false;
    config.origin.base_url = ORIGIN.to_string();
    config.diagnostics.enabled = false;
    config
}

pub fn cadence() -> HumanCadence {
    HumanCadence::with_seed(HumanSimulationSection::default(), 7)
}

pub fn mirror_item(id: u64) -> String {
    format!(
        r#"<div class="timeline-item">
             <a class="tweet-link" href="/someone/status/{id}#m"></a>
             <div class="tweet-content media-body">mirror post {id}</div>
             <span class="tweet-date"><a href="/someone/status/{id}#m" title="Mar 1, 2024 · 10:00 AM UTC">Mar 1</a></span>
           </div>"#
    )
}

pub fn origin_item(id: u64) -> String {
    format!(
        r#"<article data-testid="tweet">
             <a href="/someone/status/{id}"><time datetime="2024-03-01T10:00:00.000Z">Mar 1</time></a>
             <div data-testid="tweetText" lang="en">origin post {id}</div>
           </article>"#
    )
}

pub fn mirror_batches(ids: &[&[u64]]) -> Vec<Vec<String>> {
    ids.iter()
        .map(|batch| batch.iter().map(|id| mirror_item(*id)).collect())
        .collect()
}

pub fn origin_batches(ids: &[&[u64]]) -> Vec<Vec<String>> {
    ids.iter()
        .map(|batch| batch.iter().map(|id| origin_item(*id)).collect())
        .collect()
}

pub fn mirror_profile(ids: &[&[u64]]) -> Route {
    let url = format!("{MIRROR}/someone");
    Route::new(&url, Screen::at(&url).with_timeline(MIRROR_ITEM, mirror_batches(ids)))
}

pub fn origin_profile(ids: &[&[u64]]) -> Route {
    let url = format!("{ORIGIN}/someone");
    Route::new(&url, Screen::at(&url).with_timeline(ORIGIN_ITEM, origin_batches(ids)))
}
