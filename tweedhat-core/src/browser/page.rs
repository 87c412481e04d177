use std::fmt;

use async_trait::async_trait;

use super::error::BrowserResult;

/// Device the session presents itself as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    Desktop,
    Mobile,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceProfile::Desktop => "desktop",
            DeviceProfile::Mobile => "mobile",
        };
        f.write_str(label)
    }
}

/// Page-level operations the scrape engine needs from a browser session.
///
/// Every call takes `&mut self`; a session is driven by one task at a time.
/// Interpretation of what a page shows is left to the caller.
#[async_trait(?Send)]
pub trait ScrapePage {
    fn device(&self) -> DeviceProfile;

    async fn goto(&mut self, url: &str) -> BrowserResult<()>;
    async fn current_url(&mut self) -> BrowserResult<String>;
    async fn title(&mut self) -> BrowserResult<String>;
    async fn page_source(&mut self) -> BrowserResult<String>;

    async fn element_present(&mut self, selector: &str) -> BrowserResult<bool>;
    /// Case-insensitive search of the rendered body text.
    async fn text_present(&mut self, text: &str) -> BrowserResult<bool>;
    /// Outer HTML of every element matching `selector`, in document order.
    async fn node_snapshots(&mut self, selector: &str) -> BrowserResult<Vec<String>>;
    async fn element_texts(&mut self, selector: &str) -> BrowserResult<Vec<String>>;

    async fn scroll_height(&mut self) -> BrowserResult<f64>;
    async fn scroll_by(&mut self, delta_y: f64) -> BrowserResult<()>;
    async fn scroll_to_bottom(&mut self) -> BrowserResult<()>;

    /// Returns `false` when no element matches.
    async fn click(&mut self, selector: &str) -> BrowserResult<bool>;
    async fn type_into(&mut self, selector: &str, text: &str) -> BrowserResult<()>;
    async fn press_enter(&mut self, selector: &str) -> BrowserResult<()>;
    /// Clicks the first visible button-like control whose label equals `label`.
    async fn click_control_with_text(&mut self, label: &str) -> BrowserResult<bool>;
    /// Navigates to the `href` of the first link matching `selector`.
    async fn follow_link(&mut self, selector: &str) -> BrowserResult<bool>;

    /// Installs the persisted cookie jar. Never fails the session.
    async fn load_cookies(&mut self) -> bool;
    async fn save_cookies(&mut self);

    async fn screenshot(&mut self, tag: &str);
    async fn dump_html(&mut self, tag: &str);

    /// Releases the browser. Safe to call more than once.
    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionFactory {
    async fn open(&self, device: DeviceProfile) -> BrowserResult<Box<dyn ScrapePage>>;
}
