mod automation;
mod cookies;
mod error;
mod fingerprint;
mod human;
mod metrics;
mod page;
mod profile;
mod wait;

pub use automation::{BrowserLauncher, BrowserSession, LaunchOptions, ViewportSpec};
pub use cookies::{CookieJar, StoredCookie};
pub use error::{BrowserError, BrowserResult};
pub use fingerprint::CapabilityProfile;
pub use human::HumanCadence;
pub use metrics::ScrapeMetrics;
pub use page::{DeviceProfile, ScrapePage, SessionFactory};
pub use profile::{BrowserProfile, ProfileManager};
pub use wait::{wait_for_first, wait_for_height_change, Deadline, Probe};
