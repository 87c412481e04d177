pub mod browser;
pub mod config;
pub mod error;
pub mod scrape;

pub use config::{load_scraper_config, ScraperConfig};
pub use error::{ConfigError, Result};
pub use scrape::{
    scrape, scrape_with, AttemptFailure, BackendAttempt, ScrapeError, ScrapeRequest, ScrapeRun,
    Source, TweetRecord,
};
