use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ScraperConfig {
    pub browser: ChromiumSection,
    pub user_agents: UserAgentSection,
    pub profile: ProfileSection,
    pub fingerprint: FingerprintSection,
    pub human: HumanSimulationSection,
    pub pagination: PaginationSection,
    pub mirror: MirrorSection,
    pub origin: OriginSection,
    pub auth: AuthSection,
    pub markers: MarkerSection,
    pub output: OutputSection,
    pub diagnostics: DiagnosticsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
    pub window: [u32; 2],
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            request_timeout_seconds: Some(60),
            window: [1920, 1080],
            lang: Some("en-US".into()),
            accept_language: Some("en-US,en;q=0.9".into()),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentSection {
    pub desktop: String,
    pub mobile: String,
    pub mobile_viewport: [u32; 2],
}

impl Default for UserAgentSection {
    fn default() -> Self {
        Self {
            desktop: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".into(),
            mobile: "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1".into(),
            mobile_viewport: [375, 812],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileSection {
    pub base_dir: String,
    pub persistent: bool,
    pub cookie_file: String,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            base_dir: ".chrome_profiles/tweet_scraper".into(),
            persistent: true,
            cookie_file: "x_cookies.json".into(),
        }
    }
}

/// Capability spoofing profile. Rendered into init scripts once per session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    pub hide_webdriver: bool,
    pub plugins: Vec<String>,
    pub languages: Vec<String>,
    pub canvas_noise_range: [i32; 2],
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
    pub patch_iframe_content_window: bool,
    pub chrome_runtime: bool,
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            hide_webdriver: true,
            plugins: vec![
                "PDF Viewer".into(),
                "Chrome PDF Viewer".into(),
                "Chromium PDF Viewer".into(),
                "Microsoft Edge PDF Viewer".into(),
                "WebKit built-in PDF".into(),
            ],
            languages: vec!["en-US".into(), "en".into()],
            canvas_noise_range: [-1, 1],
            webgl_vendor: Some("Google Inc.".into()),
            webgl_renderer: Some("ANGLE (Apple, Apple M1, OpenGL 4.1)".into()),
            patch_iframe_content_window: true,
            chrome_runtime: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanSimulationSection {
    pub keystroke_delay_ms: [u32; 2],
    pub typing_pause_ms: [u32; 2],
    pub scroll_burst_px: [u32; 2],
    pub scroll_pause_ms: [u32; 2],
    pub render_wait_ms: [u32; 2],
    pub extended_wait_ms: [u32; 2],
    pub poll_interval_ms: u64,
}

impl Default for HumanSimulationSection {
    fn default() -> Self {
        Self {
            keystroke_delay_ms: [50, 200],
            typing_pause_ms: [500, 1500],
            scroll_burst_px: [500, 1000],
            scroll_pause_ms: [500, 1000],
            render_wait_ms: [1500, 3000],
            extended_wait_ms: [3000, 5000],
            poll_interval_ms: 250,
        }
    }
}

impl HumanSimulationSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationSection {
    pub max_scroll_cycles: usize,
}

impl Default for PaginationSection {
    fn default() -> Self {
        Self {
            max_scroll_cycles: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorSection {
    pub base_urls: Vec<String>,
    pub ready_timeout_seconds: u64,
    pub probe_media: bool,
    pub probe_timeout_seconds: u64,
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            base_urls: vec!["https://nitter.net".into()],
            ready_timeout_seconds: 10,
            probe_media: true,
            probe_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OriginSection {
    pub base_url: String,
    pub ready_timeout_seconds: u64,
}

impl Default for OriginSection {
    fn default() -> Self {
        Self {
            base_url: "https://x.com".into(),
            ready_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub login_url: String,
    pub identifier_timeout_seconds: u64,
    pub challenge_timeout_seconds: u64,
    pub username_confirm_timeout_seconds: u64,
    pub password_timeout_seconds: u64,
    pub home_timeout_seconds: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            login_url: "https://x.com/i/flow/login".into(),
            identifier_timeout_seconds: 10,
            challenge_timeout_seconds: 5,
            username_confirm_timeout_seconds: 5,
            password_timeout_seconds: 15,
            home_timeout_seconds: 15,
        }
    }
}

/// Literal page markers used to classify what a backend served.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarkerSection {
    pub auth_gate_path_segments: Vec<String>,
    pub auth_gate_titles: Vec<String>,
    pub not_found: Vec<String>,
    pub protected: Vec<String>,
    pub site_error: Vec<String>,
    pub javascript_disabled: Vec<String>,
    pub blocked: Vec<String>,
    pub identity_verification: Vec<String>,
    pub confirm_email: Vec<String>,
    pub two_factor: Vec<String>,
}

impl Default for MarkerSection {
    fn default() -> Self {
        Self {
            auth_gate_path_segments: vec!["login".into()],
            auth_gate_titles: vec!["Log in to X".into()],
            not_found: vec![
                "This account doesn't exist".into(),
                "This account doesn’t exist".into(),
            ],
            protected: vec!["These posts are protected".into()],
            site_error: vec!["Something went wrong".into()],
            javascript_disabled: vec!["JavaScript is not available".into()],
            blocked: vec![
                "Instance has been rate limited".into(),
                "Verifying your browser".into(),
                "Just a moment...".into(),
                "429 Too Many Requests".into(),
            ],
            identity_verification: vec!["Verify your identity".into()],
            confirm_email: vec!["confirm your email".into()],
            two_factor: vec!["Enter your verification code".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub tweets_dir: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            tweets_dir: "tweets".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub enabled: bool,
    pub dir: String,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "diagnostics".into(),
        }
    }
}

impl ScraperConfig {
    pub fn diagnostics_dir(&self) -> Option<PathBuf> {
        self.diagnostics
            .enabled
            .then(|| PathBuf::from(&self.diagnostics.dir))
    }

    pub fn cookie_path(&self) -> PathBuf {
        PathBuf::from(&self.profile.cookie_file)
    }
}

pub fn load_scraper_config<P: AsRef<Path>>(path: P) -> Result<ScraperConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/scraper.toml");
        let config = load_scraper_config(path).expect("config should parse");
        assert_eq!(config.pagination.max_scroll_cycles, 30);
        assert_eq!(config.mirror.base_urls, vec!["https://nitter.net"]);
        assert_eq!(config.origin.base_url, "https://x.com");
        assert!(config.markers.protected.contains(&"These posts are protected".to_string()));
        assert_eq!(config.human.keystroke_delay_ms, [50, 200]);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: ScraperConfig = toml::from_str(
            r#"
            [browser]
            headless = false

            [mirror]
            base_urls = ["https://nitter.example"]
            "#,
        )
        .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.browser.window, [1920, 1080]);
        assert_eq!(config.mirror.base_urls, vec!["https://nitter.example"]);
        assert_eq!(config.mirror.ready_timeout_seconds, 10);
        assert_eq!(config.auth.password_timeout_seconds, 15);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_scraper_config("/nonexistent/scraper.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scraper.toml"));
    }
}
