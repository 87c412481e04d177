use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;

use super::cookies::CookieJar;
use super::error::{BrowserError, BrowserResult};
use super::fingerprint::CapabilityProfile;
use super::page::{DeviceProfile, ScrapePage, SessionFactory};
use super::profile::{BrowserProfile, ProfileManager};

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

/// Per-run overrides on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: Option<bool>,
    pub use_profile: Option<bool>,
    pub profile_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ScraperConfig>,
    profiles: ProfileManager,
    capabilities: Arc<CapabilityProfile>,
    headless: bool,
    desktop_user_agent: String,
}

impl BrowserLauncher {
    pub fn new(config: Arc<ScraperConfig>, options: LaunchOptions) -> BrowserResult<Self> {
        let base_dir = options
            .profile_dir
            .unwrap_or_else(|| PathBuf::from(&config.profile.base_dir));
        let persistent = options.use_profile.unwrap_or(config.profile.persistent);
        let profiles = ProfileManager::new(base_dir, persistent)?;
        let capabilities = Arc::new(CapabilityProfile::new(config.fingerprint.clone()));
        let headless = options.headless.unwrap_or(config.browser.headless);
        let desktop_user_agent = options
            .user_agent
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or_else(|| config.user_agents.desktop.clone());
        Ok(Self {
            config,
            profiles,
            capabilities,
            headless,
            desktop_user_agent,
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn profile_manager(&self) -> &ProfileManager {
        &self.profiles
    }

    pub fn user_agent_for(&self, device: DeviceProfile) -> &str {
        match device {
            DeviceProfile::Desktop => &self.desktop_user_agent,
            DeviceProfile::Mobile => &self.config.user_agents.mobile,
        }
    }

    pub fn viewport_for(&self, device: DeviceProfile) -> ViewportSpec {
        match device {
            DeviceProfile::Desktop => ViewportSpec {
                width: self.config.browser.window[0],
                height: self.config.browser.window[1],
                device_scale_factor: 1.0,
                mobile: false,
            },
            DeviceProfile::Mobile => ViewportSpec {
                width: self.config.user_agents.mobile_viewport[0],
                height: self.config.user_agents.mobile_viewport[1],
                device_scale_factor: 3.0,
                mobile: true,
            },
        }
    }

    pub async fn launch(&self, device: DeviceProfile) -> BrowserResult<BrowserSession> {
        let profile = self.profiles.allocate()?;
        let viewport = self.viewport_for(device);
        let user_agent = self.user_agent_for(device).to_string();
        let chromium_config = match self.build_chromium_config(&profile, &viewport, &user_agent) {
            Ok(config) => config,
            Err(err) => {
                profile.release().await;
                return Err(err);
            }
        };
        info!(
            profile = %profile.id(),
            device = %device,
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless = self.headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = match Browser::launch(chromium_config).await {
            Ok(launched) => launched,
            Err(err) => {
                profile.release().await;
                return Err(BrowserError::Launch(err.to_string()));
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let mut session = BrowserSession {
            browser: Some(browser),
            page: None,
            handler_task: Some(handler_task),
            profile,
            device,
            user_agent,
            config: Arc::clone(&self.config),
        };
        if let Err(err) = session.open_page(&self.capabilities).await {
            warn!(error = %err, "Page setup failed, closing browser");
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "Failed to close browser after setup error");
            }
            return Err(BrowserError::Launch(err.to_string()));
        }
        if let Err(err) = session.profile.touch().await {
            warn!(profile = %session.profile.id(), error = %err, "Failed to mark profile as used");
        }
        Ok(session)
    }

    fn build_chromium_config(
        &self,
        profile: &BrowserProfile,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.browser;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: viewport.mobile,
                is_landscape: viewport.width >= viewport.height,
                has_touch: viewport.mobile,
            });

        if let Some(executable) = &chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-infobars".to_string(),
            "--disable-notifications".to_string(),
            "--disable-extensions".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(lang) = &chromium.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &chromium.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.extend(chromium.extra_args.iter().cloned());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait(?Send)]
impl SessionFactory for BrowserLauncher {
    async fn open(&self, device: DeviceProfile) -> BrowserResult<Box<dyn ScrapePage>> {
        let session = self.launch(device).await?;
        Ok(Box::new(session))
    }
}

/// One Chromium process bound to one profile directory and one tab.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    profile: BrowserProfile,
    device: DeviceProfile,
    user_agent: String,
    config: Arc<ScraperConfig>,
}

impl BrowserSession {
    pub fn profile(&self) -> &BrowserProfile {
        &self.profile
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn page(&self) -> BrowserResult<&Page> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    async fn open_page(&mut self, capabilities: &CapabilityProfile) -> BrowserResult<()> {
        let browser = self.browser.as_ref().ok_or(BrowserError::Closed)?;
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(accept) = &self.config.browser.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;
        capabilities.install(&page).await?;

        self.page = Some(page);
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page()?
            .evaluate(script)
            .await?
            .into_value::<T>()
            .map_err(|err| BrowserError::Script(err.to_string()))
    }

    fn diagnostics_path(&self, tag: &str, extension: &str) -> Option<PathBuf> {
        let dir = self.config.diagnostics_dir()?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        Some(dir.join(format!("{}_{stamp}.{extension}", sanitize_tag(tag))))
    }

    async fn write_diagnostic(&self, path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %err, "Failed to create diagnostics dir");
                return;
            }
        }
        match tokio::fs::write(path, bytes).await {
            Ok(()) => info!(path = %path.display(), "Diagnostic captured"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to write diagnostic"),
        }
    }
}

#[async_trait(?Send)]
impl ScrapePage for BrowserSession {
    fn device(&self) -> DeviceProfile {
        self.device
    }

    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.page()?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.url().await?.unwrap_or_default())
    }

    async fn title(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.get_title().await?.unwrap_or_default())
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.content().await?)
    }

    async fn element_present(&mut self, selector: &str) -> BrowserResult<bool> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        self.eval(&script).await
    }

    async fn text_present(&mut self, text: &str) -> BrowserResult<bool> {
        let script = format!(
            "(document.body ? document.body.innerText : '').toLowerCase().includes({})",
            js_string(&text.to_lowercase())
        );
        self.eval(&script).await
    }

    async fn node_snapshots(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map((node) => node.outerHTML)",
            js_string(selector)
        );
        self.eval(&script).await
    }

    async fn element_texts(&mut self, selector: &str) -> BrowserResult<Vec<String>> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map((node) => (node.innerText || '').trim()).filter((text) => text.length > 0)",
            js_string(selector)
        );
        self.eval(&script).await
    }

    async fn scroll_height(&mut self) -> BrowserResult<f64> {
        self.eval("document.body ? document.body.scrollHeight : 0")
            .await
    }

    async fn scroll_by(&mut self, delta_y: f64) -> BrowserResult<()> {
        let script = format!("window.scrollBy({{ top: {delta_y}, behavior: 'smooth' }}); true");
        self.eval::<bool>(&script).await.map(|_| ())
    }

    async fn scroll_to_bottom(&mut self) -> BrowserResult<()> {
        self.eval::<bool>("window.scrollTo(0, document.body ? document.body.scrollHeight : 0); true")
            .await
            .map(|_| ())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<bool> {
        if !self.element_present(selector).await? {
            return Ok(false);
        }
        let element = self.page()?.find_element(selector).await?;
        element.click().await?;
        Ok(true)
    }

    async fn type_into(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self.page()?.find_element(selector).await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self.page()?.find_element(selector).await?;
        element.press_key("Enter").await?;
        Ok(())
    }

    async fn click_control_with_text(&mut self, label: &str) -> BrowserResult<bool> {
        let script = format!(
            r#"
            (() => {{
                const wanted = {};
                const candidates = document.querySelectorAll("button, [role='button'], a, span");
                for (const node of candidates) {{
                    if ((node.innerText || '').trim() !== wanted) {{
                        continue;
                    }}
                    const target = node.closest("button, [role='button'], a") || node;
                    const rect = target.getBoundingClientRect();
                    if (rect.width === 0 && rect.height === 0) {{
                        continue;
                    }}
                    target.click();
                    return true;
                }}
                return false;
            }})()
            "#,
            js_string(label)
        );
        self.eval(&script).await
    }

    async fn follow_link(&mut self, selector: &str) -> BrowserResult<bool> {
        let script = format!(
            "(() => {{ const link = document.querySelector({}); return link && link.href ? link.href : null; }})()",
            js_string(selector)
        );
        let href: Option<String> = self.eval(&script).await?;
        match href {
            Some(href) => {
                self.goto(&href).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_cookies(&mut self) -> bool {
        let path = self.config.cookie_path();
        let jar = match CookieJar::load(&path) {
            Ok(jar) if !jar.is_empty() => jar,
            Ok(_) => {
                debug!(path = %path.display(), "Cookie jar is empty");
                return false;
            }
            Err(err) => {
                debug!(error = %err, "No usable cookie jar");
                return false;
            }
        };
        let origin = self.config.origin.base_url.clone();
        if let Err(err) = self.goto(&origin).await {
            warn!(error = %err, "Failed to open origin before installing cookies");
            return false;
        }
        let params = jar.to_params(&origin);
        let installed = params.len();
        let result = match self.page() {
            Ok(page) => page.set_cookies(params).await.map(|_| ()).map_err(BrowserError::from),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), cookies = installed, "Cookies loaded");
                installed > 0
            }
            Err(err) => {
                warn!(error = %err, "Failed to install cookies");
                false
            }
        }
    }

    async fn save_cookies(&mut self) {
        let path = self.config.cookie_path();
        let cookies = match self.page() {
            Ok(page) => page.get_cookies().await.map_err(BrowserError::from),
            Err(err) => Err(err),
        };
        match cookies.and_then(|cookies| CookieJar::from_cdp(&cookies).save(&path).map(|_| cookies.len())) {
            Ok(count) => info!(path = %path.display(), cookies = count, "Cookies saved"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to save cookies"),
        }
    }

    async fn screenshot(&mut self, tag: &str) {
        let Some(path) = self.diagnostics_path(tag, "png") else {
            return;
        };
        let bytes = match self.page() {
            Ok(page) => page
                .screenshot(ScreenshotParams::builder().build())
                .await
                .map_err(BrowserError::from),
            Err(err) => Err(err),
        };
        match bytes {
            Ok(bytes) => self.write_diagnostic(&path, &bytes).await,
            Err(err) => warn!(tag, error = %err, "Screenshot failed"),
        }
    }

    async fn dump_html(&mut self, tag: &str) {
        let Some(path) = self.diagnostics_path(tag, "html") else {
            return;
        };
        match self.page_source().await {
            Ok(html) => self.write_diagnostic(&path, html.as_bytes()).await,
            Err(err) => warn!(tag, error = %err, "Page source dump failed"),
        }
    }

    async fn close(&mut self) -> BrowserResult<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        info!(profile = %self.profile.id(), device = %self.device, "Shutting down Chromium instance");
        self.page = None;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        self.profile.release().await;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!(
                profile = %self.profile.id(),
                "BrowserSession dropped without explicit close"
            );
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(options: LaunchOptions) -> (tempfile::TempDir, BrowserLauncher) {
        let dir = tempfile::tempdir().unwrap();
        let options = LaunchOptions {
            profile_dir: Some(dir.path().to_path_buf()),
            ..options
        };
        let launcher = BrowserLauncher::new(Arc::new(ScraperConfig::default()), options).unwrap();
        (dir, launcher)
    }

    #[test]
    fn user_agent_override_applies_to_desktop_only() {
        let (_dir, launcher) = launcher(LaunchOptions {
            user_agent: Some("CustomAgent/1.0".into()),
            ..LaunchOptions::default()
        });
        assert_eq!(launcher.user_agent_for(DeviceProfile::Desktop), "CustomAgent/1.0");
        assert!(launcher
            .user_agent_for(DeviceProfile::Mobile)
            .contains("iPhone"));
    }

    #[test]
    fn mobile_viewport_emulates_touch_device() {
        let (_dir, launcher) = launcher(LaunchOptions::default());
        let mobile = launcher.viewport_for(DeviceProfile::Mobile);
        assert_eq!((mobile.width, mobile.height), (375, 812));
        assert!(mobile.mobile);
        let desktop = launcher.viewport_for(DeviceProfile::Desktop);
        assert_eq!((desktop.width, desktop.height), (1920, 1080));
        assert!(!desktop.mobile);
    }

    #[test]
    fn no_profile_option_overrides_config() {
        let (_dir, launcher) = launcher(LaunchOptions {
            use_profile: Some(false),
            ..LaunchOptions::default()
        });
        assert!(!launcher.profile_manager().is_persistent());
    }

    #[tokio::test]
    async fn failed_launch_leaves_no_ephemeral_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScraperConfig::default();
        config.browser.executable_path = Some("/nonexistent/tweedhat-chromium".into());
        let launcher = BrowserLauncher::new(
            Arc::new(config),
            LaunchOptions {
                use_profile: Some(false),
                profile_dir: Some(dir.path().to_path_buf()),
                ..LaunchOptions::default()
            },
        )
        .unwrap();

        let err = launcher.launch(DeviceProfile::Desktop).await.unwrap_err();

        assert!(matches!(err, BrowserError::Launch(_)), "{err}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn diagnostic_tags_are_filesystem_safe() {
        assert_eq!(sanitize_tag("login/password step"), "login_password_step");
        assert_eq!(js_string("a'b\"c"), "\"a'b\\\"c\"");
    }
}
