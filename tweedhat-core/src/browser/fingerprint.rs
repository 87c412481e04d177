use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;

use crate::config::FingerprintSection;

use super::error::{BrowserError, BrowserResult};

/// Declarative browser capability profile.
///
/// Rendered once into new-document scripts when a session is built; pages
/// never see the raw config.
#[derive(Debug, Clone)]
pub struct CapabilityProfile {
    config: FingerprintSection,
}

impl CapabilityProfile {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    pub fn render_scripts(&self) -> Vec<String> {
        let mut scripts = Vec::new();
        if self.config.hide_webdriver {
            scripts.push(WEBDRIVER_SCRIPT.to_string());
        }
        if !self.config.plugins.is_empty() {
            scripts.push(self.plugins_script());
        }
        if !self.config.languages.is_empty() {
            scripts.push(self.languages_script());
        }
        if self.config.canvas_noise_range != [0, 0] {
            scripts.push(self.canvas_script());
        }
        if self.config.webgl_vendor.is_some() || self.config.webgl_renderer.is_some() {
            scripts.push(self.webgl_script());
        }
        if self.config.patch_iframe_content_window {
            scripts.push(IFRAME_SCRIPT.to_string());
        }
        if self.config.chrome_runtime {
            scripts.push(CHROME_RUNTIME_SCRIPT.to_string());
        }
        scripts
    }

    pub async fn install(&self, page: &Page) -> BrowserResult<()> {
        for source in self.render_scripts() {
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(source)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }
        Ok(())
    }

    fn plugins_script(&self) -> String {
        let names = js_literal(&self.config.plugins);
        format!(
            r#"
            (() => {{
                const names = {names};
                const plugins = names.map((name) => ({{
                    name,
                    filename: 'internal-pdf-viewer',
                    description: 'Portable Document Format',
                    length: 1,
                }}));
                plugins.item = (i) => plugins[i] || null;
                plugins.namedItem = (n) => plugins.find((p) => p.name === n) || null;
                plugins.refresh = () => {{}};
                Object.defineProperty(navigator, 'plugins', {{ get: () => plugins }});
            }})();
            "#
        )
    }

    fn languages_script(&self) -> String {
        let languages = js_literal(&self.config.languages);
        format!(
            r#"
            (() => {{
                const languages = {languages};
                Object.defineProperty(navigator, 'languages', {{ get: () => languages.slice() }});
                Object.defineProperty(navigator, 'language', {{ get: () => languages[0] }});
            }})();
            "#
        )
    }

    fn canvas_script(&self) -> String {
        let min = self.config.canvas_noise_range[0].min(self.config.canvas_noise_range[1]);
        let max = self.config.canvas_noise_range[0].max(self.config.canvas_noise_range[1]);
        format!(
            r#"
            (() => {{
                const randomInt = (min, max) => Math.floor(Math.random() * (max - min + 1)) + min;
                const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
                HTMLCanvasElement.prototype.toDataURL = function() {{
                    try {{
                        const ctx = this.getContext('2d');
                        if (ctx && this.width && this.height) {{
                            const imageData = ctx.getImageData(0, 0, this.width, this.height);
                            for (let i = 0; i < imageData.data.length; i += 4) {{
                                const delta = randomInt({min}, {max});
                                imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                            }}
                            ctx.putImageData(imageData, 0, 0);
                        }}
                    }} catch (_) {{}}
                    return originalToDataURL.apply(this, arguments);
                }};
            }})();
            "#
        )
    }

    fn webgl_script(&self) -> String {
        let vendor = js_literal(
            self.config
                .webgl_vendor
                .as_deref()
                .unwrap_or("Intel Inc."),
        );
        let renderer = js_literal(
            self.config
                .webgl_renderer
                .as_deref()
                .unwrap_or("Intel Iris OpenGL Engine"),
        );
        format!(
            r#"
            (() => {{
                const spoofParam = (proto) => {{
                    if (!proto || !proto.getParameter) {{
                        return;
                    }}
                    const original = proto.getParameter;
                    proto.getParameter = function(param) {{
                        if (param === 37445) {{
                            return {vendor};
                        }}
                        if (param === 37446) {{
                            return {renderer};
                        }}
                        return original.apply(this, arguments);
                    }};
                }};
                spoofParam(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
                spoofParam(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);
            }})();
            "#
        )
    }
}

fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

const WEBDRIVER_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
"#;

const IFRAME_SCRIPT: &str = r#"
(() => {
    const descriptor = Object.getOwnPropertyDescriptor(HTMLIFrameElement.prototype, 'contentWindow');
    if (!descriptor || !descriptor.get) {
        return;
    }
    Object.defineProperty(HTMLIFrameElement.prototype, 'contentWindow', {
        get: function() {
            const win = descriptor.get.call(this);
            try {
                if (win && win.navigator) {
                    Object.defineProperty(win.navigator, 'webdriver', { get: () => undefined });
                }
            } catch (_) {}
            return win;
        },
    });
})();
"#;

const CHROME_RUNTIME_SCRIPT: &str = r#"
(() => {
    if (!window.chrome) {
        Object.defineProperty(window, 'chrome', { value: {}, writable: true, configurable: true });
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {};
    }
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_renders_every_patch() {
        let profile = CapabilityProfile::new(FingerprintSection::default());
        let scripts = profile.render_scripts();
        assert_eq!(scripts.len(), 7);
        assert!(scripts[0].contains("'webdriver'"));
        assert!(scripts[1].contains("\"Chrome PDF Viewer\""));
        assert!(scripts[2].contains("[\"en-US\",\"en\"]"));
        assert!(scripts[4].contains("\"Google Inc.\""));
        assert!(scripts[6].contains("chrome.runtime"));
    }

    #[test]
    fn disabled_patches_are_skipped() {
        let profile = CapabilityProfile::new(FingerprintSection {
            hide_webdriver: false,
            plugins: vec![],
            languages: vec![],
            canvas_noise_range: [0, 0],
            webgl_vendor: None,
            webgl_renderer: None,
            patch_iframe_content_window: false,
            chrome_runtime: true,
        });
        let scripts = profile.render_scripts();
        assert_eq!(scripts.len(), 1);
    }

    #[test]
    fn quotes_in_renderer_are_escaped() {
        let profile = CapabilityProfile::new(FingerprintSection {
            webgl_renderer: Some("ANGLE ('quoted')\"".into()),
            ..FingerprintSection::default()
        });
        let webgl = profile
            .render_scripts()
            .into_iter()
            .find(|s| s.contains("37446"))
            .unwrap();
        assert!(webgl.contains(r#""ANGLE ('quoted')\"""#));
    }
}
