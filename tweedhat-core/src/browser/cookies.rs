use std::path::Path;

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use serde::{Deserialize, Serialize};

use super::error::{BrowserError, BrowserResult};

/// One cookie in the WebDriver export shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl StoredCookie {
    pub fn from_cdp(cookie: &Cookie) -> Self {
        // CDP reports session cookies with a negative expiry.
        let expiry = (cookie.expires >= 0.0).then(|| cookie.expires as i64);
        let same_site = cookie.same_site.as_ref().map(|site| {
            match site {
                CookieSameSite::Strict => "Strict",
                CookieSameSite::Lax => "Lax",
                CookieSameSite::None => "None",
            }
            .to_string()
        });
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: Some(cookie.domain.clone()),
            path: Some(cookie.path.clone()),
            expiry,
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site,
        }
    }

    pub fn to_param(&self, fallback_url: &str) -> BrowserResult<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .http_only(self.http_only)
            .secure(self.secure);
        builder = match &self.domain {
            Some(domain) => builder.domain(domain.clone()),
            None => builder.url(fallback_url.to_string()),
        };
        if let Some(path) = &self.path {
            builder = builder.path(path.clone());
        }
        if let Some(expiry) = self.expiry {
            builder = builder.expires(TimeSinceEpoch::new(expiry as f64));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(parse_same_site) {
            builder = builder.same_site(same_site);
        }
        builder.build().map_err(BrowserError::Cookies)
    }
}

fn parse_same_site(raw: &str) -> Option<CookieSameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" | "no_restriction" => Some(CookieSameSite::None),
        _ => None,
    }
}

/// Ordered cookie list persisted as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    pub fn new(cookies: Vec<StoredCookie>) -> Self {
        Self { cookies }
    }

    pub fn from_cdp(cookies: &[Cookie]) -> Self {
        Self::new(cookies.iter().map(StoredCookie::from_cdp).collect())
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn load(path: &Path) -> BrowserResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| BrowserError::Cookies(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| BrowserError::Cookies(format!("{}: {err}", path.display())))
    }

    pub fn save(&self, path: &Path) -> BrowserResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(self)
            .map_err(|err| BrowserError::Cookies(err.to_string()))?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Converts every cookie, skipping the ones CDP would reject.
    pub fn to_params(&self, fallback_url: &str) -> Vec<CookieParam> {
        self.cookies
            .iter()
            .filter_map(|cookie| match cookie.to_param(fallback_url) {
                Ok(param) => Some(param),
                Err(err) => {
                    tracing::debug!(cookie = %cookie.name, error = %err, "skipping cookie");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WEBDRIVER_EXPORT: &str = r#"[
        {"domain": ".x.com", "expiry": 1767225600, "httpOnly": true, "name": "auth_token",
         "path": "/", "sameSite": "None", "secure": true, "value": "abc123"},
        {"domain": "x.com", "httpOnly": false, "name": "lang", "path": "/",
         "sameSite": "Lax", "secure": false, "value": "en"}
    ]"#;

    #[test]
    fn loads_webdriver_export_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x_cookies.json");
        std::fs::write(&path, WEBDRIVER_EXPORT).unwrap();

        let jar = CookieJar::load(&path).unwrap();
        assert_eq!(jar.len(), 2);
        let auth = &jar.cookies()[0];
        assert_eq!(auth.name, "auth_token");
        assert_eq!(auth.expiry, Some(1767225600));
        assert!(auth.http_only);
        assert_eq!(auth.same_site.as_deref(), Some("None"));
        assert_eq!(jar.cookies()[1].expiry, None);
    }

    #[test]
    fn saved_jar_keeps_webdriver_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/x_cookies.json");
        let jar = CookieJar::new(vec![StoredCookie {
            name: "ct0".into(),
            value: "token".into(),
            domain: Some(".x.com".into()),
            path: Some("/".into()),
            expiry: Some(42),
            http_only: false,
            secure: true,
            same_site: Some("Lax".into()),
        }]);
        jar.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let first = &raw[0];
        assert_eq!(first["httpOnly"], serde_json::json!(false));
        assert_eq!(first["sameSite"], serde_json::json!("Lax"));
        assert_eq!(first["expiry"], serde_json::json!(42));
        assert_eq!(CookieJar::load(&path).unwrap(), jar);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x_cookies.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(CookieJar::load(&path), Err(BrowserError::Cookies(_))));
        assert!(CookieJar::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn same_site_parsing_accepts_common_spellings() {
        assert_eq!(parse_same_site("strict"), Some(CookieSameSite::Strict));
        assert_eq!(parse_same_site("no_restriction"), Some(CookieSameSite::None));
        assert_eq!(parse_same_site("unspecified"), None);
    }
}
