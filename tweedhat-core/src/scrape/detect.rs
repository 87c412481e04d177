use regex::{escape, RegexSet, RegexSetBuilder};
use url::Url;

use crate::config::MarkerSection;

/// What a backend served instead of (or alongside) a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    JavaScriptDisabled,
    AuthGate,
    NotFound,
    Protected,
    SiteError,
    Blocked,
    Content,
}

/// Compiled, case-insensitive marker sets.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    auth_gate_segments: Vec<String>,
    auth_gate_titles: RegexSet,
    not_found: RegexSet,
    protected: RegexSet,
    site_error: RegexSet,
    javascript_disabled: RegexSet,
    blocked: RegexSet,
}

fn literal_set(markers: &[String]) -> RegexSet {
    let patterns: Vec<String> = markers
        .iter()
        .filter(|marker| !marker.trim().is_empty())
        .map(|marker| escape(marker.trim()))
        .collect();
    RegexSetBuilder::new(&patterns)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|_| RegexSet::empty())
}

impl MarkerSet {
    pub fn new(config: &MarkerSection) -> Self {
        Self {
            auth_gate_segments: config
                .auth_gate_path_segments
                .iter()
                .map(|segment| segment.to_lowercase())
                .collect(),
            auth_gate_titles: literal_set(&config.auth_gate_titles),
            not_found: literal_set(&config.not_found),
            protected: literal_set(&config.protected),
            site_error: literal_set(&config.site_error),
            javascript_disabled: literal_set(&config.javascript_disabled),
            blocked: literal_set(&config.blocked),
        }
    }

    /// Login redirect: a path segment equal to a gate segment, or a gate title.
    pub fn is_auth_gate(&self, url: &str, title: &str) -> bool {
        let on_gate_path = Url::parse(url)
            .ok()
            .and_then(|url| {
                url.path_segments().map(|segments| {
                    segments
                        .map(str::to_lowercase)
                        .any(|segment| self.auth_gate_segments.contains(&segment))
                })
            })
            .unwrap_or(false);
        on_gate_path || self.auth_gate_titles.is_match(title)
    }

    pub fn is_blocked(&self, source: &str) -> bool {
        self.blocked.is_match(source)
    }

    pub fn javascript_disabled(&self, source: &str) -> bool {
        self.javascript_disabled.is_match(source)
    }

    /// Classifies an origin page right after navigation. Profile-level
    /// markers are matched on rendered text by [`MarkerSet::classify_terminal`].
    pub fn classify_origin(&self, url: &str, title: &str, source: &str) -> PageState {
        if self.javascript_disabled.is_match(source) {
            PageState::JavaScriptDisabled
        } else if self.is_auth_gate(url, title) {
            PageState::AuthGate
        } else {
            PageState::Content
        }
    }

    /// Terminal profile markers: missing, protected, error page, block page.
    pub fn classify_terminal(&self, text: &str) -> PageState {
        if self.not_found.is_match(text) {
            PageState::NotFound
        } else if self.protected.is_match(text) {
            PageState::Protected
        } else if self.site_error.is_match(text) {
            PageState::SiteError
        } else if self.blocked.is_match(text) {
            PageState::Blocked
        } else {
            PageState::Content
        }
    }

    /// Every terminal marker literal, for readiness polling.
    pub fn terminal_literals(config: &MarkerSection) -> Vec<String> {
        config
            .not_found
            .iter()
            .chain(&config.protected)
            .chain(&config.site_error)
            .cloned()
            .collect()
    }
}

/// True when the mirror sent the browser to another host.
pub fn host_changed(requested: &str, current: &str) -> bool {
    let host = |raw: &str| {
        Url::parse(raw)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.trim_start_matches("www.").to_lowercase()))
    };
    match (host(requested), host(current)) {
        (Some(requested), Some(current)) => requested != current,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> MarkerSet {
        MarkerSet::new(&MarkerSection::default())
    }

    #[test]
    fn auth_gate_matches_path_segment_not_substring() {
        let markers = markers();
        assert!(markers.is_auth_gate("https://x.com/i/flow/login?redirect_after_login=%2Fa", ""));
        assert!(markers.is_auth_gate("https://x.com/login", ""));
        assert!(!markers.is_auth_gate("https://x.com/loginpage_fan", ""));
        assert!(markers.is_auth_gate("https://x.com/someone", "Log in to X / X"));
    }

    #[test]
    fn terminal_markers_are_case_insensitive() {
        let markers = markers();
        assert_eq!(
            markers.classify_terminal("<span>These posts are PROTECTED</span>"),
            PageState::Protected
        );
        assert_eq!(
            markers.classify_terminal("This account doesn't exist. Try searching"),
            PageState::NotFound
        );
        assert_eq!(
            markers.classify_terminal("Something went wrong. Try reloading."),
            PageState::SiteError
        );
        assert_eq!(markers.classify_terminal("<article>hi</article>"), PageState::Content);
    }

    #[test]
    fn javascript_marker_wins_over_gate() {
        let markers = markers();
        assert_eq!(
            markers.classify_origin(
                "https://x.com/login",
                "",
                "JavaScript is not available. We've detected that JavaScript is disabled"
            ),
            PageState::JavaScriptDisabled
        );
        assert_eq!(
            markers.classify_origin(
                "https://x.com/someone",
                "someone / X",
                "<script>\"These posts are protected\"</script>"
            ),
            PageState::Content
        );
    }

    #[test]
    fn mirror_block_pages_are_detected() {
        let markers = markers();
        assert!(markers.is_blocked("<h1>Instance has been rate limited.</h1>"));
        assert!(markers.is_blocked("<title>Just a moment...</title>"));
        assert!(!markers.is_blocked("<div class=\"timeline\"></div>"));
    }

    #[test]
    fn host_change_detection() {
        assert!(!host_changed("https://nitter.net/someone", "https://nitter.net/someone"));
        assert!(!host_changed("https://nitter.net/someone", "https://www.nitter.net/someone"));
        assert!(host_changed("https://nitter.net/someone", "https://x.com/someone"));
        assert!(host_changed("https://nitter.net/someone", "about:blank"));
    }
}
