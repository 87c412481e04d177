//! Post-container extraction.
//!
//! A container snapshot (its outer HTML) is parsed once, then every field is
//! resolved through an ordered list of pure strategies. The first strategy
//! that yields a value wins; a field nobody can resolve takes its default and
//! never aborts the record.

mod mirror;
mod origin;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use super::model::{MediaSet, Source, Stats, TweetRecord};

pub use mirror::MirrorExtractor;
pub use origin::OriginExtractor;

/// Converts one post container into a record for a specific backend layout.
pub trait TweetExtractor {
    fn source(&self) -> Source;

    /// Selector matching one post container.
    fn container_selector(&self) -> &str;

    /// Fallback container selector for layout variants.
    fn alternate_container_selector(&self) -> Option<&str> {
        None
    }

    /// Link that loads the next page of the timeline, for cursor-paginated layouts.
    fn load_more_selector(&self) -> Option<&str> {
        None
    }

    /// Returns `None` only when the snapshot holds no element at all.
    fn extract(&self, snapshot: &str, page_url: &Url) -> Option<TweetRecord>;
}

/// What a strategy can see besides the node itself.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub page_url: &'a Url,
    pub source: Source,
}

pub type Strategy<T> = for<'n, 'c> fn(ElementRef<'n>, &PageContext<'c>) -> Option<T>;

pub struct FieldCascade<T> {
    field: &'static str,
    strategies: Vec<Strategy<T>>,
}

impl<T> FieldCascade<T> {
    pub fn new(field: &'static str, strategies: &[Strategy<T>]) -> Self {
        Self {
            field,
            strategies: strategies.to_vec(),
        }
    }

    pub fn resolve(&self, node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<T> {
        let hit = self
            .strategies
            .iter()
            .find_map(|strategy| strategy(node, ctx));
        if hit.is_none() {
            debug!(field = self.field, source = %ctx.source, "selector miss");
        }
        hit
    }

    pub fn resolve_or_default(&self, node: ElementRef<'_>, ctx: &PageContext<'_>) -> T
    where
        T: Default,
    {
        self.resolve(node, ctx).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permalink {
    pub id: String,
    pub url: String,
}

/// Evidence of a video attachment. The preview frame may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoEvidence {
    pub preview: Option<String>,
}

/// Per-backend field cascades shared by both extractors.
pub(crate) struct Layout {
    pub source: Source,
    pub permalink: FieldCascade<Permalink>,
    pub text: FieldCascade<String>,
    pub timestamp: FieldCascade<String>,
    pub stats: FieldCascade<Stats>,
    pub images: FieldCascade<Vec<String>>,
    pub video: FieldCascade<VideoEvidence>,
}

impl Layout {
    pub fn extract(&self, snapshot: &str, page_url: &Url) -> Option<TweetRecord> {
        let fragment = Html::parse_fragment(snapshot);
        let node = fragment.root_element().children().find_map(ElementRef::wrap)?;
        let ctx = PageContext {
            page_url,
            source: self.source,
        };

        let permalink = self.permalink.resolve(node, &ctx);
        let text = self.text.resolve_or_default(node, &ctx);
        let timestamp = self.timestamp.resolve_or_default(node, &ctx);
        let stats = self.stats.resolve_or_default(node, &ctx);
        let images = self.images.resolve_or_default(node, &ctx);
        let video = self.video.resolve(node, &ctx);

        let media = MediaSet {
            images,
            has_video: video.is_some(),
            video_preview: video.and_then(|evidence| evidence.preview),
        };
        let (id, url) = match permalink {
            Some(link) => (Some(link.id), Some(link.url)),
            None => (None, None),
        };
        Some(TweetRecord::new(
            self.source,
            id,
            url,
            text,
            timestamp,
            stats,
            media,
        ))
    }
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub(crate) fn select_first<'a>(node: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = selector(css)?;
    let found = node.select(&selector).next();
    found
}

pub(crate) fn select_all<'a>(node: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    let Some(selector) = selector(css) else {
        return Vec::new();
    };
    let found = node.select(&selector).collect();
    found
}

pub(crate) fn attr_of(node: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    select_first(node, css)
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

const BLOCK_TAGS: [&str; 8] = ["div", "p", "li", "ul", "section", "article", "header", "footer"];

/// Text as a reader sees it: `<br>` becomes a newline, emoji images
/// contribute their `alt`.
pub(crate) fn rendered_text(node: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(node, &mut out, false);
    out.trim().to_string()
}

/// Like [`rendered_text`] but with block elements on their own lines.
pub(crate) fn rendered_lines(node: ElementRef<'_>) -> Vec<String> {
    let mut out = String::new();
    collect_text(node, &mut out, true);
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_text(node: ElementRef<'_>, out: &mut String, block_lines: bool) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => match element.name() {
                "br" => out.push('\n'),
                "img" => {
                    if let Some(alt) = element.attr("alt") {
                        out.push_str(alt);
                    }
                }
                "script" | "style" => {}
                name => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let block = block_lines && BLOCK_TAGS.contains(&name);
                    if block && !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    collect_text(child, out, block_lines);
                    if block && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

/// Resolves `raw` against the page URL. Empty and inline `data:` URIs are dropped.
pub(crate) fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    base.join(raw).ok().map(String::from)
}

/// Canonical permalink from a link whose path contains `/status/<id>`.
pub(crate) fn permalink_from_href(href: &str, base: &Url) -> Option<Permalink> {
    let mut url = base.join(href.trim()).ok()?;
    let segments: Vec<String> = url.path_segments()?.map(str::to_string).collect();
    let status_at = segments.iter().position(|segment| segment == "status")?;
    let id = segments.get(status_at + 1)?.clone();
    if id.is_empty() {
        return None;
    }
    url.set_path(&format!("/{}", segments[..=status_at + 1].join("/")));
    url.set_query(None);
    url.set_fragment(None);
    Some(Permalink {
        id,
        url: url.into(),
    })
}

/// Leading number of a stat token, 0 when there is none.
///
/// Accepts thousands separators and abbreviated counts (`2.5K`, `1.2M`, `3B`).
/// A fraction without a suffix is not a count.
pub(crate) fn leading_count(token: &str) -> u64 {
    let token = token.trim_start();
    let end = token
        .find(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
        .unwrap_or(token.len());
    let (number, rest) = token.split_at(end);
    let number = number.trim_end_matches('.');

    let mut suffix = rest.chars();
    let multiplier: u64 = match suffix.next().map(|c| c.to_ascii_uppercase()) {
        Some('K') => 1_000,
        Some('M') => 1_000_000,
        Some('B') => 1_000_000_000,
        _ => 1,
    };
    let multiplier = if suffix.next().is_some_and(char::is_alphabetic) {
        1
    } else {
        multiplier
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
    if whole.is_empty() || fraction.contains(|c: char| !c.is_ascii_digit()) {
        return 0;
    }
    if !fraction.is_empty() && multiplier == 1 {
        return 0;
    }
    let Ok(whole) = whole.parse::<u64>() else {
        return 0;
    };

    let mut scale = multiplier;
    let mut remainder = 0u64;
    for digit in fraction.chars().filter_map(|c| c.to_digit(10)) {
        scale /= 10;
        remainder += u64::from(digit) * scale;
    }
    whole.saturating_mul(multiplier).saturating_add(remainder)
}

/// Scans labelled stat lines such as `12 replies`. `None` when no line names a stat.
pub(crate) fn scan_stat_lines<I, S>(lines: I) -> Option<Stats>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stats = Stats::default();
    let mut matched = false;
    for line in lines {
        let line = line.as_ref().trim();
        let lower = line.to_lowercase();
        if lower.contains("repl") {
            stats.replies = leading_count(line);
        } else if lower.contains("retweet") || lower.contains("repost") {
            stats.retweets = leading_count(line);
        } else if lower.contains("like") {
            stats.likes = leading_count(line);
        } else {
            continue;
        }
        matched = true;
    }
    matched.then_some(stats)
}

pub(crate) fn is_avatar(node: ElementRef<'_>, src: &str) -> bool {
    let element = node.value();
    src.contains("profile")
        || element
            .classes()
            .any(|class| class == "avatar" || class == "profile-pic" || class == "emoji")
}

/// Image URIs of every element matching `css`, avatars excluded, in order.
pub(crate) fn image_sources(node: ElementRef<'_>, css: &str, base: &Url) -> Option<Vec<String>> {
    let mut uris: Vec<String> = Vec::new();
    for element in select_all(node, css) {
        let src = element
            .value()
            .attr("src")
            .map(str::to_string)
            .or_else(|| attr_of(element, "img[src]", "src"));
        let Some(src) = src else {
            continue;
        };
        if is_avatar(element, &src) {
            continue;
        }
        if let Some(uri) = absolutize(&src, base) {
            if !uris.contains(&uri) {
                uris.push(uri);
            }
        }
    }
    (!uris.is_empty()).then_some(uris)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://nitter.net/someone").unwrap()
    }

    #[test]
    fn permalink_is_canonical() {
        let link = permalink_from_href("/someone/status/1789/photo/1?s=20#m", &base()).unwrap();
        assert_eq!(link.id, "1789");
        assert_eq!(link.url, "https://nitter.net/someone/status/1789");
        assert!(permalink_from_href("/someone/likes", &base()).is_none());
        assert!(permalink_from_href("/someone/status/", &base()).is_none());
    }

    #[test]
    fn counts_accept_thousands_separators() {
        assert_eq!(leading_count("1,234 Likes"), 1234);
        assert_eq!(leading_count("  42"), 42);
        assert_eq!(leading_count("Reply"), 0);
        assert_eq!(leading_count(""), 0);
        assert_eq!(leading_count("2.5K"), 2_500);
        assert_eq!(leading_count("1.2M"), 1_200_000);
        assert_eq!(leading_count("10k reposts"), 10_000);
        assert_eq!(leading_count("3B"), 3_000_000_000);
        assert_eq!(leading_count("1.5"), 0);
        assert_eq!(leading_count("12 Bookmarks"), 12);
    }

    #[test]
    fn stat_lines_match_synonyms() {
        let stats = scan_stat_lines(["3 replies", "1,024 reposts", "12 Likes", "9 views"]).unwrap();
        assert_eq!(
            stats,
            Stats {
                replies: 3,
                retweets: 1024,
                likes: 12
            }
        );
        assert!(scan_stat_lines(["5", "8"]).is_none());
    }

    #[test]
    fn rendered_text_keeps_breaks_and_emoji() {
        let fragment = Html::parse_fragment(
            r#"<div>hello<br>world <img alt="🎉" src="/emoji.svg"><script>x()</script></div>"#,
        );
        let node = fragment.root_element().children().find_map(ElementRef::wrap).unwrap();
        assert_eq!(rendered_text(node), "hello\nworld 🎉");
    }

    #[test]
    fn relative_and_inline_uris() {
        assert_eq!(
            absolutize("/pic/media%2Fa.jpg", &base()).as_deref(),
            Some("https://nitter.net/pic/media%2Fa.jpg")
        );
        assert_eq!(absolutize("data:image/png;base64,AA", &base()), None);
        assert_eq!(absolutize("  ", &base()), None);
    }
}
