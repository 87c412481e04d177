use scraper::ElementRef;
use url::Url;

use super::{
    absolutize, attr_of, image_sources, leading_count, permalink_from_href, rendered_lines,
    rendered_text, scan_stat_lines, select_all, select_first, FieldCascade, Layout, PageContext,
    Permalink, TweetExtractor, VideoEvidence,
};
use crate::scrape::model::{Source, Stats, TweetRecord};

const CONTAINER: &str = ".timeline-item";
const LOAD_MORE: &str = ".show-more a";

/// Extractor for the mirror front-end's server-rendered timeline.
pub struct MirrorExtractor {
    layout: Layout,
}

impl Default for MirrorExtractor {
    fn default() -> Self {
        Self {
            layout: Layout {
                source: Source::Mirror,
                permalink: FieldCascade::new("permalink", &[tweet_link, date_link]),
                text: FieldCascade::new("text", &[tweet_content]),
                timestamp: FieldCascade::new("timestamp", &[date_title, date_text]),
                stats: FieldCascade::new("stats", &[stat_lines, stat_icons]),
                images: FieldCascade::new(
                    "images",
                    &[still_images, attachment_images, media_images, body_images],
                ),
                video: FieldCascade::new("video", &[video_container]),
            },
        }
    }
}

impl TweetExtractor for MirrorExtractor {
    fn source(&self) -> Source {
        Source::Mirror
    }

    fn container_selector(&self) -> &str {
        CONTAINER
    }

    fn load_more_selector(&self) -> Option<&str> {
        Some(LOAD_MORE)
    }

    fn extract(&self, snapshot: &str, page_url: &Url) -> Option<TweetRecord> {
        self.layout.extract(snapshot, page_url)
    }
}

fn tweet_link(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Permalink> {
    let href = attr_of(node, ".tweet-link", "href")?;
    permalink_from_href(&href, ctx.page_url)
}

fn date_link(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Permalink> {
    let href = attr_of(node, ".tweet-date a[href]", "href")?;
    permalink_from_href(&href, ctx.page_url)
}

fn tweet_content(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    select_first(node, ".tweet-content").map(rendered_text)
}

fn date_title(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    attr_of(node, ".tweet-date a[title]", "title")
}

fn date_text(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    select_first(node, ".tweet-date a")
        .map(rendered_text)
        .filter(|text| !text.is_empty())
}

fn stat_lines(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<Stats> {
    let stats = select_first(node, ".tweet-stats")?;
    scan_stat_lines(rendered_lines(stats))
}

fn stat_icons(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<Stats> {
    let mut stats = Stats::default();
    let mut matched = false;
    for stat in select_all(node, ".tweet-stat") {
        let count = leading_count(&rendered_text(stat));
        if select_first(stat, ".icon-comment").is_some() {
            stats.replies = count;
        } else if select_first(stat, ".icon-retweet").is_some() {
            stats.retweets = count;
        } else if select_first(stat, ".icon-heart").is_some() {
            stats.likes = count;
        } else {
            continue;
        }
        matched = true;
    }
    matched.then_some(stats)
}

fn still_images(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Vec<String>> {
    image_sources(node, ".still-image", ctx.page_url)
}

fn attachment_images(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Vec<String>> {
    image_sources(node, ".attachment img", ctx.page_url)
}

fn media_images(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Vec<String>> {
    image_sources(node, ".media-image img", ctx.page_url)
}

fn body_images(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Vec<String>> {
    image_sources(
        node,
        ".tweet-body img:not(.emoji):not(.profile-pic):not(.avatar)",
        ctx.page_url,
    )
}

fn video_container(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<VideoEvidence> {
    let container = select_first(node, ".video-container")?;
    let preview = attr_of(container, "img[src]", "src")
        .or_else(|| attr_of(container, "video[poster]", "poster"))
        .or_else(|| attr_of(container, ".poster[src]", "src"))
        .and_then(|raw| absolutize(&raw, ctx.page_url));
    Some(VideoEvidence { preview })
}
