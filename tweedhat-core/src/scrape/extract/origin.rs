use scraper::ElementRef;
use url::Url;

use super::{
    absolutize, attr_of, image_sources, leading_count, permalink_from_href, rendered_text,
    scan_stat_lines, select_all, select_first, FieldCascade, Layout, PageContext, Permalink,
    TweetExtractor, VideoEvidence,
};
use crate::scrape::model::{Source, Stats, TweetRecord};

const CONTAINER: &str = "article[data-testid='tweet']";
const ALTERNATE_CONTAINER: &str = "div[data-testid='cellInnerDiv']";

/// Extractor for the origin site's timeline markup.
pub struct OriginExtractor {
    layout: Layout,
}

impl Default for OriginExtractor {
    fn default() -> Self {
        Self {
            layout: Layout {
                source: Source::Origin,
                permalink: FieldCascade::new("permalink", &[status_link]),
                text: FieldCascade::new("text", &[tweet_text, lang_block]),
                timestamp: FieldCascade::new("timestamp", &[time_datetime]),
                stats: FieldCascade::new("stats", &[testid_counts, action_bar_label]),
                images: FieldCascade::new("images", &[media_images]),
                video: FieldCascade::new("video", &[video_player]),
            },
        }
    }
}

impl TweetExtractor for OriginExtractor {
    fn source(&self) -> Source {
        Source::Origin
    }

    fn container_selector(&self) -> &str {
        CONTAINER
    }

    fn alternate_container_selector(&self) -> Option<&str> {
        Some(ALTERNATE_CONTAINER)
    }

    fn extract(&self, snapshot: &str, page_url: &Url) -> Option<TweetRecord> {
        self.layout.extract(snapshot, page_url)
    }
}

fn status_link(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Permalink> {
    select_all(node, "a[href*='/status/']")
        .into_iter()
        .find_map(|link| permalink_from_href(link.value().attr("href")?, ctx.page_url))
}

fn tweet_text(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    select_first(node, "div[data-testid='tweetText']").map(rendered_text)
}

fn lang_block(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    select_first(node, "div[lang]").map(rendered_text)
}

fn time_datetime(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<String> {
    attr_of(node, "time[datetime]", "datetime")
}

fn testid_counts(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<Stats> {
    let count = |css: &str| select_first(node, css).map(|el| leading_count(&rendered_text(el)));
    let replies = count("[data-testid='reply']");
    let retweets = count("[data-testid='retweet']").or_else(|| count("[data-testid='unretweet']"));
    let likes = count("[data-testid='like']").or_else(|| count("[data-testid='unlike']"));
    if replies.is_none() && retweets.is_none() && likes.is_none() {
        return None;
    }
    Some(Stats {
        replies: replies.unwrap_or(0),
        retweets: retweets.unwrap_or(0),
        likes: likes.unwrap_or(0),
    })
}

/// `12 replies, 3 reposts, 40 likes, 2 bookmarks, 900 views`
fn action_bar_label(node: ElementRef<'_>, _ctx: &PageContext<'_>) -> Option<Stats> {
    let label = attr_of(node, "div[role='group'][aria-label]", "aria-label")?;
    scan_stat_lines(label.split(','))
}

fn media_images(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<Vec<String>> {
    image_sources(node, "img[src*='media']", ctx.page_url)
}

fn video_player(node: ElementRef<'_>, ctx: &PageContext<'_>) -> Option<VideoEvidence> {
    let player = select_first(node, "div[data-testid='videoPlayer']")?;
    let preview = attr_of(player, "img[src]", "src")
        .or_else(|| attr_of(player, "video[poster]", "poster"))
        .and_then(|raw| absolutize(&raw, ctx.page_url));
    Some(VideoEvidence { preview })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = r#"
<article data-testid="tweet" role="article">
  <div><a href="/someone" role="link"><img class="css-9pa8cd" src="https://pbs.twimg.com/profile_images/1/avatar_normal.jpg"></a></div>
  <div>
    <a href="/someone/status/1790000000000000001?ref=home" dir="ltr"><time datetime="2024-05-13T09:12:44.000Z">May 13</time></a>
    <div data-testid="tweetText" lang="en"><span>Shipping the new build today</span><img alt="🚀" src="https://abs-0.twimg.com/emoji/v2/svg/1f680.svg"><br><span>details below</span></div>
    <div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/media/GNabc.jpg?format=jpg&amp;name=small"></div>
    <div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/media/GNabc.jpg?format=jpg&amp;name=small"></div>
    <div role="group" aria-label="5 replies, 12 reposts, 1,337 likes, 4 bookmarks, 20000 views">
      <div data-testid="reply"><span>5</span></div>
      <div data-testid="retweet"><span>12</span></div>
      <div data-testid="like"><span>1,337</span></div>
    </div>
  </div>
</article>"#;

    fn page_url() -> Url {
        Url::parse("https://x.com/someone").unwrap()
    }

    #[test]
    fn extracts_full_origin_post() {
        let record = OriginExtractor::default()
            .extract(POST, &page_url())
            .expect("record");
        assert_eq!(record.id, "1790000000000000001");
        assert_eq!(record.url, "https://x.com/someone/status/1790000000000000001");
        assert_eq!(record.text, "Shipping the new build today🚀\ndetails below");
        assert_eq!(record.timestamp, "2024-05-13T09:12:44.000Z");
        assert_eq!(
            record.stats,
            Stats {
                replies: 5,
                retweets: 12,
                likes: 1337
            }
        );
        assert_eq!(
            record.media,
            vec!["https://pbs.twimg.com/media/GNabc.jpg?format=jpg&name=small".to_string()]
        );
        assert!(record.has_media);
        assert!(!record.has_video);
        assert_eq!(record.source, Source::Origin);
    }

    #[test]
    fn aria_label_fills_in_when_counters_are_missing() {
        let html = r#"<article data-testid="tweet">
            <div role="group" aria-label="2 replies, 7 reposts, 30 likes"></div>
        </article>"#;
        let record = OriginExtractor::default().extract(html, &page_url()).unwrap();
        assert_eq!(
            record.stats,
            Stats {
                replies: 2,
                retweets: 7,
                likes: 30
            }
        );
    }

    #[test]
    fn abbreviated_counters_expand() {
        let html = r#"<article data-testid="tweet">
            <div role="group">
              <div data-testid="reply"><span>2</span></div>
              <div data-testid="retweet"><span>2.5K</span></div>
              <div data-testid="like"><span>1.2M</span></div>
            </div>
        </article>"#;
        let record = OriginExtractor::default().extract(html, &page_url()).unwrap();
        assert_eq!(
            record.stats,
            Stats {
                replies: 2,
                retweets: 2_500,
                likes: 1_200_000
            }
        );
    }

    #[test]
    fn video_poster_is_tagged_once() {
        let html = r#"<article data-testid="tweet">
            <a href="/someone/status/77">link</a>
            <img src="https://pbs.twimg.com/media/thumb.jpg">
            <div data-testid="videoPlayer"><video poster="https://pbs.twimg.com/media/thumb.jpg"></video></div>
        </article>"#;
        let record = OriginExtractor::default().extract(html, &page_url()).unwrap();
        assert!(record.has_video);
        assert_eq!(
            record.media,
            vec!["video_preview:https://pbs.twimg.com/media/thumb.jpg".to_string()]
        );
        assert_eq!(
            record.video_preview_url.as_deref(),
            Some("https://pbs.twimg.com/media/thumb.jpg")
        );
    }

    #[test]
    fn bare_container_yields_defaults() {
        let record = OriginExtractor::default()
            .extract(r#"<article data-testid="tweet"><div></div></article>"#, &page_url())
            .unwrap();
        assert_eq!(record.id, "unknown");
        assert_eq!(record.text, "");
        assert_eq!(record.stats, Stats::default());
        assert!(record.media.is_empty());
        assert!(!record.has_media);
    }

    #[test]
    fn empty_snapshot_is_skipped() {
        assert!(OriginExtractor::default().extract("", &page_url()).is_none());
        assert!(OriginExtractor::default().extract("   ", &page_url()).is_none());
    }
}
