use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking a media entry as a video preview frame.
pub const VIDEO_PREVIEW_TAG: &str = "video_preview:";

/// Placeholder id for posts whose permalink could not be recovered.
pub const UNKNOWN_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Mirror,
    Origin,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::Mirror => "mirror",
            Source::Origin => "origin",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub replies: u64,
    pub retweets: u64,
    pub likes: u64,
}

/// One media entry, with the preview tag interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Image(String),
    VideoPreview(String),
}

impl MediaRef {
    pub fn parse(entry: &str) -> Self {
        match entry.strip_prefix(VIDEO_PREVIEW_TAG) {
            Some(uri) => MediaRef::VideoPreview(uri.to_string()),
            None => MediaRef::Image(entry.to_string()),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            MediaRef::Image(uri) | MediaRef::VideoPreview(uri) => uri,
        }
    }

    pub fn is_video_preview(&self) -> bool {
        matches!(self, MediaRef::VideoPreview(_))
    }

    pub fn to_entry(&self) -> String {
        match self {
            MediaRef::Image(uri) => uri.clone(),
            MediaRef::VideoPreview(uri) => format!("{VIDEO_PREVIEW_TAG}{uri}"),
        }
    }
}

/// Media collected from one post before it is flattened into entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSet {
    pub images: Vec<String>,
    pub has_video: bool,
    pub video_preview: Option<String>,
}

impl MediaSet {
    /// Flattens into record entries: images in first-seen order without
    /// duplicates, the preview replacing any untagged copy of itself and
    /// appended once with the preview tag.
    pub fn into_entries(self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut entries: Vec<String> = self
            .images
            .into_iter()
            .filter(|uri| !uri.is_empty() && seen.insert(uri.clone()))
            .collect();
        if let Some(preview) = self.video_preview.filter(|uri| !uri.is_empty()) {
            entries.retain(|uri| uri != &preview);
            entries.push(MediaRef::VideoPreview(preview).to_entry());
        }
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetRecord {
    pub id: String,
    pub url: String,
    pub text: String,
    pub timestamp: String,
    pub stats: Stats,
    pub media: Vec<String>,
    pub has_video: bool,
    pub has_media: bool,
    pub video_preview_url: Option<String>,
    pub source: Source,
}

impl TweetRecord {
    pub fn new(
        source: Source,
        id: Option<String>,
        url: Option<String>,
        text: String,
        timestamp: String,
        stats: Stats,
        media: MediaSet,
    ) -> Self {
        let has_video = media.has_video;
        let video_preview_url = media.video_preview.clone().filter(|uri| !uri.is_empty());
        let media = media.into_entries();
        let has_media = !media.is_empty() || has_video;
        Self {
            id: id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| UNKNOWN_ID.to_string()),
            url: url.unwrap_or_default(),
            text,
            timestamp,
            stats,
            media,
            has_video,
            has_media,
            video_preview_url,
            source,
        }
    }

    pub fn media_refs(&self) -> impl Iterator<Item = MediaRef> + '_ {
        self.media.iter().map(|entry| MediaRef::parse(entry))
    }

    pub fn first_media_uri(&self) -> Option<String> {
        self.media_refs().next().map(|media| media.uri().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    Duplicate,
    Full,
}

/// Ordered, id-unique batch of records from one backend attempt.
#[derive(Debug, Clone)]
pub struct ScrapeSession {
    username: String,
    backend_used: Source,
    scraped_at: DateTime<Utc>,
    max_tweets: Option<usize>,
    tweets: Vec<TweetRecord>,
    seen: HashSet<String>,
}

impl ScrapeSession {
    /// A cap of zero means no cap.
    pub fn new(username: impl Into<String>, backend: Source, max_tweets: Option<usize>) -> Self {
        Self {
            username: username.into(),
            backend_used: backend,
            scraped_at: Utc::now(),
            max_tweets: max_tweets.filter(|max| *max > 0),
            tweets: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn backend_used(&self) -> Source {
        self.backend_used
    }

    pub fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    pub fn max_tweets(&self) -> Option<usize> {
        self.max_tweets
    }

    pub fn tweets(&self) -> &[TweetRecord] {
        &self.tweets
    }

    pub fn len(&self) -> usize {
        self.tweets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_tweets
            .map_or(false, |max| self.tweets.len() >= max)
    }

    pub fn push(&mut self, record: TweetRecord) -> PushOutcome {
        if self.is_full() {
            return PushOutcome::Full;
        }
        if !self.seen.insert(record.id.clone()) {
            return PushOutcome::Duplicate;
        }
        self.tweets.push(record);
        PushOutcome::Appended
    }
}
