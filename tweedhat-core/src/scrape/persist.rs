use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

use crate::config::OutputSection;

use super::model::{ScrapeSession, TweetRecord};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// On-disk shape of one finished scrape.
#[derive(Debug, Serialize)]
pub struct OutputDocument<'a> {
    pub username: &'a str,
    pub scraped_at: String,
    pub tweet_count: usize,
    pub tweets: &'a [TweetRecord],
}

impl<'a> OutputDocument<'a> {
    pub fn from_session(session: &'a ScrapeSession) -> Self {
        Self {
            username: session.username(),
            scraped_at: session
                .scraped_at()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            tweet_count: session.len(),
            tweets: session.tweets(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceWriter {
    tweets_dir: PathBuf,
}

impl PersistenceWriter {
    pub fn new(config: &OutputSection) -> Self {
        Self {
            tweets_dir: PathBuf::from(&config.tweets_dir),
        }
    }

    pub fn tweets_dir(&self) -> &Path {
        &self.tweets_dir
    }

    pub fn default_path(&self, username: &str, at: DateTime<Utc>) -> PathBuf {
        self.tweets_dir.join(format!(
            "{username}_tweets_{}.json",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Absolute paths are kept. Relative ones land under the tweets directory
    /// unless they already point inside it.
    pub fn resolve_path(&self, requested: Option<&Path>, username: &str, at: DateTime<Utc>) -> PathBuf {
        match requested {
            None => self.default_path(username, at),
            Some(path) if path.is_absolute() || path.starts_with(&self.tweets_dir) => {
                path.to_path_buf()
            }
            Some(path) => self.tweets_dir.join(path),
        }
    }

    /// Writes the session as pretty JSON through a temporary sibling that is
    /// renamed into place.
    pub fn write(
        &self,
        session: &ScrapeSession,
        requested: Option<&Path>,
    ) -> Result<PathBuf, PersistError> {
        let path = self.resolve_path(requested, session.username(), session.scraped_at());
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| PersistError::CreateDir {
            path: parent.clone(),
            source,
        })?;

        let document = OutputDocument::from_session(session);
        let body = serde_json::to_vec_pretty(&document)?;
        let write_err = |source: io::Error| PersistError::Write {
            path: path.clone(),
            source,
        };
        let mut staged = NamedTempFile::new_in(&parent).map_err(write_err)?;
        staged.write_all(&body).map_err(write_err)?;
        staged.write_all(b"\n").map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged
            .persist(&path)
            .map_err(|err| write_err(err.error))?;

        info!(
            username = %session.username(),
            tweets = session.len(),
            path = %path.display(),
            "Saved tweets"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::model::{MediaSet, Source, Stats};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn writer(dir: &Path) -> PersistenceWriter {
        PersistenceWriter::new(&OutputSection {
            tweets_dir: dir.to_string_lossy().into_owned(),
        })
    }

    fn session() -> ScrapeSession {
        let mut session = ScrapeSession::new("someone", Source::Mirror, None);
        for id in ["30", "20"] {
            session.push(TweetRecord::new(
                Source::Mirror,
                Some(id.to_string()),
                Some(format!("https://nitter.net/someone/status/{id}")),
                format!("post {id} ✨"),
                "Mar 1, 2024 · 10:00 AM UTC".to_string(),
                Stats::default(),
                MediaSet::default(),
            ));
        }
        session
    }

    #[test]
    fn default_path_uses_username_and_stamp() {
        let writer = PersistenceWriter::new(&OutputSection::default());
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            writer.default_path("someone", at),
            PathBuf::from("tweets/someone_tweets_20240301_090507.json")
        );
    }

    #[test]
    fn relative_paths_land_under_tweets_dir() {
        let writer = PersistenceWriter::new(&OutputSection::default());
        let at = Utc::now();
        assert_eq!(
            writer.resolve_path(Some(Path::new("out.json")), "someone", at),
            PathBuf::from("tweets/out.json")
        );
        assert_eq!(
            writer.resolve_path(Some(Path::new("tweets/out.json")), "someone", at),
            PathBuf::from("tweets/out.json")
        );
        assert_eq!(
            writer.resolve_path(Some(Path::new("/tmp/out.json")), "someone", at),
            PathBuf::from("/tmp/out.json")
        );
    }

    #[test]
    fn writes_document_and_creates_parents() {
        let dir = tempdir().unwrap();
        let writer = writer(&dir.path().join("nested").join("tweets"));
        let path = writer.write(&session(), None).unwrap();
        assert!(path.starts_with(dir.path().join("nested").join("tweets")));

        let raw = fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["username"], "someone");
        assert_eq!(doc["tweet_count"], 2);
        assert_eq!(doc["tweets"][0]["id"], "30");
        assert_eq!(doc["tweets"][1]["text"], "post 20 ✨");
        assert_eq!(doc["tweets"][0]["source"], "mirror");
        assert!(doc["scraped_at"].as_str().unwrap().ends_with('Z'));

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn unwritable_directory_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();
        let writer = writer(&blocker.join("tweets"));
        let err = writer.write(&session(), None).unwrap_err();
        assert!(matches!(err, PersistError::CreateDir { .. }));
    }
}
