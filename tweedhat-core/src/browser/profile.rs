use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::error::{BrowserError, BrowserResult};

/// Content settings forced to "allow" in every profile.
const ALLOWED_CONTENT: [&str; 3] = ["javascript", "images", "cookies"];

#[derive(Debug, Clone)]
pub struct BrowserProfile {
    id: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
    ephemeral: bool,
}

impl BrowserProfile {
    fn persistent(path: PathBuf) -> BrowserResult<Self> {
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(Self {
            id: "persistent".to_string(),
            path,
            created_at: Utc::now(),
            ephemeral: false,
        })
    }

    fn fresh(base: &Path) -> BrowserResult<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base.join(&id);
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(Self {
            id,
            path,
            created_at: Utc::now(),
            ephemeral: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Merges the content-setting overrides into `Default/Preferences`,
    /// keeping every other key Chromium already wrote there.
    pub fn write_content_settings(&self) -> BrowserResult<()> {
        let default_dir = self.path.join("Default");
        std::fs::create_dir_all(&default_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to create profile Default dir: {err}"))
        })?;
        let prefs_path = default_dir.join("Preferences");
        let mut prefs = match std::fs::read_to_string(&prefs_path) {
            Ok(raw) => serde_json::from_str::<Value>(&raw).unwrap_or_else(|err| {
                tracing::warn!(path = %prefs_path.display(), error = %err, "discarding unreadable preferences");
                json!({})
            }),
            Err(_) => json!({}),
        };
        merge_content_settings(&mut prefs);
        let serialized = serde_json::to_string(&prefs)
            .map_err(|err| BrowserError::Profile(format!("failed to encode preferences: {err}")))?;
        std::fs::write(&prefs_path, serialized)
            .map_err(|err| BrowserError::Profile(format!("failed to write preferences: {err}")))?;
        Ok(())
    }

    pub async fn touch(&self) -> BrowserResult<()> {
        if self.path.exists() {
            let marker = self.path.join(".last_used");
            let mut file = fs::File::create(&marker).await.map_err(|err| {
                BrowserError::Profile(format!("failed to write profile marker: {err}"))
            })?;
            file.write_all(Utc::now().to_rfc3339().as_bytes())
                .await
                .map_err(|err| {
                    BrowserError::Profile(format!("failed to update profile marker: {err}"))
                })?;
        }
        Ok(())
    }

    /// Removes the directory of an ephemeral profile. Persistent profiles are kept.
    pub async fn release(&self) {
        if !self.ephemeral {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove ephemeral profile");
        }
    }
}

fn merge_content_settings(prefs: &mut Value) {
    if !prefs.is_object() {
        *prefs = json!({});
    }
    let Some(root) = prefs.as_object_mut() else {
        return;
    };
    let profile = root
        .entry("profile")
        .or_insert_with(|| Value::Object(Map::new()));
    if !profile.is_object() {
        *profile = Value::Object(Map::new());
    }
    let Some(profile) = profile.as_object_mut() else {
        return;
    };
    let settings = profile
        .entry("default_content_setting_values")
        .or_insert_with(|| Value::Object(Map::new()));
    if !settings.is_object() {
        *settings = Value::Object(Map::new());
    }
    if let Some(settings) = settings.as_object_mut() {
        for key in ALLOWED_CONTENT {
            settings.insert(key.to_string(), json!(1));
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileManager {
    base_dir: PathBuf,
    persistent: bool,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P, persistent: bool) -> BrowserResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self {
            base_dir,
            persistent,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn allocate(&self) -> BrowserResult<BrowserProfile> {
        let profile = if self.persistent {
            BrowserProfile::persistent(self.base_dir.clone())?
        } else {
            BrowserProfile::fresh(&self.base_dir)?
        };
        profile.write_content_settings()?;
        Ok(profile)
    }
}
