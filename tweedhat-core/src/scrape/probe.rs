use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Answers whether a media URI actually serves an image.
///
/// Rate-limited mirrors keep serving timelines but answer media requests
/// with HTML error pages.
#[async_trait(?Send)]
pub trait MediaProbe {
    async fn serves_image(&self, uri: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpMediaProbe {
    client: reqwest::Client,
}

impl HttpMediaProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl MediaProbe for HttpMediaProbe {
    async fn serves_image(&self, uri: &str) -> bool {
        let response = match self.client.get(uri).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(uri, error = %err, "media probe request failed");
                return false;
            }
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!(uri, status = %response.status(), content_type = %content_type, "media probe");
        response.status().is_success() && is_image_content_type(&content_type)
    }
}

/// Probe that trusts every URI, used when probing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustingProbe;

#[async_trait(?Send)]
impl MediaProbe for TrustingProbe {
    async fn serves_image(&self, _uri: &str) -> bool {
        true
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_check() {
        assert!(is_image_content_type("image/jpeg"));
        assert!(is_image_content_type(" Image/WEBP; charset=binary"));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
        assert!(!is_image_content_type(""));
    }
}
