use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod openai;

pub use openai::OpenAiStoryTeller;
pub(crate) use openai::{truncate_at_boundary, MAX_ERROR_BODY};

/// How closely the remote model should look at the picture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageDetail {
    #[default]
    Low,
    High,
    Auto,
}

#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("failed to build the story request: {0}")]
    Encode(String),

    #[error("request to the story service failed")]
    Http(#[from] reqwest::Error),

    #[error("story service responded with status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("story service is throttling requests")]
    Throttled { retry_after: Option<Duration> },

    #[error("story service returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("story service returned an empty story")]
    EmptyStory,

    #[error("story service did not respond within {0:?}")]
    TimedOut(Duration),
}

impl StoryError {
    /// Whether the same request may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::TimedOut(_))
    }
}

/// A remote capability that writes a story for a picture.
#[async_trait]
pub trait StoryTeller: Sync + Send + 'static {
    async fn tell(&self, image: &[u8]) -> Result<String, StoryError>;
}

/// Bounds a story teller with a deadline and normalises its output.
#[derive(Clone)]
pub struct StoryGenerator {
    teller: Arc<dyn StoryTeller>,
    timeout: Duration,
}

impl StoryGenerator {
    pub fn new(teller: Arc<dyn StoryTeller>, timeout: Duration) -> Self {
        Self { teller, timeout }
    }

    /// Generates a story for the raw image bytes.
    ///
    /// The returned text has surrounding whitespace stripped and is never empty.
    pub async fn generate(&self, image: &[u8]) -> Result<String, StoryError> {
        let story = tokio::time::timeout(self.timeout, self.teller.tell(image))
            .await
            .map_err(|_| StoryError::TimedOut(self.timeout))??;

        let story = story.trim();
        if story.is_empty() {
            return Err(StoryError::EmptyStory);
        }

        Ok(story.to_string())
    }
}
