use std::time::Instant;

use poem_openapi::Object;
use tokio::fs::File;

use crate::identifier::UploadId;
use crate::narration::{NarrationSynthesizer, SynthesisError};
use crate::storage::{FileStore, StoreError};
use crate::story::{StoryError, StoryGenerator};

#[derive(Object, Debug)]
pub struct StoryInfo {
    /// The story written for the uploaded photo.
    pub story: String,

    /// The relative path the narration can be fetched from.
    pub audio_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to persist the upload")]
    Store(#[from] StoreError),

    #[error("failed to generate story from image")]
    Story(#[from] StoryError),

    #[error("failed to generate audio")]
    Narration(#[from] SynthesisError),
}

/// Ties one upload to its story and narration.
pub struct StoryController {
    uploads: FileStore,
    audio: FileStore,
    stories: StoryGenerator,
    narrator: NarrationSynthesizer,
}

impl StoryController {
    pub fn new(
        uploads: FileStore,
        audio: FileStore,
        stories: StoryGenerator,
        narrator: NarrationSynthesizer,
    ) -> Self {
        Self {
            uploads,
            audio,
            stories,
            narrator,
        }
    }

    pub async fn ensure_directories(&self) -> Result<(), StoreError> {
        self.uploads.ensure_directory().await?;
        self.audio.ensure_directory().await
    }

    /// Runs the full upload flow.
    ///
    /// Steps run strictly in order and the first failure ends the flow,
    /// artifacts written by earlier steps are left in place.
    pub async fn upload(&self, data: Vec<u8>) -> Result<StoryInfo, PipelineError> {
        let id = UploadId::new();
        let instant = Instant::now();

        let image_path = self.uploads.save(id, &data).await?;
        debug!(upload_id = %id, "Persisted upload @ {:?}", image_path);

        let story = self.stories.generate(&data).await?;
        debug!(upload_id = %id, story_len = story.len(), "Generated story");

        let audio_path = self.narrator.synthesize(id, &story).await?;
        debug!(upload_id = %id, "Persisted narration @ {:?}", audio_path);

        info!(
            upload_id = %id,
            image_size = data.len(),
            elapsed = ?instant.elapsed(),
            "Narrated upload"
        );

        Ok(StoryInfo {
            story,
            audio_url: format!("/audio/{}", id),
        })
    }

    pub async fn fetch_audio(&self, id: UploadId) -> Result<Option<File>, StoreError> {
        self.audio.open(id).await
    }
}
