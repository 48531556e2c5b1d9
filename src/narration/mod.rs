use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::{EngineConfig, NarrationConfig};
use crate::identifier::UploadId;
use crate::storage::{FileStore, StoreError};

mod command;
mod openai;

pub use command::CommandEngine;
pub use openai::OpenAiSpeechEngine;

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to start the speech engine")]
    Spawn(#[source] std::io::Error),

    #[error("speech engine exited with status {status:?}: {stderr}")]
    EngineFailed { status: Option<i32>, stderr: String },

    #[error("request to the speech service failed")]
    Http(#[from] reqwest::Error),

    #[error("speech service responded with status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("api key is not a valid header value")]
    InvalidApiKey,

    #[error("speech engine produced no audio")]
    EmptyOutput,

    #[error("i/o error while synthesizing")]
    Io(#[source] std::io::Error),

    #[error("speech engine did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("narration gate has been closed")]
    GateClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A capability that renders text as an audio file on disk.
#[async_trait]
pub trait SpeechEngine: Sync + Send + 'static {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), SynthesisError>;
}

impl EngineConfig {
    pub fn build(&self, api_key: &str) -> Result<Arc<dyn SpeechEngine>, SynthesisError> {
        match self {
            Self::Command { program, args } => {
                Ok(Arc::new(CommandEngine::new(program.clone(), args.clone())))
            },
            Self::OpenAi {
                base_url,
                model,
                voice,
            } => Ok(Arc::new(OpenAiSpeechEngine::new(
                base_url,
                model.clone(),
                voice.clone(),
                api_key.to_string(),
            )?)),
        }
    }
}

/// Drives a shared speech engine on behalf of concurrent requests.
///
/// Calls into the engine are gated by a semaphore, with the default of a
/// single permit every synthesis runs on its own. Audio is written under a
/// staging name and only renamed into the audio store once the engine has
/// produced a non-empty file.
pub struct NarrationSynthesizer {
    engine: Arc<dyn SpeechEngine>,
    gate: Semaphore,
    timeout: Duration,
    store: FileStore,
}

impl NarrationSynthesizer {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        cfg: &NarrationConfig,
        store: FileStore,
    ) -> Self {
        Self {
            engine,
            gate: Semaphore::new(cfg.max_concurrency.max(1)),
            timeout: cfg.timeout(),
            store,
        }
    }

    /// Narrates the text into the audio artifact for `id`.
    pub async fn synthesize(&self, id: UploadId, text: &str) -> Result<PathBuf, SynthesisError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SynthesisError::GateClosed)?;

        self.store.ensure_directory().await?;
        let staging = self.store.staging_path_for(id);

        debug!("Synthesizing narration @ {:?}", &staging);
        let result = tokio::time::timeout(self.timeout, self.engine.synthesize(text, &staging))
            .await
            .unwrap_or(Err(SynthesisError::TimedOut(self.timeout)));

        if let Err(e) = result {
            self.store.discard(id).await;
            return Err(e);
        }

        let written = match tokio::fs::metadata(&staging).await {
            Ok(meta) => meta.len(),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                self.store.discard(id).await;
                return Err(SynthesisError::Io(e));
            },
        };

        if written == 0 {
            self.store.discard(id).await;
            return Err(SynthesisError::EmptyOutput);
        }

        Ok(self.store.commit(id).await?)
    }
}
