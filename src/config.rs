use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::story::ImageDetail;

#[derive(Debug, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    /// Where uploaded images and synthesized narrations live.
    pub storage: StorageConfig,

    #[serde(default)]
    /// The remote vision model used to write stories.
    pub story: StoryConfig,

    #[serde(default)]
    /// The speech engine used to narrate stories.
    pub narration: NarrationConfig,
}

impl RuntimeConfig {
    /// Loads the config from a YAML file.
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as `null` rather than an empty map.
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(data)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_uploads_directory")]
    /// The directory uploaded images are written to.
    ///
    /// Defaults to `uploads`.
    pub uploads_directory: PathBuf,

    #[serde(default = "default_audio_directory")]
    /// The directory synthesized narrations are written to.
    ///
    /// Defaults to `audios`.
    pub audio_directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_directory: default_uploads_directory(),
            audio_directory: default_audio_directory(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryConfig {
    #[serde(default = "default_openai_base_url")]
    /// The base URL of an OpenAI compatible API.
    pub base_url: String,

    #[serde(default = "default_story_model")]
    /// A vision capable chat model.
    ///
    /// Defaults to `gpt-4o`.
    pub model: String,

    #[serde(default = "default_temperature")]
    /// Sampling temperature, higher values give more varied prose.
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    /// The upper bound on the length of a generated story.
    pub max_tokens: u32,

    #[serde(default)]
    /// The image detail hint sent alongside the picture.
    ///
    /// `low` keeps the remote processing cost bounded.
    pub detail: ImageDetail,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_instruction")]
    pub instruction: String,

    #[serde(default = "default_story_timeout")]
    /// How long to wait for the model before giving up, in seconds.
    pub timeout_secs: u64,
}

impl StoryConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_story_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            detail: ImageDetail::default(),
            system_prompt: default_system_prompt(),
            instruction: default_instruction(),
            timeout_secs: default_story_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum EngineConfig {
    /// Runs a local speech synthesis program.
    ///
    /// The story is written to the program's stdin and every `{output}`
    /// placeholder in `args` is replaced with the target file path.
    Command {
        program: String,

        #[serde(default)]
        args: Vec<String>,
    },

    /// Uses a remote OpenAI compatible speech endpoint.
    OpenAi {
        #[serde(default = "default_openai_base_url")]
        base_url: String,

        #[serde(default = "default_speech_model")]
        model: String,

        #[serde(default = "default_voice")]
        voice: String,
    },
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::Command {
            program: "espeak-ng".to_string(),
            args: vec!["-w".to_string(), "{output}".to_string(), "--stdin".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NarrationConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default = "default_max_concurrency")]
    /// The number of narrations allowed to run at once.
    ///
    /// The default of `1` serializes every call into the engine, raise it
    /// only for engines known to be safe under concurrent use.
    pub max_concurrency: usize,

    #[serde(default = "default_narration_timeout")]
    /// How long a single synthesis may take, in seconds.
    pub timeout_secs: u64,
}

impl NarrationConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_narration_timeout(),
        }
    }
}

fn default_uploads_directory() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_audio_directory() -> PathBuf {
    PathBuf::from("audios")
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_story_model() -> String {
    "gpt-4o".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_system_prompt() -> String {
    "You are a creative storyteller. Create a short story or poem inspired by the image.".to_string()
}

fn default_instruction() -> String {
    "Please write a creative short story or poem inspired by this image.".to_string()
}

const fn default_temperature() -> f64 {
    0.8
}

const fn default_max_tokens() -> u32 {
    300
}

const fn default_story_timeout() -> u64 {
    60
}

const fn default_narration_timeout() -> u64 {
    120
}

const fn default_max_concurrency() -> usize {
    1
}
