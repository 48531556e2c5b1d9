mod filesystem;

pub use filesystem::{FileStore, StoreError};

/// Uploaded images are always stored under this extension, whatever
/// their real format.
pub const IMAGE_EXTENSION: &str = "jpg";

pub const AUDIO_EXTENSION: &str = "mp3";
