use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::File;

use crate::identifier::UploadId;

/// Suffix of artifacts that are still being written.
const STAGING_SUFFIX: &str = "part";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write artifact {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read artifact {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A flat directory of artifacts named `<id>.<extension>`.
///
/// Artifacts are written once under a staging name and renamed into place,
/// readers only ever see complete files.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
    extension: &'static str,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            directory: directory.into(),
            extension,
        }
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[inline]
    pub fn path_for(&self, id: UploadId) -> PathBuf {
        self.directory.join(format!("{}.{}", id, self.extension))
    }

    #[inline]
    pub fn staging_path_for(&self, id: UploadId) -> PathBuf {
        self.directory
            .join(format!("{}.{}.{}", id, self.extension, STAGING_SUFFIX))
    }

    pub async fn ensure_directory(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.directory.clone(),
                source,
            })
    }

    /// Writes the artifact for the given id returning its final path.
    ///
    /// The backing directory is recreated if it has gone missing.
    pub async fn save(&self, id: UploadId, data: &[u8]) -> Result<PathBuf, StoreError> {
        let staging = self.staging_path_for(id);

        debug!("Storing artifact @ {:?}", &staging);
        let written = match tokio::fs::write(&staging, data).await {
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                self.ensure_directory().await?;
                tokio::fs::write(&staging, data).await
            },
            other => other,
        };

        if let Err(source) = written {
            self.discard(id).await;
            return Err(StoreError::Write { path: staging, source });
        }

        self.commit(id).await
    }

    /// Moves a fully written staging file into its final place.
    pub async fn commit(&self, id: UploadId) -> Result<PathBuf, StoreError> {
        let staging = self.staging_path_for(id);
        let path = self.path_for(id);

        if let Err(source) = tokio::fs::rename(&staging, &path).await {
            self.discard(id).await;
            return Err(StoreError::Write { path, source });
        }

        Ok(path)
    }

    /// Removes any leftover staging file for the given id.
    pub async fn discard(&self, id: UploadId) {
        let staging = self.staging_path_for(id);
        match tokio::fs::remove_file(&staging).await {
            Ok(()) => debug!("Purged staging artifact @ {:?}", &staging),
            Err(ref e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => warn!("Failed to purge staging artifact @ {:?}: {}", &staging, e),
        }
    }

    /// Opens the artifact for streaming, `None` if it does not exist.
    pub async fn open(&self, id: UploadId) -> Result<Option<File>, StoreError> {
        let path = self.path_for(id);

        debug!("Retrieving artifact @ {:?}", &path);
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }
}
