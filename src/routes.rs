use std::sync::Arc;

use poem::middleware::Tracing;
use poem::{Body, Endpoint, EndpointExt, Route};
use poem_openapi::param::Path;
use poem_openapi::payload::{Binary, Json};
use poem_openapi::types::multipart::Upload;
use poem_openapi::{ApiResponse, Multipart, Object, OpenApi, OpenApiService};

use crate::controller::{PipelineError, StoryController, StoryInfo};
use crate::identifier::UploadId;

const INTERNAL_ERROR: &str = "Internal Server Error";
const AUDIO_NOT_FOUND: &str = "Audio not found";

#[derive(Object, Debug)]
pub struct ErrorDetail {
    /// A client safe description of what went wrong.
    detail: String,
}

impl ErrorDetail {
    fn new(detail: &str) -> Json<Self> {
        Json(Self {
            detail: detail.to_string(),
        })
    }
}

#[derive(Object, Debug)]
pub struct AudioError {
    error: String,
}

impl AudioError {
    fn new(error: &str) -> Json<Self> {
        Json(Self {
            error: error.to_string(),
        })
    }
}

#[derive(Multipart)]
pub struct PhotoUpload {
    /// The photo to write a story about.
    file: Upload,
}

#[derive(ApiResponse)]
pub enum UploadResponse {
    /// The story was written and narrated.
    #[oai(status = 200)]
    Ok(Json<StoryInfo>),

    /// The photo could not be turned into a narrated story.
    #[oai(status = 500)]
    InternalServerError(Json<ErrorDetail>),
}

impl From<PipelineError> for UploadResponse {
    fn from(e: PipelineError) -> Self {
        let retryable = matches!(&e, PipelineError::Story(inner) if inner.is_retryable());
        error!(retryable, "Failed to process upload: {:?}", e);
        Self::InternalServerError(ErrorDetail::new(INTERNAL_ERROR))
    }
}

#[derive(ApiResponse)]
pub enum AudioResponse {
    /// The narration for the given upload.
    #[oai(status = 200, content_type = "audio/mpeg")]
    Ok(Binary<Body>),

    /// No narration exists for the given audio id.
    #[oai(status = 404)]
    NotFound(Json<AudioError>),

    #[oai(status = 500)]
    InternalServerError(Json<ErrorDetail>),
}

pub struct NarratorApi {
    controller: Arc<StoryController>,
}

impl NarratorApi {
    pub fn new(controller: Arc<StoryController>) -> Self {
        Self { controller }
    }
}

#[OpenApi]
impl NarratorApi {
    /// Upload Photo
    ///
    /// Writes a short story or poem about the uploaded photo and narrates it.
    /// The narration can be fetched from the returned `audio_url`.
    #[oai(path = "/upload-photo", method = "post")]
    pub async fn upload_photo(&self, upload: PhotoUpload) -> UploadResponse {
        let data = match upload.file.into_vec().await {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read upload body: {:?}", e);
                return UploadResponse::InternalServerError(ErrorDetail::new(INTERNAL_ERROR));
            },
        };

        match self.controller.upload(data).await {
            Ok(info) => UploadResponse::Ok(Json(info)),
            Err(e) => e.into(),
        }
    }

    /// Fetch Audio
    ///
    /// Streams the narration for a previous upload.
    #[oai(path = "/audio/:audio_id", method = "get")]
    pub async fn get_audio(&self, audio_id: Path<String>) -> AudioResponse {
        let id = match UploadId::parse(&audio_id.0) {
            Some(id) => id,
            None => {
                debug!("Rejected malformed audio id {:?}", &audio_id.0);
                return AudioResponse::NotFound(AudioError::new(AUDIO_NOT_FOUND));
            },
        };

        match self.controller.fetch_audio(id).await {
            Ok(Some(file)) => AudioResponse::Ok(Binary(Body::from_async_read(file))),
            Ok(None) => {
                debug!("No narration for {}", id);
                AudioResponse::NotFound(AudioError::new(AUDIO_NOT_FOUND))
            },
            Err(e) => {
                error!("Failed to read narration for {}: {:?}", id, e);
                AudioResponse::InternalServerError(ErrorDetail::new(INTERNAL_ERROR))
            },
        }
    }
}

/// Builds the HTTP app with the API mounted at the root and its docs at `docs_url`.
pub fn build_app(controller: Arc<StoryController>, docs_url: &str) -> impl Endpoint {
    let api_service = OpenApiService::new(
        NarratorApi::new(controller),
        "Narrator API",
        env!("CARGO_PKG_VERSION"),
    );
    let ui = api_service.redoc();

    Route::new()
        .nest(docs_url, ui)
        .nest("/", api_service)
        .with(Tracing)
}
