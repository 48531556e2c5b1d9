use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Serialize;

use super::{SpeechEngine, SynthesisError};
use crate::story::{truncate_at_boundary, MAX_ERROR_BODY};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Narrates through an OpenAI compatible `/audio/speech` endpoint.
pub struct OpenAiSpeechEngine {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    voice: String,
    api_key: String,
}

impl OpenAiSpeechEngine {
    pub fn new(
        base_url: &str,
        model: String,
        voice: String,
        api_key: String,
    ) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder().build()?;
        let endpoint = format!("{}/audio/speech", base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            model,
            voice,
            api_key,
        })
    }
}

#[async_trait]
impl SpeechEngine for OpenAiSpeechEngine {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), SynthesisError> {
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| SynthesisError::InvalidApiKey)?;

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "mp3",
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, auth)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate_at_boundary(&mut body, MAX_ERROR_BODY);
            return Err(SynthesisError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let audio = resp.bytes().await?;
        tokio::fs::write(output, &audio)
            .await
            .map_err(SynthesisError::Io)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn engine_for(server: &MockServer) -> OpenAiSpeechEngine {
        OpenAiSpeechEngine::new(
            &format!("{}/v1", server.uri()),
            "tts-1".to_string(),
            "alloy".to_string(),
            "test-key".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_writes_returned_audio() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(json!({
                "model": "tts-1",
                "input": "The moon hums.",
                "voice": "alloy",
                "response_format": "mp3"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3fake-mp3".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");
        engine_for(&server).synthesize("The moon hums.", &output).await?;

        assert_eq!(tokio::fs::read(&output).await?, b"ID3fake-mp3");
        Ok(())
    }

    #[tokio::test]
    async fn test_upstream_error() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");
        let err = engine_for(&server).synthesize("text", &output).await.unwrap_err();

        assert!(matches!(err, SynthesisError::Upstream { status: 500, .. }));
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_upstream_error_body_is_bounded() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(2000)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");
        let err = engine_for(&server).synthesize("text", &output).await.unwrap_err();

        match err {
            SynthesisError::Upstream { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            },
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }
}
