use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ImageDetail, StoryError, StoryTeller};
use crate::config::StoryConfig;

/// Upstream error bodies are cut to this many bytes before being logged.
pub(crate) const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum Message<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart<'a>> },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: ImageDetail,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Writes stories with an OpenAI compatible vision chat model.
pub struct OpenAiStoryTeller {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    cfg: StoryConfig,
}

impl OpenAiStoryTeller {
    pub fn new(cfg: StoryConfig, api_key: String) -> Result<Self, StoryError> {
        let client = reqwest::Client::builder().build()?;
        let endpoint = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            api_key,
            cfg,
        })
    }

    fn build_request<'a>(&'a self, image: &[u8]) -> ChatRequest<'a> {
        let messages = vec![
            Message::System {
                content: &self.cfg.system_prompt,
            },
            Message::User {
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(image),
                            detail: self.cfg.detail,
                        },
                    },
                    ContentPart::Text {
                        text: &self.cfg.instruction,
                    },
                ],
            },
        ];

        ChatRequest {
            model: &self.cfg.model,
            messages,
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        }
    }
}

#[async_trait]
impl StoryTeller for OpenAiStoryTeller {
    async fn tell(&self, image: &[u8]) -> Result<String, StoryError> {
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| StoryError::Encode("api key is not a valid header value".to_string()))?;

        let request = self.build_request(image);

        debug!(
            model = %self.cfg.model,
            detail = self.cfg.detail.as_ref(),
            image_size = image.len(),
            "Requesting story"
        );
        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, auth)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(StoryError::Throttled { retry_after });
        }

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate_at_boundary(&mut body, MAX_ERROR_BODY);
            return Err(StoryError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let completion: ChatResponse = serde_json::from_slice(&body)
            .map_err(|e| StoryError::MalformedResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| StoryError::MalformedResponse("response has no message content".to_string()))
    }
}

/// Wraps the raw image bytes in a base64 data URL.
///
/// The MIME type is sniffed from the bytes and falls back to JPEG.
fn data_url(image: &[u8]) -> String {
    let mime = match image::guess_format(image) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        Ok(image::ImageFormat::Tiff) => "image/tiff",
        _ => "image/jpeg",
    };

    format!("data:{};base64,{}", mime, STANDARD.encode(image))
}

pub(crate) fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }

    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn teller_for(server: &MockServer) -> OpenAiStoryTeller {
        let cfg = StoryConfig {
            base_url: format!("{}/v1/", server.uri()),
            ..StoryConfig::default()
        };
        OpenAiStoryTeller::new(cfg, "test-key".to_string()).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_data_url_sniffs_mime_type() {
        assert!(data_url(PNG_MAGIC).starts_with("data:image/png;base64,"));
        assert!(data_url(b"GIF89a......").starts_with("data:image/gif;base64,"));
        assert_eq!(data_url(b""), "data:image/jpeg;base64,");
        assert_eq!(data_url(b"abc"), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn test_request_shape() {
        let teller =
            OpenAiStoryTeller::new(StoryConfig::default(), "key".to_string()).unwrap();
        let value = serde_json::to_value(teller.build_request(b"abc")).unwrap();

        assert_eq!(
            value,
            json!({
                "model": "gpt-4o",
                "temperature": 0.8,
                "max_tokens": 300,
                "messages": [
                    {
                        "role": "system",
                        "content": "You are a creative storyteller. Create a short story or poem inspired by the image."
                    },
                    {
                        "role": "user",
                        "content": [
                            {
                                "type": "image_url",
                                "image_url": { "url": "data:image/jpeg;base64,YWJj", "detail": "low" }
                            },
                            {
                                "type": "text",
                                "text": "Please write a creative short story or poem inspired by this image."
                            }
                        ]
                    }
                ]
            })
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_at_boundary(&mut s, 2);
        assert_eq!(s, "h");
    }

    #[tokio::test]
    async fn test_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "gpt-4o", "max_tokens": 300 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("A fox in the snow.")))
            .expect(1)
            .mount(&server)
            .await;

        let story = teller_for(&server).tell(PNG_MAGIC).await.unwrap();
        assert_eq!(story, "A fox in the snow.");
    }

    #[tokio::test]
    async fn test_throttling_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = teller_for(&server).tell(b"img").await.unwrap_err();
        match err {
            StoryError::Throttled { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            },
            other => panic!("expected throttling, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = teller_for(&server).tell(b"img").await.unwrap_err();
        assert!(matches!(err, StoryError::Upstream { status: 401, ref body } if body == "invalid api key"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = teller_for(&server).tell(b"img").await.unwrap_err();
        assert!(matches!(err, StoryError::MalformedResponse(_)));
    }
}
