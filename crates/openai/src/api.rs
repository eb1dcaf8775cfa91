//! REST API client for the OpenAI chat-completion and image endpoints.
//!
//! The completion call returns the model's raw text; turning it into
//! [`lofi_core::metadata::VideoMetadata`] (with the templated fallback)
//! is the caller's job.

use std::path::Path;

use lofi_core::retry::{classify_http_status, classify_request_error, Classify, ErrorClass};
use serde::{Deserialize, Serialize};

use crate::thumbnail;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// Closest 16:9 size the image model offers; resized afterwards.
const IMAGE_SIZE: &str = "1792x1024";
const TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 1500;

const SYSTEM_PROMPT: &str = "You are an expert YouTube content strategist specializing in lo-fi music channels.\n\
Generate highly engaging, SEO-optimized metadata for lo-fi study music videos.";

/// Errors from the OpenAI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OpenAI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("OpenAI response contained no {0}")]
    EmptyResponse(&'static str),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for OpenAiError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request(e) => classify_request_error(e),
            Self::ApiError { status, .. } => classify_http_status(*status),
            Self::EmptyResponse(_) | Self::Image(_) | Self::Io(_) => ErrorClass::Permanent,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

/// User prompt asking for the four metadata fields as JSON.
pub fn metadata_user_prompt(music_prompt: &str) -> String {
    format!(
        "Based on this lo-fi music description: \"{music_prompt}\"\n\n\
         Generate the following in JSON format:\n\
         1. A catchy YouTube title (under 70 characters, include keywords like \"lofi\", \"study\", \"chill\", \"beats\")\n\
         2. An SEO-optimized description (200-300 words, include relevant hashtags at the end)\n\
         3. 10-20 relevant tags (single words or short phrases)\n\
         4. A detailed thumbnail image prompt (describe an aesthetic lo-fi scene, specify \"anime style\", \"16:9 ratio\", \"YouTube thumbnail\")\n\n\
         Return ONLY valid JSON with these exact keys: title, description, tags, thumbnail_prompt"
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the OpenAI endpoints used by the pipeline.
pub struct OpenAiApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    image_model: String,
}

impl OpenAiApi {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, chat_model: impl Into<String>, image_model: impl Into<String>) -> Self {
        self.chat_model = chat_model.into();
        self.image_model = image_model.into();
        self
    }

    /// Ask the chat model for title, description, tags and thumbnail
    /// prompt. Returns the raw message content.
    pub async fn metadata_completion(&self, music_prompt: &str) -> Result<String, OpenAiError> {
        tracing::info!(model = %self.chat_model, "Generating video metadata");

        let user_prompt = metadata_user_prompt(music_prompt);
        let body = ChatRequest {
            model: &self.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: ChatResponse = Self::parse_response(response).await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(OpenAiError::EmptyResponse("completion text"))
    }

    /// Generate an image for `prompt` and return its temporary URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, OpenAiError> {
        tracing::info!(model = %self.image_model, prompt, "Generating thumbnail image");

        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            size: IMAGE_SIZE,
            quality: "standard",
            n: 1,
        };

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: ImageResponse = Self::parse_response(response).await?;
        parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or(OpenAiError::EmptyResponse("image URL"))
    }

    /// Generate, download and normalize a 1280x720 PNG thumbnail at `dest`.
    pub async fn generate_thumbnail(&self, prompt: &str, dest: &Path) -> Result<(), OpenAiError> {
        let url = self.generate_image(prompt).await?;

        let response = self.client.get(&url).send().await?;
        let bytes = Self::ensure_success(response).await?.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "Downloaded generated image");

        thumbnail::write_thumbnail(bytes.to_vec(), dest).await?;
        tracing::info!(dest = %dest.display(), "Thumbnail saved");
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, OpenAiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(OpenAiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, OpenAiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_embeds_music_prompt_and_keys() {
        let prompt = metadata_user_prompt("Lofi study music, 80 BPM");
        assert!(prompt.contains("\"Lofi study music, 80 BPM\""));
        assert!(prompt.contains("title, description, tags, thumbnail_prompt"));
    }

    #[test]
    fn chat_request_wire_shape() {
        let body = ChatRequest {
            model: DEFAULT_CHAT_MODEL,
            messages: vec![ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], DEFAULT_CHAT_MODEL);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["max_tokens"], 1500);
    }

    #[test]
    fn chat_response_without_content_parses() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn image_response_url() {
        let parsed: ImageResponse =
            serde_json::from_str(r#"{"created":1,"data":[{"url":"https://img.example/x.png"}]}"#)
                .unwrap();
        assert_eq!(parsed.data[0].url.as_deref(), Some("https://img.example/x.png"));
    }

    #[test]
    fn classification() {
        assert!(OpenAiError::ApiError {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!OpenAiError::ApiError {
            status: 400,
            body: "content_policy_violation".into()
        }
        .is_transient());
        assert!(!OpenAiError::EmptyResponse("image URL").is_transient());
    }
}
