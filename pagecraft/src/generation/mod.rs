//! Website code generation.
//!
//! - [`upstream`]: the chat completions client for the model provider
//! - [`sse`]: incremental reconstruction of streamed completions
//! - [`relay`]: byte-for-byte forwarding of a stream to the client with an outcome callback
//!
//! This module also owns prompt assembly and input validation, which are shared by the
//! blocking and streaming variants of the generate endpoint.

pub mod relay;
pub mod sse;
pub mod upstream;

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};

use crate::config::GenerationConfig;
use crate::db::models::projects::ProjectSource;
use crate::errors::{Error, Result};

const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/webp", "image/gif"];

/// A validated generation request
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub prompt: String,
    /// Sketch as a `data:` URI
    pub image: Option<String>,
}

impl GenerationInput {
    /// Validate raw request fields against the configured limits.
    pub fn parse(prompt: &str, image: Option<&str>, config: &GenerationConfig) -> Result<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::BadRequest {
                message: "Prompt is required".to_string(),
            });
        }
        if prompt.chars().count() > config.max_prompt_chars {
            return Err(Error::BadRequest {
                message: format!("Prompt is too long (maximum {} characters)", config.max_prompt_chars),
            });
        }

        let image = match image.map(str::trim).filter(|i| !i.is_empty()) {
            Some(uri) => {
                validate_image(uri, config.max_image_bytes)?;
                Some(uri.to_string())
            }
            None => None,
        };

        Ok(Self {
            prompt: prompt.to_string(),
            image,
        })
    }

    pub fn source(&self) -> ProjectSource {
        if self.image.is_some() {
            ProjectSource::Sketch
        } else {
            ProjectSource::Prompt
        }
    }

    /// Model that should serve this input
    pub fn model<'a>(&self, config: &'a GenerationConfig) -> &'a str {
        match (&self.image, &config.vision_model) {
            (Some(_), Some(vision_model)) => vision_model,
            _ => &config.model,
        }
    }

    /// Build the chat completion request for this input.
    pub fn to_request(&self, config: &GenerationConfig, stream: bool) -> CreateChatCompletionRequest {
        let user_content = match &self.image {
            None => ChatCompletionRequestUserMessageContent::Text(format!("Create a professional UI section for: {}", self.prompt)),
            Some(uri) => ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestUserMessageContentPart::Text(ChatCompletionRequestMessageContentPartText {
                    text: format!(
                        "Turn this hand-drawn wireframe into a professional UI section. Additional instructions: {}",
                        self.prompt
                    ),
                }),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(ChatCompletionRequestMessageContentPartImage {
                    image_url: uri.clone().into(),
                }),
            ]),
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(config.system_prompt.clone()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: user_content,
                name: None,
            }),
        ];

        CreateChatCompletionRequest {
            model: self.model(config).to_string(),
            messages,
            temperature: Some(config.temperature),
            stream: Some(stream),
            ..Default::default()
        }
    }
}

/// Check that `uri` is a base64 `data:` URI of an accepted image type within the size limit.
fn validate_image(uri: &str, max_bytes: usize) -> Result<()> {
    let invalid = |message: &str| Error::BadRequest {
        message: message.to_string(),
    };

    let rest = uri.strip_prefix("data:").ok_or_else(|| invalid("Image must be a data URI"))?;
    let (meta, payload) = rest.split_once(',').ok_or_else(|| invalid("Image must be a data URI"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("Image data must be base64 encoded"))?;

    if !ALLOWED_IMAGE_TYPES.contains(&mime.to_ascii_lowercase().as_str()) {
        return Err(invalid("Unsupported image type (use PNG, JPEG, WebP or GIF)"));
    }

    // Reject oversized payloads before decoding them
    if payload.len() / 4 * 3 > max_bytes + 3 {
        return Err(invalid("Image is too large"));
    }
    let decoded = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|_| invalid("Image data is not valid base64"))?;
    if decoded.is_empty() {
        return Err(invalid("Image is empty"));
    }
    if decoded.len() > max_bytes {
        return Err(invalid("Image is too large"));
    }
    Ok(())
}

/// Remove a markdown code fence wrapped around the model output, if any.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the info string (```html)
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}
