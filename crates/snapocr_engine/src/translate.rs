//! Client for a chat-completions style translation endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snapocr_logging::{clip, ocr_debug};
use thiserror::Error;

use crate::config::TranslationConfig;

const COMPLETIONS_PATH: &str = "v1/chat/completions";
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation API URL is not configured")]
    MissingUrl,
    #[error("prompt mode '{0}' not found")]
    UnknownMode(String),
    #[error("translation request timed out")]
    Timeout,
    #[error("translation request failed: {0}")]
    Network(String),
    #[error("translation API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("translation API returned no choices: {0}")]
    NoChoices(String),
}

#[derive(Debug, Clone)]
pub struct TranslateSettings {
    pub timeout: Duration,
}

impl Default for TranslateSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
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
    content: String,
}

#[derive(Debug, Clone)]
pub struct TranslationClient {
    config: TranslationConfig,
    client: reqwest::Client,
}

impl TranslationClient {
    pub fn new(
        config: TranslationConfig,
        settings: TranslateSettings,
    ) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| TranslateError::Network(err.to_string()))?;
        Ok(Self { config, client })
    }

    /// Sends `text` through the prompt registered for `mode`, with
    /// `${tolang}` replaced by `target_lang`.
    pub async fn translate(
        &self,
        text: &str,
        mode: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError> {
        if self.config.api_url.trim().is_empty() {
            return Err(TranslateError::MissingUrl);
        }
        let template = self
            .config
            .prompt(mode)
            .ok_or_else(|| TranslateError::UnknownMode(mode.to_string()))?;

        let system_prompt = template.system_prompt.replace("${tolang}", target_lang);
        let prefix = template.prompt.replace("${tolang}", target_lang);
        let user_content = format!("{prefix}\n{text}");
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_content,
                },
            ],
            stream: false,
        };

        let url = completions_url(&self.config.api_url);
        ocr_debug!("translation request mode={} url={}", mode, url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let raw = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: clip(&raw, ERROR_BODY_LIMIT),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|_| TranslateError::NoChoices(clip(&raw, ERROR_BODY_LIMIT)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| TranslateError::NoChoices(clip(&raw, ERROR_BODY_LIMIT)))
    }
}

/// Appends the completions path unless the URL already names it.
pub fn completions_url(api_url: &str) -> String {
    let trimmed = api_url.trim();
    if trimmed.contains("chat/completions") {
        trimmed.to_string()
    } else if trimmed.ends_with('/') {
        format!("{trimmed}{COMPLETIONS_PATH}")
    } else {
        format!("{trimmed}/{COMPLETIONS_PATH}")
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TranslateError {
    if err.is_timeout() {
        TranslateError::Timeout
    } else {
        TranslateError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_path_is_appended_once() {
        assert_eq!(
            completions_url("https://api.example.com"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.example.com/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.example.com/v2/chat/completions"),
            "https://api.example.com/v2/chat/completions"
        );
    }
}
