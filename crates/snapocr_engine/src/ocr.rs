use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use reqwest::header::AUTHORIZATION;
use snapocr_logging::{clip, ocr_debug, ocr_warn};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ModelEndpoint};
use crate::parse::parse_ocr_payload;
use crate::tuning::TuningParams;
use crate::{InputKind, OcrError, OcrFailure, OcrResponse};

const RAW_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Additional attempts after the first one, for timeouts and connection failures.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(90),
            max_retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrRequest<'a> {
    pub bytes: &'a [u8],
    pub kind: InputKind,
    /// Model to use; `None` selects the configured current model.
    pub model: Option<&'a str>,
    /// Apply the model's small-text tuning (screenshot recognition).
    pub optimize_for_small: bool,
}

#[async_trait::async_trait]
pub trait OcrClient: Send + Sync {
    /// Never fails outside the returned response; a set token short-circuits
    /// to a cancelled error.
    async fn recognize(&self, request: OcrRequest<'_>, cancel: &CancellationToken) -> OcrResponse;
}

#[derive(Debug, Clone)]
struct ModelRoute {
    endpoint: ModelEndpoint,
    tuning: TuningParams,
}

/// OCR client for the remote HTTP API.
#[derive(Debug, Clone)]
pub struct HttpOcrClient {
    settings: OcrSettings,
    client: reqwest::Client,
    routes: BTreeMap<String, ModelRoute>,
    default_model: String,
}

impl HttpOcrClient {
    pub fn new(config: &AppConfig, settings: OcrSettings) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| OcrError::new(OcrFailure::Network, err.to_string()))?;
        let routes = config
            .models
            .iter()
            .map(|(name, endpoint)| {
                (
                    name.clone(),
                    ModelRoute {
                        endpoint: endpoint.clone(),
                        tuning: config.tuning_for(name),
                    },
                )
            })
            .collect();
        Ok(Self {
            settings,
            client,
            routes,
            default_model: config.current_model.clone(),
        })
    }

    fn build_body(&self, request: &OcrRequest<'_>, route: &ModelRoute) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert(
            "file".to_string(),
            base64::engine::general_purpose::STANDARD
                .encode(request.bytes)
                .into(),
        );
        body.insert("fileType".to_string(), request.kind.file_type().into());
        if request.optimize_for_small {
            route.tuning.apply_to(&mut body);
        }
        serde_json::Value::Object(body)
    }

    async fn attempt(
        &self,
        route: &ModelRoute,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> OcrResponse {
        let send = self
            .client
            .post(route.endpoint.url.as_str())
            .header(AUTHORIZATION, format!("token {}", route.endpoint.token))
            .json(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OcrError::cancelled()),
            response = send => response.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OcrError::cancelled()),
            text = response.text() => text.map_err(map_reqwest_error)?,
        };

        if !status.is_success() {
            return Err(OcrError::new(
                OcrFailure::HttpStatus(status.as_u16()),
                format!("HTTP {}", status.as_u16()),
            )
            .with_raw(clip(&text, RAW_BODY_LIMIT)));
        }

        let payload: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
            OcrError::new(OcrFailure::InvalidResponse, format!("invalid JSON: {err}"))
                .with_raw(clip(&text, RAW_BODY_LIMIT))
        })?;

        if let Some(code) = embedded_error_code(&payload) {
            let detail = payload
                .get("errorMsg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(
                OcrError::new(OcrFailure::Api { code }, format!("API error: {detail}"))
                    .with_raw(clip(&payload.to_string(), RAW_BODY_LIMIT)),
            );
        }

        Ok(parse_ocr_payload(&payload))
    }
}

#[async_trait::async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, request: OcrRequest<'_>, cancel: &CancellationToken) -> OcrResponse {
        if cancel.is_cancelled() {
            return Err(OcrError::cancelled());
        }

        let model = request.model.unwrap_or(&self.default_model);
        let route = match self.routes.get(model) {
            Some(route) if !route.endpoint.url.is_empty() && !route.endpoint.token.is_empty() => {
                route
            }
            _ => {
                return Err(OcrError::new(
                    OcrFailure::MissingCredentials,
                    format!("missing URL or token for model {model}; configure it first"),
                ))
            }
        };

        let body = self.build_body(&request, route);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(OcrError::cancelled());
            }
            ocr_debug!("OCR request model={} kind={:?} attempt={}", model, request.kind, attempt);

            let outcome = self.attempt(route, &body, cancel).await;
            if cancel.is_cancelled() {
                return Err(OcrError::cancelled());
            }
            match outcome {
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    ocr_warn!(
                        "OCR request to model {} failed ({}), retry {}/{}",
                        model,
                        err.kind,
                        attempt,
                        self.settings.max_retries
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(OcrError::cancelled()),
                        _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }
}

/// A present, non-zero `errorCode` of any JSON type marks an API failure.
/// Codes that are not integers report as `-1`.
fn embedded_error_code(payload: &serde_json::Value) -> Option<i64> {
    let value = payload.get("errorCode")?;
    let is_zero = match value {
        serde_json::Value::Null => true,
        serde_json::Value::Bool(flag) => !flag,
        serde_json::Value::Number(number) => number.as_f64() == Some(0.0),
        serde_json::Value::String(text) => text.trim() == "0",
        _ => false,
    };
    if is_zero {
        return None;
    }
    let code = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
        .unwrap_or(-1);
    Some(code)
}

fn map_reqwest_error(err: reqwest::Error) -> OcrError {
    if err.is_timeout() {
        return OcrError::new(
            OcrFailure::Timeout,
            "request timed out; check the network or retry later",
        );
    }
    if err.is_connect() {
        return OcrError::new(
            OcrFailure::Connect,
            format!("connection error: {}", clip(&err.to_string(), 80)),
        );
    }
    OcrError::new(OcrFailure::Network, err.to_string())
}
