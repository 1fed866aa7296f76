//! Application configuration: OCR endpoints, translation prompts and batch
//! defaults, stored as pretty JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::tuning::{self, TuningError, TuningParams};
use crate::BatchMode;

pub const TOKEN_ENV_VAR: &str = "SNAPOCR_OCR_TOKEN";
pub const MAX_CONCURRENCY: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write config: {0}")]
    Write(#[from] PersistError),
    #[error("invalid url for {context}: {reason}")]
    InvalidUrl { context: String, reason: String },
    #[error("invalid tuning for model {model}: {source}")]
    Tuning { model: String, source: TuningError },
    #[error("max_concurrency for {mode} must be within 1..=20, got {value}")]
    Concurrency { mode: &'static str, value: usize },
    #[error("duplicate prompt mode {0}")]
    DuplicatePrompt(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    /// Overrides the built-in small-text profile for this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub mode: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_prompts")]
    pub prompts: Vec<PromptTemplate>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            prompts: default_prompts(),
        }
    }
}

impl TranslationConfig {
    pub fn prompt(&self, mode: &str) -> Option<&PromptTemplate> {
        self.prompts.iter().find(|p| p.mode == mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDefaults {
    pub output_dir: PathBuf,
    pub format: String,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub images: BatchDefaults,
    pub docs: BatchDefaults,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            images: BatchDefaults {
                output_dir: PathBuf::from("output/images"),
                format: "md".to_string(),
                max_concurrency: 5,
            },
            docs: BatchDefaults {
                output_dir: PathBuf::from("output/docs"),
                format: "txt".to_string(),
                max_concurrency: 5,
            },
        }
    }
}

impl BatchConfig {
    pub fn for_mode(&self, mode: BatchMode) -> &BatchDefaults {
        match mode {
            BatchMode::Images => &self.images,
            BatchMode::Docs => &self.docs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelEndpoint>,
    #[serde(default = "default_current_model")]
    pub current_model: String,
    #[serde(default = "default_screenshot_model")]
    pub screenshot_model: String,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            current_model: default_current_model(),
            screenshot_model: default_screenshot_model(),
            translation: TranslationConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config at `path`, falling back to defaults when the file does
    /// not exist yet.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf, ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config.json");
        Ok(AtomicFileWriter::new(dir.to_path_buf()).write(name, &content)?)
    }

    /// Applies `SNAPOCR_OCR_TOKEN` to every model this run may resolve: the
    /// current and screenshot models plus `requested`.
    pub fn apply_env_overrides(&mut self, requested: Option<&str>) {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            self.apply_token(&token, requested);
        }
    }

    fn apply_token(&mut self, token: &str, requested: Option<&str>) {
        if token.is_empty() {
            return;
        }
        let mut targets = vec![self.current_model.clone(), self.screenshot_model.clone()];
        targets.extend(requested.map(str::to_string));
        for model in targets {
            self.models.entry(model).or_default().token = token.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, endpoint) in &self.models {
            if !endpoint.url.is_empty() {
                check_url(&format!("model {name}"), &endpoint.url)?;
            }
            if let Some(params) = &endpoint.tuning {
                params.validate().map_err(|source| ConfigError::Tuning {
                    model: name.clone(),
                    source,
                })?;
            }
        }
        if !self.translation.api_url.is_empty() {
            check_url("translation", &self.translation.api_url)?;
        }
        for (mode, defaults) in [
            (BatchMode::Images, &self.batch.images),
            (BatchMode::Docs, &self.batch.docs),
        ] {
            if !(1..=MAX_CONCURRENCY).contains(&defaults.max_concurrency) {
                return Err(ConfigError::Concurrency {
                    mode: mode.as_str(),
                    value: defaults.max_concurrency,
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for prompt in &self.translation.prompts {
            if !seen.insert(prompt.mode.as_str()) {
                return Err(ConfigError::DuplicatePrompt(prompt.mode.clone()));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self, model: &str) -> Option<&ModelEndpoint> {
        self.models.get(model)
    }

    /// Small-text tuning for `model`: the configured override, else the
    /// built-in profile.
    pub fn tuning_for(&self, model: &str) -> TuningParams {
        self.models
            .get(model)
            .and_then(|endpoint| endpoint.tuning)
            .unwrap_or_else(|| tuning::builtin_profile(model))
    }
}

fn check_url(context: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        context: context.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            context: context.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn default_models() -> BTreeMap<String, ModelEndpoint> {
    [
        tuning::PP_OCR_V5,
        tuning::PP_STRUCTURE_V3,
        tuning::PADDLE_OCR_VL,
    ]
    .into_iter()
    .map(|name| (name.to_string(), ModelEndpoint::default()))
    .collect()
}

fn default_current_model() -> String {
    tuning::PP_STRUCTURE_V3.to_string()
}

fn default_screenshot_model() -> String {
    tuning::PP_OCR_V5.to_string()
}

fn default_prompts() -> Vec<PromptTemplate> {
    let template = |mode: &str, description: &str, system_prompt: &str, prompt: &str| {
        PromptTemplate {
            mode: mode.to_string(),
            description: description.to_string(),
            system_prompt: system_prompt.to_string(),
            prompt: prompt.to_string(),
        }
    };
    vec![
        template(
            "translate",
            "Standard translation",
            "You are a professional translator fluent in ${tolang}. Output only the translation, without any explanation.",
            "Translate the following into ${tolang}:",
        ),
        template(
            "academic",
            "Accurate, formal academic style",
            "You are a professional academic translator fluent in ${tolang}. Output only the translation. Keep terminology precise and the register formal.",
            "Translate the following into ${tolang}:",
        ),
        template(
            "polish",
            "Improve fluency and style",
            "You are a senior editor. Polish the user's text so it reads naturally and fluently. Output only the polished text.",
            "Polish the following text:",
        ),
        template(
            "summarize",
            "Condense into key points",
            "You are an efficient analyst. Read the text and output a short, precise summary. Output only the summary.",
            "Summarize the key points of the following:",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.translation.prompts.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn token_reaches_every_model_the_run_can_use() {
        let mut config = AppConfig::default();
        config.apply_token("env-token", Some("custom-model"));
        for model in [
            config.current_model.clone(),
            config.screenshot_model.clone(),
            "custom-model".to_string(),
        ] {
            assert_eq!(config.endpoint(&model).unwrap().token, "env-token");
        }
    }

    #[test]
    fn empty_token_changes_nothing() {
        let mut config = AppConfig::default();
        config.apply_token("", Some("custom-model"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn save_then_load_preserves_endpoints() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        let mut config = AppConfig::default();
        config.models.insert(
            "PP-OCRv5".to_string(),
            ModelEndpoint {
                url: "https://ocr.example.com/run".to_string(),
                token: "secret".to_string(),
                tuning: None,
            },
        );
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.endpoint("PP-OCRv5").unwrap().token, "secret");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"current_model": "PP-OCRv5"}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.current_model, "PP-OCRv5");
        assert_eq!(config.batch.images.format, "md");
        assert!(config.translation.prompt("translate").is_some());
    }

    #[test]
    fn validation_catches_bad_urls_tuning_and_concurrency() {
        let mut config = AppConfig::default();
        config.translation.api_url = "ftp://example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let mut config = AppConfig::default();
        config.models.get_mut("PP-OCRv5").unwrap().tuning = Some(TuningParams {
            temperature: Some(3.0),
            ..TuningParams::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Tuning { .. })));

        let mut config = AppConfig::default();
        config.batch.docs.max_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Concurrency { mode: "docs", .. })
        ));
    }

    #[test]
    fn configured_tuning_overrides_builtin_profile() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.tuning_for("PP-OCRv5"),
            tuning::builtin_profile("PP-OCRv5")
        );
        let custom = TuningParams {
            text_det_thresh: Some(0.2),
            ..TuningParams::default()
        };
        config.models.get_mut("PP-OCRv5").unwrap().tuning = Some(custom);
        assert_eq!(config.tuning_for("PP-OCRv5"), custom);
    }
}
