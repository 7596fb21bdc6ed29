use crate::assertions::multiline_regex;
use crate::contracts::{Assertion, TestSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const KEEP_TAG: &str = "keep";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config json: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerConfig {
    LocalCommand {
        command: Vec<String>,
    },
    OpenaiResponses {
        model: String,
        #[serde(default)]
        temperature: f64,
        #[serde(default = "default_max_output_tokens")]
        max_output_tokens: u32,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_base_url")]
        base_url: String,
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
}

impl RunnerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerConfig::LocalCommand { .. } => "local_command",
            RunnerConfig::OpenaiResponses { .. } => "openai_responses",
        }
    }
}

fn default_max_output_tokens() -> u32 {
    800
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreserveSelector {
    Heading { value: String },
    Tag { value: String },
    Regex { pattern: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub preserve: Vec<PreserveSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptminConfig {
    pub runner: RunnerConfig,
    pub tests: Vec<TestSpec>,
    #[serde(default)]
    pub prompt: PromptConfig,
}

impl PromptminConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PromptminConfig =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.runner {
            RunnerConfig::LocalCommand { command } => {
                if command.first().map_or(true, |cmd| cmd.trim().is_empty()) {
                    return Err(invalid("runner.command must be a non-empty string[]"));
                }
            }
            RunnerConfig::OpenaiResponses {
                model,
                timeout_ms,
                base_url,
                api_key_env,
                ..
            } => {
                if model.trim().is_empty() {
                    return Err(invalid("runner.model required for openai_responses"));
                }
                if *timeout_ms == 0 {
                    return Err(invalid("runner.timeout_ms must be > 0"));
                }
                if base_url.trim().is_empty() {
                    return Err(invalid("runner.base_url must not be empty"));
                }
                if api_key_env.trim().is_empty() {
                    return Err(invalid("runner.api_key_env must not be empty"));
                }
            }
        }

        if self.tests.is_empty() {
            return Err(invalid("config.tests must contain at least one test"));
        }
        let mut seen = BTreeSet::new();
        for test in &self.tests {
            if test.id.trim().is_empty() {
                return Err(invalid("test.id required"));
            }
            if !seen.insert(test.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate test id: {}", test.id)));
            }
            match &test.assertion {
                Assertion::RegexMatch { pattern } | Assertion::RegexNotMatch { pattern } => {
                    multiline_regex(pattern).map_err(|reason| {
                        ConfigError::Invalid(format!("test {}: {reason}", test.id))
                    })?;
                }
                Assertion::Contains { .. }
                | Assertion::NotContains { .. }
                | Assertion::JsonSchema { .. } => {}
            }
        }

        for selector in &self.prompt.preserve {
            match selector {
                PreserveSelector::Heading { value } => {
                    if value.trim().is_empty() {
                        return Err(invalid("prompt.preserve heading value must not be empty"));
                    }
                }
                PreserveSelector::Tag { value } => {
                    if !value.trim().eq_ignore_ascii_case(KEEP_TAG) {
                        return Err(ConfigError::Invalid(format!(
                            "unsupported preserve tag: {value} (only `{KEEP_TAG}` is supported)"
                        )));
                    }
                }
                PreserveSelector::Regex { pattern } => {
                    regex::Regex::new(pattern).map_err(|err| {
                        ConfigError::Invalid(format!("invalid preserve regex {pattern}: {err}"))
                    })?;
                }
            }
        }

        Ok(())
    }

    pub fn test(&self, id: &str) -> Option<&TestSpec> {
        self.tests.iter().find(|test| test.id == id)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

pub fn load_config(path: impl AsRef<Path>) -> Result<PromptminConfig, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    PromptminConfig::from_json_str(&raw)
}
