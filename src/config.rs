//! Configuration management for scene-consensus.
//!
//! Configuration is read from environment variables:
//! - `OPENAI_API_KEY` - Required for commands that call the endpoint.
//! - `INFERENCE_API_URL` - Optional. Chat-completions URL. Defaults to the OpenAI endpoint.
//! - `SAMPLER_MODEL` - Optional. Vision model for attempts. Defaults to `gpt-4o`.
//! - `REASONER_MODEL` - Optional. Model for the consensus pass. Defaults to `o1-preview`.
//! - `MAX_CONCURRENT_REQUESTS` - Optional. Calls in flight at once. Defaults to `5`.
//! - `TASK_PARALLELISM` - Optional. Tasks in progress at once.
//!   Defaults to `MAX_CONCURRENT_REQUESTS`.
//! - `ATTEMPTS_PER_TASK` - Optional. Sampling calls per task. Defaults to `3`.
//! - `SAMPLER_TEMPERATURE` / `SAMPLER_TOP_P` / `SAMPLER_MAX_TOKENS` - Optional sampling options.
//! - `REASONER_TEMPERATURE` - Optional. Unset by default; reasoning models reject it.
//! - `CALL_TIMEOUT_SECS` - Optional. Per-call deadline. Defaults to `300`.
//! - `EXPECTED_ID_MIN` / `EXPECTED_ID_MAX` - Optional. Inclusive id range. Defaults to `1..=251`.
//! - `ID_WIDTH` - Optional. Zero padding of ids. Defaults to `5`.
//! - `FRAMES_PER_TASK` - Optional. Expected frames per task. Defaults to `5`.
//! - `QUESTIONS_CSV`, `FRAMES_DIR`, `ATTEMPTS_DIR`, `RESULTS_DIR`, `ANSWERS_CSV` - Optional paths.
//! - `ONLY_IDS` - Optional. Comma separated allow-list of ids.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::llm::{ChatOptions, DEFAULT_API_URL};
use crate::pipeline::PipelineSettings;
use crate::task::TaskId;
use crate::util::parse_id_list;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// File layout of a run.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub questions_csv: PathBuf,
    pub frames_dir: PathBuf,
    pub attempts_dir: PathBuf,
    pub results_dir: PathBuf,
    pub answers_csv: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            questions_csv: PathBuf::from("questions.csv"),
            frames_dir: PathBuf::from("extracted_frames"),
            attempts_dir: PathBuf::from("initial_answers"),
            results_dir: PathBuf::from("final_answers"),
            answers_csv: PathBuf::from("answers.csv"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token; only commands that call the endpoint need it
    pub api_key: Option<String>,

    pub api_url: String,

    pub sampler_model: String,

    pub reasoner_model: String,

    /// Upper bound on concurrent remote calls (K)
    pub max_concurrent_requests: usize,

    pub task_parallelism: usize,

    pub attempts_per_task: usize,

    pub sampler_options: ChatOptions,

    pub reasoner_options: ChatOptions,

    pub call_timeout: Duration,

    pub expected_ids: RangeInclusive<u32>,

    pub id_width: usize,

    pub frames_per_task: usize,

    pub paths: PathsConfig,

    pub only_ids: Option<BTreeSet<TaskId>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            sampler_model: "gpt-4o".to_string(),
            reasoner_model: "o1-preview".to_string(),
            max_concurrent_requests: 5,
            task_parallelism: 5,
            attempts_per_task: 3,
            sampler_options: ChatOptions {
                temperature: Some(0.7),
                top_p: None,
                max_tokens: Some(8192),
            },
            reasoner_options: ChatOptions::default(),
            call_timeout: Duration::from_secs(300),
            expected_ids: 1..=251,
            id_width: 5,
            frames_per_task: 5,
            paths: PathsConfig::default(),
            only_ids: None,
        }
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a variable does not parse or
    /// fails validation. A missing API key is only reported by
    /// [`Config::require_api_key`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_url = var("INFERENCE_API_URL").unwrap_or(defaults.api_url);
        url::Url::parse(&api_url).map_err(|e| {
            ConfigError::InvalidValue("INFERENCE_API_URL".to_string(), format!("{}", e))
        })?;

        let max_concurrent_requests =
            parse_var("MAX_CONCURRENT_REQUESTS", var("MAX_CONCURRENT_REQUESTS"))?
                .unwrap_or(defaults.max_concurrent_requests);
        let task_parallelism = parse_var("TASK_PARALLELISM", var("TASK_PARALLELISM"))?
            .unwrap_or(max_concurrent_requests);
        let attempts_per_task = parse_var("ATTEMPTS_PER_TASK", var("ATTEMPTS_PER_TASK"))?
            .unwrap_or(defaults.attempts_per_task);

        let sampler_options = ChatOptions {
            temperature: parse_var("SAMPLER_TEMPERATURE", var("SAMPLER_TEMPERATURE"))?
                .or(defaults.sampler_options.temperature),
            top_p: parse_var("SAMPLER_TOP_P", var("SAMPLER_TOP_P"))?,
            max_tokens: parse_var("SAMPLER_MAX_TOKENS", var("SAMPLER_MAX_TOKENS"))?
                .or(defaults.sampler_options.max_tokens),
        };
        let reasoner_options = ChatOptions {
            temperature: parse_var("REASONER_TEMPERATURE", var("REASONER_TEMPERATURE"))?,
            top_p: None,
            max_tokens: None,
        };

        let call_timeout = parse_var::<u64>("CALL_TIMEOUT_SECS", var("CALL_TIMEOUT_SECS"))?
            .map(Duration::from_secs)
            .unwrap_or(defaults.call_timeout);

        let id_min = parse_var("EXPECTED_ID_MIN", var("EXPECTED_ID_MIN"))?
            .unwrap_or(*defaults.expected_ids.start());
        let id_max = parse_var("EXPECTED_ID_MAX", var("EXPECTED_ID_MAX"))?
            .unwrap_or(*defaults.expected_ids.end());

        let path = |name: &str, default: PathBuf| var(name).map(PathBuf::from).unwrap_or(default);
        let paths = PathsConfig {
            questions_csv: path("QUESTIONS_CSV", defaults.paths.questions_csv),
            frames_dir: path("FRAMES_DIR", defaults.paths.frames_dir),
            attempts_dir: path("ATTEMPTS_DIR", defaults.paths.attempts_dir),
            results_dir: path("RESULTS_DIR", defaults.paths.results_dir),
            answers_csv: path("ANSWERS_CSV", defaults.paths.answers_csv),
        };

        let config = Self {
            api_key: var("OPENAI_API_KEY"),
            api_url,
            sampler_model: var("SAMPLER_MODEL").unwrap_or(defaults.sampler_model),
            reasoner_model: var("REASONER_MODEL").unwrap_or(defaults.reasoner_model),
            max_concurrent_requests,
            task_parallelism,
            attempts_per_task,
            sampler_options,
            reasoner_options,
            call_timeout,
            expected_ids: id_min..=id_max,
            id_width: parse_var("ID_WIDTH", var("ID_WIDTH"))?.unwrap_or(defaults.id_width),
            frames_per_task: parse_var("FRAMES_PER_TASK", var("FRAMES_PER_TASK"))?
                .unwrap_or(defaults.frames_per_task),
            paths,
            only_ids: var("ONLY_IDS").map(|raw| parse_id_list(&raw)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints. Called again after CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_REQUESTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.task_parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "TASK_PARALLELISM".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.attempts_per_task == 0 {
            return Err(ConfigError::InvalidValue(
                "ATTEMPTS_PER_TASK".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CALL_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.expected_ids.is_empty() {
            return Err(ConfigError::InvalidValue(
                "EXPECTED_ID_MAX".to_string(),
                format!(
                    "range {}..={} is empty",
                    self.expected_ids.start(),
                    self.expected_ids.end()
                ),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            sampler_model: self.sampler_model.clone(),
            reasoner_model: self.reasoner_model.clone(),
            sampler_options: self.sampler_options.clone(),
            reasoner_options: self.reasoner_options.clone(),
            max_concurrent_requests: self.max_concurrent_requests,
            call_timeout: self.call_timeout,
            attempts_per_task: self.attempts_per_task,
            task_parallelism: self.task_parallelism,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.max_concurrent_requests, 5);
        assert_eq!(config.task_parallelism, 5);
        assert_eq!(config.attempts_per_task, 3);
        assert_eq!(config.expected_ids, 1..=251);
        assert_eq!(config.sampler_options.temperature, Some(0.7));
        assert_eq!(config.reasoner_options.temperature, None);
        assert_eq!(config.paths.results_dir, PathBuf::from("final_answers"));
        assert!(config.only_ids.is_none());
        assert!(matches!(config.require_api_key(), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn task_parallelism_follows_concurrency_limit() {
        let config = load(&[("MAX_CONCURRENT_REQUESTS", "8")]).unwrap();
        assert_eq!(config.task_parallelism, 8);

        let config = load(&[("MAX_CONCURRENT_REQUESTS", "8"), ("TASK_PARALLELISM", "2")]).unwrap();
        assert_eq!(config.task_parallelism, 2);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = load(&[("MAX_CONCURRENT_REQUESTS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue(ref name, _) if name == "MAX_CONCURRENT_REQUESTS"
        ));
        assert!(load(&[("ATTEMPTS_PER_TASK", "0")]).is_err());
    }

    #[test]
    fn unparsable_values_are_rejected() {
        tokio_test::assert_err!(load(&[("CALL_TIMEOUT_SECS", "soon")]));
        tokio_test::assert_err!(load(&[("INFERENCE_API_URL", "not a url")]));
        tokio_test::assert_err!(load(&[("EXPECTED_ID_MIN", "10"), ("EXPECTED_ID_MAX", "2")]));
        tokio_test::assert_ok!(load(&[("SAMPLER_TOP_P", "0.9")]));
    }

    #[test]
    fn only_ids_and_key_are_read() {
        let config = load(&[("ONLY_IDS", "3,6"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        let only = config.only_ids.unwrap();
        assert!(only.contains(&TaskId::new("00003")));
        assert_eq!(only.len(), 2);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }
}
