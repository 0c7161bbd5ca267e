use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Stage;
use crate::error::EnrichError;

pub const DEFAULT_CONFIG_FILE: &str = "exerkine-enrich.json";
pub const DEFAULT_INPUT: &str = "exerkines_list.txt";
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ORGANISM: &str = "Homo sapiens";

// E-utilities request policy: 3 req/s anonymous, 10 req/s with an API key.
const ANONYMOUS_RATE: u32 = 3;
const API_KEY_RATE: u32 = 10;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub tools: Option<ToolNames>,
    #[serde(default)]
    pub stages: Option<Vec<Stage>>,
}

/// Program names of the E-utilities the query templates invoke.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolNames {
    #[serde(default = "default_esearch")]
    pub esearch: String,
    #[serde(default = "default_efetch")]
    pub efetch: String,
    #[serde(default = "default_elink")]
    pub elink: String,
    #[serde(default = "default_esummary")]
    pub esummary: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            esearch: default_esearch(),
            efetch: default_efetch(),
            elink: default_elink(),
            esummary: default_esummary(),
        }
    }
}

impl ToolNames {
    pub fn all(&self) -> [&str; 4] {
        [&self.esearch, &self.efetch, &self.elink, &self.esummary]
    }
}

fn default_esearch() -> String {
    "esearch".to_string()
}

fn default_efetch() -> String {
    "efetch".to_string()
}

fn default_elink() -> String {
    "elink".to_string()
}

fn default_esummary() -> String {
    "esummary".to_string()
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input: Option<String>,
    pub output_dir: Option<String>,
    pub workers: Option<usize>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
    pub organism: Option<String>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub input: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub workers: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub command_timeout: Option<Duration>,
    pub requests_per_second: Option<u32>,
    pub organism: String,
    pub tools: ToolNames,
    pub stages: Vec<Stage>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, EnrichError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| EnrichError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| EnrichError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, EnrichError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(EnrichError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(EnrichError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }

        let max_retries = overrides
            .max_retries
            .or(config.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries == 0 {
            return Err(EnrichError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let retry_delay = Duration::from_millis(
            overrides
                .retry_delay_ms
                .or(config.retry_delay_ms)
                .unwrap_or(DEFAULT_RETRY_DELAY_MS),
        );

        let timeout_secs = overrides
            .command_timeout_secs
            .or(config.command_timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let command_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let rate = overrides
            .requests_per_second
            .or(config.requests_per_second)
            .unwrap_or_else(default_rate);
        let requests_per_second = (rate > 0).then_some(rate);

        let organism = overrides
            .organism
            .or(config.organism)
            .unwrap_or_else(|| DEFAULT_ORGANISM.to_string());
        if organism.trim().is_empty() || organism.contains('"') {
            return Err(EnrichError::InvalidConfig(format!(
                "invalid organism: {organism:?}"
            )));
        }

        let requested = if overrides.stages.is_empty() {
            config.stages.unwrap_or_else(|| Stage::ALL.to_vec())
        } else {
            overrides.stages
        };
        let stages = canonical_stages(&requested);
        if stages.is_empty() {
            return Err(EnrichError::InvalidConfig(
                "at least one stage must be selected".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            input: Utf8PathBuf::from(
                overrides
                    .input
                    .or(config.input)
                    .unwrap_or_else(|| DEFAULT_INPUT.to_string()),
            ),
            output_dir: Utf8PathBuf::from(
                overrides
                    .output_dir
                    .or(config.output_dir)
                    .unwrap_or_else(|| ".".to_string()),
            ),
            workers,
            max_retries,
            retry_delay,
            command_timeout,
            requests_per_second,
            organism,
            tools: config.tools.unwrap_or_default(),
            stages,
        })
    }
}

fn default_rate() -> u32 {
    match std::env::var("NCBI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => API_KEY_RATE,
        _ => ANONYMOUS_RATE,
    }
}

/// Deduplicates and orders stages the way a full run executes them.
fn canonical_stages(requested: &[Stage]) -> Vec<Stage> {
    Stage::ALL
        .into_iter()
        .filter(|stage| requested.contains(stage))
        .collect()
}
