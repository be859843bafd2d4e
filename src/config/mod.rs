pub mod validation;

use std::fmt;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    /// Longest silence tolerated between upstream reads, in seconds; `0`
    /// disables it. There is no limit on the length of a whole stream.
    #[serde(default = "default_read_timeout", alias = "timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_read_timeout() -> u64 {
    180
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            read_timeout: default_read_timeout(),
            connect_timeout: default_connect_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
        }
    }
}

/// Completion provider configuration.
///
/// `temperature` and `max_tokens` are policy values: callers cannot override
/// them per request.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
#[allow(clippy::unnecessary_wraps)]
fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            proxy: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl ProviderConfig {
    /// Full URL of the streaming chat-completions endpoint.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// The credential, if one is configured and non-blank.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Fill `api_key` from the environment when no literal key was given.
    fn resolve_credential(&mut self) {
        if self.credential().is_some() {
            return;
        }
        self.api_key = self
            .api_key_env
            .as_deref()
            .filter(|name| !name.is_empty())
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty());
    }
}

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// System directive used when the caller supplies none.
    #[serde(default)]
    pub default_system_prompt: Option<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
            default_system_prompt: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file, resolve the provider credential and
/// validate it.
///
/// A missing credential is not an error here: the service still starts and
/// streaming requests fail individually.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse, resolve and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    config.provider.resolve_credential();
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.provider.max_tokens, 1024);
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(config.features.log_format, LogFormat::Text);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("provider:\n  api_key: sk-test\n  api_key_env: null\n").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.read_timeout, 180);
        assert_eq!(config.features.log_format, LogFormat::Text);
        assert_eq!(config.provider.base_url, "https://api.openai.com/v1");
        assert_eq!(config.provider.credential(), Some("sk-test"));
    }

    #[test]
    fn test_credential_from_env() {
        let var = "STORECOACH_TEST_CREDENTIAL_FROM_ENV";
        std::env::set_var(var, "sk-from-env");
        let yaml = format!("provider:\n  api_key_env: {var}\n");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.provider.credential(), Some("sk-from-env"));
        std::env::remove_var(var);
    }

    #[test]
    fn test_literal_key_wins_over_env() {
        let var = "STORECOACH_TEST_CREDENTIAL_SHADOWED";
        std::env::set_var(var, "sk-from-env");
        let yaml = format!("provider:\n  api_key: sk-literal\n  api_key_env: {var}\n");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.provider.credential(), Some("sk-literal"));
        std::env::remove_var(var);
    }

    #[test]
    fn test_missing_credential_still_loads() {
        let yaml = "provider:\n  api_key: \"  \"\n  api_key_env: STORECOACH_TEST_UNSET_VAR\n";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.provider.credential(), None);
    }

    #[test]
    fn test_legacy_timeout_key_sets_read_timeout() {
        let config = parse_config("server:\n  timeout: 30\nprovider:\n  api_key: sk-test\n").unwrap();
        assert_eq!(config.server.read_timeout, 30);
    }

    #[test]
    fn test_json_log_format() {
        let config = parse_config("features:\n  log_format: json\n").unwrap();
        assert_eq!(config.features.log_format, LogFormat::Json);
        assert!(matches!(
            parse_config("features:\n  log_format: xml\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_debug_output_redacts_credential() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-very-secret".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("gpt-4o-mini"));
    }

    #[test]
    fn test_completions_url_tolerates_trailing_slash() {
        let provider = ProviderConfig {
            base_url: "http://127.0.0.1:9000/v1/".to_string(),
            ..ProviderConfig::default()
        };
        assert_eq!(
            provider.completions_url(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }
}
