use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_provider_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_provider_config(config: &AppConfig) -> Result<(), ConfigError> {
    let provider = &config.provider;

    let parsed = url::Url::parse(&provider.base_url).map_err(|err| {
        validation_err(format!(
            "provider.base_url '{}' is not a valid URL: {err}",
            provider.base_url
        ))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "provider.base_url must use http or https, got '{}'",
            parsed.scheme()
        )));
    }

    if provider.model.trim().is_empty() {
        return Err(validation_err("provider.model cannot be empty"));
    }
    if !(0.0..=2.0).contains(&provider.temperature) {
        return Err(validation_err(format!(
            "provider.temperature must be within [0, 2], got {}",
            provider.temperature
        )));
    }
    if provider.max_tokens == 0 {
        return Err(validation_err("provider.max_tokens must be greater than 0"));
    }
    if let Some(proxy) = provider.proxy.as_deref() {
        if url::Url::parse(proxy).is_err() {
            return Err(validation_err(format!(
                "provider.proxy '{proxy}' is not a valid URL"
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' must be one of {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
