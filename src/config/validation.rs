use crate::config::types::{Config, CrawlConfig, ProxyConfig, RateLimitConfig, RetryConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_proxy_config(&config.proxy)?;
    validate_retry_config(&config.retry)?;
    Ok(())
}

/// Validates crawl scope and worker configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", config.start_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' must use http or https",
            config.start_url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' has no host",
            config.start_url
        )));
    }

    if let Some(domain) = &config.domain {
        if domain.trim().is_empty() {
            return Err(ConfigError::Validation("domain cannot be empty".to_string()));
        }
    }

    if config.threads < 1 || config.threads > 64 {
        return Err(ConfigError::Validation(format!(
            "threads must be between 1 and 64, got {}",
            config.threads
        )));
    }

    if config.max_urls == Some(0) {
        return Err(ConfigError::Validation(
            "max_urls must be >= 1 when set".to_string(),
        ));
    }

    for pattern in config.include_urls.iter().chain(&config.exclude_urls) {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidPattern(
                "URL patterns cannot be empty".to_string(),
            ));
        }
    }

    if config.connect_timeout_secs == 0 || config.read_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeouts must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates rate limiter bounds
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_delay < 0.0 || config.max_delay <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "delays must be non-negative with a positive maximum, got min {} max {}",
            config.min_delay, config.max_delay
        )));
    }

    if config.min_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "min_delay ({}) cannot exceed max_delay ({})",
            config.min_delay, config.max_delay
        )));
    }

    if config.initial_delay < config.min_delay || config.initial_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "initial_delay ({}) must lie within [{}, {}]",
            config.initial_delay, config.min_delay, config.max_delay
        )));
    }

    Ok(())
}

/// Validates proxy pool configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.max_failures < 1 {
        return Err(ConfigError::Validation(
            "max_failures must be >= 1".to_string(),
        ));
    }

    if config.sources.iter().any(|s| s.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "proxy sources cannot contain empty entries".to_string(),
        ));
    }

    if config.test_on_start {
        Url::parse(&config.test_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy test URL '{}': {}", config.test_url, e))
        })?;
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }
    Ok(())
}
