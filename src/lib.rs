//! Siphon: a resilient multi-worker site crawler
//!
//! This crate crawls a target site, discovers links and downloadable files,
//! and fetches content through a rotating, health-tracked proxy pool with an
//! adaptive rate limiter. Pages that need JavaScript can be escalated to a
//! browser renderer.

pub mod config;
pub mod crawler;
pub mod output;
pub mod proxy;
pub mod render;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Siphon operations
#[derive(Debug, Error)]
pub enum SiphonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to load proxy source {source_name}: {message}")]
    ProxySource {
        source_name: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(String),

    #[error("Proxies are required but none could be loaded from {0}")]
    ProxiesUnavailable(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Siphon operations
pub type Result<T> = std::result::Result<T, SiphonError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, DynamicMode};
pub use crawler::{Coordinator, FetchClient, FetchOutcome, Frontier, RateLimiter};
pub use output::CrawlSummary;
pub use proxy::{ProxyPool, RotationStrategy};
pub use state::{SkipReason, UrlState};
pub use url::canonicalize;
