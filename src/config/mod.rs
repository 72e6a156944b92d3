//! Configuration module for Siphon
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every field has a default, so a file only needs `[crawl] start-url`.
//!
//! # Example
//!
//! ```no_run
//! use siphon::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("siphon.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawl.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, DynamicMode, ProxyConfig, RateLimitConfig, RenderConfig, RetryConfig,
    TerminationConfig, DEFAULT_DOWNLOAD_EXTENSIONS,
};

// Re-export parser functions
pub use parser::{load_config, parse_config};
pub use validation::validate;
