//! Proxy rotation with health tracking
//!
//! A `ProxyPool` hands out proxies per request attempt, learns from every
//! outcome, and degrades to direct connections once every proxy has failed.

mod endpoint;
mod pool;
mod source;

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub use endpoint::{normalize_entry, ProxyEndpoint};
pub use pool::{ProxyPool, ProxyStats};
pub use source::{load_pool, parse_entries, probe, ProxySource};

/// How a proxy is chosen among the available candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    /// Cycle through candidates in order
    RoundRobin,
    /// Lowest average response time; unknown proxies last
    Performance,
    /// Response time weighted by failure rate, with random jitter
    #[default]
    Intelligent,
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoundRobin => "round-robin",
            Self::Performance => "performance",
            Self::Intelligent => "intelligent",
        };
        f.write_str(name)
    }
}

impl FromStr for RotationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "round-robin" => Ok(Self::RoundRobin),
            "performance" => Ok(Self::Performance),
            "intelligent" => Ok(Self::Intelligent),
            other => Err(format!("unknown rotation strategy '{}'", other)),
        }
    }
}
