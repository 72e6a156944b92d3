use crate::proxy::RotationStrategy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Extensions downloaded when none are configured
pub const DEFAULT_DOWNLOAD_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "tar", "gz", "7z", "mp3",
    "mp4", "avi", "mkv", "jpg", "jpeg", "png", "gif", "svg",
];

/// Main configuration structure for Siphon
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl Config {
    /// Builds a configuration with every default for the given start URL
    pub fn for_start_url(start_url: impl Into<String>) -> Self {
        Self {
            crawl: CrawlConfig::new(start_url),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            retry: RetryConfig::default(),
            termination: TerminationConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// When pages are rendered in a browser instead of fetched statically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicMode {
    /// Static first, escalate to the browser when the page looks client-rendered
    #[default]
    Auto,
    /// Always render in the browser
    Always,
    /// Never render in the browser
    Never,
}

impl DynamicMode {
    /// Returns true if this mode may ever use the renderer
    pub fn uses_renderer(&self) -> bool {
        matches!(self, Self::Auto | Self::Always)
    }
}

impl fmt::Display for DynamicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        };
        f.write_str(name)
    }
}

impl FromStr for DynamicMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown dynamic mode '{}'", other)),
        }
    }
}

/// Crawl scope and worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// First URL to fetch
    pub start_url: String,

    /// Host (optionally host:port) the crawl is scoped to; defaults to the start URL's
    #[serde(default)]
    pub domain: Option<String>,

    /// Maximum link depth from the start URL
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Ceiling on the number of URLs admitted to the frontier
    #[serde(default)]
    pub max_urls: Option<usize>,

    /// Number of concurrent workers
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Static/dynamic fetch policy
    #[serde(default)]
    pub dynamic: DynamicMode,

    /// List files without downloading them
    #[serde(default)]
    pub crawl_only: bool,

    /// Substring patterns; when non-empty a URL must match one to be crawled
    #[serde(default)]
    pub include_urls: Vec<String>,

    /// Substring patterns that exclude a URL from crawling
    #[serde(default)]
    pub exclude_urls: Vec<String>,

    /// File extensions that are downloaded
    #[serde(default = "default_download_extensions")]
    pub download_extensions: Vec<String>,

    /// File extensions that are never downloaded
    #[serde(default)]
    pub exclude_extensions: Vec<String>,

    /// Directory downloads are written under
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Fixed user agent; a random browser user agent is used per request when unset
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Verify TLS certificates (forced off when proxies are in use)
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl CrawlConfig {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            domain: None,
            max_depth: default_max_depth(),
            max_urls: None,
            threads: default_threads(),
            dynamic: DynamicMode::default(),
            crawl_only: false,
            include_urls: Vec::new(),
            exclude_urls: Vec::new(),
            download_extensions: default_download_extensions(),
            exclude_extensions: Vec::new(),
            output_dir: default_output_dir(),
            user_agent: None,
            verify_tls: true,
            headers: HashMap::new(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Adaptive rate limiter bounds, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: f64,

    #[serde(default = "default_min_delay")]
    pub min_delay: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// Proxy entries, a single list file path, or a single list URL
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub strategy: RotationStrategy,

    /// Consecutive failures after which a proxy is excluded for the run
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Idle time before a proxy is eligible for reselection
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Fail at startup when no proxy can be loaded
    #[serde(default)]
    pub required: bool,

    /// Probe every proxy before crawling and keep only working ones
    #[serde(default)]
    pub test_on_start: bool,

    #[serde(default = "default_test_url")]
    pub test_url: String,
}

impl ProxyConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            strategy: RotationStrategy::default(),
            max_failures: default_max_failures(),
            cooldown_secs: default_cooldown(),
            required: false,
            test_on_start: false,
            test_url: default_test_url(),
        }
    }
}

/// Per-URL retry ladder configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff between attempts is min(2^attempt, 5) of this unit
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
}

impl RetryConfig {
    /// Delay slept after the given zero-based failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt).min(5);
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(factor))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit(),
        }
    }
}

/// Idle detection and progress monitoring
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TerminationConfig {
    /// How long a worker waits on an empty frontier per poll
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive idle polls after which a worker exits
    #[serde(default = "default_max_empty_polls")]
    pub max_empty_polls: u32,

    /// Interval between coordinator status checks
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,

    /// Status checks without progress on an idle frontier before the crawl is stopped
    #[serde(default = "default_stall_checks")]
    pub stall_checks: u32,
}

impl TerminationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_empty_polls: default_max_empty_polls(),
            status_interval_ms: default_status_interval(),
            stall_checks: default_stall_checks(),
        }
    }
}

/// Browser renderer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RenderConfig {
    /// Navigation timeout, independent of the HTTP client's
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub headless: bool,
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_render_timeout(),
            headless: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    1
}

fn default_threads() -> usize {
    3
}

fn default_download_extensions() -> Vec<String> {
    DEFAULT_DOWNLOAD_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    15
}

fn default_initial_delay() -> f64 {
    1.0
}

fn default_min_delay() -> f64 {
    0.1
}

fn default_max_delay() -> f64 {
    10.0
}

fn default_max_failures() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    30
}

fn default_test_url() -> String {
    "http://httpbin.org/ip".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_max_empty_polls() -> u32 {
    20
}

fn default_status_interval() -> u64 {
    2000
}

fn default_stall_checks() -> u32 {
    10
}

fn default_render_timeout() -> u64 {
    30
}
