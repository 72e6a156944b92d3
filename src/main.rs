//! Siphon main entry point
//!
//! This is the command-line interface for the Siphon site crawler.

use anyhow::{bail, Context};
use clap::Parser;
use siphon::config::{parse_config, validate, Config, DynamicMode};
use siphon::crawler::Coordinator;
use siphon::output::print_summary;
use siphon::proxy::{load_pool, RotationStrategy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Siphon: a resilient site crawler
///
/// Siphon crawls a site, follows links within its domain, and downloads
/// matching files. Requests can rotate through proxies, are paced by an
/// adaptive rate limiter, and can be rendered in a browser when a page
/// needs JavaScript.
#[derive(Parser, Debug)]
#[command(name = "siphon")]
#[command(version)]
#[command(about = "A resilient multi-worker site crawler", long_about = None)]
struct Cli {
    /// URL to start crawling from
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Path to TOML configuration file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Restrict the crawl to this domain (defaults to the start URL's)
    #[arg(long)]
    domain: Option<String>,

    /// Maximum link depth from the start URL
    #[arg(short, long)]
    depth: Option<u32>,

    /// Stop admitting new URLs after this many
    #[arg(long)]
    max_urls: Option<usize>,

    /// Number of workers
    #[arg(short, long)]
    threads: Option<usize>,

    /// Browser rendering: auto, always or never
    #[arg(long, value_name = "MODE")]
    dynamic: Option<DynamicMode>,

    /// Proxy list: entries, a file path, or a URL to download
    #[arg(short, long, value_delimiter = ',', num_args = 1..)]
    proxies: Vec<String>,

    /// Proxy rotation: round-robin, performance or intelligent
    #[arg(long, value_name = "STRATEGY")]
    proxy_strategy: Option<RotationStrategy>,

    /// Probe proxies before crawling and keep only working ones
    #[arg(long)]
    test_proxies: bool,

    /// Fail instead of falling back to direct connections when no proxy loads
    #[arg(long)]
    require_proxies: bool,

    /// Follow links but never download files
    #[arg(long)]
    crawl_only: bool,

    /// Only crawl URLs containing one of these substrings
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Skip URLs containing any of these substrings
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// File extensions to download (replaces the default list)
    #[arg(short, long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// File extensions never to download
    #[arg(long, value_delimiter = ',')]
    exclude_extensions: Vec<String>,

    /// Output directory
    #[arg(short, long)]
    output: Option<String>,

    /// Initial delay between requests, in seconds
    #[arg(long)]
    delay: Option<f64>,

    /// Attempts per URL before the fallback ladder
    #[arg(long)]
    max_retries: Option<u32>,

    /// Fixed user agent instead of a random browser one
    #[arg(long)]
    user_agent: Option<String>,

    /// Read timeout per request, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Validate configuration and print it without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = build_config(&cli)?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_crawl(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("siphon=info,warn"),
            1 => EnvFilter::new("siphon=debug,info"),
            2 => EnvFilter::new("siphon=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the config file, if any, applies flags, and validates the result
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match (&cli.config, &cli.url) {
        (Some(path), _) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_config(&content).with_context(|| format!("Invalid config {}", path.display()))?
        }
        (None, Some(url)) => Config::for_start_url(url.clone()),
        (None, None) => bail!("Provide a start URL or --config"),
    };

    apply_overrides(&mut config, cli);
    validate(&config).context("Invalid configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    let crawl = &mut config.crawl;
    if let Some(url) = &cli.url {
        crawl.start_url = url.clone();
    }
    if let Some(domain) = &cli.domain {
        crawl.domain = Some(domain.clone());
    }
    if let Some(depth) = cli.depth {
        crawl.max_depth = depth;
    }
    if cli.max_urls.is_some() {
        crawl.max_urls = cli.max_urls;
    }
    if let Some(threads) = cli.threads {
        crawl.threads = threads;
    }
    if let Some(mode) = cli.dynamic {
        crawl.dynamic = mode;
    }
    if cli.crawl_only {
        crawl.crawl_only = true;
    }
    if !cli.include.is_empty() {
        crawl.include_urls = cli.include.clone();
    }
    if !cli.exclude.is_empty() {
        crawl.exclude_urls = cli.exclude.clone();
    }
    if !cli.extensions.is_empty() {
        crawl.download_extensions = cli.extensions.clone();
    }
    if !cli.exclude_extensions.is_empty() {
        crawl.exclude_extensions = cli.exclude_extensions.clone();
    }
    if let Some(output) = &cli.output {
        crawl.output_dir = output.clone();
    }
    if cli.user_agent.is_some() {
        crawl.user_agent = cli.user_agent.clone();
    }
    if let Some(timeout) = cli.timeout {
        crawl.read_timeout_secs = timeout;
    }
    if cli.insecure {
        crawl.verify_tls = false;
    }

    if let Some(delay) = cli.delay {
        let rate = &mut config.rate_limit;
        rate.initial_delay = delay;
        rate.min_delay = rate.min_delay.min(delay);
        rate.max_delay = rate.max_delay.max(delay);
    }
    if let Some(retries) = cli.max_retries {
        config.retry.max_retries = retries;
    }

    let proxy = &mut config.proxy;
    if !cli.proxies.is_empty() {
        proxy.sources = cli.proxies.clone();
    }
    if let Some(strategy) = cli.proxy_strategy {
        proxy.strategy = strategy;
    }
    if cli.test_proxies {
        proxy.test_on_start = true;
    }
    if cli.require_proxies {
        proxy.required = true;
    }
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    let crawl = &config.crawl;
    println!("=== Siphon Dry Run ===\n");

    println!("Crawl:");
    println!("  Start URL: {}", crawl.start_url);
    println!(
        "  Domain: {}",
        crawl.domain.as_deref().unwrap_or("(from start URL)")
    );
    println!("  Max depth: {}", crawl.max_depth);
    match crawl.max_urls {
        Some(max) => println!("  Max URLs: {}", max),
        None => println!("  Max URLs: unlimited"),
    }
    println!("  Workers: {}", crawl.threads);
    println!("  Dynamic: {}", crawl.dynamic);
    println!("  Crawl only: {}", crawl.crawl_only);
    println!("  Download extensions: {}", crawl.download_extensions.join(", "));
    println!("  Output: {}", crawl.output_dir);

    println!("\nRate limit:");
    println!(
        "  Initial {:.2}s, min {:.2}s, max {:.2}s",
        config.rate_limit.initial_delay, config.rate_limit.min_delay, config.rate_limit.max_delay
    );

    println!("\nProxies:");
    if config.proxy.sources.is_empty() {
        println!("  None (direct connections)");
    } else {
        println!("  Sources: {}", config.proxy.sources.len());
        println!("  Strategy: {}", config.proxy.strategy);
        println!("  Probe on start: {}", config.proxy.test_on_start);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let pool = Arc::new(
        load_pool(&config.proxy)
            .await
            .context("Failed to load proxies")?,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    let coordinator = Coordinator::new(config, pool, cancel)?;
    match coordinator.run().await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
