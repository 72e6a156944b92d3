//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Adaptive rate limiting shared by all workers
//! - HTTP fetching through the proxy fallback ladder
//! - HTML parsing and link extraction
//! - The static/dynamic fetch policy
//! - The frontier and the worker pool that drains it
//! - File downloads

mod coordinator;
mod downloader;
mod fetcher;
mod frontier;
mod headers;
mod parser;
mod policy;
mod rate_limiter;
mod response;

pub use coordinator::{run_crawl, Coordinator};
pub use downloader::{file_name_from_url, sanitize_file_name, DownloadResult, Downloader, FileDownloader};
pub use fetcher::{
    build_http_client, cache_key, ClientSettings, FetchClient, FetchOutcome, TransportKind,
};
pub use frontier::{EnqueueResult, Frontier, FrontierEntry, FrontierStats};
pub use headers::{random_user_agent, request_headers, USER_AGENTS};
pub use parser::{parse_html, HtmlExtractor, LinkExtractor};
pub use policy::{
    content_suggests_dynamic, dynamic_content_score, url_suggests_dynamic, DynamicFetcher,
    FetchPolicy, Fetcher, PageContent, PageResult, StaticFetcher, Strategy,
};
pub use rate_limiter::{RateLimiter, HISTORY_CAPACITY};
pub use response::{detect_encoding, EncodingSource, FetchedPage};
