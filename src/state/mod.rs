//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlState`: the lifecycle of a single URL in the frontier
//! - `SkipReason`: why a URL was rejected at enqueue time

mod url_state;

pub use url_state::{SkipReason, UrlState};
