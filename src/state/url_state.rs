/// URL state definitions for tracking crawl progress
///
/// Every URL the frontier learns about moves through
/// `Unseen -> Queued -> InFlight -> {Scraped | Failed}` or ends in `Skipped`.
use std::fmt;

/// Reason a URL was not admitted to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// URL was already queued, fetched, or rejected earlier in the run
    AlreadyVisited,

    /// URL is outside the crawl's domain scope or not http(s)
    OutOfScope,

    /// URL would be processed beyond the configured maximum depth
    DepthExceeded,

    /// URL matched an exclude pattern or missed every include pattern
    ExcludedPattern,

    /// The global URL ceiling has been reached
    UrlLimit,
}

impl SkipReason {
    /// All skip reasons, in reporting order
    pub const ALL: [SkipReason; 5] = [
        Self::AlreadyVisited,
        Self::OutOfScope,
        Self::DepthExceeded,
        Self::ExcludedPattern,
        Self::UrlLimit,
    ];

    /// Returns true if a later discovery of the same URL may still be admitted
    ///
    /// Depth and limit skips depend on where and when the URL was found, not on
    /// the URL itself, so they are not remembered by the frontier.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DepthExceeded | Self::UrlLimit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyVisited => "already_visited",
            Self::OutOfScope => "out_of_scope",
            Self::DepthExceeded => "depth_exceeded",
            Self::ExcludedPattern => "excluded_pattern",
            Self::UrlLimit => "url_limit",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the current state of a URL in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlState {
    /// Never seen by the frontier
    Unseen,

    /// Waiting in the queue
    Queued,

    /// Dequeued by a worker and being fetched
    InFlight,

    // ===== Terminal States =====
    /// Fetched and processed
    Scraped,

    /// Every fetch strategy failed
    Failed,

    /// Rejected at enqueue time
    Skipped(SkipReason),
}

impl UrlState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Scraped | Self::Failed | Self::Skipped(_))
    }

    /// Returns true if a worker has claimed or finished this URL
    pub fn is_visited(&self) -> bool {
        matches!(self, Self::InFlight | Self::Scraped | Self::Failed)
    }

    /// Returns true if moving from this state to `next` is a legal transition
    pub fn can_transition_to(&self, next: UrlState) -> bool {
        matches!(
            (self, next),
            (Self::Unseen, Self::Queued)
                | (Self::Unseen, Self::Skipped(_))
                | (Self::Queued, Self::InFlight)
                | (Self::InFlight, Self::Scraped)
                | (Self::InFlight, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Scraped => "scraped",
            Self::Failed => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}
