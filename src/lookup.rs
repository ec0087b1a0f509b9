//! Citation lookup interface.
//!
//! The pipeline only ever sees a [`LookupOutcome`]; how a client talks to its
//! search provider (and how often it retries internally) is its own business.

use async_trait::async_trait;
use std::fmt;

/// Result of a single citation lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The best match was found, with this many citations.
    Count(u64),
    /// The search returned no matches. Terminal.
    NotFound,
    /// Network failure, server error or unparsable response.
    Transient(String),
    /// CAPTCHA, HTTP 429 or a ban page.
    Blocked(String),
}

impl LookupOutcome {
    /// Whether a later pass could plausibly get a different answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Blocked(_))
    }
}

impl fmt::Display for LookupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "cited by {}", n),
            Self::NotFound => write!(f, "not found"),
            Self::Transient(reason) => write!(f, "transient error: {}", reason),
            Self::Blocked(reason) => write!(f, "blocked: {}", reason),
        }
    }
}

/// A source of citation counts, queried by paper title.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Look up the citation count of the paper best matching `title`.
    async fn lookup(&self, title: &str) -> LookupOutcome;
}

#[async_trait]
impl<T: LookupClient + ?Sized> LookupClient for std::sync::Arc<T> {
    async fn lookup(&self, title: &str) -> LookupOutcome {
        (**self).lookup(title).await
    }
}
