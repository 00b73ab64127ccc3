//! Fetch error types

use crate::client::http::TransportError;
use thiserror::Error;

/// Errors from the log-search fetch pipeline
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure after exhausting retries
    #[error("Transport failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Non-retryable HTTP status
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Response shape the provider contract does not allow
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Poll loop exceeded its iteration or wall-clock budget
    #[error(
        "Polling timed out after {iterations} iterations ({elapsed_secs}s) on page {page_num}"
    )]
    PollTimeout {
        iterations: u32,
        elapsed_secs: u64,
        page_num: u32,
    },

    /// Poll URL stopped changing without the query completing
    #[error("Polling stuck after {iterations} identical poll URLs on page {page_num}")]
    PollStuck { iterations: u32, page_num: u32 },

    /// Pagination returned the same continuation URL twice
    #[error("Pagination stuck: repeated continuation URL {url}")]
    PaginationStuck { url: String },

    /// Page count exceeded the configured ceiling
    #[error("Too many pages: {pages} fetched, limit {max_pages}")]
    TooManyPages { pages: u32, max_pages: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::Http {
            status: 404,
            url: "https://example.com/q".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404 from https://example.com/q");

        let err = FetchError::PaginationStuck {
            url: "https://example.com/next".to_string(),
        };
        assert!(err.to_string().contains("repeated continuation URL"));
    }
}
