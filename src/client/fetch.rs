//! Log-search fetch client
//!
//! Drives the provider's submit/poll/paginate protocol for one time
//! window and returns the completed pages in order. Rate pacing, 429
//! handling, and transient retries all live here; callers only see
//! pages or a fetch error.

use crate::client::error::FetchError;
use crate::client::http::{HttpResponse, Transport};
use crate::client::page::{parse_page, Completion, Page, PageBody};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// API base URL, no trailing slash
    pub endpoint: String,
    /// Provider key of the log to query
    pub log_key: String,
    /// LEQL query string
    pub query: String,
    /// Events per page
    pub page_size: u32,
    /// Request budget per minute, used for pacing
    pub rate_limit_per_minute: u32,
    /// Attempts per request before giving up on transient failures
    pub retry_attempts: u32,
    /// Poll iteration ceiling per page
    pub poll_max_iterations: u32,
    /// Poll wall-clock ceiling per page, in seconds
    pub poll_max_wall_secs: u64,
    /// Identical consecutive poll URLs before declaring the query stuck
    pub poll_stuck_iterations: u32,
    /// First poll backoff, in milliseconds
    pub poll_initial_delay_ms: u64,
    /// Poll backoff ceiling, in milliseconds
    pub poll_max_delay_ms: u64,
    /// Emit a poll progress log every this many iterations
    pub poll_progress_log_every: u32,
    /// Pagination ceiling per window
    pub max_pages: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            log_key: String::new(),
            query: String::new(),
            page_size: 500,
            rate_limit_per_minute: 60,
            retry_attempts: 3,
            poll_max_iterations: 300,
            poll_max_wall_secs: 900,
            poll_stuck_iterations: 25,
            poll_initial_delay_ms: 500,
            poll_max_delay_ms: 10_000,
            poll_progress_log_every: 10,
            max_pages: 1000,
        }
    }
}

/// Client for one log's query endpoint
pub struct FetchClient<T: Transport> {
    transport: T,
    config: FetchConfig,
    // Pacing state; never held across an await
    last_request_at: Mutex<Option<Instant>>,
}

impl<T: Transport> FetchClient<T> {
    pub fn new(transport: T, config: FetchConfig) -> Self {
        Self {
            transport,
            config,
            last_request_at: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }

    /// Fetch all pages of events for `[start_ms, end_ms)`.
    ///
    /// Pages come back in order with 1-based page numbers. Any protocol
    /// violation, poll budget overrun, or non-retryable HTTP status
    /// aborts the whole window.
    pub async fn fetch_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Page>, FetchError> {
        let fetch_id = Uuid::new_v4();
        let started = Instant::now();

        info!(
            fetch_id = %fetch_id,
            log_key = %self.config.log_key,
            start_ms,
            end_ms,
            "logsearch_fetch_start"
        );

        let submit_url = format!("{}/query/logs/{}", self.config.endpoint, self.config.log_key);
        let params = [
            ("from", start_ms.to_string()),
            ("to", end_ms.to_string()),
            ("query", self.config.query.clone()),
            ("per_page", self.config.page_size.to_string()),
        ];

        let mut pages: Vec<Page> = Vec::new();
        let mut last_next_url: Option<String> = None;
        let mut body = self.get_with_retry(&submit_url, &params).await?;

        loop {
            let page_num = pages.len() as u32 + 1;
            let resolved = self.poll_to_completion(&fetch_id, page_num, body).await?;

            pages.push(Page {
                page_num,
                events: resolved.events,
            });
            info!(fetch_id = %fetch_id, page_num, "logsearch_page_complete");

            match resolved.completion {
                Completion::Complete => break,
                Completion::InProgress { .. } => {
                    // poll_to_completion never returns InProgress
                    return Err(FetchError::Protocol(
                        "unresolved poll continuation".to_string(),
                    ));
                }
                Completion::HasNext { next_url } => {
                    if last_next_url.as_deref() == Some(next_url.as_str()) {
                        return Err(FetchError::PaginationStuck { url: next_url });
                    }
                    if pages.len() as u32 >= self.config.max_pages {
                        return Err(FetchError::TooManyPages {
                            pages: pages.len() as u32,
                            max_pages: self.config.max_pages,
                        });
                    }
                    last_next_url = Some(next_url.clone());
                    body = self.get_with_retry(&next_url, &[]).await?;
                }
            }
        }

        info!(
            fetch_id = %fetch_id,
            pages = pages.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "logsearch_fetch_complete"
        );
        Ok(pages)
    }

    /// Poll a page until its query completes.
    ///
    /// Bounded three ways: iteration count, wall clock, and a stuck
    /// detector that trips when the poll URL stops changing. Backoff
    /// doubles from the initial delay up to the configured ceiling.
    async fn poll_to_completion(
        &self,
        fetch_id: &Uuid,
        page_num: u32,
        first_body: Value,
    ) -> Result<PageBody, FetchError> {
        let mut resolved = parse_page(&first_body)?;
        let started = Instant::now();
        let mut iterations: u32 = 0;
        let mut stuck_count: u32 = 0;
        let mut last_poll_url: Option<String> = None;
        let mut delay = Duration::from_millis(self.config.poll_initial_delay_ms);

        while let Completion::InProgress { poll_url } = &resolved.completion {
            iterations += 1;
            let elapsed = started.elapsed();

            if iterations > self.config.poll_max_iterations
                || elapsed.as_secs() >= self.config.poll_max_wall_secs
            {
                return Err(FetchError::PollTimeout {
                    iterations,
                    elapsed_secs: elapsed.as_secs(),
                    page_num,
                });
            }

            if last_poll_url.as_deref() == Some(poll_url.as_str()) {
                stuck_count += 1;
                if stuck_count >= self.config.poll_stuck_iterations {
                    return Err(FetchError::PollStuck {
                        iterations: stuck_count,
                        page_num,
                    });
                }
            } else {
                stuck_count = 0;
                last_poll_url = Some(poll_url.clone());
            }

            if iterations % self.config.poll_progress_log_every == 0 {
                debug!(
                    fetch_id = %fetch_id,
                    page_num,
                    iterations,
                    elapsed_secs = elapsed.as_secs(),
                    "logsearch_poll_progress"
                );
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(self.config.poll_max_delay_ms));

            let poll_url = poll_url.clone();
            let body = self.get_with_retry(&poll_url, &[]).await?;
            resolved = parse_page(&body)?;
        }

        Ok(resolved)
    }

    /// GET with pacing, rate-limit handling, and transient retries.
    ///
    /// 429 responses wait out the server's hint and retry without
    /// consuming an attempt. 5xx and transient transport failures retry
    /// with exponential backoff up to the attempt budget. Other non-2xx
    /// statuses are fatal.
    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            self.pace().await;

            let response = match self.transport.get(url, params).await {
                Ok(response) => response,
                Err(err) if err.is_transient() && attempt + 1 < self.config.retry_attempts => {
                    warn!(url = %url, attempt, error = %err, "transport_retry");
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => {
                    return Err(FetchError::Transport {
                        attempts: attempt + 1,
                        source: err,
                    })
                }
            };

            if response.status == 429 {
                let wait_secs = retry_after_secs(&response);
                warn!(url = %url, wait_secs, "rate_limited");
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }

            if (500..600).contains(&response.status) {
                if attempt + 1 < self.config.retry_attempts {
                    warn!(url = %url, status = response.status, attempt, "server_error_retry");
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(FetchError::Http {
                    status: response.status,
                    url: url.to_string(),
                });
            }

            if !response.is_success() {
                return Err(FetchError::Http {
                    status: response.status,
                    url: url.to_string(),
                });
            }

            return response
                .json()
                .map_err(|e| FetchError::Protocol(format!("Response body is not JSON: {}", e)));
        }
    }

    /// Space requests at least 60/rate_limit seconds apart
    async fn pace(&self) {
        let interval = Duration::from_secs_f64(60.0 / self.config.rate_limit_per_minute as f64);
        let wait = {
            let last = self.last_request_at.lock().unwrap_or_else(|e| e.into_inner());
            last.and_then(|t| interval.checked_sub(t.elapsed()))
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
        let mut last = self.last_request_at.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Instant::now());
    }
}

/// Seconds to wait after a 429: `Retry-After` if it parses, otherwise
/// `X-RateLimit-Reset`, defaulting to 1 and clamped to [1, 60].
fn retry_after_secs(response: &HttpResponse) -> u64 {
    let raw = response
        .header("Retry-After")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .or_else(|| {
            response
                .header("X-RateLimit-Reset")
                .and_then(|v| v.trim().parse::<i64>().ok())
        });
    raw.unwrap_or(1).clamp(1, 60) as u64
}
