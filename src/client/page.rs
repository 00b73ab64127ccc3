//! Response page decoding
//!
//! The log-search API signals query progress through a `links` array:
//! a `Self` link means the query is still running and should be polled,
//! a `Next` link means this page is done and another follows, and no
//! links at all means the query is complete. Everything else is a
//! protocol violation, decoded once here so the fetch loop works with
//! tagged types instead of raw JSON.

use crate::client::error::FetchError;
use serde_json::Value;

/// What a response page says about query progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// No continuation: this page finishes the query
    Complete,
    /// Query still running; poll this URL
    InProgress { poll_url: String },
    /// Page finished; fetch the next page at this URL
    HasNext { next_url: String },
}

/// One decoded response body
#[derive(Debug, Clone)]
pub struct PageBody {
    /// Raw `events` payload (shape varies; the writer decodes it)
    pub events: Value,
    pub completion: Completion,
}

/// A completed page of events
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number
    pub page_num: u32,
    pub events: Value,
}

/// Decode a response body into its events payload and completion signal.
///
/// `links` absent, null, or empty means complete. A non-array `links`,
/// an entry that is not an object with string `rel` and `href`, both
/// `Self` and `Next` present, or a non-empty `links` with neither, are
/// all protocol violations.
pub fn parse_page(body: &Value) -> Result<PageBody, FetchError> {
    let events = body.get("events").cloned().unwrap_or(Value::Null);

    let links = match body.get("links") {
        None | Some(Value::Null) => {
            return Ok(PageBody {
                events,
                completion: Completion::Complete,
            })
        }
        Some(Value::Array(links)) => links,
        Some(other) => {
            return Err(FetchError::Protocol(format!(
                "links must be an array, got {}",
                type_name(other)
            )))
        }
    };

    if links.is_empty() {
        return Ok(PageBody {
            events,
            completion: Completion::Complete,
        });
    }

    let mut poll_url: Option<String> = None;
    let mut next_url: Option<String> = None;

    for link in links {
        let obj = link.as_object().ok_or_else(|| {
            FetchError::Protocol(format!("link entry must be an object, got {}", type_name(link)))
        })?;
        let rel = obj
            .get("rel")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Protocol("link entry missing rel".to_string()))?;
        let href = obj
            .get("href")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Protocol("link entry missing href".to_string()))?;

        if rel.eq_ignore_ascii_case("self") {
            poll_url = Some(href.to_string());
        } else if rel.eq_ignore_ascii_case("next") {
            next_url = Some(href.to_string());
        }
    }

    match (poll_url, next_url) {
        (Some(_), Some(_)) => Err(FetchError::Protocol(
            "links carry both Self and Next".to_string(),
        )),
        (Some(poll_url), None) => Ok(PageBody {
            events,
            completion: Completion::InProgress { poll_url },
        }),
        (None, Some(next_url)) => Ok(PageBody {
            events,
            completion: Completion::HasNext { next_url },
        }),
        (None, None) => Err(FetchError::Protocol(
            "non-empty links carry neither Self nor Next".to_string(),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
