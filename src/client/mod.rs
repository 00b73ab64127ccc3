//! Log-search API client
//!
//! Submit a query for a time window, poll until the server finishes
//! running it, and page through the results. The transport seam keeps
//! the protocol logic testable without a network.

pub mod error;
pub mod fetch;
pub mod http;
pub mod page;

pub use error::FetchError;
pub use fetch::{FetchClient, FetchConfig};
pub use http::{HttpResponse, ReqwestTransport, Transport, TransportError};
pub use page::{parse_page, Completion, Page, PageBody};
