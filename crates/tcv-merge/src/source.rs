//! # Fetch adapter
//!
//! One [`StatementSource`] wraps one (endpoint, credential, version) triple.
//! Both operations resolve with a page of statements, newest `stored` first,
//! plus the continuation cursor for the next page, or with a [`FetchError`].
//! The merge stream never re-sorts a page.

use thiserror::Error;

use tcv_core::{ContinuationToken, ProtocolVersion, QueryDescriptor, SourceId, StatementPage};

/// Why a single fetch produced no page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Connection, TLS, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not a statement result.
    #[error("malformed response: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait StatementSource: Send + Sync {
    /// Identity used to key buffer state.
    fn id(&self) -> &SourceId;

    fn version(&self) -> ProtocolVersion {
        self.id().version()
    }

    /// Run the initial query.
    async fn query(&self, query: &QueryDescriptor) -> Result<StatementPage, FetchError>;

    /// Fetch the page behind a continuation cursor.
    async fn more(&self, token: &ContinuationToken) -> Result<StatementPage, FetchError>;
}
