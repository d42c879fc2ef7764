//! # tcv-merge — one feed from many record stores
//!
//! Queries several learning record stores, each possibly speaking a
//! different protocol revision, and yields their statements as a single
//! sequence ordered by `stored`, newest first, while every store keeps its
//! own pagination cursor.
//!
//! - [`source`]: the fetch adapter seam every store implements.
//! - [`lrs`]: the HTTP adapter.
//! - [`buffer`] and [`select`]: per-source state and the pure selection rule.
//! - [`stream`]: the merge stream and its fetch rounds.
//! - [`viewer`]: the controller that turns form input into feeds.

pub mod buffer;
pub mod lrs;
pub mod select;
pub mod source;
pub mod stream;
pub mod viewer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use lrs::LrsClient;
pub use source::{FetchError, StatementSource};
pub use stream::{
    FetchOutcome, LoadRequest, MultiLrsStream, RoundId, RoundPlan, RoundReport, RoundResult,
    SourceFailure,
};
pub use viewer::{Feed, Viewer};
