//! # tcv-core — statements and the questions we ask about them
//!
//! Shared vocabulary of the TinCan Viewer: the [`Statement`] record and its
//! protocol dialects, the [`QueryDescriptor`] that is fanned out to every
//! learning record store, the search form that produces it, plain-text
//! rendering, and the viewer configuration.

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod render;
pub mod search;

pub use config::{LrsConfig, ServerSettings, ViewerConfig, ViewerSettings};
pub use error::{Result, TcvError};
pub use model::{ContinuationToken, ProtocolVersion, SourceId, Statement, StatementPage};
pub use query::QueryDescriptor;
pub use search::{SearchForm, VersionFilter};
