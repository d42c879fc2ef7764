//! # Source buffer — per-source merge state
//!
//! Fetched-but-not-yet-emitted statements of one source, its continuation
//! cursor, and the round of the fetch currently in flight for it.
//!
//! # Invariants
//!
//! - Statements are held in the order the source delivered them, which is
//!   descending `stored`; the front is always the newest.
//! - A page is only accepted from the round recorded as in flight. Any other
//!   page belongs to an abandoned round and is refused.
//! - Starting a fetch replaces whatever round was recorded before it.

use std::collections::VecDeque;

use tcv_core::{ContinuationToken, Statement, StatementPage};

use crate::select::Head;
use crate::stream::RoundId;

#[derive(Debug, Default)]
pub struct SourceBuffer {
    statements: VecDeque<Statement>,
    cursor: Option<ContinuationToken>,
    in_flight: Option<RoundId>,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn cursor(&self) -> Option<&ContinuationToken> {
        self.cursor.as_ref()
    }

    pub fn in_flight(&self) -> Option<RoundId> {
        self.in_flight
    }

    pub fn front(&self) -> Option<&Statement> {
        self.statements.front()
    }

    /// Nothing buffered and no known way to get more.
    pub fn is_exhausted(&self) -> bool {
        self.is_empty() && self.cursor.is_none()
    }

    /// Selection view: the front key, and whether more may still arrive.
    pub fn head(&self) -> Head<&str> {
        Head {
            front: self.front().map(|s| s.stored.as_str()),
            pending: self.cursor.is_some() || self.in_flight.is_some(),
        }
    }

    pub fn pop_front(&mut self) -> Option<Statement> {
        self.statements.pop_front()
    }

    pub fn reset(&mut self) {
        self.statements.clear();
        self.cursor = None;
        self.in_flight = None;
    }

    pub(crate) fn begin_fetch(&mut self, round: RoundId) {
        self.in_flight = Some(round);
    }

    /// Append a page delivered for `round`. Returns `false` (and changes
    /// nothing) when `round` is not the fetch this buffer is waiting on.
    pub(crate) fn accept(&mut self, round: RoundId, page: StatementPage) -> bool {
        if self.in_flight != Some(round) {
            return false;
        }
        self.in_flight = None;
        self.statements.extend(page.statements);
        self.cursor = page.more;
        true
    }

    /// Record a failed fetch for `round`: the source contributes nothing
    /// further, so its cursor is dropped and it can no longer block
    /// selection.
    pub(crate) fn fail(&mut self, round: RoundId) -> bool {
        if self.in_flight != Some(round) {
            return false;
        }
        self.in_flight = None;
        self.cursor = None;
        true
    }
}
