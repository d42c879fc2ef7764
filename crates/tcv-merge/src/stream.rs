//! # Multi-LRS merge stream
//!
//! Turns the independently paginated, newest-first feeds of several stores
//! into one newest-first feed.
//!
//! # Rounds
//!
//! A round is one batch of concurrent fetches. [`MultiLrsStream::begin_round`]
//! marks the queried buffers as waiting on the round and hands back a
//! [`RoundPlan`] that owns everything needed to run the fetches, so the
//! stream itself need not be borrowed while they are in flight.
//! [`RoundPlan::run`] joins them all; [`MultiLrsStream::settle`] folds the
//! outcomes back in, in whatever order they are given.
//!
//! Every outcome carries its round id. A buffer only accepts the outcome of
//! the round it is waiting on, so results of an abandoned round (one that a
//! fresh search replaced while it was in flight) are dropped as stale.
//!
//! A plan may be dropped without ever being settled. The buffers it marked
//! then wait on a round that never reports back, so a continuation round
//! takes them over: their cursor is fetched again under the new round and
//! any late outcome of the old one is stale.
//!
//! # Emission
//!
//! [`MultiLrsStream::next_statement`] applies [`select`] to the buffer
//! heads. Emission stops as soon as any source has nothing buffered but
//! may still deliver, so everything emitted is certified to be in global
//! order.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use tcv_core::{ContinuationToken, QueryDescriptor, SourceId, Statement, StatementPage};

use crate::buffer::SourceBuffer;
use crate::select::{select, Selection};
use crate::source::{FetchError, StatementSource};

/// Sources holding this many statements or fewer are refilled by a
/// continuation round.
pub const DEFAULT_LOW_WATER_MARK: usize = 10;

pub type RoundId = u64;

/// What a load round should do.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    /// New search: reset and query every source.
    Fresh(QueryDescriptor),
    /// Continue the current session.
    More,
}

impl LoadRequest {
    pub const MORE_SENTINEL: &'static str = "more";

    /// Map the string form used by browser clients.
    pub fn from_sentinel(value: &str) -> Option<Self> {
        (value == Self::MORE_SENTINEL).then_some(Self::More)
    }
}

#[derive(Debug, Clone)]
enum Fetch {
    Query(QueryDescriptor),
    More(ContinuationToken),
}

struct PlannedFetch {
    slot: usize,
    source: Arc<dyn StatementSource>,
    fetch: Fetch,
}

/// The fetches of one round, detached from the stream.
pub struct RoundPlan {
    round: RoundId,
    fetches: Vec<PlannedFetch>,
}

impl RoundPlan {
    pub fn id(&self) -> RoundId {
        self.round
    }

    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.fetches.iter().map(|f| f.source.id())
    }

    /// Issue every fetch concurrently and wait for all of them.
    pub async fn run(self) -> RoundResult {
        let round = self.round;
        let pending = self.fetches.into_iter().map(|planned| async move {
            let result = match &planned.fetch {
                Fetch::Query(query) => planned.source.query(query).await,
                Fetch::More(token) => planned.source.more(token).await,
            };
            FetchOutcome {
                round,
                slot: planned.slot,
                source: planned.source.id().clone(),
                result,
            }
        });

        RoundResult {
            round,
            outcomes: join_all(pending).await,
        }
    }
}

/// Result of one fetch, tagged with the round that issued it.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub round: RoundId,
    pub slot: usize,
    pub source: SourceId,
    pub result: Result<StatementPage, FetchError>,
}

#[derive(Debug, Clone)]
pub struct RoundResult {
    pub round: RoundId,
    pub outcomes: Vec<FetchOutcome>,
}

/// A fetch that produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub reason: String,
}

/// What settling a round changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoundReport {
    pub round: RoundId,
    /// Outcomes handed to `settle`.
    pub queried: usize,
    /// Statements appended to buffers.
    pub received: usize,
    pub failures: Vec<SourceFailure>,
    /// Outcomes dropped because their round was abandoned.
    pub stale: usize,
}

impl RoundReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct MultiLrsStream {
    sources: Vec<Arc<dyn StatementSource>>,
    buffers: Vec<SourceBuffer>,
    low_water_mark: usize,
    next_round: RoundId,
}

impl MultiLrsStream {
    /// Sources with the same identity share one buffer; later duplicates
    /// are ignored.
    pub fn new(sources: Vec<Arc<dyn StatementSource>>, low_water_mark: usize) -> Self {
        let mut stream = Self {
            sources: Vec::new(),
            buffers: Vec::new(),
            low_water_mark,
            next_round: 1,
        };
        stream.replace_sources(sources);
        stream
    }

    /// Swap in a new set of sources. All buffered state is dropped and any
    /// round in flight becomes stale.
    pub fn replace_sources(&mut self, sources: Vec<Arc<dyn StatementSource>>) {
        let mut seen = HashSet::new();
        self.sources = sources
            .into_iter()
            .filter(|source| {
                let fresh = seen.insert(source.id().clone());
                if !fresh {
                    tracing::debug!("Ignoring duplicate source {}", source.id());
                }
                fresh
            })
            .collect();
        self.buffers = self.sources.iter().map(|_| SourceBuffer::new()).collect();
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.iter().map(|s| s.id())
    }

    pub fn buffer(&self, source: &SourceId) -> Option<&SourceBuffer> {
        self.sources
            .iter()
            .position(|s| s.id() == source)
            .map(|slot| &self.buffers[slot])
    }

    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.reset();
        }
    }

    /// Plan the next round and mark its buffers as waiting on it.
    ///
    /// A continuation round before any search, or with nothing left to
    /// continue, yields an empty plan.
    pub fn begin_round(&mut self, request: LoadRequest) -> RoundPlan {
        let round = self.next_round;
        self.next_round += 1;

        let mut fetches = Vec::new();
        match request {
            LoadRequest::Fresh(query) => {
                self.reset();
                for (slot, source) in self.sources.iter().enumerate() {
                    self.buffers[slot].begin_fetch(round);
                    fetches.push(PlannedFetch {
                        slot,
                        source: Arc::clone(source),
                        fetch: Fetch::Query(query.clone()),
                    });
                }
            }
            LoadRequest::More => {
                for (slot, source) in self.sources.iter().enumerate() {
                    let buffer = &mut self.buffers[slot];
                    if buffer.len() > self.low_water_mark {
                        continue;
                    }
                    let Some(token) = buffer.cursor().cloned() else {
                        continue;
                    };
                    buffer.begin_fetch(round);
                    fetches.push(PlannedFetch {
                        slot,
                        source: Arc::clone(source),
                        fetch: Fetch::More(token),
                    });
                }
            }
        }

        tracing::debug!("Round {} planned with {} fetches", round, fetches.len());
        RoundPlan { round, fetches }
    }

    /// Fold one outcome into its buffer. Returns `false` if it was stale.
    pub fn apply(&mut self, outcome: FetchOutcome, report: &mut RoundReport) -> bool {
        let slot = outcome.slot;
        let current = self
            .sources
            .get(slot)
            .is_some_and(|source| source.id() == &outcome.source);
        if !current {
            report.stale += 1;
            return false;
        }

        let buffer = &mut self.buffers[slot];
        let applied = match outcome.result {
            Ok(page) => {
                let count = page.statements.len();
                let applied = buffer.accept(outcome.round, page);
                if applied {
                    report.received += count;
                }
                applied
            }
            Err(error) => {
                let applied = buffer.fail(outcome.round);
                if applied {
                    report.failures.push(SourceFailure {
                        source: outcome.source,
                        reason: error.to_string(),
                    });
                }
                applied
            }
        };

        if !applied {
            tracing::debug!("Dropping stale outcome of round {}", outcome.round);
            report.stale += 1;
        }
        applied
    }

    /// Apply every outcome of a round, in the order given.
    pub fn settle(&mut self, result: RoundResult) -> RoundReport {
        let mut report = RoundReport {
            round: result.round,
            queried: result.outcomes.len(),
            ..RoundReport::default()
        };
        for outcome in result.outcomes {
            self.apply(outcome, &mut report);
        }
        report
    }

    /// Run a whole round: plan, fetch, settle.
    pub async fn load(&mut self, request: LoadRequest) -> RoundReport {
        let plan = self.begin_round(request);
        let result = plan.run().await;
        self.settle(result)
    }

    /// Run a round, then hand the settled stream to `on_settled` once.
    pub async fn load_then<T, F>(&mut self, request: LoadRequest, on_settled: F) -> T
    where
        F: FnOnce(&mut Self, RoundReport) -> T,
    {
        let report = self.load(request).await;
        on_settled(self, report)
    }

    /// Pop the globally newest statement, if it can be certified.
    pub fn next_statement(&mut self) -> Option<Statement> {
        match select(self.buffers.iter().map(SourceBuffer::head)) {
            Selection::Take(slot) => self.buffers[slot].pop_front(),
            Selection::Await(_) | Selection::Exhausted => None,
        }
    }

    /// Everything that can be emitted now, newest first.
    pub fn drain(&mut self) -> Vec<Statement> {
        std::iter::from_fn(|| self.next_statement()).collect()
    }

    /// No buffered statements and no continuation cursor anywhere.
    pub fn exhausted(&self) -> bool {
        self.buffers.iter().all(SourceBuffer::is_exhausted)
    }

    /// Some source holds a continuation cursor.
    pub fn more_available(&self) -> bool {
        self.buffers.iter().any(|b| b.cursor().is_some())
    }

    pub fn buffered(&self) -> usize {
        self.buffers.iter().map(SourceBuffer::len).sum()
    }
}
