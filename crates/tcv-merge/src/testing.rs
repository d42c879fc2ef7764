//! In-memory statement sources for tests.
//!
//! [`ScriptedSource`] answers from a script instead of the network and
//! records every call it receives, so a test can assert both what the merge
//! stream emitted and which stores it asked.

use std::collections::HashMap;
use std::sync::Mutex;

use tcv_core::{
    ContinuationToken, ProtocolVersion, QueryDescriptor, SourceId, Statement, StatementPage,
};

use crate::source::{FetchError, StatementSource};

/// One call received by a [`ScriptedSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(QueryDescriptor),
    More(ContinuationToken),
}

pub struct ScriptedSource {
    id: SourceId,
    query_reply: Result<StatementPage, FetchError>,
    more_replies: HashMap<String, Result<StatementPage, FetchError>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedSource {
    /// A source whose initial query returns an empty final page.
    pub fn new(endpoint: &str, version: ProtocolVersion) -> Self {
        Self {
            id: SourceId::new(endpoint, None, version),
            query_reply: Ok(StatementPage::default()),
            more_replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_query(mut self, page: StatementPage) -> Self {
        self.query_reply = Ok(page);
        self
    }

    pub fn failing_query(mut self, error: FetchError) -> Self {
        self.query_reply = Err(error);
        self
    }

    pub fn with_more(mut self, token: &str, page: StatementPage) -> Self {
        self.more_replies.insert(token.to_string(), Ok(page));
        self
    }

    pub fn failing_more(mut self, token: &str, error: FetchError) -> Self {
        self.more_replies.insert(token.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn more_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::More(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait::async_trait]
impl StatementSource for ScriptedSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn query(&self, query: &QueryDescriptor) -> Result<StatementPage, FetchError> {
        self.record(Call::Query(query.clone()));
        self.query_reply.clone()
    }

    async fn more(&self, token: &ContinuationToken) -> Result<StatementPage, FetchError> {
        self.record(Call::More(token.clone()));
        self.more_replies
            .get(token.as_str())
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Status {
                    status: 400,
                    body: format!("unknown continuation token {}", token),
                })
            })
    }
}

/// Statement with only the fields the merge looks at.
pub fn stmt(id: &str, stored: &str) -> Statement {
    Statement::new(id, stored)
}

/// Page of `(id, stored)` statements in the given order.
pub fn page(statements: &[(&str, &str)], more: Option<&str>) -> StatementPage {
    StatementPage::new(
        statements.iter().map(|(id, stored)| stmt(id, stored)).collect(),
        more.map(ContinuationToken::new),
    )
}
