//! # Viewer controller
//!
//! Owns the configured sources and one [`MultiLrsStream`], turns search
//! form input into rounds, and hands back whatever the stream can certify
//! as a [`Feed`].
//!
//! `search`/`more` run a whole round. Callers that share a viewer behind a
//! lock use the split form instead: `begin_search`/`begin_more` under the
//! lock, [`RoundPlan::run`] without it, then `settle` under the lock again.
//! `settle` is itself `settle_round` followed by `take_feed`, for callers
//! that fold outcomes in on one task and emit on another.

use std::sync::Arc;

use serde::Serialize;

use tcv_core::{QueryDescriptor, SearchForm, SourceId, Statement, ViewerConfig, ViewerSettings};

use crate::lrs::LrsClient;
use crate::source::StatementSource;
use crate::stream::{LoadRequest, MultiLrsStream, RoundPlan, RoundReport, RoundResult};

/// Statements emitted by one round, plus where the session stands.
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub statements: Vec<Statement>,
    pub more_available: bool,
    pub exhausted: bool,
    pub report: RoundReport,
}

pub struct Viewer {
    sources: Vec<Arc<dyn StatementSource>>,
    stream: MultiLrsStream,
    page_size: u32,
}

impl Viewer {
    pub fn new(sources: Vec<Arc<dyn StatementSource>>, settings: &ViewerSettings) -> Self {
        Self {
            stream: MultiLrsStream::new(sources.clone(), settings.low_water_mark),
            sources,
            page_size: settings.page_size,
        }
    }

    /// One HTTP source per configured store.
    pub fn from_config(config: &ViewerConfig) -> tcv_core::Result<Self> {
        let timeout = config.viewer.request_timeout();
        let sources = config
            .sources
            .iter()
            .map(|lrs| {
                LrsClient::new(lrs, timeout).map(|c| Arc::new(c) as Arc<dyn StatementSource>)
            })
            .collect::<tcv_core::Result<Vec<_>>>()?;
        Ok(Self::new(sources, &config.viewer))
    }

    /// Every configured source, selected or not.
    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.iter().map(|s| s.id())
    }

    pub fn stream(&self) -> &MultiLrsStream {
        &self.stream
    }

    /// Validate the form, select sources by version, and plan a fresh round.
    /// An invalid form leaves the current session untouched.
    pub fn begin_search(&mut self, form: &SearchForm) -> tcv_core::Result<RoundPlan> {
        let query = form.to_descriptor(self.page_size)?;
        let selected = self.select(form)?;
        self.stream.replace_sources(selected);
        Ok(self.stream.begin_round(LoadRequest::Fresh(query)))
    }

    pub fn begin_more(&mut self) -> RoundPlan {
        self.stream.begin_round(LoadRequest::More)
    }

    /// Settle a round and emit what it certified.
    pub fn settle(&mut self, result: RoundResult) -> Feed {
        let report = self.settle_round(result);
        self.take_feed(report)
    }

    /// Fold a round's outcomes into the buffers without emitting anything.
    pub fn settle_round(&mut self, result: RoundResult) -> RoundReport {
        let report = self.stream.settle(result);
        for failure in &report.failures {
            tracing::warn!("Source {} failed: {}", failure.source, failure.reason);
        }
        if report.stale > 0 {
            tracing::debug!("{} stale outcomes dropped", report.stale);
        }
        report
    }

    /// Drain everything currently certified.
    pub fn take_feed(&mut self, report: RoundReport) -> Feed {
        Feed {
            statements: self.stream.drain(),
            more_available: self.stream.more_available(),
            exhausted: self.stream.exhausted(),
            report,
        }
    }

    pub async fn search(&mut self, form: &SearchForm) -> tcv_core::Result<Feed> {
        let plan = self.begin_search(form)?;
        let result = plan.run().await;
        Ok(self.settle(result))
    }

    pub async fn more(&mut self) -> Feed {
        let result = self.begin_more().run().await;
        self.settle(result)
    }

    /// The statements URL each selected source would be asked.
    pub fn query_urls(&self, form: &SearchForm) -> tcv_core::Result<Vec<(SourceId, String)>> {
        let query: QueryDescriptor = form.to_descriptor(self.page_size)?;
        Ok(self
            .select(form)?
            .iter()
            .map(|source| {
                let id = source.id();
                (id.clone(), query.query_url(id.endpoint(), id.version()))
            })
            .collect())
    }

    fn select(&self, form: &SearchForm) -> tcv_core::Result<Vec<Arc<dyn StatementSource>>> {
        let filter = form.version_filter()?;
        Ok(self
            .sources
            .iter()
            .filter(|source| filter.admits(source.version()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, ScriptedSource};
    use crate::FetchError;
    use tcv_core::{LrsConfig, ProtocolVersion, TcvError};

    fn viewer(sources: Vec<Arc<ScriptedSource>>) -> Viewer {
        Viewer::new(
            sources
                .into_iter()
                .map(|s| s as Arc<dyn StatementSource>)
                .collect(),
            &ViewerSettings::default(),
        )
    }

    fn ids(feed: &Feed) -> Vec<&str> {
        feed.statements.iter().map(|s| s.id.as_str()).collect()
    }

    fn legacy() -> Arc<ScriptedSource> {
        Arc::new(
            ScriptedSource::new("https://old.example/tcapi/", ProtocolVersion::V0_9)
                .with_query(page(&[("old1", "2024-01-02")], None)),
        )
    }

    fn modern() -> Arc<ScriptedSource> {
        Arc::new(
            ScriptedSource::new("https://new.example/xAPI/", ProtocolVersion::V1_0_0)
                .with_query(page(&[("new1", "2024-01-03")], Some("t")))
                .with_more("t", page(&[("new2", "2024-01-01")], None)),
        )
    }

    #[tokio::test]
    async fn test_search_then_more() {
        let mut v = viewer(vec![legacy(), modern()]);

        // old1 waits until the modern store's next page shows nothing newer.
        let feed = v.search(&SearchForm::default()).await.unwrap();
        assert_eq!(ids(&feed), vec!["new1"]);
        assert!(feed.more_available);
        assert!(!feed.exhausted);

        let feed = v.more().await;
        assert_eq!(ids(&feed), vec!["old1", "new2"]);
        assert!(feed.exhausted);
    }

    #[tokio::test]
    async fn test_more_recovers_after_unsettled_round() {
        let a = Arc::new(
            ScriptedSource::new("https://a.example/xAPI/", ProtocolVersion::V1_0_0)
                .with_query(page(&[("a1", "2024-01-04")], Some("t")))
                .with_more("t", page(&[("a2", "2024-01-02")], None)),
        );
        let b = Arc::new(
            ScriptedSource::new("https://b.example/xAPI/", ProtocolVersion::V1_0_0)
                .with_query(page(&[("b1", "2024-01-03")], None)),
        );
        let mut v = viewer(vec![a.clone(), b]);

        let feed = v.search(&SearchForm::default()).await.unwrap();
        assert_eq!(ids(&feed), vec!["a1"]);

        // A request abandoned between planning and settling.
        drop(v.begin_more());

        let feed = v.more().await;
        assert_eq!(ids(&feed), vec!["b1", "a2"]);
        assert!(!feed.more_available);
        assert!(feed.exhausted);
        assert_eq!(a.more_calls(), 1);
    }

    #[tokio::test]
    async fn test_version_filter_selects_sources() {
        let old = legacy();
        let new = modern();
        let mut v = viewer(vec![old.clone(), new.clone()]);

        let form = SearchForm {
            version: Some("0.9".into()),
            ..SearchForm::default()
        };
        let feed = v.search(&form).await.unwrap();
        assert_eq!(ids(&feed), vec!["old1"]);
        assert!(new.calls().is_empty());
        assert_eq!(v.sources().count(), 2);
        assert_eq!(v.stream().sources().count(), 1);
    }

    #[tokio::test]
    async fn test_page_size_reaches_the_query() {
        let new = modern();
        let settings = ViewerSettings {
            page_size: 7,
            ..ViewerSettings::default()
        };
        let mut v = Viewer::new(vec![new.clone() as Arc<dyn StatementSource>], &settings);
        v.search(&SearchForm::default()).await.unwrap();

        match &new.calls()[0] {
            crate::testing::Call::Query(q) => assert_eq!(q.limit, 7),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_form_issues_no_fetch() {
        let new = modern();
        let mut v = viewer(vec![new.clone()]);

        let form = SearchForm {
            actor_json: Some("{not json".into()),
            ..SearchForm::default()
        };
        let err = v.search(&form).await.unwrap_err();
        assert!(matches!(err, TcvError::InvalidSearch { field: "actorJson", .. }));
        assert!(new.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let broken = Arc::new(
            ScriptedSource::new("https://down.example/", ProtocolVersion::V0_95)
                .failing_query(FetchError::Transport("timed out".into())),
        );
        let mut v = viewer(vec![broken, legacy()]);

        let feed = v.search(&SearchForm::default()).await.unwrap();
        assert_eq!(ids(&feed), vec!["old1"]);
        assert_eq!(feed.report.failures.len(), 1);
        assert!(feed.exhausted);
    }

    #[tokio::test]
    async fn test_overtaken_search_results_are_dropped() {
        let mut v = viewer(vec![modern()]);

        let first = v.begin_search(&SearchForm::default()).unwrap();
        let second = v.begin_search(&SearchForm::default()).unwrap();
        let first = first.run().await;
        let second = second.run().await;

        let late = v.settle(first);
        assert_eq!(late.report.stale, 1);
        assert!(late.statements.is_empty());

        let feed = v.settle(second);
        assert_eq!(ids(&feed), vec!["new1"]);
    }

    #[tokio::test]
    async fn test_more_before_search_is_empty() {
        let new = modern();
        let mut v = viewer(vec![new.clone()]);
        let feed = v.more().await;
        assert!(feed.statements.is_empty());
        assert!(feed.exhausted);
        assert!(new.calls().is_empty());
    }

    #[test]
    fn test_query_urls_per_selected_source() {
        let v = viewer(vec![legacy(), modern()]);
        let form = SearchForm {
            actor_email: Some("ann@example.com".into()),
            version: Some("1.0.0".into()),
            ..SearchForm::default()
        };
        let urls = v.query_urls(&form).unwrap();
        assert_eq!(urls.len(), 1);
        let (id, url) = &urls[0];
        assert_eq!(id.version(), ProtocolVersion::V1_0_0);
        assert!(url.starts_with("https://new.example/xAPI/statements?"));
        assert!(url.contains("actor=%7B%22mbox%22%3A%22mailto%3Aann%40example.com%22%7D"));
    }

    #[test]
    fn test_from_config_builds_one_client_per_store() {
        let config = ViewerConfig {
            sources: vec![
                LrsConfig {
                    name: Some("a".into()),
                    endpoint: "https://a.example/xAPI".into(),
                    username: None,
                    password: None,
                    version: ProtocolVersion::V1_0_0,
                },
                LrsConfig {
                    name: Some("b".into()),
                    endpoint: "https://b.example/tcapi/".into(),
                    username: Some("u".into()),
                    password: Some("p".into()),
                    version: ProtocolVersion::V0_9,
                },
            ],
            ..ViewerConfig::default()
        };
        let v = Viewer::from_config(&config).unwrap();
        let endpoints: Vec<&str> = v.sources().map(|s| s.endpoint()).collect();
        assert_eq!(endpoints, vec!["https://a.example/xAPI/", "https://b.example/tcapi/"]);
    }
}
