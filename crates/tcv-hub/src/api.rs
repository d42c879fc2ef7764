//! # API Handlers
//!
//! JSON feed endpoints. Every response carries the session id the browser
//! must send back to continue.

use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tcv_core::render::{relative_age, render_line};
use tcv_core::{ProtocolVersion, SearchForm, Statement};
use tcv_merge::{Feed, LoadRequest, RoundPlan, RoundReport};

use crate::sessions::SharedViewer;

type ApiError = (StatusCode, String);

#[derive(Deserialize)]
pub struct LoadParams {
    /// `"more"` continues `session` instead of searching.
    pub load: Option<String>,
    pub session: Option<String>,
}

#[derive(Deserialize)]
pub struct SessionParams {
    pub session: String,
}

#[derive(Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub version: ProtocolVersion,
    pub endpoint: String,
    pub id: String,
}

#[derive(Serialize)]
pub struct RenderedStatement {
    pub id: String,
    pub stored: String,
    pub summary: String,
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Statement>,
}

#[derive(Serialize)]
pub struct QueryUrl {
    pub source: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct FailureInfo {
    pub source: String,
    pub reason: String,
}

#[derive(Serialize)]
pub struct FeedResponse {
    pub session: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_urls: Vec<QueryUrl>,
    pub statements: Vec<RenderedStatement>,
    pub more_available: bool,
    pub exhausted: bool,
    pub failures: Vec<FailureInfo>,
}

// =============================================================================
// Sources
// =============================================================================

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceInfo>> {
    let sources = state
        .sources
        .iter()
        .map(|source| {
            let id = source.id();
            SourceInfo {
                name: state.name_of(id),
                version: id.version(),
                endpoint: id.endpoint().to_string(),
                id: id.to_string(),
            }
        })
        .collect();
    Json(sources)
}

// =============================================================================
// Statements
// =============================================================================

pub async fn statements(
    State(state): State<Arc<AppState>>,
    Query(form): Query<SearchForm>,
    Query(params): Query<LoadParams>,
) -> Result<Json<FeedResponse>, ApiError> {
    match params.load.as_deref().and_then(LoadRequest::from_sentinel) {
        Some(LoadRequest::More) => {
            let session = params.session.ok_or((
                StatusCode::BAD_REQUEST,
                "load=more requires a session".to_string(),
            ))?;
            continue_session(&state, &session).await
        }
        _ => fresh_search(&state, &form, params.session.as_deref()).await,
    }
}

pub async fn more_statements(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<Json<FeedResponse>, ApiError> {
    continue_session(&state, &params.session).await
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session(&id)?;
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found())
    }
}

async fn fresh_search(
    state: &AppState,
    form: &SearchForm,
    session: Option<&str>,
) -> Result<Json<FeedResponse>, ApiError> {
    let bad_request = |e: tcv_core::TcvError| (StatusCode::BAD_REQUEST, e.to_string());

    // Reject bad input before a session is created for it.
    form.to_descriptor(state.settings.page_size)
        .map_err(bad_request)?;
    form.version_filter().map_err(bad_request)?;

    let (id, shared) = match session {
        Some(raw) => {
            let id = parse_session(raw)?;
            (id, lookup(state, &id).await?)
        }
        None => state.sessions.insert(state.new_viewer()).await,
    };

    // The viewer lock is released while the round is in flight; a newer
    // search on this session turns this round's results stale.
    let (query_urls, plan) = {
        let mut viewer = shared.lock().await;
        let urls = viewer.query_urls(form).map_err(bad_request)?;
        let plan = viewer.begin_search(form).map_err(bad_request)?;
        (urls, plan)
    };
    let report = spawn_round(shared.clone(), plan).await.map_err(round_failed)?;
    let feed = shared.lock().await.take_feed(report);

    let query_urls = query_urls
        .into_iter()
        .map(|(source, url)| QueryUrl {
            source: state.name_of(&source),
            url,
        })
        .collect();
    Ok(Json(respond(state, id, query_urls, feed)))
}

async fn continue_session(state: &AppState, session: &str) -> Result<Json<FeedResponse>, ApiError> {
    let id = parse_session(session)?;
    let shared = lookup(state, &id).await?;

    let plan = shared.lock().await.begin_more();
    let report = spawn_round(shared.clone(), plan).await.map_err(round_failed)?;
    let feed = shared.lock().await.take_feed(report);

    Ok(Json(respond(state, id, Vec::new(), feed)))
}

/// Fetch and settle a round on its own task. The round completes even if
/// the request that started it is dropped; statements it certified stay
/// buffered for the session's next request.
fn spawn_round(shared: SharedViewer, plan: RoundPlan) -> JoinHandle<RoundReport> {
    tokio::spawn(async move {
        let result = plan.run().await;
        shared.lock().await.settle_round(result)
    })
}

fn round_failed(e: tokio::task::JoinError) -> ApiError {
    tracing::error!("Round task failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Round failed".to_string())
}

async fn lookup(state: &AppState, id: &Uuid) -> Result<SharedViewer, ApiError> {
    state.sessions.get(id).await.ok_or_else(session_not_found)
}

fn parse_session(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| session_not_found())
}

fn session_not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Session not found".to_string())
}

fn respond(state: &AppState, id: Uuid, query_urls: Vec<QueryUrl>, feed: Feed) -> FeedResponse {
    let now = Utc::now();
    let include_raw = state.settings.include_raw_data;
    FeedResponse {
        session: id.to_string(),
        query_urls,
        statements: feed
            .statements
            .into_iter()
            .map(|stmt| render(stmt, now, include_raw))
            .collect(),
        more_available: feed.more_available,
        exhausted: feed.exhausted,
        failures: feed
            .report
            .failures
            .into_iter()
            .map(|f| FailureInfo {
                source: state.name_of(&f.source),
                reason: f.reason,
            })
            .collect(),
    }
}

fn render(stmt: Statement, now: DateTime<Utc>, include_raw: bool) -> RenderedStatement {
    RenderedStatement {
        id: stmt.id.clone(),
        stored: stmt.stored.clone(),
        summary: render_line(&stmt),
        age: relative_age(&stmt.stored, now),
        raw: include_raw.then_some(stmt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tcv_core::ViewerSettings;
    use tcv_merge::testing::{page, ScriptedSource};
    use tcv_merge::{FetchError, StatementSource};

    fn legacy() -> Arc<dyn StatementSource> {
        Arc::new(
            ScriptedSource::new("https://old.example/tcapi/", ProtocolVersion::V0_9)
                .with_query(page(&[("old1", "2024-01-02T00:00:00Z")], None)),
        )
    }

    fn modern() -> Arc<dyn StatementSource> {
        Arc::new(
            ScriptedSource::new("https://new.example/xAPI/", ProtocolVersion::V1_0_0)
                .with_query(page(&[("new1", "2024-01-03T00:00:00Z")], Some("t")))
                .with_more("t", page(&[("new2", "2024-01-01T00:00:00Z")], None)),
        )
    }

    async fn serve(sources: Vec<(String, Arc<dyn StatementSource>)>) -> String {
        let state = Arc::new(AppState::new(sources, ViewerSettings::default(), 8));
        let app = crate::router(state, None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn two_stores() -> String {
        serve(vec![("old".into(), legacy()), ("new".into(), modern())]).await
    }

    async fn get_json(url: &str) -> (u16, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap();
        (status, serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    fn ids(body: &Value) -> Vec<String> {
        body["statements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_list_sources() {
        let base = two_stores().await;
        let (status, body) = get_json(&format!("{}/api/sources", base)).await;
        assert_eq!(status, 200);
        assert_eq!(body[0]["name"], "old");
        assert_eq!(body[0]["version"], "0.9");
        assert_eq!(body[1]["endpoint"], "https://new.example/xAPI/");
    }

    #[tokio::test]
    async fn test_search_then_more() {
        let base = two_stores().await;

        let (status, body) = get_json(&format!("{}/api/statements", base)).await;
        assert_eq!(status, 200);
        assert_eq!(ids(&body), vec!["new1"]);
        assert_eq!(body["more_available"], true);
        assert_eq!(body["query_urls"].as_array().unwrap().len(), 2);
        assert!(body["statements"][0]["summary"].is_string());
        assert_eq!(body["statements"][0]["raw"]["id"], "new1");
        let session = body["session"].as_str().unwrap().to_string();

        let (status, body) =
            get_json(&format!("{}/api/statements/more?session={}", base, session)).await;
        assert_eq!(status, 200);
        assert_eq!(ids(&body), vec!["old1", "new2"]);
        assert_eq!(body["exhausted"], true);
        assert!(body.get("query_urls").is_none());
    }

    #[tokio::test]
    async fn test_more_sentinel_continues_session() {
        let base = two_stores().await;
        let (_, body) = get_json(&format!("{}/api/statements", base)).await;
        let session = body["session"].as_str().unwrap();

        let (status, body) = get_json(&format!(
            "{}/api/statements?load=more&session={}",
            base, session
        ))
        .await;
        assert_eq!(status, 200);
        assert_eq!(ids(&body), vec!["old1", "new2"]);
        assert_eq!(body["session"], session);
    }

    #[tokio::test]
    async fn test_version_filter_and_session_reuse() {
        let base = two_stores().await;
        let (_, body) = get_json(&format!("{}/api/statements", base)).await;
        let session = body["session"].as_str().unwrap();

        let (status, body) = get_json(&format!(
            "{}/api/statements?version=0.9&session={}",
            base, session
        ))
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["session"], session);
        assert_eq!(ids(&body), vec!["old1"]);
        assert_eq!(body["exhausted"], true);
    }

    #[tokio::test]
    async fn test_checkbox_form_fields() {
        let base = two_stores().await;
        let (status, body) = get_json(&format!(
            "{}/api/statements?context=on&sparse=on&activityId=act",
            base
        ))
        .await;
        assert_eq!(status, 200);
        let url = body["query_urls"][0]["url"].as_str().unwrap();
        assert!(url.contains("context=true"), "{}", url);
        assert!(url.contains("sparse=true"), "{}", url);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let base = two_stores().await;

        let (status, _) = get_json(&format!("{}/api/statements?actorJson=%7Bbad", base)).await;
        assert_eq!(status, 400);

        let (status, _) = get_json(&format!("{}/api/statements?load=more", base)).await;
        assert_eq!(status, 400);

        let (status, _) = get_json(&format!(
            "{}/api/statements/more?session={}",
            base,
            Uuid::new_v4()
        ))
        .await;
        assert_eq!(status, 404);

        let (status, _) = get_json(&format!("{}/api/statements/more?session=nope", base)).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_failures_are_listed() {
        let broken: Arc<dyn StatementSource> = Arc::new(
            ScriptedSource::new("https://down.example/", ProtocolVersion::V0_95)
                .failing_query(FetchError::Transport("timed out".into())),
        );
        let base = serve(vec![("down".into(), broken), ("old".into(), legacy())]).await;

        let (status, body) = get_json(&format!("{}/api/statements", base)).await;
        assert_eq!(status, 200);
        assert_eq!(ids(&body), vec!["old1"]);
        assert_eq!(body["failures"][0]["source"], "down");
        assert!(body["failures"][0]["reason"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_round_settles_after_request_is_dropped() {
        let state = AppState::new(
            vec![("old".into(), legacy()), ("new".into(), modern())],
            ViewerSettings::default(),
            8,
        );
        let (id, shared) = state.sessions.insert(state.new_viewer()).await;
        let plan = shared
            .lock()
            .await
            .begin_search(&SearchForm::default())
            .unwrap();

        drop(spawn_round(shared.clone(), plan));
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while shared.lock().await.stream().buffered() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let Json(body) = continue_session(&state, &id.to_string()).await.unwrap();
        let ids: Vec<&str> = body.statements.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new1", "old1", "new2"]);
        assert!(body.exhausted);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let base = two_stores().await;
        let (_, body) = get_json(&format!("{}/api/statements", base)).await;
        let session = body["session"].as_str().unwrap();

        let client = reqwest::Client::new();
        let url = format!("{}/api/sessions/{}", base, session);
        assert_eq!(client.delete(&url).send().await.unwrap().status().as_u16(), 204);
        assert_eq!(client.delete(&url).send().await.unwrap().status().as_u16(), 404);

        let (status, _) =
            get_json(&format!("{}/api/statements/more?session={}", base, session)).await;
        assert_eq!(status, 404);
    }
}
