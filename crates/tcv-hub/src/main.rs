use axum::{
    routing::{delete, get},
    Router,
};
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcv_core::{SourceId, ViewerConfig, ViewerSettings};
use tcv_merge::{LrsClient, StatementSource, Viewer};

use sessions::SessionStore;

mod api;
mod sessions;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "tcv-hub", version, about = "TinCan Viewer feed service")]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "tcv.toml")]
    config: PathBuf,

    /// Server bind address (overrides [server].bind)
    #[arg(long)]
    bind: Option<String>,

    /// Directory of static UI files (overrides [server].ui_dir)
    #[arg(long)]
    ui: Option<PathBuf>,
}

// =============================================================================
// State
// =============================================================================

pub struct AppState {
    /// Shared by every session; each session keeps its own buffers.
    pub sources: Vec<Arc<dyn StatementSource>>,
    names: HashMap<SourceId, String>,
    pub settings: ViewerSettings,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(
        sources: Vec<(String, Arc<dyn StatementSource>)>,
        settings: ViewerSettings,
        session_capacity: usize,
    ) -> Self {
        let names = sources
            .iter()
            .map(|(name, source)| (source.id().clone(), name.clone()))
            .collect();
        Self {
            sources: sources.into_iter().map(|(_, source)| source).collect(),
            names,
            settings,
            sessions: SessionStore::new(session_capacity),
        }
    }

    pub fn from_config(config: &ViewerConfig) -> tcv_core::Result<Self> {
        let timeout = config.viewer.request_timeout();
        let mut sources = Vec::with_capacity(config.sources.len());
        for lrs in &config.sources {
            let client: Arc<dyn StatementSource> = Arc::new(LrsClient::new(lrs, timeout)?);
            sources.push((lrs.display_name(), client));
        }
        Ok(Self::new(
            sources,
            config.viewer.clone(),
            config.server.session_capacity,
        ))
    }

    pub fn new_viewer(&self) -> Viewer {
        Viewer::new(self.sources.clone(), &self.settings)
    }

    pub fn name_of(&self, id: &SourceId) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

pub fn router(state: Arc<AppState>, ui_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/api/sources", get(api::list_sources))
        .route("/api/statements", get(api::statements))
        .route("/api/statements/more", get(api::more_statements))
        .route("/api/sessions/:id", delete(api::delete_session));

    // Static UI
    if let Some(dir) = ui_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tcv_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match ViewerConfig::load(&args.config).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if config.sources.is_empty() {
        tracing::warn!("No [[lrs]] entries configured; every search will be empty.");
    }

    let state = match AppState::from_config(&config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to set up record stores: {}", e);
            std::process::exit(1);
        }
    };

    let ui_dir = args
        .ui
        .or_else(|| config.server.ui_dir.as_ref().map(PathBuf::from));
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    let app = router(state.clone(), ui_dir.clone());

    let addr: SocketAddr = bind.parse().expect("Invalid bind address");
    tracing::info!("TinCan Viewer hub on http://{}", addr);
    for source in &state.sources {
        tracing::info!("  LRS {} ({})", state.name_of(source.id()), source.id());
    }
    if let Some(dir) = &ui_dir {
        tracing::info!("  UI from {}", dir.display());
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
