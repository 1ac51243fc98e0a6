//! Axum server and per-session registry.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use lru::LruCache;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::budget::BudgetTracker;
use crate::cache::SharedCache;
use crate::config::{Config, WebConfig};
use crate::error::{Result, TallyError};
use crate::pipeline::ChatPipeline;
use crate::providers::LLMProvider;
use crate::session::{is_valid_session_id, ConversationContext};

/// One pipeline per session, all sharing a single cache.
///
/// Each pipeline sits behind its own mutex so requests for the same session
/// run one at a time while different sessions proceed in parallel. At most
/// `web.max_sessions` sessions are kept; creating one more drops the least
/// recently used, saving its conversation first.
pub struct SessionRegistry {
    config: Config,
    provider: Arc<dyn LLMProvider>,
    cache: SharedCache,
    sessions: Mutex<LruCache<String, Arc<Mutex<ChatPipeline>>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(config: Config, provider: Arc<dyn LLMProvider>, cache: SharedCache) -> Self {
        let max_sessions = config.web.max_sessions.max(1);
        Self {
            config,
            provider,
            cache,
            sessions: Mutex::new(LruCache::unbounded()),
            max_sessions,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<ChatPipeline>>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Existing session, or a new one under `session_id` (or a fresh id).
    ///
    /// Client-supplied ids must pass [`is_valid_session_id`] since they name
    /// the session's snapshot file.
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
    ) -> Result<(String, Arc<Mutex<ChatPipeline>>)> {
        let mut context = ConversationContext::from_config(&self.config);
        if let Some(id) = session_id {
            if !is_valid_session_id(id) {
                warn!(session = %id.escape_debug(), "Rejected session id");
                return Err(TallyError::InvalidSession(id.to_string()));
            }
            if let Some(existing) = self.get(id).await {
                return Ok((id.to_string(), existing));
            }
            context = context.with_session_id(id)?;
        }
        let id = context.session_id().to_string();

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&id) {
            return Ok((id, Arc::clone(existing)));
        }
        while sessions.len() >= self.max_sessions {
            let Some((old_id, old)) = sessions.pop_lru() else {
                break;
            };
            retire(&old_id, &old);
        }
        let pipeline = Arc::new(Mutex::new(ChatPipeline::new(
            context,
            BudgetTracker::from_config(&self.config),
            Arc::clone(&self.cache),
            Arc::clone(&self.provider),
            self.config.data_dir(),
        )));
        sessions.put(id.clone(), Arc::clone(&pipeline));
        debug!(session = %id, live = sessions.len(), "Session ready");
        Ok((id, pipeline))
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }
}

/// Save an evicted session's conversation. A session with a request in
/// flight is dropped unsaved; its handler still holds the pipeline.
fn retire(session_id: &str, pipeline: &Arc<Mutex<ChatPipeline>>) {
    match pipeline.try_lock() {
        Ok(p) if !p.context().is_empty() => match p.save() {
            Ok(path) => info!(session = %session_id, path = %path.display(), "Evicted idle session"),
            Err(e) => warn!(session = %session_id, "Failed to save evicted session: {}", e),
        },
        Ok(_) => debug!(session = %session_id, "Evicted empty session"),
        Err(_) => warn!(session = %session_id, "Evicted session while a request was in flight"),
    }
}

/// Shared state for all handlers.
pub struct AppState {
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

/// Build the router with all API routes.
pub fn build_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let shared_state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([HeaderName::from_static("content-type")]);

    let api = Router::new()
        .route("/api/chat", post(super::routes::chat))
        .route("/api/status/{session}", get(super::routes::status))
        .route("/api/report/{session}", get(super::routes::report))
        .route("/api/mode", post(super::routes::switch_mode))
        .route("/api/reset", post(super::routes::reset))
        .route("/api/save", post(super::routes::save))
        .route("/api/modes", get(super::routes::modes))
        // Body size limit: 256 KiB.
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    if let Some(dir) = static_dir {
        api.fallback_service(tower_http::services::ServeDir::new(dir))
    } else {
        api
    }
}

/// Bind and serve until the process exits.
pub async fn start_server(
    config: &WebConfig,
    state: AppState,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state, config.static_dir.clone());
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("TallyChat API listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
