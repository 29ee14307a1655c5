//! Axum server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the Axum adapter. The default wiring uses the in-memory session
//! directory and the deterministic mock speech adapter; a production
//! deployment swaps those for its identity service, call store, and
//! provider-backed `SpeechAdapter` here and nowhere else.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use voxbridge_core::{
    CallAuthorizer, CallSession, CallSettings, InMemorySessionRepository, SessionRepository,
    StaticTokenAuthorizer, UserId,
};
use voxbridge_speech::{MockSpeechAdapter, SpeechAdapter, TtsCache};

use crate::hub::CallHub;

/// Cross-origin policy for the HTTP/WebSocket surface.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Accept any origin. The right default while a local web client is
    /// being developed against the server.
    #[default]
    AllowAll,
    /// Accept only the listed origins; everything else is refused at the
    /// CORS layer.
    AllowOrigins(Vec<String>),
}

/// Server configuration for the Axum adapter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP/WebSocket server.
    pub port: u16,
    /// Pipeline and session tunables.
    pub settings: CallSettings,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl ServerConfig {
    /// Create config with default port and settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            port: 8090,
            settings: CallSettings::default(),
            cors: CorsConfig::default(),
        }
    }

    /// Override the pipeline settings.
    #[must_use]
    pub fn with_settings(mut self, settings: CallSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set CORS to allow specific origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// Call setup front desk: creates sessions and issues per-participant
/// tokens against the in-memory repository and token authorizer.
///
/// Stands in for the external call-setup collaborator so the server (and
/// the test suites) are drivable end to end.
pub struct CallDirectory {
    repository: Arc<InMemorySessionRepository>,
    tokens: Arc<StaticTokenAuthorizer>,
}

impl Default for CallDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl CallDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            repository: Arc::new(InMemorySessionRepository::new()),
            tokens: Arc::new(StaticTokenAuthorizer::new()),
        }
    }

    /// The repository handle the hub reads and writes through.
    #[must_use]
    pub fn repository(&self) -> Arc<dyn SessionRepository> {
        Arc::clone(&self.repository) as Arc<dyn SessionRepository>
    }

    /// The authorizer handle admission authenticates against.
    #[must_use]
    pub fn authorizer(&self) -> Arc<dyn CallAuthorizer> {
        Arc::clone(&self.tokens) as Arc<dyn CallAuthorizer>
    }

    /// Store a new session and issue one token per participant.
    pub async fn register(&self, session: CallSession) -> Vec<(UserId, String)> {
        let mut credentials = Vec::with_capacity(session.participants().len());
        for participant in session.participants() {
            let token = uuid::Uuid::new_v4().to_string();
            self.tokens
                .register(token.clone(), participant.user_id.clone())
                .await;
            credentials.push((participant.user_id.clone(), token));
        }
        self.repository.insert(session).await;
        credentials
    }

    /// Stored session count (any state).
    pub async fn session_count(&self) -> usize {
        self.repository.len().await
    }
}

/// Application context for the Axum adapter.
///
/// This struct holds all initialized services for the call server.
pub struct AxumContext {
    /// Pipeline and session tunables.
    pub settings: CallSettings,
    /// Call metadata persistence port.
    pub repository: Arc<dyn SessionRepository>,
    /// Admission authentication port.
    pub authorizer: Arc<dyn CallAuthorizer>,
    /// Speech provider seam (STT/MT/TTS).
    pub adapter: Arc<dyn SpeechAdapter>,
    /// Registry of live call hubs.
    pub hub: CallHub,
    /// Call setup front desk backing the `POST /api/calls` endpoint.
    pub directory: Arc<CallDirectory>,
}

/// Bootstrap the server with the default (in-memory + mock) wiring.
pub fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    voxbridge_core::metrics::describe_all();

    let directory = Arc::new(CallDirectory::new());
    let repository = directory.repository();
    let authorizer = directory.authorizer();

    let adapter: Arc<dyn SpeechAdapter> = Arc::new(MockSpeechAdapter::new());
    let cache = Arc::new(TtsCache::new(
        Arc::clone(&adapter),
        config.settings.tts_cache_capacity,
        Duration::from_millis(config.settings.synthesize_timeout_ms),
    ));
    let hub = CallHub::new(
        Arc::clone(&repository),
        Arc::clone(&adapter),
        cache,
        config.settings.clone(),
    );

    Ok(AxumContext {
        settings: config.settings.clone(),
        repository,
        authorizer,
        adapter,
        hub,
        directory,
    })
}

/// Start the call server on the configured port.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;
    use tracing::info;

    let ctx = Arc::new(bootstrap(&config)?);
    let app = crate::routes::create_router(ctx, &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("voxbridge call server listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
