//! Gateway shared state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use voxrelay_core::config::Config;
use voxrelay_media::{Archive, Synthesizer, Transcriber};
use voxrelay_providers::Generator;

/// Model handles shared by every session. Built once at startup and only
/// ever read afterwards.
#[derive(Clone)]
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    /// `None` when speech synthesis is disabled for this process.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
}

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub engines: Engines,
    pub archive: Archive,
    pub scratch_dir: PathBuf,
    pub default_voice: String,
    pub sessions: RwLock<HashMap<String, SessionInfo>>,
    /// Turns started across all sessions, live ones included.
    pub turns_total: Arc<AtomicU64>,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Registry entry for a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, engines: Engines) -> Self {
        let archive = Archive::new(config.archive_dir());
        let scratch_dir = config.scratch_dir();
        let default_voice = config.tts().default_voice;

        Self {
            config,
            engines,
            archive,
            scratch_dir,
            default_voice,
            sessions: RwLock::new(HashMap::new()),
            turns_total: Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub fn tts_enabled(&self) -> bool {
        self.engines.synthesizer.is_some()
    }

    pub async fn register_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                connected_at: Utc::now(),
            },
        );
    }

    pub async fn deregister_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn turns_total(&self) -> u64 {
        self.turns_total.load(Ordering::SeqCst)
    }
}
