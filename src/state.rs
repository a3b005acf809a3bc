//! Application state shared by HTTP and WebSocket handlers.
//!
//! This module owns:
//!   - the content store (tests, sections, parts, question groups)
//!   - live runner sessions keyed by id
//!   - the upload store and the submission sink
//!   - the loaded config and the optional OpenAI client

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::assessor::OpenAI;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::seeds::seed_demo_content;
use crate::session::{Phase, Session};
use crate::store::ContentStore;
use crate::submission::SubmissionSink;
use crate::upload::UploadStore;

/// A runner session and when it was last used.
pub struct LiveSession {
    pub session: Session,
    pub touched: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub store: ContentStore,
    pub sessions: Arc<RwLock<HashMap<String, LiveSession>>>,
    /// Live WebSocket connections per session, oldest first. The newest one
    /// drives the session clock.
    pub clocks: Arc<RwLock<HashMap<String, Vec<String>>>>,
    pub uploads: UploadStore,
    pub submissions: SubmissionSink,
    pub openai: Option<OpenAI>,
    pub config: AppConfig,
}

impl AppState {
    /// Build state from config and env: seed demo content, init OpenAI and the webhook.
    #[instrument(level = "info", skip_all)]
    pub async fn new(config: AppConfig) -> Self {
        let store = ContentStore::new();
        if config.seed_demo_content {
            if let Err(e) = seed_demo_content(&store).await {
                error!(target: "ielts_backend", error = %e, "Seeding demo content failed; starting empty");
            }
        }

        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "ielts_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        } else {
            info!(target: "ielts_backend", "OpenAI disabled (no OPENAI_API_KEY). Writing uses word-count feedback.");
        }

        Self {
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clocks: Arc::new(RwLock::new(HashMap::new())),
            uploads: UploadStore::new(&config.uploads),
            submissions: SubmissionSink::from_env(config.session.max_submissions),
            openai,
            config,
        }
    }

    /// State without env lookups or seed content.
    #[cfg(test)]
    pub fn for_tests(config: AppConfig) -> Self {
        Self {
            store: ContentStore::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clocks: Arc::new(RwLock::new(HashMap::new())),
            uploads: UploadStore::new(&config.uploads),
            submissions: SubmissionSink::new(None, config.session.max_submissions),
            openai: None,
            config,
        }
    }

    /// Run `f` against a session under the write lock and mark it as used.
    pub async fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut sessions = self.sessions.write().await;
        let live = sessions.get_mut(id).ok_or_else(|| ApiError::SessionNotFound(id.to_string()))?;
        live.touched = Instant::now();
        f(&mut live.session)
    }

    pub async fn insert_session(&self, s: Session) {
        let live = LiveSession { touched: Instant::now(), session: s };
        self.sessions.write().await.insert(live.session.id.clone(), live);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions unused for longer than their TTL: submitted sessions after
    /// `submitted_ttl_minutes`, any other after `idle_ttl_minutes`. Sessions
    /// with an open WebSocket are kept. Returns how many were removed.
    pub async fn sweep_sessions(&self, now: Instant) -> usize {
        let cfg = &self.config.session;
        let idle = Duration::from_secs(cfg.idle_ttl_minutes.saturating_mul(60));
        let submitted = Duration::from_secs(cfg.submitted_ttl_minutes.saturating_mul(60));
        let connected: Vec<String> = self.clocks.read().await.keys().cloned().collect();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, live| {
            let ttl = if live.session.phase() == Phase::Submitted { submitted } else { idle };
            let keep = connected.contains(id) || now.saturating_duration_since(live.touched) < ttl;
            if !keep {
                debug!(target: "session", session_id = %id, phase = ?live.session.phase(), "Session evicted");
            }
            keep
        });
        before - sessions.len()
    }

    /// Run `sweep_sessions` on the configured interval until the process exits.
    pub fn spawn_session_sweeper(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let every = Duration::from_secs(state.config.session.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = state.sweep_sessions(Instant::now()).await;
                if removed > 0 {
                    info!(target: "session", removed, "Evicted expired sessions");
                }
            }
        });
    }

    /// Make `conn_id` the clock for `session_id`. Earlier connections stay
    /// registered and take the clock back when it is released.
    pub async fn claim_clock(&self, session_id: &str, conn_id: &str) {
        let mut clocks = self.clocks.write().await;
        let conns = clocks.entry(session_id.to_string()).or_default();
        conns.retain(|c| c != conn_id);
        conns.push(conn_id.to_string());
    }

    pub async fn owns_clock(&self, session_id: &str, conn_id: &str) -> bool {
        self.clocks
            .read()
            .await
            .get(session_id)
            .and_then(|conns| conns.last())
            .is_some_and(|c| c == conn_id)
    }

    /// Drop `conn_id`; the newest remaining connection (if any) owns the clock.
    pub async fn release_clock(&self, session_id: &str, conn_id: &str) {
        let mut clocks = self.clocks.write().await;
        if let Some(conns) = clocks.get_mut(session_id) {
            conns.retain(|c| c != conn_id);
            if conns.is_empty() {
                clocks.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Modality, TestMode};
    use crate::session::{PartOutline, SessionConfig, SessionEvent};

    fn session(id: &str) -> Session {
        let parts = vec![PartOutline { part_id: "p1".into(), title: "Part 1".into(), question_numbers: vec![1] }];
        let cfg = SessionConfig {
            test_id: None,
            section_id: "sec".into(),
            modality: Modality::Reading,
            mode: TestMode::Practice,
            timer_seconds: 60,
            audio_urls: Vec::new(),
            scroll_offset_px: 0,
        };
        Session::open(id.into(), parts, cfg).0
    }

    #[tokio::test]
    async fn expired_sessions_are_evicted() {
        let mut config = AppConfig::default();
        config.session.idle_ttl_minutes = 60;
        config.session.submitted_ttl_minutes = 5;
        let state = AppState::for_tests(config);
        for id in ["idle", "done", "open"] {
            state.insert_session(session(id)).await;
        }
        state.with_session("done", |s| Ok(s.apply(SessionEvent::Submit)?)).await.unwrap();
        state.claim_clock("open", "conn").await;

        let now = Instant::now();
        assert_eq!(state.sweep_sessions(now + Duration::from_secs(60)).await, 0);

        // past the submitted TTL only
        assert_eq!(state.sweep_sessions(now + Duration::from_secs(6 * 60)).await, 1);
        assert!(matches!(state.with_session("done", |_| Ok(())).await, Err(ApiError::SessionNotFound(_))));

        // past the idle TTL; the connected session survives
        assert_eq!(state.sweep_sessions(now + Duration::from_secs(61 * 60)).await, 1);
        assert_eq!(state.session_count().await, 1);
        assert!(state.with_session("open", |_| Ok(())).await.is_ok());
    }

    #[tokio::test]
    async fn using_a_session_resets_its_idle_clock() {
        let mut config = AppConfig::default();
        config.session.idle_ttl_minutes = 1;
        let state = AppState::for_tests(config);
        state.insert_session(session("s")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before_use = Instant::now();
        state.with_session("s", |_| Ok(())).await.unwrap();
        // measured from the insert it would be stale, from the last use it is not
        assert_eq!(state.sweep_sessions(before_use + Duration::from_millis(59_990)).await, 0);
        assert_eq!(state.sweep_sessions(before_use + Duration::from_secs(61)).await, 1);
    }
}
