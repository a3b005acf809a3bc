//! Where finished sessions go: a bounded in-memory log keyed by session id,
//! plus an optional webhook (`SUBMIT_WEBHOOK_URL`) that receives each
//! submission as JSON.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

use crate::grading::GradeReport;
use crate::session::SubmitReason;

#[derive(Clone, Debug, Serialize)]
pub struct Submission {
  pub session_id: String,
  pub test_id: Option<String>,
  pub section_id: String,
  pub reason: SubmitReason,
  pub answers: BTreeMap<u32, String>,
  pub essays: HashMap<String, String>,
  /// Absent for writing sections.
  pub report: Option<GradeReport>,
}

#[derive(Clone)]
struct Webhook {
  client: reqwest::Client,
  url: String,
}

#[derive(Default)]
struct Log {
  by_session: HashMap<String, Submission>,
  // insertion order, oldest first
  order: VecDeque<String>,
}

#[derive(Clone)]
pub struct SubmissionSink {
  log: Arc<RwLock<Log>>,
  capacity: usize,
  webhook: Option<Webhook>,
}

impl SubmissionSink {
  pub fn new(webhook_url: Option<String>, capacity: usize) -> Self {
    let webhook = webhook_url
      .filter(|u| !u.trim().is_empty())
      .and_then(|url| {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().ok()?;
        Some(Webhook { client, url })
      });
    Self { log: Arc::new(RwLock::new(Log::default())), capacity: capacity.max(1), webhook }
  }

  /// Reads SUBMIT_WEBHOOK_URL.
  pub fn from_env(capacity: usize) -> Self {
    let sink = Self::new(std::env::var("SUBMIT_WEBHOOK_URL").ok(), capacity);
    if let Some(w) = &sink.webhook {
      info!(target: "ielts_backend", url = %w.url, "Submission webhook enabled");
    }
    sink
  }

  /// Record a submission, dropping the oldest ones beyond capacity. The
  /// webhook is posted from a background task.
  #[instrument(level = "info", skip(self, s), fields(session_id = %s.session_id, reason = ?s.reason))]
  pub async fn record(&self, s: Submission) {
    {
      let mut log = self.log.write().await;
      if log.by_session.insert(s.session_id.clone(), s.clone()).is_none() {
        log.order.push_back(s.session_id.clone());
      }
      while log.order.len() > self.capacity {
        if let Some(old) = log.order.pop_front() {
          log.by_session.remove(&old);
          debug!(target: "session", session_id = %old, "Submission evicted from memory");
        }
      }
    }
    info!(target: "session", session_id = %s.session_id, answered = s.answers.len(), "Submission recorded");
    if let Some(w) = self.webhook.clone() {
      tokio::spawn(async move {
        if let Err(e) = post_webhook(&w, &s).await {
          error!(target: "ielts_backend", session_id = %s.session_id, error = %e, "Submission webhook failed");
        }
      });
    }
  }

  pub async fn for_session(&self, session_id: &str) -> Option<Submission> {
    self.log.read().await.by_session.get(session_id).cloned()
  }

  pub async fn len(&self) -> usize {
    self.log.read().await.order.len()
  }
}

async fn post_webhook(w: &Webhook, s: &Submission) -> Result<(), String> {
  let res = w.client.post(&w.url).json(s).send().await.map_err(|e| e.to_string())?;
  if !res.status().is_success() {
    return Err(format!("webhook HTTP {}", res.status()));
  }
  Ok(())
}
