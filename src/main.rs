//! IELTS Test Builder & Runner backend
//!
//! - Axum HTTP API for authoring tests, sections, parts and question groups
//! - Runner sessions over HTTP and WebSocket (timers, audio, navigation, highlights)
//! - Optional OpenAI writing assessment (via environment variables)
//! - Uploaded files under /files, static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   IELTS_CONFIG_PATH  : path to TOML config (limits, timers, prompts)
//!   OPENAI_API_KEY     : enables model-based writing assessment if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_MODEL       : default "gpt-4o-mini"
//!   SUBMIT_WEBHOOK_URL : receives each submission as JSON
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod accessibility;
mod assessor;
mod config;
mod domain;
mod error;
mod grading;
mod highlight;
mod logic;
mod pagination;
mod protocol;
mod questions;
mod routes;
mod seeds;
mod session;
mod state;
mod store;
mod submission;
mod telemetry;
mod upload;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = AppConfig::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

  // Shared state: content store, sessions, uploads, OpenAI client.
  let state = Arc::new(AppState::new(config).await);
  tokio::fs::create_dir_all(state.uploads.dir()).await?;
  state.spawn_session_sweeper();

  let app = build_router(state.clone());

  let listener = TcpListener::bind(addr).await?;
  info!(target: "ielts_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "ielts_backend", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
