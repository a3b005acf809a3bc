//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,session=debug,ielts_backend=debug,tower_http=info,axum=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Targets in use: `ielts_backend` (service), `session` (runner), `content`
//! (authoring) and `upload`. Tower HTTP's TraceLayer adds per-request spans.

use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,session=debug,ielts_backend=debug,tower_http=info,axum=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // json() changes the builder type, so each branch calls init itself.
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    info!(target: "ielts_backend", json, "Tracing initialized");
}
