//! WebSocket upgrade + runner loop for one session. Client messages are parsed
//! as JSON and forwarded to core logic. A 1 s interval drives the session
//! clock while the socket is open; it is dropped with the connection.
//!
//! Only the most recent open connection of a session drives its clock, so a
//! second tab does not make the timer run twice as fast. When that tab closes
//! the clock falls back to the next newest one.

use std::{sync::Arc, time::Duration};
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Path, State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::grading::GradeReport;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::{SessionEffect, SessionEvent};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  Path(id): Path<String>,
  State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
  session_snapshot(&state, &id).await?;
  info!(target: "session", session_id = %id, "WebSocket upgrade requested");
  Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, id)))
}

/// Split effects into client messages: timer ticks and submission get their
/// own messages, everything else goes out as one `effects` batch.
fn effect_messages(effects: Vec<SessionEffect>, report: Option<GradeReport>) -> Vec<ServerWsMessage> {
  let mut out = Vec::new();
  let mut rest = Vec::new();
  let mut report = report;
  for e in effects {
    match e {
      SessionEffect::TimerTick { remaining } => out.push(ServerWsMessage::Timer { remaining }),
      SessionEffect::Submitted { reason } => out.push(ServerWsMessage::Submitted { reason, report: report.take() }),
      other => rest.push(other),
    }
  }
  if !rest.is_empty() {
    out.insert(0, ServerWsMessage::Effects { effects: rest });
  }
  out
}

async fn send_all(socket: &mut WebSocket, msgs: Vec<ServerWsMessage>) -> bool {
  for m in msgs {
    let out = serde_json::to_string(&m).unwrap_or_else(|e| {
      serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
    });
    if let Err(e) = socket.send(Message::Text(out)).await {
      error!(target: "session", error = %e, "WS send error");
      return false;
    }
  }
  true
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, id: String) {
  let conn_id = Uuid::new_v4().to_string();
  state.claim_clock(&id, &conn_id).await;
  info!(target: "session", session_id = %id, %conn_id, "WebSocket connected");

  let mut ticker = tokio::time::interval(Duration::from_secs(1));
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // The first tick completes immediately.
  ticker.tick().await;

  if let Ok(snapshot) = session_snapshot(&state, &id).await {
    if !send_all(&mut socket, vec![ServerWsMessage::Snapshot { session: snapshot }]).await {
      state.release_clock(&id, &conn_id).await;
      return;
    }
  }

  loop {
    tokio::select! {
      msg = socket.recv() => {
        let replies = match msg {
          Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(incoming) => {
              debug!(target: "session", session_id = %id, "WS received: {:?}", &incoming);
              handle_client_ws(incoming, &state, &id).await
            }
            Err(e) => vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }],
          },
          Some(Ok(Message::Ping(payload))) => {
            let _ = socket.send(Message::Pong(payload)).await;
            continue;
          }
          Some(Ok(Message::Close(_))) | None => break,
          Some(Err(e)) => {
            error!(target: "session", session_id = %id, error = %e, "WS receive error");
            break;
          }
          Some(Ok(_)) => continue,
        };
        if !send_all(&mut socket, replies).await {
          break;
        }
      }
      _ = ticker.tick() => {
        if !state.owns_clock(&id, &conn_id).await {
          continue;
        }
        match apply_event(&state, &id, SessionEvent::Tick).await {
          Ok((out, report)) => {
            if !send_all(&mut socket, effect_messages(out.effects, report)).await {
              break;
            }
          }
          Err(e) => {
            error!(target: "session", session_id = %id, error = %e, "Clock stopped");
            let _ = send_all(&mut socket, vec![ServerWsMessage::Error { message: e.to_string() }]).await;
            break;
          }
        }
      }
    }
  }

  state.release_clock(&id, &conn_id).await;
  info!(target: "session", session_id = %id, %conn_id, "WebSocket disconnected");
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, id: &str) -> Vec<ServerWsMessage> {
  let result: Result<Vec<ServerWsMessage>, ApiError> = match msg {
    ClientWsMessage::Ping => Ok(vec![ServerWsMessage::Pong]),

    ClientWsMessage::Sync => session_snapshot(state, id).await.map(|s| vec![ServerWsMessage::Snapshot { session: s }]),

    ClientWsMessage::Event { event } => apply_event(state, id, event).await.map(|(out, report)| {
      let mut msgs = effect_messages(out.effects, report);
      msgs.push(ServerWsMessage::Snapshot { session: out.session });
      msgs
    }),

    ClientWsMessage::RenderPart { index } => {
      render_part(state, id, index).await.map(|part| vec![ServerWsMessage::Part { part }])
    }

    ClientWsMessage::AddHighlight { part_id, group_id, text, occurrence } => {
      let input = crate::protocol::HighlightIn { part_id: part_id.clone(), group_id: group_id.clone(), text, occurrence };
      add_highlight(state, id, input)
        .await
        .map(|highlight| vec![ServerWsMessage::HighlightAdded { part_id, group_id, highlight }])
    }

    ClientWsMessage::RemoveHighlight { part_id, group_id, highlight_id } => {
      remove_highlight(state, id, &part_id, group_id.as_deref(), &highlight_id)
        .await
        .map(|_| vec![ServerWsMessage::HighlightRemoved { part_id, group_id, highlight_id }])
    }

    ClientWsMessage::SaveSettings { settings } => save_settings(state, id, settings)
      .await
      .map(|s| vec![ServerWsMessage::Settings { settings: s.settings, css_classes: s.css_classes }]),
  };
  result.unwrap_or_else(|e| vec![ServerWsMessage::Error { message: e.to_string() }])
}
