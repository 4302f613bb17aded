//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, opens a `Session` and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Room and directory frames queued on the session channel → forward
//!
//! Handler functions translate a request into a session call and return an
//! `Outcome`. Fan-out to other members happens inside the sync service under
//! the room lock, so the dispatch layer only ever replies to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id` and the directory
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch turns the Outcome into a `done` reply (or an `error`)
//! 4. Close or transport error → `Session::disconnect` (implicit leave)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status, to_data};
use crate::services::broadcast;
use crate::services::session::Session;
use crate::services::sync::{self, SyncError, TrackInput};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    let mut session = Session::connect(&state, client_tx).await;

    let welcome = welcome_frame(&state, session.connection_id()).await;
    if send_frame(&mut socket, &welcome).await.is_ok() {
        info!(client_id = %session.connection_id(), "ws: client connected");
        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(msg) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            dispatch_frame(&state, &mut socket, &mut session, &text).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Every exit path lands here, so an abrupt drop still leaves the room.
    let client_id = session.connection_id();
    let room_id = session.room_id().map(str::to_owned);
    session.disconnect(&state).await;
    info!(%client_id, ?room_id, "ws: client disconnected");
}

async fn welcome_frame(state: &AppState, client_id: Uuid) -> Frame {
    let rooms = state.registry.summaries().await;
    let mut data = broadcast::directory_data(&rooms);
    data.insert("client_id".into(), serde_json::json!(client_id));
    data.insert("check_interval_ms".into(), serde_json::json!(state.config.sync_interval_ms));
    data.insert("drift_threshold_ms".into(), serde_json::json!(state.config.drift_threshold_ms));
    Frame::request("session:connected", data)
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

async fn dispatch_frame(state: &AppState, socket: &mut WebSocket, session: &mut Session, text: &str) {
    let sender_frames = process_inbound_text(state, session, text).await;
    for frame in sender_frames {
        let _ = send_frame(socket, &frame).await;
    }
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch with a bare
/// session and inspect both the reply and the fan-out channels.
async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    let client_id = session.connection_id();
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // The connection is the identity; never trust a client-supplied `from`.
    let req = req.with_from(client_id.to_string());
    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "room" => handle_room(state, session, &req).await,
        "sync" => handle_sync(state, session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let fail = |e: SyncError| req.error_from(&e);

    match req.op() {
        "join" => {
            let Some(room_id) = requested_room_id(req) else {
                return Err(fail(SyncError::InvalidRoomId));
            };
            let snapshot = session.join(state, room_id).await.map_err(fail)?;
            Ok(Outcome::Reply(to_data(&snapshot)))
        }
        "leave" => {
            let left = session.leave(state).await;
            let mut data = Data::new();
            data.insert("left".into(), serde_json::json!(left));
            Ok(Outcome::Reply(data))
        }
        "enqueue" => {
            let Some(raw) = req.data.get("track") else {
                return Err(fail(SyncError::InvalidTrack("track required".into())));
            };
            let input: TrackInput =
                serde_json::from_value(raw.clone()).map_err(|e| fail(SyncError::InvalidTrack(e.to_string())))?;
            let track = input.into_track(state.clock.now_ms()).map_err(fail)?;
            match session.enqueue(state, track).await.map_err(fail)? {
                Some(snapshot) => Ok(Outcome::Reply(to_data(&snapshot))),
                None => Ok(Outcome::Done),
            }
        }
        "vote_skip" => match session.vote_skip(state).await.map_err(fail)? {
            Some(outcome) => Ok(Outcome::Reply(to_data(&outcome))),
            None => Ok(Outcome::Done),
        },
        "track_ended" => {
            let track_id = match req.data.get("track_id") {
                None | Some(serde_json::Value::Null) => None,
                Some(v) => match v.as_str().and_then(|s| s.parse::<Uuid>().ok()) {
                    Some(id) => Some(id),
                    None => return Err(req.error("invalid track_id")),
                },
            };
            let advanced = session.track_ended(state, track_id).await.map_err(fail)?;
            let mut data = Data::new();
            data.insert("advanced".into(), serde_json::json!(advanced));
            Ok(Outcome::Reply(data))
        }
        "state" => {
            let room_id = match requested_room_id(req) {
                Some(room_id) => sync::normalize_room_id(room_id).map_err(fail)?,
                None => session.joined_room().map_err(fail)?,
            };
            match sync::room_state(state, room_id).await {
                Some(snapshot) => Ok(Outcome::Reply(to_data(&snapshot))),
                None => Ok(Outcome::Done),
            }
        }
        "list" => {
            let rooms = state.registry.summaries().await;
            Ok(Outcome::Reply(broadcast::directory_data(&rooms)))
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

/// Room id from the envelope, falling back to `data.room_id`.
fn requested_room_id(req: &Frame) -> Option<&str> {
    req.room_id
        .as_deref()
        .or_else(|| req.data.get("room_id").and_then(|v| v.as_str()))
}

// =============================================================================
// SYNC HANDLERS
// =============================================================================

async fn handle_sync(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let fail = |e: SyncError| req.error_from(&e);

    match req.op() {
        "check" => {
            let room_id = session.joined_room().map_err(fail)?;
            let Some(raw_position) = req.data.get("position_ms") else {
                return Err(req.error("position_ms required"));
            };
            let Some(position_ms) = player_position_ms(raw_position) else {
                return Err(req.error("position_ms must be a non-negative number"));
            };
            let duration_ms = req
                .data
                .get("duration_ms")
                .and_then(serde_json::Value::as_u64)
                .filter(|ms| *ms > 0);
            let report = sync::check_drift(state, room_id, position_ms, duration_ms)
                .await
                .map_err(fail)?;
            Ok(Outcome::Reply(to_data(&report)))
        }
        op => Err(req.error(format!("unknown sync op: {op}"))),
    }
}

/// Player position in whole milliseconds. Players report fractional
/// positions (`currentTime * 1000`); negative and non-finite values are
/// rejected.
fn player_position_ms(value: &serde_json::Value) -> Option<i64> {
    let ms = value.as_f64().filter(|ms| ms.is_finite() && *ms >= 0.0)?;
    // Float-to-int `as` saturates at i64::MAX.
    #[allow(clippy::cast_possible_truncation)]
    Some(ms.round() as i64)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall == broadcast::SYSCALL_TICK {
        debug!(id = %frame.id, room_id = ?frame.room_id, "ws: send tick");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
