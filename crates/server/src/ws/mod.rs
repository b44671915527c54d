// WebSocket document sessions (inkwell-session.v1).
//
// Route:
//   GET /v1/buckets/{bucket}/sessions/{*path}   (upgrade)
//
// The session is opened before the upgrade so open failures come back as
// ordinary HTTP errors. One connection owns one session; however the socket
// ends, the session is closed and its lease released.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use inkwell_common::protocol::ws::{ClientMessage, ServerMessage, SESSION_PROTOCOL};
use tracing::{debug, error, info, warn};

use crate::{
    api::{document_key, AppState},
    auth::{Identity, Permission},
    error::{
        current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ApiError,
        ErrorCode,
    },
    session::DocumentSession,
};

const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/v1/buckets/{bucket}/sessions/{*path}", get(session_upgrade))
}

async fn session_upgrade(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    identity.require(Permission::Read)?;
    let key = document_key(&bucket, &path)?;
    let can_write = identity.can(Permission::Write);

    let session = if can_write {
        DocumentSession::open(
            state.locks.clone(),
            state.store.clone(),
            key,
            identity.id.clone(),
            state.session.clone(),
        )
        .await?
    } else {
        DocumentSession::open_read_only(
            state.locks.clone(),
            state.store.clone(),
            key,
            identity.id.clone(),
            state.session.clone(),
        )
        .await?
    };

    let request_id =
        current_request_id().unwrap_or_else(|| request_id_from_headers_or_generate(&headers));
    Ok(ws.protocols([SESSION_PROTOCOL]).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, run_session(session, can_write, socket)).await;
        },
    ))
}

async fn run_session(mut session: DocumentSession, can_write: bool, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_default();
    info!(key = %session.key(), identity = session.identity(), %request_id, "websocket session started");

    let mut mode_rx = session.subscribe();
    let _ = mode_rx.borrow_and_update();

    if send_frame(&mut socket, &opened_frame(&session)).await {
        loop {
            tokio::select! {
                changed = mode_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = mode_rx.borrow_and_update().clone();
                    let Some(reason) = snapshot.reason else {
                        continue;
                    };
                    let frame = ServerMessage::ModeChanged {
                        mode: snapshot.mode,
                        holder: snapshot.holder,
                        reason,
                    };
                    if !send_frame(&mut socket, &frame).await {
                        break;
                    }
                }
                incoming = socket.recv() => {
                    let Some(Ok(message)) = incoming else {
                        break;
                    };
                    let raw = match message {
                        Message::Text(raw) => raw,
                        Message::Close(_) => break,
                        Message::Binary(_) => {
                            let frame = error_frame(ApiError::new(
                                ErrorCode::ValidationFailed,
                                "binary frames are not supported",
                            ));
                            if !send_frame(&mut socket, &frame).await {
                                break;
                            }
                            continue;
                        }
                        Message::Ping(_) | Message::Pong(_) => continue,
                    };

                    let frame = match serde_json::from_str::<ClientMessage>(raw.as_str()) {
                        Ok(ClientMessage::Close) => {
                            let _ = send_frame(&mut socket, &ServerMessage::Closed).await;
                            break;
                        }
                        Ok(frame) => handle_frame(&mut session, can_write, frame).await,
                        Err(parse_error) => {
                            debug!(error = %parse_error, "unparsable session frame");
                            error_frame(ApiError::new(
                                ErrorCode::ValidationFailed,
                                format!("invalid session frame: {parse_error}"),
                            ))
                        }
                    };
                    if matches!(frame, ServerMessage::Opened { .. }) {
                        // The opened frame already reports the new mode.
                        let _ = mode_rx.borrow_and_update();
                    }
                    if !send_frame(&mut socket, &frame).await {
                        break;
                    }
                }
            }
        }
    }

    if let Err(close_error) = session.close().await {
        warn!(key = %session.key(), error = %close_error, "failed to close document session");
    }
    info!(key = %session.key(), identity = session.identity(), %request_id, "websocket session ended");
}

async fn handle_frame(
    session: &mut DocumentSession,
    can_write: bool,
    frame: ClientMessage,
) -> ServerMessage {
    match frame {
        ClientMessage::Save { .. } | ClientMessage::Reacquire if !can_write => {
            error_frame(ApiError::from_code(ErrorCode::AuthForbidden))
        }
        ClientMessage::Save { content } => match session.save(&content).await {
            Ok(version) => ServerMessage::Saved { version },
            Err(session_error) => error_frame(session_error.into()),
        },
        ClientMessage::Compare { from, to } => {
            match session.compare(from.as_deref(), to.as_deref()).await {
                Ok(comparison) => {
                    ServerMessage::Comparison { from: comparison.from, to: comparison.to }
                }
                Err(session_error) => error_frame(session_error.into()),
            }
        }
        ClientMessage::Reacquire => match session.reacquire().await {
            Ok(()) => opened_frame(session),
            Err(session_error) => error_frame(session_error.into()),
        },
        ClientMessage::Close => ServerMessage::Closed,
    }
}

fn opened_frame(session: &DocumentSession) -> ServerMessage {
    let snapshot = session.mode();
    let baseline = session.baseline();
    ServerMessage::Opened {
        mode: snapshot.mode,
        holder: snapshot.holder,
        content: baseline.extraction.text.clone(),
        field_key: baseline.extraction.field_key().map(ToOwned::to_owned),
        selection: baseline.extraction.selection_kind(),
        version: baseline.version.clone(),
    }
}

fn error_frame(error: ApiError) -> ServerMessage {
    ServerMessage::Error {
        code: error.code().as_str().to_string(),
        message: error.message().to_string(),
        retryable: error.code().retryable(),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerMessage) -> bool {
    let encoded = match serde_json::to_string(frame) {
        Ok(encoded) => encoded,
        Err(encode_error) => {
            error!(error = %encode_error, "failed to encode session frame");
            return false;
        }
    };
    socket.send(Message::Text(encoded.into())).await.is_ok()
}
