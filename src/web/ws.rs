//! WebSocket signaling endpoint at `/ws/signaling`
//!
//! One WebSocket connection maps to one headset session. The socket carries
//! the offer/answer exchange and trickled candidates; when it drops, the
//! session is closed and removed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::webrtc::signaling::{ClientSignal, ServerSignal, SignalingError};
use crate::webrtc::{ManagedSession, TeleopSession};

/// WebSocket upgrade handler
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let session = match state.sessions.create_session().await {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejecting signaling client: {}", e);
            let reply = ServerSignal::Error(SignalingError::unavailable()).to_json();
            let _ = sender.send(Message::Text(reply)).await;
            let _ = sender.close().await;
            return;
        }
    };
    let session_id = session.session_id.clone();
    let mut state_rx = session.state_watch();

    info!("Signaling client connected (session {})", session_id);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_signal_text(&session, &text).await {
                            if sender.send(Message::Text(reply)).await.is_err() {
                                warn!("Failed to send signaling reply, disconnecting");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary signaling frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling client disconnected (session {})", session_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Signaling receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            changed = state_rx.changed() => {
                if changed.is_err() || state_rx.borrow().is_terminal() {
                    debug!("Session {} transport ended, closing signaling socket", session_id);
                    let _ = sender.close().await;
                    break;
                }
            }

            _ = state.shutdown.cancelled() => {
                let _ = sender.close().await;
                break;
            }
        }
    }

    if let Err(e) = state.sessions.close_session(&session_id).await {
        warn!("Error closing session {}: {}", session_id, e);
    }
}

/// Apply one signaling text frame to `session`, returning the reply to send.
///
/// Malformed input is logged and dropped; the connection stays open.
pub(crate) async fn handle_signal_text(session: &TeleopSession, text: &str) -> Option<String> {
    let signal = match ClientSignal::parse(text) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("Dropping signaling message: {}", e);
            return None;
        }
    };

    match signal {
        ClientSignal::Offer(offer) => match session.handle_offer(offer).await {
            Ok(answer) => {
                info!("Session {} answered offer", session.session_id);
                Some(ServerSignal::Answer(answer).to_json())
            }
            Err(e) => {
                warn!("Session {} offer failed: {}", session.session_id, e);
                Some(ServerSignal::Error(SignalingError::invalid_offer(e)).to_json())
            }
        },
        ClientSignal::Candidate(candidate) => {
            if let Err(e) = session.add_ice_candidate(candidate).await {
                warn!("Session {} dropping candidate: {}", session.session_id, e);
            }
            None
        }
        ClientSignal::Other(kind) => {
            debug!("Ignoring signaling message type {:?}", kind);
            None
        }
    }
}
