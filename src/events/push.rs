use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    events::{JobKind, SessionEvent},
    session::{SessionRegistry, handle::SessionState},
};

const OUTBOUND_CAPACITY: usize = 64;

/// Request frame accepted on the push socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Echoed back in the response when present.
    #[serde(default)]
    pub id: Option<Value>,
    pub op: PushOp,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushOp {
    Connect,
    Logout,
}

/// Reply to a [`PushRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResponse {
    pub fn ok(id: Option<Value>) -> Self {
        Self {
            id,
            success: true,
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Identity summary in the shape desktop clients expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub phone: String,
}

/// Event frame pushed to socket subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PushEvent {
    Qr {
        user_id: String,
        qr: String,
    },
    Status {
        user_id: String,
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<ConnectionInfo>,
    },
    LoggedOut {
        user_id: String,
    },
    Error {
        user_id: String,
        message: String,
    },
    Progress {
        user_id: String,
        job: JobKind,
        percent: u8,
    },
}

impl PushEvent {
    /// Maps a session event to its push frame; some events are internal only.
    pub fn from_session_event(event: &SessionEvent) -> Option<Self> {
        let frame = match event {
            SessionEvent::Qr { user_id, qr } => Self::Qr {
                user_id: user_id.clone(),
                qr: qr.clone(),
            },
            SessionEvent::StatusChanged {
                user_id,
                state,
                identity,
            } => {
                let status = match state {
                    SessionState::Connected => "connected",
                    SessionState::Idle | SessionState::Initializing | SessionState::LoggedOut => {
                        "disconnected"
                    }
                    SessionState::AwaitingScan | SessionState::Closing => return None,
                };
                Self::Status {
                    user_id: user_id.clone(),
                    status,
                    info: identity.as_ref().map(|identity| ConnectionInfo {
                        name: identity.display_name.clone(),
                        phone: identity.external_address.clone(),
                    }),
                }
            }
            SessionEvent::Error { user_id, message } => Self::Error {
                user_id: user_id.clone(),
                message: message.clone(),
            },
            SessionEvent::LoggedOut { user_id } => Self::LoggedOut {
                user_id: user_id.clone(),
            },
            SessionEvent::ReconnectScheduled { .. } => return None,
            SessionEvent::JobProgress {
                user_id,
                job,
                percent,
                ..
            } => Self::Progress {
                user_id: user_id.clone(),
                job: *job,
                percent: *percent,
            },
        };
        Some(frame)
    }
}

/// Executes one push request against the registry.
pub async fn handle_request(registry: &SessionRegistry, request: PushRequest) -> PushResponse {
    let result = match request.op {
        PushOp::Connect => registry.request_connect(&request.user_id).await,
        PushOp::Logout => registry.request_logout(&request.user_id).await,
    };

    match result {
        Ok(()) => PushResponse::ok(request.id),
        Err(error) => {
            tracing::warn!(user_id = %request.user_id, op = ?request.op, error = %error, "push request failed");
            PushResponse::failure(request.id, error.to_string())
        }
    }
}

/// Drives one upgraded push socket until either side goes away.
///
/// All outbound frames go through a single writer so events for one user
/// reach the socket in emission order.
pub async fn serve_socket(registry: SessionRegistry, socket: WebSocket, user_filter: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut subscription = registry.events().subscribe(user_filter.as_deref());
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(frame) = PushEvent::from_session_event(&event) else {
                continue;
            };
            match serde_json::to_string(&frame) {
                Ok(payload) => {
                    if event_tx.send(payload).await.is_err() {
                        break;
                    }
                }
                Err(error) => tracing::warn!(error = %error, "failed to encode push event"),
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let response_tx = out_tx.clone();
        match serde_json::from_str::<PushRequest>(&text) {
            Ok(request) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let response = handle_request(&registry, request).await;
                    send_response(&response_tx, &response).await;
                });
            }
            Err(error) => {
                let response = PushResponse::failure(None, format!("invalid request: {error}"));
                send_response(&response_tx, &response).await;
            }
        }
    }

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    tracing::debug!("push socket closed");
}

async fn send_response(tx: &mpsc::Sender<String>, response: &PushResponse) {
    match serde_json::to_string(response) {
        Ok(payload) => {
            let _ = tx.send(payload).await;
        }
        Err(error) => tracing::warn!(error = %error, "failed to encode push response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wa::auth::SessionIdentity;

    #[test]
    fn connected_status_carries_identity() {
        let event = SessionEvent::StatusChanged {
            user_id: "u1".to_owned(),
            state: SessionState::Connected,
            identity: Some(SessionIdentity {
                display_name: "Ana".to_owned(),
                external_address: "5511999990000".to_owned(),
            }),
        };

        let frame = PushEvent::from_session_event(&event).expect("frame");
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["event"], "status");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["status"], "connected");
        assert_eq!(json["info"]["phone"], "5511999990000");
    }

    #[test]
    fn reconnect_scheduling_is_not_pushed() {
        let event = SessionEvent::ReconnectScheduled {
            user_id: "u1".to_owned(),
            delay_ms: 5000,
        };
        assert!(PushEvent::from_session_event(&event).is_none());
    }

    #[test]
    fn parses_request_frames() {
        let request: PushRequest =
            serde_json::from_str(r#"{"id":7,"op":"logout","userId":"u1"}"#).expect("parse");
        assert_eq!(request.op, PushOp::Logout);
        assert_eq!(request.id, Some(Value::from(7)));

        let failure = PushResponse::failure(request.id, "boom");
        let json = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(json, serde_json::json!({"id": 7, "success": false, "error": "boom"}));
    }
}
