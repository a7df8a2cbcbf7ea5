//! # Batch Events WebSocket
//!
//! Live feed of batch events at `/ws/events`, plus a small command channel so
//! a UI can drive the gate without extra HTTP round trips.
//!
//! ## Protocol:
//! 1. **Connection**: client connects; it receives every [`BatchEvent`] emitted
//!    from then on, serialized as JSON with a `type` tag
//! 2. **Commands**: client may send JSON [`ClientCommand`]s (cancel, cancel_item,
//!    confirm, status, ping)
//! 3. **Replies**: each command gets one [`ServerReply`]
//! 4. **Heartbeat**: the server pings every 30s and drops clients silent for 60s
//!
//! Closing the socket never affects the run. A pending confirmation stays
//! pending until someone resolves it or cancels the batch.

use crate::batch::{BatchEvent, BatchStatus, Decision};
use crate::error::BatchError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Commands a client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Cancel,
    CancelItem { index: usize },
    Confirm { decision: Decision, path: PathBuf, text: String },
    Status,
    Ping { timestamp: u64 },
}

impl ClientCommand {
    fn name(&self) -> &'static str {
        match self {
            ClientCommand::Cancel => "cancel",
            ClientCommand::CancelItem { .. } => "cancel_item",
            ClientCommand::Confirm { .. } => "confirm",
            ClientCommand::Status => "status",
            ClientCommand::Ping { .. } => "ping",
        }
    }
}

/// Replies to client commands. Batch events are sent as-is, not wrapped.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    Ack { command: String, accepted: bool, index: Option<usize> },
    Rejected { command: String, message: String },
    Status { status: serde_json::Value },
    Pong { timestamp: u64 },
}

/// One websocket observer.
pub struct EventsWebSocket {
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl EventsWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self { state, last_heartbeat: Instant::now() }
    }

    fn send<T: Serialize>(ctx: &mut ws::WebsocketContext<Self>, message: &T) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize websocket message: {}", e),
        }
    }

    fn handle_command(&self, command: ClientCommand) -> ServerReply {
        let name = command.name().to_string();
        let orchestrator = &self.state.orchestrator;

        let outcome: Result<ServerReply, BatchError> = match command {
            ClientCommand::Cancel => Ok(ServerReply::Ack {
                command: name.clone(),
                accepted: orchestrator.cancel(),
                index: None,
            }),
            ClientCommand::CancelItem { index } => orchestrator
                .cancel_item(index)
                .map(|_| ServerReply::Ack { command: name.clone(), accepted: true, index: Some(index) }),
            ClientCommand::Confirm { decision, path, text } => orchestrator
                .confirm_and_continue(decision, path, text)
                .map(|index| ServerReply::Ack { command: name.clone(), accepted: true, index: Some(index) }),
            ClientCommand::Status => Ok(status_reply(orchestrator.status())),
            ClientCommand::Ping { timestamp } => Ok(ServerReply::Pong { timestamp }),
        };

        outcome.unwrap_or_else(|e| {
            debug!(command = %name, error = %e, "Websocket command rejected");
            ServerReply::Rejected { command: name, message: e.to_string() }
        })
    }
}

fn status_reply(status: BatchStatus) -> ServerReply {
    ServerReply::Status {
        status: serde_json::to_value(status).unwrap_or(serde_json::Value::Null),
    }
}

impl Actor for EventsWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Events websocket connected");
        self.state.increment_active_observers();

        let events = BroadcastStream::new(self.state.orchestrator.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "Websocket observer fell behind, events dropped");
                    None
                }
            }
        });
        ctx.add_stream(events);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Websocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Events websocket disconnected");
        self.state.decrement_active_observers();
    }
}

/// Batch events flowing out to the client.
impl StreamHandler<BatchEvent> for EventsWebSocket {
    fn handle(&mut self, event: BatchEvent, ctx: &mut Self::Context) {
        Self::send(ctx, &event);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Batch event stream ended");
    }
}

/// Frames coming in from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventsWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                let reply = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => self.handle_command(command),
                    Err(e) => ServerReply::Rejected {
                        command: "unknown".to_string(),
                        message: format!("Invalid command: {}", e),
                    },
                };
                Self::send(ctx, &reply);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Ignoring binary websocket frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Websocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Websocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/events`: upgrade to the events websocket.
pub async fn events_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New websocket connection from: {:?}", req.connection_info().peer_addr());
    ws::start(EventsWebSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_command_parsing() {
        let command: ClientCommand = serde_json::from_str(
            r#"{"type":"confirm","decision":"save_and_stop","path":"/m/a.mp3","text":"hi"}"#,
        )
        .unwrap();
        match command {
            ClientCommand::Confirm { decision, path, text } => {
                assert_eq!(decision, Decision::SaveAndStop);
                assert_eq!(path, PathBuf::from("/m/a.mp3"));
                assert_eq!(text, "hi");
            }
            other => panic!("Wrong command: {:?}", other),
        }

        let command: ClientCommand = serde_json::from_str(r#"{"type":"cancel_item","index":2}"#).unwrap();
        assert_eq!(command.name(), "cancel_item");
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_rejected_reply_format() {
        let reply = ServerReply::Rejected {
            command: "confirm".to_string(),
            message: BatchError::NoPendingConfirmation.to_string(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["command"], "confirm");
    }
}
