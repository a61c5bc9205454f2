//! Discord Gateway
//!
//! Websocket session that delivers `MESSAGE_CREATE` events to the relay.
//! Handles hello/identify, heartbeats with ack tracking, and reconnects
//! after server-requested or dropped sessions.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::transport::IncomingMessage;

/// Discord gateway URL
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close code sent for a rejected token.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Gateway error
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(#[from] tungstenite::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Authentication failed")]
    Authentication,
}

/// Raw gateway frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Events forwarded to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready { user_id: String },
    MessageCreate(IncomingMessage),
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Discord gateway client
#[derive(Debug, Clone)]
pub struct Gateway {
    token: String,
    intents: u32,
    url: String,
}

impl Gateway {
    pub fn new(token: impl Into<String>, intents: u32) -> Self {
        Self {
            token: token.into(),
            intents,
            url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }

    /// Set a custom gateway URL (e.g., for testing).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Run sessions until shutdown, the event receiver closes, or the
    /// token is rejected.
    pub async fn run(
        &self,
        events: mpsc::Sender<GatewayEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        loop {
            if *shutdown.borrow() || events.is_closed() {
                return Ok(());
            }

            match self.session(&events, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::Reconnect) => info!("Gateway session ended, reconnecting"),
                Err(GatewayError::Authentication) => return Err(GatewayError::Authentication),
                Err(e) => warn!(error = %e, "Gateway session failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn session(
        &self,
        events: &mpsc::Sender<GatewayEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    break serde_json::from_str::<GatewayPayload>(text.as_str())?
                }
                Some(Ok(Message::Close(frame))) => return close_outcome(frame),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::Reconnect),
            }
        };
        if hello.op != OP_HELLO {
            return Err(GatewayError::Protocol(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }
        let interval_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .ok_or_else(|| GatewayError::Protocol("hello without heartbeat_interval".into()))?;
        debug!(interval_ms, "Gateway hello");

        send_json(&mut sink, &identify_payload(&self.token, self.intents)).await?;

        let period = Duration::from_millis(interval_ms.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut sequence: Option<u64> = None;
        let mut acked = true;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = heartbeat.tick() => {
                    if !acked {
                        warn!("Heartbeat not acknowledged");
                        return Ok(SessionEnd::Reconnect);
                    }
                    acked = false;
                    send_json(&mut sink, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let payload: GatewayPayload = serde_json::from_str(text.as_str())?;
                        if payload.s.is_some() {
                            sequence = payload.s;
                        }
                        match payload.op {
                            OP_DISPATCH => {
                                if let Some(event) = dispatch_event(&payload) {
                                    if events.send(event).await.is_err() {
                                        return Ok(SessionEnd::Shutdown);
                                    }
                                }
                            }
                            OP_HEARTBEAT => {
                                send_json(&mut sink, &json!({ "op": OP_HEARTBEAT, "d": sequence })).await?;
                            }
                            OP_HEARTBEAT_ACK => acked = true,
                            OP_RECONNECT | OP_INVALID_SESSION => {
                                info!(op = payload.op, "Gateway requested a new session");
                                return Ok(SessionEnd::Reconnect);
                            }
                            op => debug!(op, "Ignoring gateway op"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => return close_outcome(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Reconnect),
                },
            }
        }
    }
}

fn close_outcome(
    frame: Option<tungstenite::protocol::CloseFrame>,
) -> Result<SessionEnd, GatewayError> {
    let code = frame.map(|f| u16::from(f.code));
    if code == Some(CLOSE_AUTHENTICATION_FAILED) {
        return Err(GatewayError::Authentication);
    }
    info!(code = ?code, "Gateway closed the connection");
    Ok(SessionEnd::Reconnect)
}

async fn send_json<S>(sink: &mut S, value: &Value) -> Result<(), GatewayError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

fn identify_payload(token: &str, intents: u32) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "pixiv-relay",
                "device": "pixiv-relay",
            },
        },
    })
}

fn dispatch_event(payload: &GatewayPayload) -> Option<GatewayEvent> {
    match payload.t.as_deref()? {
        "READY" => {
            let user_id = payload.d.get("user")?.get("id")?.as_str()?;
            Some(GatewayEvent::Ready {
                user_id: user_id.to_string(),
            })
        }
        "MESSAGE_CREATE" => parse_message_create(&payload.d).map(GatewayEvent::MessageCreate),
        _ => None,
    }
}

/// Convert a `MESSAGE_CREATE` body into an [`IncomingMessage`].
pub fn parse_message_create(d: &Value) -> Option<IncomingMessage> {
    let author = d.get("author")?;
    Some(IncomingMessage {
        id: d.get("id")?.as_str()?.to_string(),
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        guild_id: d.get("guild_id").and_then(Value::as_str).map(String::from),
        author_id: author.get("id")?.as_str()?.to_string(),
        author_name: author
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author_is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
        content: d
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
