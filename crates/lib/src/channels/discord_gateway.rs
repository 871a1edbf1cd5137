//! Discord gateway websocket: identify, heartbeat, and forward the dispatches the bridge reacts to.
//!
//! A session ends on a close frame, a reconnect request (op 7) or an invalid session (op 9); the
//! connector then opens a fresh session and identifies again.

use crate::channels::registry::ChannelHandle;
use crate::delivery::{Interaction, ReactionEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const INTENT_GUILDS: u64 = 1;
const INTENT_GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Interaction type for slash commands.
const APPLICATION_COMMAND: u8 = 2;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;

/// Events the bridge consumes from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordEvent {
    Ready { user_id: String, application_id: String },
    ReactionAdd(ReactionEvent),
    Interaction(Interaction),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("gateway payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct GatewayFrame {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    user: IdOnly,
    application: IdOnly,
}

#[derive(Debug, Deserialize)]
struct EmojiPayload {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionPayload {
    channel_id: String,
    message_id: String,
    user_id: String,
    emoji: EmojiPayload,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    #[serde(default)]
    user: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct CommandOptionPayload {
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CommandDataPayload {
    name: String,
    #[serde(default)]
    options: Vec<CommandOptionPayload>,
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    id: String,
    application_id: String,
    token: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    member: Option<MemberPayload>,
    #[serde(default)]
    user: Option<IdOnly>,
    #[serde(default)]
    data: Option<CommandDataPayload>,
}

fn option_value(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Decode a dispatch (`op 0`) payload. Event types the bridge does not consume yield `Ok(None)`.
pub fn decode_dispatch(event_type: &str, data: serde_json::Value) -> Result<Option<DiscordEvent>, GatewayError> {
    match event_type {
        "READY" => {
            let ready: ReadyPayload = serde_json::from_value(data)?;
            Ok(Some(DiscordEvent::Ready {
                user_id: ready.user.id,
                application_id: ready.application.id,
            }))
        }
        "MESSAGE_REACTION_ADD" => {
            let r: ReactionPayload = serde_json::from_value(data)?;
            let Some(emoji) = r.emoji.name else {
                return Ok(None);
            };
            Ok(Some(DiscordEvent::ReactionAdd(ReactionEvent {
                channel_id: r.channel_id,
                message_id: r.message_id,
                user_id: r.user_id,
                emoji,
            })))
        }
        "INTERACTION_CREATE" => {
            let i: InteractionPayload = serde_json::from_value(data)?;
            if i.kind != APPLICATION_COMMAND {
                return Ok(None);
            }
            let Some(command) = i.data else {
                return Ok(None);
            };
            let user_id = i.member.and_then(|m| m.user).or(i.user).map(|u| u.id);
            Ok(Some(DiscordEvent::Interaction(Interaction {
                id: i.id,
                application_id: i.application_id,
                token: i.token,
                channel_id: i.channel_id,
                user_id,
                command: command.name,
                options: command
                    .options
                    .into_iter()
                    .map(|o| (o.name, option_value(o.value)))
                    .collect(),
            })))
        }
        _ => Ok(None),
    }
}

fn identify_payload(token: &str) -> String {
    serde_json::json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENT_GUILDS | INTENT_GUILD_MESSAGE_REACTIONS,
            "properties": { "os": std::env::consts::OS, "browser": "bridge", "device": "bridge" },
        },
    })
    .to_string()
}

fn heartbeat_payload(seq: Option<u64>) -> String {
    serde_json::json!({ "op": OP_HEARTBEAT, "d": seq }).to_string()
}

/// Gateway connector; reconnects until stopped.
pub struct DiscordGateway {
    id: String,
    token: String,
    url: String,
    running: AtomicBool,
    stop_notify: Notify,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>, url: Option<String>) -> Self {
        Self {
            id: "discord".to_string(),
            token: token.into(),
            url: url.unwrap_or_else(|| GATEWAY_URL.to_string()),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the session loop; events go to `events_tx`. Returns a handle to await on shutdown.
    pub fn start(self: Arc<Self>, events_tx: mpsc::Sender<DiscordEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("discord gateway: connecting");
        tokio::spawn(async move {
            while self.running() {
                match self.run_session(&events_tx).await {
                    Ok(()) => log::info!("discord gateway: session ended"),
                    Err(e) => log::warn!("discord gateway: session failed: {}", e),
                }
                if events_tx.is_closed() || !self.running() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = self.stop_notify.notified() => {}
                }
            }
            log::info!("discord gateway: stopped");
        })
    }

    async fn run_session(&self, events_tx: &mpsc::Sender<DiscordEvent>) -> Result<(), GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let interval = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: GatewayFrame = serde_json::from_str(&text)?;
                    if frame.op == OP_HELLO {
                        let ms = frame
                            .d
                            .get("heartbeat_interval")
                            .and_then(|v| v.as_u64())
                            .ok_or_else(|| GatewayError::Protocol("hello without heartbeat_interval".into()))?;
                        break Duration::from_millis(ms);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::Protocol("closed before hello".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };
        write.send(Message::Text(identify_payload(&self.token))).await?;

        let mut heartbeat = tokio::time::interval(interval);
        // First tick completes immediately.
        heartbeat.tick().await;
        let mut seq: Option<u64> = None;

        while self.running() {
            tokio::select! {
                _ = self.stop_notify.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    write.send(Message::Text(heartbeat_payload(seq))).await?;
                }
                incoming = read.next() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("discord gateway: closed by server: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    };
                    let frame: GatewayFrame = serde_json::from_str(&text)?;
                    if frame.s.is_some() {
                        seq = frame.s;
                    }
                    match frame.op {
                        OP_DISPATCH => {
                            let Some(t) = frame.t.as_deref() else { continue };
                            match decode_dispatch(t, frame.d) {
                                Ok(Some(event)) => {
                                    if events_tx.send(event).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => log::warn!("discord gateway: undecodable {} dispatch: {}", t, e),
                            }
                        }
                        OP_HEARTBEAT => {
                            write.send(Message::Text(heartbeat_payload(seq))).await?;
                        }
                        OP_RECONNECT => {
                            log::info!("discord gateway: reconnect requested");
                            return Ok(());
                        }
                        OP_INVALID_SESSION => {
                            log::warn!("discord gateway: invalid session");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
        let _ = write.send(Message::Close(None)).await;
        Ok(())
    }
}

impl ChannelHandle for DiscordGateway {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ready() {
        let d = json!({ "v": 10, "user": { "id": "900", "username": "bridge" }, "application": { "id": "77", "flags": 0 } });
        assert_eq!(
            decode_dispatch("READY", d).unwrap(),
            Some(DiscordEvent::Ready { user_id: "900".into(), application_id: "77".into() })
        );
    }

    #[test]
    fn decodes_reaction_add() {
        let d = json!({
            "user_id": "5", "channel_id": "review-1", "message_id": "m1", "guild_id": "g",
            "emoji": { "id": null, "name": "✅" }
        });
        let Some(DiscordEvent::ReactionAdd(r)) = decode_dispatch("MESSAGE_REACTION_ADD", d).unwrap() else {
            panic!("expected reaction");
        };
        assert_eq!(r.emoji, "✅");
        assert_eq!(r.message_id, "m1");
        assert_eq!(r.user_id, "5");
    }

    #[test]
    fn decodes_slash_command_with_member_user() {
        let d = json!({
            "id": "i1", "application_id": "77", "token": "tok", "type": 2, "channel_id": "c9",
            "member": { "user": { "id": "5" } },
            "data": { "name": "schedule", "options": [ { "name": "location", "type": 3, "value": "Truck A" } ] }
        });
        let Some(DiscordEvent::Interaction(i)) = decode_dispatch("INTERACTION_CREATE", d).unwrap() else {
            panic!("expected interaction");
        };
        assert_eq!(i.command, "schedule");
        assert_eq!(i.option("location"), Some("Truck A"));
        assert_eq!(i.user_id.as_deref(), Some("5"));
        assert_eq!(i.channel_id.as_deref(), Some("c9"));
    }

    #[test]
    fn ignores_other_dispatches_and_interaction_types() {
        assert_eq!(decode_dispatch("GUILD_CREATE", json!({})).unwrap(), None);
        let ping = json!({ "id": "i", "application_id": "a", "token": "t", "type": 1 });
        assert_eq!(decode_dispatch("INTERACTION_CREATE", ping).unwrap(), None);
        assert!(decode_dispatch("READY", json!({ "user": {} })).is_err());
    }

    #[test]
    fn identify_requests_reaction_intents() {
        let v: serde_json::Value = serde_json::from_str(&identify_payload("abc")).unwrap();
        assert_eq!(v["op"], 2);
        assert_eq!(v["d"]["intents"], 1025);
        let hb: serde_json::Value = serde_json::from_str(&heartbeat_payload(None)).unwrap();
        assert!(hb["d"].is_null());
    }
}
