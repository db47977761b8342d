//! Supabase Realtime client for `postgres_changes` on one table.
//!
//! Speaks the Phoenix channel protocol over a JSON WebSocket: join the
//! channel, heartbeat every 25 seconds, forward row changes, and leave on
//! shutdown. Dropped connections are retried with exponential backoff and
//! announced to the consumer as [`FeedMessage::Reconnected`] once the channel
//! is joined again.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::store::{ChangeFeed, ChangeKind, FeedMessage, RawChange, SubscriptionHandle};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const READ_TIMEOUT: Duration = Duration::from_secs(90);
const EVENT_BUFFER: usize = 256;
const MAX_BACKOFF_SECS: u64 = 60;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a channel for `table` and start forwarding its changes.
///
/// The first connection is made before returning so an unreachable endpoint
/// surfaces as an error instead of a silent retry loop.
pub async fn subscribe(
    config: &ClientConfig,
    access_token: &str,
    channel: &str,
    table: &str,
) -> Result<ChangeFeed> {
    let url = config.realtime_url();
    let socket = connect(&url).await?;

    let (sender, events) = mpsc::channel(EVENT_BUFFER);
    let (handle, shutdown) = SubscriptionHandle::new();
    let task = ChannelTask {
        url,
        topic: format!("realtime:{channel}"),
        join_payload: join_payload(table, access_token),
        events: sender,
        shutdown,
        next_ref: 0,
    };
    tokio::spawn(task.run(socket));

    Ok(ChangeFeed { events, handle })
}

async fn connect(url: &str) -> Result<Socket> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|error| Error::Realtime(format!("connection failed: {error}")))?;
    Ok(socket)
}

fn join_payload(table: &str, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table }
            ],
            "private": false
        },
        "access_token": access_token
    })
}

enum SessionEnd {
    Shutdown,
    ConsumerGone,
}

#[derive(Debug, PartialEq)]
enum FrameAction {
    Joined,
    Change(RawChange),
    Ignore,
}

struct ChannelTask {
    url: String,
    topic: String,
    join_payload: Value,
    events: mpsc::Sender<FeedMessage>,
    shutdown: watch::Receiver<bool>,
    next_ref: u64,
}

impl ChannelTask {
    async fn run(mut self, socket: Socket) {
        let mut pending = Some(socket);
        let mut joined_before = false;
        let mut backoff_secs = 1u64;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let socket = match pending.take() {
                Some(socket) => Ok(socket),
                None => connect(&self.url).await,
            };
            let outcome = match socket {
                Ok(socket) => {
                    self.session(socket, &mut joined_before, &mut backoff_secs)
                        .await
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    debug!(topic = %self.topic, "realtime channel closed");
                    return;
                }
                Ok(SessionEnd::ConsumerGone) => {
                    debug!(topic = %self.topic, "change feed receiver dropped");
                    return;
                }
                Err(error) => {
                    warn!(topic = %self.topic, %error, backoff_secs, "realtime channel interrupted, reconnecting");
                }
            }

            let wait = Duration::from_secs(backoff_secs);
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                }
                () = tokio::time::sleep(wait) => {}
            }
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    async fn session(
        &mut self,
        socket: Socket,
        joined_before: &mut bool,
        backoff_secs: &mut u64,
    ) -> Result<SessionEnd> {
        let (mut write, mut read) = socket.split();

        let join_ref = self.take_ref();
        let join = self.join_message(&join_ref);
        write
            .send(Message::Text(join))
            .await
            .map_err(|error| Error::Realtime(format!("join failed: {error}")))?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        let leave = self.leave_message();
                        let _ = write.send(Message::Text(leave)).await;
                        let _ = write.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                _ = heartbeat.tick() => {
                    let beat = self.heartbeat_message();
                    write
                        .send(Message::Text(beat))
                        .await
                        .map_err(|error| Error::Realtime(format!("heartbeat failed: {error}")))?;
                }

                frame = tokio::time::timeout(READ_TIMEOUT, read.next()) => {
                    let text = match frame {
                        Ok(Some(Ok(Message::Text(text)))) => text,
                        Ok(Some(Ok(Message::Close(_)))) => {
                            return Err(Error::Realtime("connection closed by server".to_string()));
                        }
                        Ok(Some(Ok(_))) => continue,
                        Ok(Some(Err(error))) => {
                            return Err(Error::Realtime(format!("read error: {error}")));
                        }
                        Ok(None) => return Err(Error::Realtime("stream ended".to_string())),
                        Err(_) => return Err(Error::Realtime("read timeout".to_string())),
                    };

                    let message = match classify_frame(&text, &self.topic, &join_ref)? {
                        FrameAction::Ignore => continue,
                        FrameAction::Change(change) => FeedMessage::Change(change),
                        FrameAction::Joined => {
                            info!(topic = %self.topic, "realtime channel joined");
                            *backoff_secs = 1;
                            if !*joined_before {
                                *joined_before = true;
                                continue;
                            }
                            FeedMessage::Reconnected
                        }
                    };
                    if self.events.send(message).await.is_err() {
                        return Ok(SessionEnd::ConsumerGone);
                    }
                }
            }
        }
    }

    fn take_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn join_message(&self, join_ref: &str) -> String {
        json!({
            "topic": self.topic,
            "event": "phx_join",
            "payload": self.join_payload,
            "ref": join_ref,
            "join_ref": join_ref,
        })
        .to_string()
    }

    fn leave_message(&mut self) -> String {
        let reference = self.take_ref();
        json!({
            "topic": self.topic,
            "event": "phx_leave",
            "payload": {},
            "ref": reference,
        })
        .to_string()
    }

    fn heartbeat_message(&mut self) -> String {
        let reference = self.take_ref();
        json!({
            "topic": "phoenix",
            "event": "heartbeat",
            "payload": {},
            "ref": reference,
        })
        .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Decide what a server frame means for this channel.
///
/// Errors end the session and trigger a reconnect. Frames that cannot be
/// parsed are logged and skipped.
fn classify_frame(text: &str, topic: &str, join_ref: &str) -> Result<FrameAction> {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%error, "ignoring malformed realtime frame");
            return Ok(FrameAction::Ignore);
        }
    };

    if frame.topic != topic {
        trace!(topic = %frame.topic, event = %frame.event, "ignoring frame for other topic");
        return Ok(FrameAction::Ignore);
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("ok") {
                Ok(FrameAction::Joined)
            } else {
                let response = frame.payload.get("response").cloned().unwrap_or(Value::Null);
                Err(Error::Realtime(format!("channel join rejected: {response}")))
            }
        }
        "postgres_changes" => match serde_json::from_value::<ChangePayload>(frame.payload) {
            Ok(payload) => Ok(FrameAction::Change(RawChange {
                kind: payload.data.kind,
                record: payload.data.record,
                old_record: payload.data.old_record,
            })),
            Err(error) => {
                warn!(%error, "ignoring malformed postgres change");
                Ok(FrameAction::Ignore)
            }
        },
        "phx_error" => Err(Error::Realtime("channel errored".to_string())),
        "phx_close" => Err(Error::Realtime("channel closed by server".to_string())),
        "system" => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("error") {
                warn!(payload = %frame.payload, "realtime system error");
            }
            Ok(FrameAction::Ignore)
        }
        _ => Ok(FrameAction::Ignore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    const TOPIC: &str = "realtime:incidents_channel";

    #[test]
    fn join_payload_targets_public_table() {
        let payload = join_payload("incidents", "jwt");
        assert_eq!(
            payload["config"]["postgres_changes"],
            json!([{ "event": "*", "schema": "public", "table": "incidents" }])
        );
        assert_eq!(payload["access_token"], "jwt");
    }

    #[test]
    fn classifies_join_reply() {
        let ok = r#"{"topic":"realtime:incidents_channel","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert_eq!(classify_frame(ok, TOPIC, "1").unwrap(), FrameAction::Joined);

        // a reply to a heartbeat or leave is not the join
        assert_eq!(classify_frame(ok, TOPIC, "7").unwrap(), FrameAction::Ignore);

        let rejected = r#"{"topic":"realtime:incidents_channel","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#;
        let error = classify_frame(rejected, TOPIC, "1").unwrap_err();
        assert!(error.to_string().contains("unauthorized"));
    }

    #[test]
    fn classifies_postgres_changes() {
        let insert = r#"{"topic":"realtime:incidents_channel","event":"postgres_changes","payload":{"ids":[1],"data":{"schema":"public","table":"incidents","type":"INSERT","record":{"id":"a"},"old_record":null}},"ref":null}"#;
        assert_eq!(
            classify_frame(insert, TOPIC, "1").unwrap(),
            FrameAction::Change(RawChange {
                kind: ChangeKind::Insert,
                record: Some(json!({ "id": "a" })),
                old_record: None,
            })
        );

        let delete = r#"{"topic":"realtime:incidents_channel","event":"postgres_changes","payload":{"data":{"type":"DELETE","old_record":{"id":"a"}}},"ref":null}"#;
        assert_eq!(
            classify_frame(delete, TOPIC, "1").unwrap(),
            FrameAction::Change(RawChange {
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(json!({ "id": "a" })),
            })
        );
    }

    #[test]
    fn skips_noise_and_fails_on_channel_errors() {
        assert_eq!(classify_frame("not json", TOPIC, "1").unwrap(), FrameAction::Ignore);

        let heartbeat_reply = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"2"}"#;
        assert_eq!(
            classify_frame(heartbeat_reply, TOPIC, "1").unwrap(),
            FrameAction::Ignore
        );

        let unknown_kind = r#"{"topic":"realtime:incidents_channel","event":"postgres_changes","payload":{"data":{"type":"TRUNCATE"}},"ref":null}"#;
        assert_eq!(
            classify_frame(unknown_kind, TOPIC, "1").unwrap(),
            FrameAction::Ignore
        );

        let errored = r#"{"topic":"realtime:incidents_channel","event":"phx_error","payload":{},"ref":"1"}"#;
        assert!(classify_frame(errored, TOPIC, "1").is_err());
    }

    #[tokio::test]
    async fn forwards_changes_and_leaves_on_unsubscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

            let join: Value = match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            };
            assert_eq!(join["event"], "phx_join");
            assert_eq!(join["topic"], TOPIC);
            let join_ref = join["ref"].as_str().unwrap().to_string();

            let reply = json!({
                "topic": TOPIC,
                "event": "phx_reply",
                "payload": { "status": "ok", "response": {} },
                "ref": join_ref,
            });
            socket.send(Message::Text(reply.to_string())).await.unwrap();

            let change = json!({
                "topic": TOPIC,
                "event": "postgres_changes",
                "payload": { "data": { "type": "UPDATE", "record": { "id": "x" } } },
                "ref": null,
            });
            socket.send(Message::Text(change.to_string())).await.unwrap();

            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let frame: Value = serde_json::from_str(&text).unwrap();
                        if frame["event"] == "phx_leave" {
                            return frame;
                        }
                    }
                    Some(Ok(_)) => {}
                    other => panic!("socket ended before leave: {other:?}"),
                }
            }
        });

        let config = ClientConfig::new(format!("http://{address}"), "anon").unwrap();
        let mut feed = subscribe(&config, "anon", "incidents_channel", "incidents")
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), feed.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            FeedMessage::Change(RawChange {
                kind: ChangeKind::Update,
                record: Some(json!({ "id": "x" })),
                old_record: None,
            })
        );

        feed.handle.unsubscribe();
        let leave = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leave["topic"], TOPIC);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_subscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new(format!("http://{address}"), "anon").unwrap();
        let error = subscribe(&config, "anon", "incidents_channel", "incidents")
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Realtime(_)));
    }
}
