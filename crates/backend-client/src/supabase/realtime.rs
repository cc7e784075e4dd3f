//! Change feeds over the realtime service's Phoenix channel protocol.

use super::SupabaseClient;
use crate::{
    BackendError, BackendResult, ChangeEvent, ChangeFeedApi, ChangeHandler, ChangeKind, FeedSpec,
    FeedSubscription,
};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const JOIN_REF: &str = "1";

/// A Phoenix channel frame (JSON serializer v1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref,
        }
    }

    /// Join request subscribing `topic` to the row changes described by `spec`.
    pub fn join(topic: &str, spec: &FeedSpec, access_token: &str) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": spec.schema,
            "table": spec.table,
        });
        if let Some(filter) = spec.filter.as_ref().and_then(|f| f.to_feed_filter()) {
            change["filter"] = Value::String(filter);
        }

        let payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
                "private": false,
            },
            "access_token": access_token,
        });
        Self::new(topic, "phx_join", payload, Some(JOIN_REF.to_string()))
    }

    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self::new(topic, "phx_leave", json!({}), Some(msg_ref.to_string()))
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), Some(msg_ref.to_string()))
    }

    pub fn to_json(&self) -> BackendResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> BackendResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reply status for `phx_reply` frames.
    fn reply_status(&self) -> Option<&str> {
        if self.event != "phx_reply" {
            return None;
        }
        self.payload.get("status").and_then(|s| s.as_str())
    }

    /// Decode a `postgres_changes` frame into a change event.
    pub fn change_event(&self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?;
        let kind = ChangeKind::from_wire(data.get("type")?.as_str()?)?;
        let table = data.get("table")?.as_str()?.to_string();

        let row = |key: &str| match data.get(key) {
            Some(Value::Object(map)) if !map.is_empty() => Some(Value::Object(map.clone())),
            _ => None,
        };

        Some(ChangeEvent {
            kind,
            table,
            new: row("record"),
            old: row("old_record"),
        })
    }
}

impl SupabaseClient {
    /// `ws(s)://{host}/realtime/v1/websocket?apikey=...&vsn=1.0.0`
    fn realtime_url(&self) -> BackendResult<url::Url> {
        let mut url = url::Url::parse(&format!("{}/realtime/v1/websocket", self.api_url))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            BackendError::Realtime(format!("cannot derive websocket URL from {}", self.api_url))
        })?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

/// Read frames until the join reply for `topic` arrives.
async fn await_join_reply<S>(read: &mut S, topic: &str) -> BackendResult<()>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let Message::Text(text) = frame? else {
            continue;
        };
        let msg = match PhoenixMessage::from_json(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to parse realtime frame");
                continue;
            }
        };
        if msg.topic != topic || msg.msg_ref.as_deref() != Some(JOIN_REF) {
            continue;
        }
        return match msg.reply_status() {
            Some("ok") => Ok(()),
            Some(status) => Err(BackendError::Realtime(format!(
                "join rejected ({}): {}",
                status, msg.payload
            ))),
            None => Err(BackendError::Realtime(format!(
                "unexpected {} while joining",
                msg.event
            ))),
        };
    }
    Err(BackendError::Realtime("connection closed while joining".to_string()))
}

#[async_trait]
impl ChangeFeedApi for SupabaseClient {
    async fn subscribe(&self, spec: FeedSpec, handler: ChangeHandler) -> BackendResult<FeedSubscription> {
        let url = self.realtime_url()?;
        let topic = format!("realtime:{}", spec.channel);
        let token = self.bearer_token().await?;

        info!(channel = %spec.channel, table = %spec.table, "Opening change feed");
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let join = PhoenixMessage::join(&topic, &spec, &token);
        write.send(Message::Text(join.to_json()?.into())).await?;

        tokio::time::timeout(self.request_timeout, await_join_reply(&mut read, &topic))
            .await
            .map_err(|_| BackendError::Timeout)??;
        debug!(channel = %spec.channel, "Change feed joined");

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let heartbeat_every = self.heartbeat_interval;
        let channel = spec.channel.clone();
        let subscription_channel = spec.channel.clone();

        let task = tokio::spawn(async move {
            let mut heartbeat = interval(heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat.tick().await;
            let mut next_ref: u64 = 2;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        if let Ok(json) = PhoenixMessage::leave(&topic, next_ref).to_json() {
                            let _ = write.send(Message::Text(json.into())).await;
                        }
                        let _ = write.close().await;
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let Ok(json) = PhoenixMessage::heartbeat(next_ref).to_json() else {
                            continue;
                        };
                        next_ref += 1;
                        if write.send(Message::Text(json.into())).await.is_err() {
                            warn!(channel = %channel, "Heartbeat failed, change feed closed");
                            break;
                        }
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let msg = match PhoenixMessage::from_json(&text) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    warn!(channel = %channel, error = %e, "Failed to parse realtime frame");
                                    continue;
                                }
                            };
                            if msg.topic != topic {
                                continue;
                            }
                            match msg.event.as_str() {
                                "postgres_changes" => match msg.change_event() {
                                    Some(event) if spec.accepts(&event) => handler(event),
                                    Some(_) => {}
                                    None => warn!(channel = %channel, "Skipping malformed change payload"),
                                },
                                "phx_error" | "phx_close" => {
                                    warn!(channel = %channel, event = %msg.event, "Change feed closed by server");
                                    break;
                                }
                                _ => debug!(channel = %channel, event = %msg.event, "Realtime frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(channel = %channel, "Realtime connection closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(channel = %channel, error = %e, "Realtime connection error");
                            break;
                        }
                    }
                }
            }
        });

        Ok(FeedSubscription::new(subscription_channel, stop_tx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Filter;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_join_frame() {
        let spec = FeedSpec::new("items_changes", "items").with_filter(Filter::eq("user_id", "u1"));
        let join = PhoenixMessage::join("realtime:items_changes", &spec, "token");

        assert_eq!(join.event, "phx_join");
        assert_eq!(join.msg_ref.as_deref(), Some("1"));
        let change = &join.payload["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "items");
        assert_eq!(change["schema"], "public");
        assert_eq!(change["filter"], "user_id=eq.u1");
        assert_eq!(join.payload["access_token"], "token");

        let wire: Value = serde_json::from_str(&join.to_json().unwrap()).unwrap();
        assert_eq!(wire["ref"], "1");
    }

    #[test]
    fn test_decodes_change_frame() {
        let frame = r#"{
            "topic": "realtime:items_changes",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "table": "items",
                    "schema": "public",
                    "record": {"id": "i1", "status": "completed"},
                    "old_record": {"id": "i1"}
                },
                "ids": [1]
            },
            "ref": null
        }"#;

        let event = PhoenixMessage::from_json(frame).unwrap().change_event().unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.table, "items");
        assert_eq!(event.new.unwrap()["status"], "completed");
        assert_eq!(event.old.unwrap()["id"], "i1");
    }

    #[test]
    fn test_delete_frame_has_no_new_row() {
        let frame = r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"type":"DELETE","table":"items","record":{},"old_record":{"id":"i1"}}},"ref":null}"#;
        let event = PhoenixMessage::from_json(frame).unwrap().change_event().unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.new.is_none());
    }

    #[test]
    fn test_filtered_feed_keeps_key_only_delete_frame() {
        let frame = r#"{"topic":"realtime:items_changes","event":"postgres_changes","payload":{"data":{"type":"DELETE","table":"items","schema":"public","old_record":{"id":"i1"}}},"ref":null}"#;
        let spec = FeedSpec::new("items_changes", "items").with_filter(Filter::eq("user_id", "u1"));

        let event = PhoenixMessage::from_json(frame).unwrap().change_event().unwrap();
        assert!(spec.accepts(&event));
        assert_eq!(event.old.unwrap(), serde_json::json!({"id": "i1"}));
    }

    #[test]
    fn test_realtime_url() {
        let client = SupabaseClient::new("https://abc.supabase.co", "anon", StdDuration::from_secs(1)).unwrap();
        let url = client.realtime_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert_eq!(url.query(), Some("apikey=anon&vsn=1.0.0"));
    }
}
