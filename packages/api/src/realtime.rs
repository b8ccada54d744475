//! # Realtime change feeds over websocket
//!
//! The realtime service speaks the Phoenix channel protocol: the client joins a
//! topic `realtime:public:<relation>` asking for `postgres_changes`, sends a
//! heartbeat every 30 seconds, and receives one message per row change.
//!
//! [`subscribe`] spawns one task per relation that owns the socket and forwards
//! decoded [`ChangeEvent`]s into the [`Subscription`] channel. When the socket
//! drops, the task reconnects after a fixed delay for as long as the
//! subscription is alive. Dropping the subscription aborts the task.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::backend::{ChangeEvent, ChangeKind, Subscription};
use crate::ApiError;

const HEARTBEAT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Open a change feed for `table` on the realtime endpoint at `url`.
pub(crate) fn subscribe(url: String, table: &str, access_token: String) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(url, table.to_string(), access_token, tx));
    Subscription::new(table, rx, Some(task))
}

async fn run(
    url: String,
    table: String,
    access_token: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) {
    loop {
        match feed(&url, &table, &access_token, &tx).await {
            Ok(()) => return,
            Err(e) => tracing::warn!(%table, error = %e, "realtime feed dropped"),
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
        tracing::debug!(%table, "realtime reconnecting");
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> ApiError {
    ApiError::Realtime(e.to_string())
}

/// Run one socket until it fails (`Err`) or the subscriber goes away (`Ok`).
async fn feed(
    url: &str,
    table: &str,
    access_token: &str,
    tx: &mpsc::UnboundedSender<ChangeEvent>,
) -> Result<(), ApiError> {
    let (socket, _) = connect_async(url).await.map_err(ws_error)?;
    let (mut sink, mut stream) = socket.split();

    let topic = format!("realtime:public:{table}");
    sink.send(Message::Text(join_message(&topic, table, access_token).to_string()))
        .await
        .map_err(ws_error)?;
    tracing::debug!(%topic, "realtime joined");

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = tx.closed() => return Ok(()),
            _ = heartbeat.tick() => {
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref.to_string(),
                });
                next_ref += 1;
                sink.send(Message::Text(beat.to_string())).await.map_err(ws_error)?;
            }
            message = stream.next() => match message {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(ApiError::Realtime("socket closed".to_string()));
                }
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(Message::Ping(payload))) => {
                    sink.send(Message::Pong(payload)).await.map_err(ws_error)?;
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_message(&text, table)? {
                        if tx.send(event).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

fn join_message(topic: &str, table: &str, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table }
                ]
            },
            "access_token": access_token,
        },
        "ref": "1",
    })
}

fn change_kind(s: &str) -> Option<ChangeKind> {
    match s {
        "INSERT" => Some(ChangeKind::Insert),
        "UPDATE" => Some(ChangeKind::Update),
        "DELETE" => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn row(value: Option<&Value>) -> Option<Value> {
    value
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        .cloned()
}

/// Decode one frame. Heartbeat replies and presence traffic yield `None`; a
/// rejected join is an error.
pub fn parse_message(text: &str, table: &str) -> Result<Option<ChangeEvent>, ApiError> {
    let frame: Value = serde_json::from_str(text).map_err(|e| ApiError::decode("realtime frame", e))?;
    let event = frame["event"].as_str().unwrap_or_default();
    let payload = &frame["payload"];

    let (kind, data) = match event {
        "postgres_changes" => {
            let data = &payload["data"];
            (data["type"].as_str().and_then(change_kind), data)
        }
        "INSERT" | "UPDATE" | "DELETE" => (change_kind(event), payload),
        "phx_reply" if payload["status"] == "error" => {
            return Err(ApiError::Realtime(format!(
                "join rejected: {}",
                payload["response"]
            )));
        }
        _ => return Ok(None),
    };

    Ok(kind.map(|kind| ChangeEvent {
        table: data["table"].as_str().unwrap_or(table).to_string(),
        kind,
        old: row(data.get("old_record")),
        new: row(data.get("record")),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_postgres_change() {
        let frame = json!({
            "topic": "realtime:public:messages",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "table": "messages",
                    "record": {"id": "m-1", "read_at": "2024-05-01T00:00:00Z"},
                    "old_record": {"id": "m-1"}
                },
                "ids": [1]
            },
            "ref": null
        });
        let event = parse_message(&frame.to_string(), "messages").unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.table, "messages");
        assert_eq!(event.new.unwrap()["id"], "m-1");
        assert!(event.old.is_some());
    }

    #[test]
    fn test_parse_legacy_insert_and_noise() {
        let insert = json!({
            "topic": "realtime:public:notifications",
            "event": "INSERT",
            "payload": {"type": "INSERT", "record": {"id": "n-1"}, "old_record": {}},
            "ref": null
        });
        let event = parse_message(&insert.to_string(), "notifications")
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table, "notifications");
        assert!(event.old.is_none());

        let reply = json!({"topic": "phoenix", "event": "phx_reply", "payload": {"status": "ok"}, "ref": "2"});
        assert!(parse_message(&reply.to_string(), "notifications").unwrap().is_none());

        let rejected = json!({"topic": "t", "event": "phx_reply", "payload": {"status": "error", "response": "denied"}, "ref": "1"});
        assert!(parse_message(&rejected.to_string(), "notifications").is_err());
    }
}
