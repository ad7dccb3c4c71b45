//! Supabase Realtime subscription for review changes.
//!
//! Realtime speaks the Phoenix channel protocol over a websocket: join a
//! topic with a `postgres_changes` filter, send a heartbeat periodically and
//! receive one `postgres_changes` event per row change.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::models::{ChangeKind, ReviewChange};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const REVIEWS_TABLE: &str = "reviews";

pub type ReviewCallback = Arc<dyn Fn(ReviewChange) + Send + Sync>;

/// Live subscription handle. Dropping it (or calling `unsubscribe`) stops the
/// listener, so no callback fires afterwards. A listener whose channel died
/// for good reports itself inactive.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeClient {
    socket_url: String,
    anon_key: String,
}

impl RealtimeClient {
    /// `project_url` is the `https://` Supabase project URL.
    pub fn new(project_url: &str, anon_key: impl Into<String>) -> Self {
        let anon_key = anon_key.into();
        let host = project_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let socket_url = format!(
            "{host}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(&anon_key)
        );
        Self {
            socket_url,
            anon_key,
        }
    }

    pub async fn subscribe_reviews(
        &self,
        movie_id: i64,
        on_change: ReviewCallback,
    ) -> Result<Subscription> {
        let socket = self.join_reviews(movie_id).await?;
        info!("Subscribed to review changes for movie {}", movie_id);

        let client = self.clone();
        let task = tokio::spawn(async move {
            pump(socket, movie_id, &on_change).await;
            warn!("Review channel for movie {} dropped, reconnecting", movie_id);
            match client.join_reviews(movie_id).await {
                Ok(socket) => {
                    pump(socket, movie_id, &on_change).await;
                    warn!("Review channel for movie {} dropped again, giving up", movie_id);
                }
                Err(e) => warn!("Review channel reconnect failed: {:#}", e),
            }
        });

        Ok(Subscription::new(task))
    }

    async fn join_reviews(&self, movie_id: i64) -> Result<Socket> {
        let (mut ws, _response) = connect_async(self.socket_url.as_str())
            .await
            .context("Failed to connect to Supabase Realtime")?;
        let topic = format!("realtime:reviews-{movie_id}");
        let join = join_message(&topic, movie_id, &self.anon_key);
        ws.send(Message::Text(join.to_string()))
            .await
            .context("Failed to join reviews channel")?;
        Ok(ws)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Heartbeats and dispatches change events until the socket closes or fails.
async fn pump(socket: Socket, movie_id: i64, on_change: &ReviewCallback) {
    let (mut write, mut read) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let msg = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref.to_string(),
                });
                next_ref += 1;
                if let Err(e) = write.send(Message::Text(msg.to_string())).await {
                    warn!("Realtime heartbeat failed: {}", e);
                    return;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(change) = parse_change(&text, movie_id) {
                            debug!(kind = ?change.kind, movie_id, "Review change received");
                            on_change(change);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Realtime channel closed: {:?}", frame);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime channel error: {}", e);
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

fn join_message(topic: &str, movie_id: i64, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": REVIEWS_TABLE,
                    "filter": format!("movie_id=eq.{movie_id}"),
                }]
            },
            "access_token": access_token,
        },
        "ref": "1",
    })
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    change_type: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Extracts a review change from one channel frame; anything else (replies,
/// heartbeats, system messages) yields `None`.
pub(crate) fn parse_change(text: &str, movie_id: i64) -> Option<ReviewChange> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    if envelope.event != "postgres_changes" {
        return None;
    }
    let data: ChangeData = serde_json::from_value(envelope.payload.get("data")?.clone()).ok()?;
    if data.table.as_deref().is_some_and(|t| t != REVIEWS_TABLE) {
        return None;
    }
    let kind = match data.change_type.as_str() {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        other => {
            debug!("Ignoring realtime change type {}", other);
            return None;
        }
    };
    let record = match kind {
        ChangeKind::Delete => data.old_record,
        _ => data.record,
    }
    .filter(|r| !r.is_null());
    Some(ReviewChange {
        kind,
        movie_id,
        record,
    })
}
