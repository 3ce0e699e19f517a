//! Relay Multiplexer: one logical subscription across several relays.
//!
//! Architecture:
//!   relay ws ──EVENT──→ decode_event ──→ RelayMsg::Order ──→ Federation
//!            ──EOSE───→ RelayMsg::Eose (once per relay)
//!            ──close──→ RelayMsg::Closed (once per relay, always last)
//!
//! Each relay runs in its own task. Tasks never touch the book; they only
//! report what they decoded. Replacing the subscription aborts every task of
//! the previous one and tags the new stream with a fresh subscription id so
//! the aggregator can drop anything still queued from the old one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::decoder::{decode_event, DecodeContext, ORDER_EVENT_KIND};
use super::directory::{CurrencyTable, Directory};
use super::messages::{RelayEvent, RelayMsg};
use crate::error::{FederationError, Result};

/// The federation's shared relay.
pub const DEFAULT_RELAY_URL: &str =
    "ws://satstraoq35jffvkgpfoqld32nzw2siuvowanruindbfojowpwsjdgad.onion/nostr";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Accept only `ws://` and `wss://` URLs.
pub fn validate_relay_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| FederationError::Config(format!("invalid relay url '{raw}': {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(raw.trim().to_string()),
        other => Err(FederationError::Config(format!(
            "relay url '{raw}' must be ws:// or wss:// (got {other})"
        ))),
    }
}

// ─────────────────────────────────────────────────────────
// Wire codec (NIP-01)
// ─────────────────────────────────────────────────────────

/// Subscription filter: order events by federation members on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub authors: Vec<String>,
    pub kinds: Vec<u16>,
    #[serde(rename = "#n")]
    pub networks: Vec<String>,
}

impl Filter {
    pub fn orders(authors: Vec<String>, network_tag: &str) -> Self {
        Self {
            authors,
            kinds: vec![ORDER_EVENT_KIND],
            networks: vec![network_tag.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["REQ", <subscription_id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription_id>]`
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: RelayEvent,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
    /// Well-formed but irrelevant to a read-only client (OK, AUTH, COUNT...).
    Other(String),
}

fn invalid(msg: impl Into<String>) -> FederationError {
    FederationError::InvalidRelayMessage(msg.into())
}

fn str_at(arr: &[Value], i: usize, field: &str) -> Result<String> {
    arr.get(i)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("missing {field}")))
}

impl RelayMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        let arr: Vec<Value> = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        let kind = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("first element not a string"))?;

        match kind {
            "EVENT" => {
                let subscription_id = str_at(&arr, 1, "subscription_id")?;
                let raw = arr.get(2).cloned().ok_or_else(|| invalid("missing event"))?;
                let event: RelayEvent = serde_json::from_value(raw)?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(&arr, 1, "subscription_id")?,
                message: arr.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(&arr, 1, "message")?,
            }),
            other => Ok(RelayMessage::Other(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Multiplexer
// ─────────────────────────────────────────────────────────

struct Subscription {
    id: String,
    handles: Vec<JoinHandle<()>>,
}

pub struct RelayMultiplexer {
    directory: Arc<Directory>,
    currencies: Arc<CurrencyTable>,
    msg_tx: mpsc::Sender<RelayMsg>,
    current: Option<Subscription>,
}

impl RelayMultiplexer {
    pub fn new(
        directory: Arc<Directory>,
        currencies: Arc<CurrencyTable>,
        msg_tx: mpsc::Sender<RelayMsg>,
    ) -> Self {
        Self {
            directory,
            currencies,
            msg_tx,
            current: None,
        }
    }

    /// Tear down any previous subscription and open a new one against
    /// `relays`. Returns the new subscription id.
    pub fn subscribe(&mut self, relays: &[String], filter: Filter) -> String {
        self.close();

        let id = uuid::Uuid::new_v4().simple().to_string();
        info!(
            subscription = %id,
            relays = relays.len(),
            authors = filter.authors.len(),
            "📡 Opening relay subscription"
        );

        let handles = relays
            .iter()
            .map(|url| {
                let worker = RelayWorker {
                    url: url.clone(),
                    subscription_id: id.clone(),
                    filter: filter.clone(),
                    directory: Arc::clone(&self.directory),
                    currencies: Arc::clone(&self.currencies),
                    msg_tx: self.msg_tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        self.current = Some(Subscription {
            id: id.clone(),
            handles,
        });
        id
    }

    /// Abort every relay task of the current subscription.
    pub fn close(&mut self) {
        if let Some(sub) = self.current.take() {
            debug!(subscription = %sub.id, "🔌 Closing relay subscription");
            for handle in sub.handles {
                handle.abort();
            }
        }
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }
}

impl Drop for RelayMultiplexer {
    fn drop(&mut self) {
        self.close();
    }
}

struct RelayWorker {
    url: String,
    subscription_id: String,
    filter: Filter,
    directory: Arc<Directory>,
    currencies: Arc<CurrencyTable>,
    msg_tx: mpsc::Sender<RelayMsg>,
}

impl RelayWorker {
    async fn run(self) {
        let reason = match self.stream().await {
            Ok(reason) => {
                info!(relay = %self.url, "🏁 Relay stream ended: {}", reason);
                reason
            }
            Err(e) => {
                warn!(relay = %self.url, "📡 Relay error: {}", e);
                e.to_string()
            }
        };
        let _ = self
            .msg_tx
            .send(RelayMsg::Closed {
                subscription: self.subscription_id.clone(),
                relay: self.url.clone(),
                reason,
            })
            .await;
    }

    /// Returns why the stream ended. `Err` for transport failures.
    async fn stream(&self) -> Result<String> {
        info!(relay = %self.url, "📡 Connecting relay");
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| FederationError::Config(format!("connect timeout: {}", self.url)))??;
        info!(relay = %self.url, "✅ Relay connected");

        let (mut write, mut read) = ws.split();
        let req = ClientMessage::Req {
            subscription_id: self.subscription_id.clone(),
            filters: vec![self.filter.clone()],
        };
        write.send(Message::Text(req.to_json()?)).await?;

        let mut eose_sent = false;
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) => return Ok("closed by server".to_string()),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok("stream ended".to_string()),
                    };

                    let parsed = match RelayMessage::from_json(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!(relay = %self.url, "skipping malformed relay message: {}", e);
                            continue;
                        }
                    };

                    match parsed {
                        RelayMessage::Event { subscription_id, event }
                            if subscription_id == self.subscription_id =>
                        {
                            if !self.forward_event(&event).await {
                                return Ok("aggregator gone".to_string());
                            }
                        }
                        RelayMessage::Eose { subscription_id }
                            if subscription_id == self.subscription_id =>
                        {
                            if !eose_sent {
                                eose_sent = true;
                                debug!(relay = %self.url, "📦 End of stored events");
                                let eose = RelayMsg::Eose {
                                    subscription: self.subscription_id.clone(),
                                    relay: self.url.clone(),
                                };
                                if self.msg_tx.send(eose).await.is_err() {
                                    return Ok("aggregator gone".to_string());
                                }
                            }
                        }
                        RelayMessage::Closed { subscription_id, message }
                            if subscription_id == self.subscription_id =>
                        {
                            return Ok(format!("closed by relay: {message}"));
                        }
                        RelayMessage::Notice { message } => {
                            info!(relay = %self.url, "📣 Relay notice: {}", message);
                        }
                        other => debug!(relay = %self.url, "ignoring relay message: {:?}", other),
                    }
                }
            }
        }
    }

    /// Decode and forward one event. Returns false once the receiver is gone.
    async fn forward_event(&self, event: &RelayEvent) -> bool {
        if event.kind != ORDER_EVENT_KIND {
            debug!(relay = %self.url, kind = event.kind, "skipping foreign event kind");
            return true;
        }
        let ctx = DecodeContext {
            directory: &self.directory,
            currencies: &self.currencies,
            now: Utc::now(),
        };
        let Some(decoded) = decode_event(event, &ctx) else {
            debug!(relay = %self.url, id = %event.id, "skipping event without book key");
            return true;
        };
        self.msg_tx
            .send(RelayMsg::Order {
                subscription: self.subscription_id.clone(),
                relay: self.url.clone(),
                decoded,
            })
            .await
            .is_ok()
    }
}
