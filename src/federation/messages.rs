//! Channel message types between the federation actors.
//!
//! Relay tasks and coordinator refresh tasks never touch the shared book;
//! they only report what they saw. The aggregator applies it.

use serde::{Deserialize, Serialize};

use super::coordinator::CoordinatorInfo;
use super::types::PublicOrder;

// ─────────────────────────────────────────────────────────
// Relay events (wire shape, NIP-01)
// ─────────────────────────────────────────────────────────

/// A signed, tagged relay event. Signatures are carried but not verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    #[serde(default)]
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

/// Decoder output for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Insert or overwrite the book entry under `key`.
    Upsert { key: String, order: PublicOrder },
    /// Remove the book entry under `key`, if any.
    Delete { key: String },
}

// ─────────────────────────────────────────────────────────
// Relay Multiplexer → Aggregator
// ─────────────────────────────────────────────────────────

/// Stream lifecycle and data from one relay of one subscription.
///
/// `subscription` lets the aggregator drop messages that were already queued
/// when a subscription was replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMsg {
    Order {
        subscription: String,
        relay: String,
        decoded: Decoded,
    },
    /// End of stored events.
    Eose { subscription: String, relay: String },
    /// Relay connection ended (server close, error, or CLOSED message).
    Closed {
        subscription: String,
        relay: String,
        reason: String,
    },
}

impl RelayMsg {
    pub fn subscription(&self) -> &str {
        match self {
            RelayMsg::Order { subscription, .. }
            | RelayMsg::Eose { subscription, .. }
            | RelayMsg::Closed { subscription, .. } => subscription,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Coordinator refresh → Aggregator
// ─────────────────────────────────────────────────────────

/// What one member's HTTP refresh produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub info: CoordinatorInfo,
    pub book: Vec<PublicOrder>,
}

/// Completion of one member's refresh in refresh round `round`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub round: u64,
    pub alias: String,
    pub result: Result<CoordinatorSnapshot, String>,
}
