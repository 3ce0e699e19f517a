use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FederationError;

/// Order side as published by coordinators (0 = buy, 1 = sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OrderType {
    #[default]
    Buy,
    Sell,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "buy",
            OrderType::Sell => "sell",
        }
    }
}

impl From<u8> for OrderType {
    fn from(v: u8) -> Self {
        if v == 1 {
            OrderType::Sell
        } else {
            OrderType::Buy
        }
    }
}

impl From<OrderType> for u8 {
    fn from(t: OrderType) -> Self {
        match t {
            OrderType::Buy => 0,
            OrderType::Sell => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(FederationError::Config(format!("unknown network '{other}'"))),
        }
    }
}

/// Transport the client reaches coordinators through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Onion,
    I2p,
    Clearnet,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Onion => "onion",
            Origin::I2p => "i2p",
            Origin::Clearnet => "clearnet",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onion" => Ok(Origin::Onion),
            "i2p" => Ok(Origin::I2p),
            "clearnet" => Ok(Origin::Clearnet),
            other => Err(FederationError::Config(format!("unknown origin '{other}'"))),
        }
    }
}

/// Client settings shared with the presentation layer.
///
/// `network` may be forced to testnet when the federation detects it is being
/// served from a member's testnet endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub network: Network,
    pub self_hosted_client: bool,
}

/// Normalized public order, whether it came from a relay event or from a
/// coordinator's own `/api/book/`.
///
/// Exactly one of `amount` and the `min_amount`/`max_amount` range is
/// populated; `has_range` says which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicOrder {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub coordinator_short_alias: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub currency: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount: String,
    #[serde(default)]
    pub has_range: bool,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub min_amount: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub max_amount: Option<String>,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub is_explicit: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub premium: String,
    #[serde(default)]
    pub satoshis: Option<u64>,
    #[serde(default = "default_escrow_duration")]
    pub escrow_duration: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bond_size: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub maker_nick: String,
    #[serde(default)]
    pub maker_hash_id: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub satoshis_now: Option<u64>,
}

pub const DEFAULT_ESCROW_DURATION: u64 = 10_800;

fn default_escrow_duration() -> u64 {
    DEFAULT_ESCROW_DURATION
}

impl Default for PublicOrder {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            coordinator_short_alias: None,
            created_at: now,
            expires_at: now,
            order_type: OrderType::Sell,
            currency: None,
            amount: String::new(),
            has_range: false,
            min_amount: None,
            max_amount: None,
            payment_method: String::new(),
            is_explicit: false,
            premium: String::new(),
            satoshis: None,
            escrow_duration: DEFAULT_ESCROW_DURATION,
            bond_size: String::new(),
            latitude: None,
            longitude: None,
            maker_nick: String::new(),
            maker_hash_id: String::new(),
            price: None,
            satoshis_now: None,
        }
    }
}

impl PublicOrder {
    pub fn is_buy(&self) -> bool {
        self.order_type == OrderType::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.order_type == OrderType::Sell
    }

    /// Enforce the amount/range exclusivity after all fields are set.
    pub fn normalize_amount(&mut self) {
        if self.has_range {
            self.amount.clear();
        } else {
            self.min_amount = None;
            self.max_amount = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Blended statistics across the federation.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExchangeInfo {
    pub num_public_buy_orders: usize,
    pub num_public_sell_orders: usize,
    pub book_liquidity: f64,
    pub active_robots_today: u64,
    pub last_day_nonkyc_btc_premium: f64,
    pub last_day_volume: f64,
    pub lifetime_volume: f64,
    pub version: Version,
}

/// Aggregate view: member counts plus the blended statistics.
/// Always derived from registry and book contents, never edited in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Exchange {
    pub info: ExchangeInfo,
    pub total_coordinators: usize,
    pub enabled_coordinators: usize,
    pub online_coordinators: usize,
    pub loading_coordinators: usize,
    pub loading_relays: usize,
    pub loading: bool,
}

// Coordinators serialize decimals as strings, numbers or null depending on
// the field and version; take whatever comes.
fn lenient_opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(d)?.unwrap_or_default())
}
