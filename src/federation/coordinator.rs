//! One federation member: identity, endpoints, flags, and its own book.
//!
//! The HTTP side (info + book fetch) sits behind [`CoordinatorClient`] so the
//! aggregator can be driven by a stub in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::directory::{Endpoints, MemberDescriptor, LOCAL_DEV_ALIAS};
use super::messages::CoordinatorSnapshot;
use super::types::{Network, Origin, PublicOrder, Settings, Version};
use crate::error::{FederationError, Result};

/// `/api/info/` payload. Missing fields read as zero.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CoordinatorInfo {
    #[serde(default)]
    pub num_public_buy_orders: u64,
    #[serde(default)]
    pub num_public_sell_orders: u64,
    #[serde(default)]
    pub book_liquidity: f64,
    #[serde(default)]
    pub active_robots_today: u64,
    #[serde(default)]
    pub last_day_nonkyc_btc_premium: f64,
    #[serde(default)]
    pub last_day_volume: f64,
    #[serde(default)]
    pub lifetime_volume: f64,
    #[serde(default)]
    pub version: Version,
}

/// Defaults applied under caller attributes in `Federation::add_coordinator`.
pub fn coordinator_default_attributes() -> Value {
    json!({
        "longAlias": "",
        "shortAlias": "",
        "identifier": "",
        "description": "",
        "color": "#000000",
        "established": null,
        "nostrHexPubkey": null,
        "mainnet": { "onion": null, "clearnet": null, "i2p": null },
        "testnet": { "onion": null, "clearnet": null, "i2p": null },
    })
}

/// Overlay `attributes` (a JSON object) on the per-field defaults.
pub fn member_from_attributes(attributes: &Value) -> Result<MemberDescriptor> {
    let mut merged = coordinator_default_attributes();
    let (Some(base), Some(overlay)) = (merged.as_object_mut(), attributes.as_object()) else {
        return Err(FederationError::Config(
            "coordinator attributes must be a JSON object".to_string(),
        ));
    };
    for (k, v) in overlay {
        base.insert(k.clone(), v.clone());
    }

    let member: MemberDescriptor = serde_json::from_value(merged)?;
    if member.short_alias.is_empty() {
        return Err(FederationError::Config(
            "coordinator attributes need a shortAlias".to_string(),
        ));
    }
    Ok(member)
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    pub short_alias: String,
    pub long_alias: String,
    pub identifier: String,
    pub nostr_hex_pubkey: Option<String>,
    pub mainnet: Endpoints,
    pub testnet: Endpoints,

    pub enabled: bool,
    pub online: bool,

    /// Effective base URL for the current origin/network.
    pub url: String,
    /// Path prefix under `url` (non-empty only for self-hosted clients).
    pub base_path: String,

    pub info: Option<CoordinatorInfo>,
    /// Member-local book keyed `"<alias><order id>"`.
    pub book: HashMap<String, PublicOrder>,
}

impl Coordinator {
    pub fn new(member: &MemberDescriptor, origin: Origin, settings: &Settings, host_url: &str) -> Self {
        let mut c = Self {
            short_alias: member.short_alias.clone(),
            long_alias: member.long_alias.clone(),
            identifier: member.identifier.clone(),
            nostr_hex_pubkey: member.nostr_hex_pubkey.clone(),
            mainnet: member.mainnet.clone(),
            testnet: member.testnet.clone(),
            enabled: true,
            online: false,
            url: String::new(),
            base_path: String::new(),
            info: None,
            book: HashMap::new(),
        };
        c.update_url(origin, settings, host_url);
        c
    }

    /// Recompute `url`/`base_path`. A self-hosted client proxies every member
    /// (except the local dev one) under its own host.
    pub fn update_url(&mut self, origin: Origin, settings: &Settings, host_url: &str) {
        if settings.self_hosted_client && self.short_alias != LOCAL_DEV_ALIAS {
            self.url = host_url.trim_end_matches('/').to_string();
            self.base_path = format!("/{}/{}", settings.network, self.short_alias);
        } else {
            self.url = self
                .endpoints(settings.network)
                .get(origin)
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default();
            self.base_path = String::new();
        }
    }

    pub fn endpoints(&self, network: Network) -> &Endpoints {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    /// Full API root, or `None` when the member has no endpoint for the
    /// current origin/network.
    pub fn api_url(&self) -> Option<String> {
        if self.url.is_empty() {
            None
        } else {
            Some(format!("{}{}", self.url, self.base_path))
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.online = false;
    }

    /// Take a successful refresh: online, fresh info, rebuilt local book.
    pub fn apply_snapshot(&mut self, snapshot: CoordinatorSnapshot) {
        self.online = true;
        self.info = Some(snapshot.info);
        self.book = snapshot
            .book
            .into_iter()
            .map(|mut order| {
                order.normalize_amount();
                order.coordinator_short_alias = Some(self.short_alias.clone());
                (format!("{}{}", self.short_alias, order.id), order)
            })
            .collect();
    }

    pub fn mark_offline(&mut self) {
        self.online = false;
        self.book.clear();
    }
}

// ─────────────────────────────────────────────────────────
// HTTP collaborator
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    async fn fetch_info(&self, api_url: &str) -> Result<CoordinatorInfo>;
    async fn fetch_book(&self, api_url: &str) -> Result<Vec<PublicOrder>>;
}

/// Fetch info and book for one member concurrently.
pub async fn fetch_snapshot(
    client: &dyn CoordinatorClient,
    api_url: &str,
) -> Result<CoordinatorSnapshot> {
    let (info, book) = tokio::join!(client.fetch_info(api_url), client.fetch_book(api_url));
    Ok(CoordinatorSnapshot {
        info: info?,
        book: book?,
    })
}

pub struct HttpCoordinatorClient {
    client: reqwest::Client,
}

impl HttpCoordinatorClient {
    /// `proxy` is typically the local Tor SOCKS port (`socks5h://127.0.0.1:9050`).
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn fetch_info(&self, api_url: &str) -> Result<CoordinatorInfo> {
        let url = format!("{}/api/info/", api_url);
        debug!(%url, "GET coordinator info");
        let info = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<CoordinatorInfo>()
            .await?;
        Ok(info)
    }

    async fn fetch_book(&self, api_url: &str) -> Result<Vec<PublicOrder>> {
        let url = format!("{}/api/book/", api_url);
        debug!(%url, "GET coordinator book");
        let resp = self.client.get(&url).send().await?;
        // An empty book is served as 404.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(resp.error_for_status()?.json::<Vec<PublicOrder>>().await?)
    }
}
