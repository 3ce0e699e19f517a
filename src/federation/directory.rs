//! Static federation directory and currency table.
//!
//! Both ship embedded in the binary. The directory maps short alias → member
//! descriptor; the currency table maps numeric currency code → symbol.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::types::{Network, Origin};
use crate::error::Result;

/// Alias of the development-only member. Excluded unless the process runs in
/// local development mode.
pub const LOCAL_DEV_ALIAS: &str = "local";

const BUILTIN_FEDERATION: &str = include_str!("../../static/federation.json");
const BUILTIN_CURRENCIES: &str = include_str!("../../static/currencies.json");

/// Endpoint URLs of one member on one network, per origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub onion: Option<String>,
    #[serde(default)]
    pub clearnet: Option<String>,
    #[serde(default)]
    pub i2p: Option<String>,
}

impl Endpoints {
    pub fn get(&self, origin: Origin) -> Option<&str> {
        match origin {
            Origin::Onion => self.onion.as_deref(),
            Origin::Clearnet => self.clearnet.as_deref(),
            Origin::I2p => self.i2p.as_deref(),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        [&self.onion, &self.clearnet, &self.i2p]
            .into_iter()
            .flatten()
            .any(|u| u.trim_end_matches('/') == url.trim_end_matches('/'))
    }
}

/// One federation member as listed in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDescriptor {
    #[serde(default)]
    pub short_alias: String,
    #[serde(default)]
    pub long_alias: String,
    /// Path segment the member uses in order source URLs.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub established: Option<String>,
    /// Author key of the member's relay announcements.
    #[serde(default)]
    pub nostr_hex_pubkey: Option<String>,
    #[serde(default)]
    pub mainnet: Endpoints,
    #[serde(default)]
    pub testnet: Endpoints,
}

impl MemberDescriptor {
    pub fn endpoints(&self, network: Network) -> &Endpoints {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Directory {
    members: BTreeMap<String, MemberDescriptor>,
}

impl Directory {
    /// The directory compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_FEDERATION)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: BTreeMap<String, MemberDescriptor> = serde_json::from_str(raw)?;
        Ok(Self::from_members(parsed.into_iter().map(|(alias, mut m)| {
            if m.short_alias.is_empty() {
                m.short_alias = alias;
            }
            m
        })))
    }

    pub fn from_members(members: impl IntoIterator<Item = MemberDescriptor>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|m| (m.short_alias.clone(), m))
                .collect(),
        }
    }

    pub fn get(&self, alias: &str) -> Option<&MemberDescriptor> {
        self.members.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolve the short alias of the member publishing under `identifier`.
    pub fn alias_for_identifier(&self, identifier: &str) -> Option<&str> {
        self.members
            .values()
            .find(|m| !identifier.is_empty() && m.identifier == identifier)
            .map(|m| m.short_alias.as_str())
    }

    /// Relay authors allowed in the subscription filter. Keys that are not
    /// 32-byte hex are skipped.
    pub fn relay_authors(&self) -> Vec<String> {
        self.members
            .values()
            .filter_map(|m| m.nostr_hex_pubkey.as_deref())
            .filter(|pk| is_hex_pubkey(pk))
            .map(|pk| pk.to_ascii_lowercase())
            .collect()
    }
}

/// 32-byte hex, as relays expect in an `authors` filter.
pub fn is_hex_pubkey(key: &str) -> bool {
    matches!(hex::decode(key), Ok(bytes) if bytes.len() == 32)
}

#[derive(Debug, Clone, Default)]
pub struct CurrencyTable {
    by_code: BTreeMap<u32, String>,
}

impl CurrencyTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CURRENCIES)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: BTreeMap<String, String> = serde_json::from_str(raw)?;
        let by_code = parsed
            .into_iter()
            .filter_map(|(code, symbol)| code.parse::<u32>().ok().map(|c| (c, symbol)))
            .collect();
        Ok(Self { by_code })
    }

    /// Reverse lookup: display symbol → numeric code.
    pub fn code_for_symbol(&self, symbol: &str) -> Option<u32> {
        self.by_code
            .iter()
            .find(|(_, s)| s.as_str() == symbol)
            .map(|(code, _)| *code)
    }

    pub fn symbol(&self, code: u32) -> Option<&str> {
        self.by_code.get(&code).map(String::as_str)
    }
}
