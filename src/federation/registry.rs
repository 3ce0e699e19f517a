//! Coordinator registry and outstanding-work tracking.
//!
//! The registry owns every `Coordinator` of the session, keyed by short
//! alias. Counts are always read off the current contents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::{fetch_snapshot, Coordinator, CoordinatorClient};
use super::directory::is_hex_pubkey;
use super::messages::RefreshOutcome;
use super::types::{Origin, Settings};
use crate::error::{FederationError, Result};

// ─────────────────────────────────────────────────────────
// Loading tokens
// ─────────────────────────────────────────────────────────

/// A set of outstanding tasks, one token per key.
///
/// Completing a key twice, or a key that was never started, is a no-op, so
/// the remaining count can never drop below zero however many completion
/// paths race for the same token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutstandingWork {
    pending: BTreeSet<String>,
}

impl OutstandingWork {
    /// Replace all tokens with `keys`.
    pub fn reset<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = keys.into_iter().map(Into::into).collect();
    }

    pub fn begin(&mut self, key: impl Into<String>) {
        self.pending.insert(key.into());
    }

    /// Returns whether `key` was outstanding.
    pub fn complete(&mut self, key: &str) -> bool {
        self.pending.remove(key)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

// ─────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    coordinators: BTreeMap<String, Coordinator>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by short alias. Returns the replaced member.
    pub fn add(&mut self, coordinator: Coordinator) -> Option<Coordinator> {
        self.coordinators
            .insert(coordinator.short_alias.clone(), coordinator)
    }

    pub fn get(&self, alias: &str) -> Option<&Coordinator> {
        self.coordinators.get(alias)
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut Coordinator> {
        self.coordinators.get_mut(alias)
    }

    pub fn enable(&mut self, alias: &str) -> Result<()> {
        self.get_mut(alias)
            .ok_or_else(|| FederationError::UnknownCoordinator(alias.to_string()))?
            .enable();
        Ok(())
    }

    pub fn disable(&mut self, alias: &str) -> Result<()> {
        self.get_mut(alias)
            .ok_or_else(|| FederationError::UnknownCoordinator(alias.to_string()))?
            .disable();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coordinator> {
        self.coordinators.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Coordinator> {
        self.coordinators.values_mut()
    }

    pub fn total(&self) -> usize {
        self.coordinators.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.iter().filter(|c| c.enabled).count()
    }

    pub fn online_count(&self) -> usize {
        self.iter().filter(|c| c.enabled && c.online).count()
    }

    /// Recompute every member's effective URL; returns alias → URL.
    pub fn update_urls(
        &mut self,
        origin: Origin,
        settings: &Settings,
        host_url: &str,
    ) -> BTreeMap<String, String> {
        self.iter_mut()
            .map(|c| {
                c.update_url(origin, settings, host_url);
                (c.short_alias.clone(), c.api_url().unwrap_or_default())
            })
            .collect()
    }

    /// Relay authors of every registered member with a valid key.
    pub fn relay_authors(&self) -> Vec<String> {
        self.iter()
            .filter_map(|c| c.nostr_hex_pubkey.as_deref())
            .filter(|pk| is_hex_pubkey(pk))
            .map(|pk| pk.to_ascii_lowercase())
            .collect()
    }

    /// Spawn one refresh task per enabled member. Each task reports exactly
    /// one `RefreshOutcome` tagged with `round`. Returns the aliases started.
    pub fn refresh_all(
        &self,
        client: Arc<dyn CoordinatorClient>,
        round: u64,
        outcome_tx: mpsc::Sender<RefreshOutcome>,
    ) -> Vec<String> {
        self.iter()
            .filter(|c| c.enabled)
            .map(|c| {
                spawn_refresh(c, Arc::clone(&client), round, outcome_tx.clone());
                c.short_alias.clone()
            })
            .collect()
    }

    /// Refresh a single member, enabled or not.
    pub fn refresh_one(
        &self,
        alias: &str,
        client: Arc<dyn CoordinatorClient>,
        round: u64,
        outcome_tx: mpsc::Sender<RefreshOutcome>,
    ) -> Result<()> {
        let c = self
            .get(alias)
            .ok_or_else(|| FederationError::UnknownCoordinator(alias.to_string()))?;
        spawn_refresh(c, client, round, outcome_tx);
        Ok(())
    }
}

fn spawn_refresh(
    c: &Coordinator,
    client: Arc<dyn CoordinatorClient>,
    round: u64,
    outcome_tx: mpsc::Sender<RefreshOutcome>,
) {
    let alias = c.short_alias.clone();
    let api_url = c.api_url();

    tokio::spawn(async move {
        let result = match api_url {
            Some(url) => {
                debug!(alias = %alias, %url, "🔄 refreshing coordinator");
                fetch_snapshot(client.as_ref(), &url)
                    .await
                    .map_err(|e| e.to_string())
            }
            None => Err(FederationError::MissingEndpoint(alias.clone()).to_string()),
        };
        match &result {
            Ok(snap) => info!(
                alias = %alias,
                orders = snap.book.len(),
                version = %snap.info.version,
                "✅ coordinator online"
            ),
            Err(e) => warn!(alias = %alias, "❌ coordinator unreachable: {}", e),
        }
        let _ = outcome_tx.send(RefreshOutcome { round, alias, result }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::coordinator::{member_from_attributes, CoordinatorInfo};
    use crate::federation::messages::CoordinatorSnapshot;
    use crate::federation::types::PublicOrder;
    use async_trait::async_trait;
    use serde_json::json;

    fn make_coordinator(alias: &str) -> Coordinator {
        let member = member_from_attributes(&json!({
            "shortAlias": alias,
            "identifier": alias,
            "mainnet": { "onion": format!("http://{alias}.onion") },
        }))
        .unwrap();
        Coordinator::new(&member, Origin::Onion, &Settings::default(), "")
    }

    struct FixedClient;

    #[async_trait]
    impl CoordinatorClient for FixedClient {
        async fn fetch_info(&self, api_url: &str) -> Result<CoordinatorInfo> {
            if api_url.contains("down") {
                return Err(FederationError::Config("down".into()));
            }
            Ok(CoordinatorInfo::default())
        }

        async fn fetch_book(&self, _api_url: &str) -> Result<Vec<PublicOrder>> {
            Ok(vec![PublicOrder::default()])
        }
    }

    #[test]
    fn test_outstanding_work_never_underflows() {
        let mut work = OutstandingWork::default();
        assert!(!work.complete("a"));
        assert!(!work.complete("a"));
        assert_eq!(work.remaining(), 0);

        work.reset(["a", "b"]);
        assert_eq!(work.remaining(), 2);
        assert!(work.complete("a"));
        assert!(!work.complete("a"));
        assert_eq!(work.remaining(), 1);
        assert!(work.complete("b"));
        assert!(work.is_idle());
        assert!(!work.complete("b"));
        assert_eq!(work.remaining(), 0);
    }

    #[test]
    fn test_add_overwrites_by_alias() {
        let mut reg = CoordinatorRegistry::new();
        assert!(reg.add(make_coordinator("a")).is_none());
        assert!(reg.add(make_coordinator("b")).is_none());
        assert!(reg.add(make_coordinator("a")).is_some());
        assert_eq!(reg.total(), 2);
    }

    #[test]
    fn test_enable_disable_counts() {
        let mut reg = CoordinatorRegistry::new();
        for a in ["a", "b", "c"] {
            reg.add(make_coordinator(a));
        }
        assert_eq!(reg.enabled_count(), 3);

        reg.disable("b").unwrap();
        assert_eq!(reg.enabled_count(), 2);
        assert!(!reg.get("b").unwrap().enabled);

        reg.enable("b").unwrap();
        assert_eq!(reg.enabled_count(), 3);

        assert!(matches!(
            reg.disable("zzz"),
            Err(FederationError::UnknownCoordinator(a)) if a == "zzz"
        ));
        assert!(reg.get("zzz").is_none());
    }

    #[test]
    fn test_online_count_ignores_disabled() {
        let mut reg = CoordinatorRegistry::new();
        reg.add(make_coordinator("a"));
        reg.add(make_coordinator("b"));
        for c in reg.iter_mut() {
            c.apply_snapshot(CoordinatorSnapshot {
                info: CoordinatorInfo::default(),
                book: vec![],
            });
        }
        assert_eq!(reg.online_count(), 2);
        reg.disable("a").unwrap();
        assert_eq!(reg.online_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_once_per_enabled_member() {
        let mut reg = CoordinatorRegistry::new();
        reg.add(make_coordinator("up"));
        reg.add(make_coordinator("down"));
        reg.add(make_coordinator("off"));
        reg.disable("off").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let started = reg.refresh_all(Arc::new(FixedClient), 3, tx);
        assert_eq!(started.len(), 2);

        let mut outcomes = Vec::new();
        while let Some(o) = rx.recv().await {
            outcomes.push(o);
        }
        outcomes.sort_by(|a, b| a.alias.cmp(&b.alias));

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.round == 3));
        assert_eq!(outcomes[0].alias, "down");
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].alias, "up");
        assert_eq!(outcomes[1].result.as_ref().unwrap().book.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_endpoint_reports_failure() {
        let mut reg = CoordinatorRegistry::new();
        let mut c = make_coordinator("bare");
        c.update_url(Origin::Clearnet, &Settings::default(), "");
        assert_eq!(c.api_url(), None);
        reg.add(c);

        let (tx, mut rx) = mpsc::channel(1);
        reg.refresh_one("bare", Arc::new(FixedClient), 1, tx).unwrap();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.alias, "bare");
        assert_eq!(
            outcome.result.unwrap_err(),
            FederationError::MissingEndpoint("bare".into()).to_string()
        );
    }

    #[test]
    fn test_outstanding_work_clear_drops_every_token() {
        let mut work = OutstandingWork::default();
        work.reset(["a", "b"]);
        work.clear();
        assert!(work.is_idle());
        assert!(!work.complete("a"));
    }

    #[tokio::test]
    async fn test_refresh_one_unknown_alias() {
        let reg = CoordinatorRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(reg.refresh_one("nope", Arc::new(FixedClient), 0, tx).is_err());
    }

    #[test]
    fn test_relay_authors_from_members() {
        let mut reg = CoordinatorRegistry::new();
        let mut c = make_coordinator("a");
        c.nostr_hex_pubkey = Some("CD".repeat(32));
        reg.add(c);
        reg.add(make_coordinator("b"));
        assert_eq!(reg.relay_authors(), vec!["cd".repeat(32)]);
    }

    #[test]
    fn test_update_urls_returns_alias_map() {
        let mut reg = CoordinatorRegistry::new();
        reg.add(make_coordinator("a"));
        let urls = reg.update_urls(Origin::Clearnet, &Settings::default(), "");
        assert_eq!(urls.get("a").map(String::as_str), Some(""));
        let urls = reg.update_urls(Origin::Onion, &Settings::default(), "");
        assert_eq!(urls["a"], "http://a.onion");
    }
}
