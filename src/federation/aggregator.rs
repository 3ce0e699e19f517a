//! Federation: single owner of registry, book, exchange and hooks.
//!
//! Architecture:
//!   RelayMultiplexer ────RelayMsg───────┐
//!                                       ├──→ Federation ──notify──→ observers
//!   CoordinatorRegistry ──RefreshOutcome┘         └──watch──→ Exchange
//!
//! Background tasks only report; every mutation of the shared state happens
//! on the task driving `Federation`, so nothing here is locked. Completions
//! may arrive in any order: counts are re-derived from the registry and book
//! after each one, and loading is tracked as sets of outstanding tokens.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::coordinator::{member_from_attributes, Coordinator, CoordinatorClient, CoordinatorInfo};
use super::directory::{CurrencyTable, Directory, MemberDescriptor, LOCAL_DEV_ALIAS};
use super::hooks::{FederationHook, HookBus};
use super::messages::{Decoded, RefreshOutcome, RelayMsg};
use super::registry::{CoordinatorRegistry, OutstandingWork};
use super::relay::{Filter, RelayMultiplexer};
use super::store::KeyValueStore;
use super::types::{Exchange, ExchangeInfo, Network, OrderType, Origin, PublicOrder, Settings};
use crate::error::Result;
use crate::FederationConfig;

/// Store key of the persisted alias → URL map.
pub const ENDPOINTS_STORE_KEY: &str = "federation";

const CHANNEL_CAPACITY: usize = 1024;

// ─────────────────────────────────────────────────────────
// Book
// ─────────────────────────────────────────────────────────

/// Shared order book. Relay entries are keyed by their distinguishing tag,
/// coordinator entries by `"<alias><order id>"`.
#[derive(Debug, Clone, Default)]
pub struct Book {
    orders: HashMap<String, PublicOrder>,
    /// Keys last merged in from coordinator books.
    coordinator_keys: HashSet<String>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded relay event. Returns whether the book changed.
    pub fn apply(&mut self, decoded: Decoded) -> bool {
        match decoded {
            Decoded::Upsert { key, order } => {
                self.coordinator_keys.remove(&key);
                self.orders.insert(key, order);
                true
            }
            Decoded::Delete { key } => {
                self.coordinator_keys.remove(&key);
                self.orders.remove(&key).is_some()
            }
        }
    }

    /// Replace every coordinator-sourced entry with the contents of `books`.
    /// Relay-sourced entries are left alone.
    pub fn merge_coordinator_books<'a, I>(&mut self, books: I)
    where
        I: IntoIterator<Item = &'a HashMap<String, PublicOrder>>,
    {
        for key in self.coordinator_keys.drain() {
            self.orders.remove(&key);
        }
        for book in books {
            for (key, order) in book {
                self.coordinator_keys.insert(key.clone());
                self.orders.insert(key.clone(), order.clone());
            }
        }
    }

    pub fn clear(&mut self) {
        self.orders.clear();
        self.coordinator_keys.clear();
    }

    pub fn get(&self, key: &str) -> Option<&PublicOrder> {
        self.orders.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.orders.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PublicOrder)> {
        self.orders.iter()
    }

    pub fn count(&self, side: OrderType) -> usize {
        self.orders.values().filter(|o| o.order_type == side).count()
    }
}

/// Sum, volume-weight and max the statistics of the live members.
fn blend_info<'a>(infos: impl IntoIterator<Item = &'a CoordinatorInfo>) -> ExchangeInfo {
    let mut info = ExchangeInfo::default();
    let mut weighted_premium = 0.0;
    for i in infos {
        info.book_liquidity += i.book_liquidity;
        info.active_robots_today += i.active_robots_today;
        info.last_day_volume += i.last_day_volume;
        info.lifetime_volume += i.lifetime_volume;
        weighted_premium += i.last_day_nonkyc_btc_premium * i.last_day_volume;
        info.version = info.version.max(i.version);
    }
    if info.last_day_volume > 0.0 {
        info.last_day_nonkyc_btc_premium = weighted_premium / info.last_day_volume;
    }
    info
}

// ─────────────────────────────────────────────────────────
// Federation
// ─────────────────────────────────────────────────────────

pub struct Federation {
    origin: Origin,
    settings: Settings,
    host_url: String,
    relays: Vec<String>,
    network_tag: String,

    registry: CoordinatorRegistry,
    book: Book,
    exchange: Exchange,
    startup_work: OutstandingWork,
    coordinator_work: OutstandingWork,
    relay_work: OutstandingWork,
    open_relays: HashSet<String>,
    round: u64,

    hooks: HookBus,
    exchange_tx: watch::Sender<Exchange>,

    client: Arc<dyn CoordinatorClient>,
    store: Arc<dyn KeyValueStore>,
    multiplexer: RelayMultiplexer,
    relay_rx: mpsc::Receiver<RelayMsg>,
    refresh_tx: mpsc::Sender<RefreshOutcome>,
    refresh_rx: mpsc::Receiver<RefreshOutcome>,
}

impl Federation {
    /// Federation over the built-in directory and currency table.
    pub fn new(
        cfg: &FederationConfig,
        client: Arc<dyn CoordinatorClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        Ok(Self::with_directory(
            cfg,
            Directory::builtin()?,
            CurrencyTable::builtin()?,
            client,
            store,
        ))
    }

    pub fn with_directory(
        cfg: &FederationConfig,
        directory: Directory,
        currencies: CurrencyTable,
        client: Arc<dyn CoordinatorClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let members: Vec<&MemberDescriptor> = directory
            .iter()
            .filter(|m| cfg.is_local_development || m.short_alias != LOCAL_DEV_ALIAS)
            .collect();

        // Served from a member's testnet endpoint: the whole client is on testnet.
        let mut settings = cfg.settings();
        if members.iter().any(|m| m.testnet.contains(&cfg.host_url)) {
            if settings.network != Network::Testnet {
                info!(host = %cfg.host_url, "🧪 Host is a testnet endpoint, forcing testnet");
            }
            settings.network = Network::Testnet;
        }

        let mut registry = CoordinatorRegistry::new();
        for member in &members {
            registry.add(Coordinator::new(member, cfg.origin, &settings, &cfg.host_url));
        }

        // Members count as loading from construction until a refresh actually
        // starts for them, or until relays alone drive loading.
        let mut startup_work = OutstandingWork::default();
        startup_work.reset(registry.iter().map(|c| c.short_alias.clone()));

        let mut relays: Vec<String> = Vec::with_capacity(cfg.relays.len());
        for url in &cfg.relays {
            if !relays.contains(url) {
                relays.push(url.clone());
            }
        }

        let (relay_tx, relay_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (exchange_tx, _) = watch::channel(Exchange::default());
        let decode_directory = Directory::from_members(members.into_iter().cloned());
        let multiplexer =
            RelayMultiplexer::new(Arc::new(decode_directory), Arc::new(currencies), relay_tx);

        let mut federation = Self {
            origin: cfg.origin,
            settings,
            host_url: cfg.host_url.clone(),
            relays,
            network_tag: cfg.network_tag.clone(),
            registry,
            book: Book::new(),
            exchange: Exchange::default(),
            startup_work,
            coordinator_work: OutstandingWork::default(),
            relay_work: OutstandingWork::default(),
            open_relays: HashSet::new(),
            round: 0,
            hooks: HookBus::new(),
            exchange_tx,
            client,
            store,
            multiplexer,
            relay_rx,
            refresh_tx,
            refresh_rx,
        };
        federation.recompute_exchange();
        federation.exchange_tx.send_replace(federation.exchange.clone());

        info!(
            "🏛️ Federation ready | members={} network={} origin={} relays={}",
            federation.exchange.total_coordinators,
            federation.settings.network,
            federation.origin,
            federation.relays.len(),
        );
        federation
    }

    // ═════════════════════════════════════════════════
    // Read access
    // ═════════════════════════════════════════════════

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn watch_exchange(&self) -> watch::Receiver<Exchange> {
        self.exchange_tx.subscribe()
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn loading(&self) -> bool {
        self.exchange.loading
    }

    pub fn get(&self, alias: &str) -> Option<&Coordinator> {
        self.registry.get(alias)
    }

    pub fn coordinators(&self) -> impl Iterator<Item = &Coordinator> {
        self.registry.iter()
    }

    /// Book entries owned by `alias`.
    pub fn orders_for(&self, alias: &str) -> Vec<&PublicOrder> {
        self.book
            .iter()
            .map(|(_, o)| o)
            .filter(|o| o.coordinator_short_alias.as_deref() == Some(alias))
            .collect()
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.multiplexer.subscription_id()
    }

    /// Relays of the current subscription that have not closed yet.
    pub fn open_relays(&self) -> usize {
        self.open_relays.len()
    }

    // ═════════════════════════════════════════════════
    // Hooks
    // ═════════════════════════════════════════════════

    pub fn register_observer<F>(&self, hook: FederationHook, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.register(hook, Arc::new(observer));
    }

    /// Publish the current exchange and run the observers of `hook`.
    pub fn notify(&self, hook: FederationHook) {
        self.exchange_tx.send_replace(self.exchange.clone());
        let ran = self.hooks.notify(hook);
        debug!(%hook, observers = ran, "notified");
    }

    // ═════════════════════════════════════════════════
    // Membership
    // ═════════════════════════════════════════════════

    /// Overlay `attributes` on the member defaults and register the result.
    pub fn add_coordinator(&mut self, attributes: &Value) -> Result<()> {
        let member = member_from_attributes(attributes)?;
        self.add_member(&member);
        Ok(())
    }

    pub fn add_member(&mut self, member: &MemberDescriptor) {
        let coordinator = Coordinator::new(member, self.origin, &self.settings, &self.host_url);
        if self.registry.add(coordinator).is_some() {
            info!(alias = %member.short_alias, "👤 Coordinator replaced");
            self.merge_coordinator_books();
        } else {
            info!(alias = %member.short_alias, "👤 Coordinator added");
        }
        self.changed();
    }

    /// Enable `alias` and refresh it right away.
    pub fn enable(&mut self, alias: &str) -> Result<()> {
        self.registry.enable(alias)?;
        self.registry.refresh_one(
            alias,
            Arc::clone(&self.client),
            self.round,
            self.refresh_tx.clone(),
        )?;
        self.startup_work.complete(alias);
        self.coordinator_work.begin(alias);
        info!(alias, "👤 Coordinator enabled");
        self.changed();
        Ok(())
    }

    /// Disable `alias`. Its orders leave the book and any refresh still in
    /// flight for it no longer counts as loading.
    pub fn disable(&mut self, alias: &str) -> Result<()> {
        self.registry.disable(alias)?;
        self.startup_work.complete(alias);
        self.coordinator_work.complete(alias);
        self.merge_coordinator_books();
        info!(alias, "👤 Coordinator disabled");
        self.changed();
        Ok(())
    }

    /// Recompute every member's URL and persist the alias → URL map.
    pub fn persist_endpoints(&mut self) -> Result<BTreeMap<String, String>> {
        let urls = self
            .registry
            .update_urls(self.origin, &self.settings, &self.host_url);
        self.store
            .set(ENDPOINTS_STORE_KEY, &serde_json::to_string(&urls)?)?;
        debug!(members = urls.len(), "💾 Endpoints persisted");
        Ok(urls)
    }

    // ═════════════════════════════════════════════════
    // Sources
    // ═════════════════════════════════════════════════

    /// Reset the book and (re)open the relay subscription. Any previous
    /// subscription is torn down first. Returns the new subscription id.
    pub fn connect_to_relays(&mut self) -> String {
        self.book.clear();
        self.startup_work.clear();
        let filter = Filter::orders(self.registry.relay_authors(), &self.network_tag);
        let id = self.multiplexer.subscribe(&self.relays, filter);
        self.relay_work.reset(self.relays.iter().cloned());
        self.open_relays = self.relays.iter().cloned().collect();
        self.changed();
        id
    }

    /// Start a refresh round over every enabled member. Returns the round.
    pub fn refresh(&mut self) -> u64 {
        self.round += 1;
        for c in self.registry.iter_mut().filter(|c| c.enabled) {
            c.online = false;
            c.info = None;
        }
        let started = self.registry.refresh_all(
            Arc::clone(&self.client),
            self.round,
            self.refresh_tx.clone(),
        );
        info!(round = self.round, members = started.len(), "🔄 Refreshing coordinators");
        self.startup_work.clear();
        self.coordinator_work.reset(started);
        self.changed();
        self.round
    }

    /// Apply one member's refresh result. Returns whether it was applied.
    pub fn on_refresh_outcome(&mut self, outcome: RefreshOutcome) -> bool {
        if outcome.round != self.round {
            debug!(alias = %outcome.alias, round = outcome.round, "stale refresh outcome");
            return false;
        }
        if !self.coordinator_work.complete(&outcome.alias) {
            debug!(alias = %outcome.alias, "refresh outcome not outstanding");
            return false;
        }
        let Some(coordinator) = self.registry.get_mut(&outcome.alias) else {
            return false;
        };
        match outcome.result {
            Ok(snapshot) => coordinator.apply_snapshot(snapshot),
            Err(_) => coordinator.mark_offline(),
        }
        self.merge_coordinator_books();
        if self.coordinator_work.is_idle() {
            info!(
                round = self.round,
                online = self.registry.online_count(),
                "🏁 Coordinator refresh complete"
            );
        }
        self.changed();
        true
    }

    /// Apply one relay message. Messages of a replaced subscription are
    /// dropped. Returns whether the federation state changed.
    pub fn on_relay_msg(&mut self, msg: RelayMsg) -> bool {
        if self.multiplexer.subscription_id() != Some(msg.subscription()) {
            debug!(subscription = msg.subscription(), "stale relay message");
            return false;
        }
        match msg {
            RelayMsg::Order { decoded, .. } => {
                if !self.book.apply(decoded) {
                    return false;
                }
            }
            RelayMsg::Eose { relay, .. } => {
                if self.relay_work.complete(&relay) {
                    info!(%relay, orders = self.book.len(), "📦 Relay caught up");
                }
            }
            RelayMsg::Closed { relay, reason, .. } => {
                self.relay_work.complete(&relay);
                self.open_relays.remove(&relay);
                info!(%relay, %reason, "🔌 Relay closed");
            }
        }
        self.changed();
        true
    }

    // ═════════════════════════════════════════════════
    // Event loop
    // ═════════════════════════════════════════════════

    /// Wait for and apply the next source message. Returns false once both
    /// sources are gone.
    pub async fn process_next(&mut self) -> bool {
        tokio::select! {
            Some(msg) = self.relay_rx.recv() => {
                self.on_relay_msg(msg);
                true
            }
            Some(outcome) = self.refresh_rx.recv() => {
                self.on_refresh_outcome(outcome);
                true
            }
            else => false,
        }
    }

    /// Actor main loop. Refreshes coordinators every `refresh_every` and
    /// reopens the relay subscription on that tick once every relay closed.
    pub async fn run<S>(mut self, refresh_every: Option<Duration>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = refresh_every.map(|every| {
            let mut t = tokio::time::interval_at(Instant::now() + every, every);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = next_tick(&mut ticker) => {
                    self.refresh();
                    if self.open_relays() == 0 && !self.relays.is_empty() {
                        info!("🔄 All relays closed, resubscribing");
                        self.connect_to_relays();
                    }
                }
                alive = self.process_next() => {
                    if !alive {
                        break;
                    }
                }
            }
        }

        self.multiplexer.close();
        info!(
            "🏛️ Federation shutdown | online={}/{} orders={}",
            self.exchange.online_coordinators,
            self.exchange.enabled_coordinators,
            self.book.len(),
        );
    }

    // ═════════════════════════════════════════════════
    // Internals
    // ═════════════════════════════════════════════════

    fn merge_coordinator_books(&mut self) {
        self.book.merge_coordinator_books(
            self.registry
                .iter()
                .filter(|c| c.enabled)
                .map(|c| &c.book),
        );
    }

    fn changed(&mut self) {
        self.recompute_exchange();
        self.notify(FederationHook::Update);
    }

    fn recompute_exchange(&mut self) {
        let mut info = blend_info(
            self.registry
                .iter()
                .filter(|c| c.enabled && c.online)
                .filter_map(|c| c.info.as_ref()),
        );
        info.num_public_buy_orders = self.book.count(OrderType::Buy);
        info.num_public_sell_orders = self.book.count(OrderType::Sell);

        let was_loading = self.exchange.loading;
        let loading = !self.startup_work.is_idle()
            || !self.coordinator_work.is_idle()
            || !self.relay_work.is_idle();
        self.exchange = Exchange {
            info,
            total_coordinators: self.registry.total(),
            enabled_coordinators: self.registry.enabled_count(),
            online_coordinators: self.registry.online_count(),
            loading_coordinators: self.startup_work.remaining() + self.coordinator_work.remaining(),
            loading_relays: self.relay_work.remaining(),
            loading,
        };
        if was_loading && !loading {
            info!(
                "✅ Federation loaded | online={}/{} orders={}",
                self.exchange.online_coordinators,
                self.exchange.enabled_coordinators,
                self.book.len(),
            );
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
