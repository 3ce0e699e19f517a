use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use federation_book::federation::aggregator::ENDPOINTS_STORE_KEY;
use federation_book::federation::directory::{CurrencyTable, Directory};
use federation_book::federation::types::{OrderType, Version};
use federation_book::federation::{
    CoordinatorClient, CoordinatorInfo, Federation, FederationHook, KeyValueStore, MemoryStore,
    PublicOrder,
};
use federation_book::{FederationConfig, FederationError, Origin, Result};

/// Coordinator API stand-in keyed by API root URL.
#[derive(Default)]
struct StubClient {
    books: Mutex<HashMap<String, Vec<PublicOrder>>>,
    infos: Mutex<HashMap<String, CoordinatorInfo>>,
    calls: AtomicUsize,
}

impl StubClient {
    fn serve(&self, url: &str, info: CoordinatorInfo, book: Vec<PublicOrder>) {
        self.infos.lock().unwrap().insert(url.to_string(), info);
        self.books.lock().unwrap().insert(url.to_string(), book);
    }
}

#[async_trait]
impl CoordinatorClient for StubClient {
    async fn fetch_info(&self, api_url: &str) -> Result<CoordinatorInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.infos
            .lock()
            .unwrap()
            .get(api_url)
            .cloned()
            .ok_or_else(|| FederationError::Config(format!("unreachable {api_url}")))
    }

    async fn fetch_book(&self, api_url: &str) -> Result<Vec<PublicOrder>> {
        Ok(self
            .books
            .lock()
            .unwrap()
            .get(api_url)
            .cloned()
            .unwrap_or_default())
    }
}

fn make_directory() -> Directory {
    Directory::from_json(
        r#"{
            "north": {"identifier": "north", "mainnet": {"onion": "http://north.onion"}},
            "south": {"identifier": "south", "mainnet": {"onion": "http://south.onion"}},
            "east":  {"identifier": "east",  "mainnet": {"onion": "http://east.onion"}},
            "local": {"identifier": "local", "mainnet": {"onion": "http://127.0.0.1:8000"}}
        }"#,
    )
    .unwrap()
}

fn make_order(id: u64, side: OrderType) -> PublicOrder {
    PublicOrder {
        id,
        order_type: side,
        amount: "100".into(),
        ..Default::default()
    }
}

fn make_info(volume: f64, premium: f64, minor: u32) -> CoordinatorInfo {
    CoordinatorInfo {
        book_liquidity: 1.5,
        active_robots_today: 10,
        last_day_volume: volume,
        last_day_nonkyc_btc_premium: premium,
        lifetime_volume: 100.0,
        version: Version { major: 0, minor, patch: 0 },
        ..Default::default()
    }
}

fn make_federation(client: Arc<StubClient>, store: Arc<MemoryStore>) -> Federation {
    let cfg = FederationConfig {
        relays: vec![],
        ..Default::default()
    };
    Federation::with_directory(
        &cfg,
        make_directory(),
        CurrencyTable::builtin().unwrap(),
        client,
        store,
    )
}

async fn drain_until_idle(fed: &mut Federation) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while fed.loading() {
            assert!(fed.process_next().await);
        }
    })
    .await
    .expect("federation never finished loading");
}

#[tokio::test]
async fn test_refresh_completes_loading_and_blends_exchange() {
    let client = Arc::new(StubClient::default());
    client.serve(
        "http://north.onion",
        make_info(2.0, 1.0, 6),
        vec![make_order(1, OrderType::Buy), make_order(2, OrderType::Sell)],
    );
    client.serve(
        "http://south.onion",
        make_info(6.0, 3.0, 7),
        vec![make_order(1, OrderType::Sell)],
    );
    // east is unreachable

    let mut fed = make_federation(Arc::clone(&client), Arc::new(MemoryStore::new()));
    assert!(fed.loading());
    assert_eq!(fed.exchange().total_coordinators, 3);

    fed.refresh();
    drain_until_idle(&mut fed).await;

    let ex = fed.exchange();
    assert!(!ex.loading);
    assert_eq!(ex.loading_coordinators, 0);
    assert_eq!(ex.enabled_coordinators, 3);
    assert_eq!(ex.online_coordinators, 2);
    assert_eq!(ex.info.num_public_buy_orders, 1);
    assert_eq!(ex.info.num_public_sell_orders, 2);
    assert_eq!(ex.info.book_liquidity, 3.0);
    assert_eq!(ex.info.active_robots_today, 20);
    assert_eq!(ex.info.last_day_volume, 8.0);
    assert!((ex.info.last_day_nonkyc_btc_premium - 2.5).abs() < 1e-9);
    assert_eq!(ex.info.version.minor, 7);

    assert!(fed.book().contains_key("north1"));
    assert!(fed.book().contains_key("south1"));
    assert_eq!(fed.orders_for("north").len(), 2);
    assert!(!fed.get("east").unwrap().online);
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_enabled_count_matches_after_disable_and_refresh() {
    let client = Arc::new(StubClient::default());
    client.serve("http://north.onion", make_info(1.0, 0.0, 1), vec![make_order(5, OrderType::Buy)]);
    client.serve("http://south.onion", make_info(1.0, 0.0, 1), vec![]);
    client.serve("http://east.onion", make_info(1.0, 0.0, 1), vec![]);

    let mut fed = make_federation(Arc::clone(&client), Arc::new(MemoryStore::new()));
    fed.disable("east").unwrap();
    fed.refresh();
    drain_until_idle(&mut fed).await;

    let enabled = fed.coordinators().filter(|c| c.enabled).count();
    assert_eq!(fed.exchange().enabled_coordinators, enabled);
    assert_eq!(enabled, 2);
    assert_eq!(fed.exchange().online_coordinators, 2);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);

    fed.disable("north").unwrap();
    assert!(fed.orders_for("north").is_empty());
    assert_eq!(fed.exchange().enabled_coordinators, 1);
    assert_eq!(fed.exchange().online_coordinators, 1);

    fed.enable("north").unwrap();
    assert!(fed.loading());
    drain_until_idle(&mut fed).await;
    assert_eq!(fed.orders_for("north").len(), 1);
    assert_eq!(fed.exchange().online_coordinators, 2);
}

#[tokio::test]
async fn test_disable_mid_refresh_never_underflows() {
    let client = Arc::new(StubClient::default());
    let mut fed = make_federation(client, Arc::new(MemoryStore::new()));

    fed.refresh();
    fed.disable("north").unwrap();
    fed.disable("north").unwrap();
    assert_eq!(fed.exchange().loading_coordinators, 2);

    drain_until_idle(&mut fed).await;
    assert_eq!(fed.exchange().loading_coordinators, 0);
    assert!(!fed.get("north").unwrap().online);
}

#[tokio::test]
async fn test_unknown_alias_is_an_error() {
    let mut fed = make_federation(Arc::new(StubClient::default()), Arc::new(MemoryStore::new()));
    assert!(matches!(fed.disable("ghost"), Err(FederationError::UnknownCoordinator(_))));
    assert!(matches!(fed.enable("ghost"), Err(FederationError::UnknownCoordinator(_))));
    assert!(fed.get("ghost").is_none());
}

#[tokio::test]
async fn test_add_coordinator_overlays_defaults_and_notifies() {
    let mut fed = make_federation(Arc::new(StubClient::default()), Arc::new(MemoryStore::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let hits = Arc::clone(&hits);
        let order = Arc::clone(&order);
        fed.register_observer(FederationHook::Update, move || {
            hits.fetch_add(1, Ordering::SeqCst);
            order.lock().unwrap().push("first");
        });
    }
    {
        let order = Arc::clone(&order);
        fed.register_observer(FederationHook::Update, move || {
            order.lock().unwrap().push("second");
        });
    }

    fed.add_coordinator(&json!({
        "shortAlias": "west",
        "longAlias": "Western Sats",
        "mainnet": {"onion": "http://west.onion"}
    }))
    .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(fed.exchange().total_coordinators, 4);
    let west = fed.get("west").unwrap();
    assert!(west.enabled);
    assert_eq!(west.long_alias, "Western Sats");
    assert_eq!(west.api_url().as_deref(), Some("http://west.onion"));

    assert!(fed.add_coordinator(&json!({"longAlias": "nameless"})).is_err());
    assert_eq!(fed.exchange().total_coordinators, 4);
}

#[tokio::test]
async fn test_persist_endpoints_writes_one_record() {
    let store = Arc::new(MemoryStore::new());
    let mut fed = make_federation(Arc::new(StubClient::default()), Arc::clone(&store));

    let urls = fed.persist_endpoints().unwrap();
    assert_eq!(urls.len(), 3);

    let raw = store.get(ENDPOINTS_STORE_KEY).unwrap().unwrap();
    let persisted: HashMap<String, String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted["north"], "http://north.onion");
    assert!(!persisted.contains_key("local"));
}

#[tokio::test]
async fn test_watch_exchange_tracks_notifications() {
    let mut fed = make_federation(Arc::new(StubClient::default()), Arc::new(MemoryStore::new()));
    let rx = fed.watch_exchange();
    assert_eq!(rx.borrow().total_coordinators, 3);

    fed.disable("south").unwrap();
    assert_eq!(rx.borrow().enabled_coordinators, 2);
}

#[tokio::test]
async fn test_builtin_federation_constructs() {
    let cfg = FederationConfig {
        origin: Origin::Clearnet,
        ..Default::default()
    };
    let fed = Federation::new(
        &cfg,
        Arc::new(StubClient::default()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let dir = Directory::builtin().unwrap();
    assert_eq!(fed.exchange().total_coordinators, dir.len() - 1);
}
