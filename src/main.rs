use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use federation_book::federation::{
    Federation, FederationHook, HttpCoordinatorClient, JsonFileStore, KeyValueStore, MemoryStore,
};
use federation_book::FederationConfig;

// ─────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────

/// Console logging plus, with `FED_LOG_DIR`, a daily-rolling file. The
/// returned guard flushes the file writer and must outlive the runtime.
fn init_logging(cfg: &FederationConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match cfg.log_dir.as_ref() {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "federation.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(dir) => {
            eprintln!("Could not create log directory {}, file logging disabled", dir.display());
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    guard
}

// ─────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cfg = FederationConfig::from_env().context("invalid FED_* configuration")?;
    let _log_guard = init_logging(&cfg);

    info!("═══════════════════════════════════════════════════");
    info!("  Federation Book: coordinator + relay order aggregator");
    info!("═══════════════════════════════════════════════════");
    info!(
        "📊 Config: network={} origin={} host={} local_dev={} self_hosted={} relays={:?}",
        cfg.network,
        cfg.origin,
        cfg.host_url,
        cfg.is_local_development,
        cfg.self_hosted_client,
        cfg.relays,
    );

    let client = HttpCoordinatorClient::new(cfg.http_timeout, cfg.socks_proxy.as_deref())
        .context("failed to build coordinator HTTP client")?;
    let store: Arc<dyn KeyValueStore> = match cfg.store_path.as_ref() {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    let mut federation = Federation::new(&cfg, Arc::new(client), store)
        .context("failed to load federation directory")?;

    let exchange_rx = federation.watch_exchange();
    federation.register_observer(FederationHook::Update, move || {
        let ex = exchange_rx.borrow();
        debug!(
            "🏛️ online={}/{} loading={} (coord={} relay={}) buy={} sell={} liquidity={:.4} volume={:.4} premium={:.2}% {}",
            ex.online_coordinators,
            ex.enabled_coordinators,
            ex.loading,
            ex.loading_coordinators,
            ex.loading_relays,
            ex.info.num_public_buy_orders,
            ex.info.num_public_sell_orders,
            ex.info.book_liquidity,
            ex.info.last_day_volume,
            ex.info.last_day_nonkyc_btc_premium,
            ex.info.version,
        );
    });

    let urls = federation
        .persist_endpoints()
        .context("failed to persist coordinator endpoints")?;
    for (alias, url) in &urls {
        info!(alias = %alias, url = %url, "🔗 endpoint");
    }

    federation.refresh();
    federation.connect_to_relays();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler failed: {}", e);
        }
        info!("🛑 Ctrl-C received, shutting down");
    };
    federation.run(cfg.refresh_interval, shutdown).await;

    Ok(())
}
