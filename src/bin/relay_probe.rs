// Relay connectivity probe: connect, subscribe to federation orders, count
// what arrives until end of stored events.
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use federation_book::federation::decoder::{decode_event, DecodeContext};
use federation_book::federation::directory::{CurrencyTable, Directory};
use federation_book::federation::messages::Decoded;
use federation_book::federation::relay::{
    validate_relay_url, ClientMessage, Filter, RelayMessage, DEFAULT_RELAY_URL,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FED_RELAYS").ok().and_then(|v| v.split(',').next().map(str::to_string)))
        .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
    let url = validate_relay_url(&url)?;
    let network = std::env::var("FED_NETWORK_TAG").unwrap_or_else(|_| "mainnet".to_string());

    let directory = Directory::builtin()?;
    let currencies = CurrencyTable::builtin()?;

    println!("Probing relay {}", url);
    let (ws, response) = match tokio::time::timeout(Duration::from_secs(15), connect_async(url.as_str())).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => anyhow::bail!("❌ Connection error: {}", e),
        Err(_) => anyhow::bail!("⏱️ Timeout after 15 seconds (is the SOCKS/Tor route up?)"),
    };
    println!("✅ Connected (status={:?})", response.status());

    let (mut write, mut read) = ws.split();
    let req = ClientMessage::Req {
        subscription_id: "probe".to_string(),
        filters: vec![Filter::orders(directory.relay_authors(), &network)],
    };
    write.send(Message::Text(req.to_json()?)).await.context("send REQ")?;

    let ctx = DecodeContext {
        directory: &directory,
        currencies: &currencies,
        now: Utc::now(),
    };
    let (mut upserts, mut deletes, mut skipped) = (0usize, 0usize, 0usize);

    let drain = async {
        while let Some(msg) = read.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => {
                    println!("🔌 Closed by relay");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    println!("❌ {}", e);
                    break;
                }
            };
            match RelayMessage::from_json(&text) {
                Ok(RelayMessage::Event { event, .. }) => match decode_event(&event, &ctx) {
                    Some(Decoded::Upsert { key, order }) => {
                        upserts += 1;
                        println!(
                            "📦 {} {} {} {} via {}",
                            key,
                            order.order_type.as_str(),
                            if order.has_range {
                                format!(
                                    "{}-{}",
                                    order.min_amount.as_deref().unwrap_or("?"),
                                    order.max_amount.as_deref().unwrap_or("?")
                                )
                            } else {
                                order.amount.clone()
                            },
                            order.currency.and_then(|c| currencies.symbol(c)).unwrap_or("???"),
                            order.coordinator_short_alias.as_deref().unwrap_or("unknown"),
                        );
                    }
                    Some(Decoded::Delete { .. }) => deletes += 1,
                    None => skipped += 1,
                },
                Ok(RelayMessage::Eose { .. }) => {
                    println!("🏁 End of stored events");
                    break;
                }
                Ok(RelayMessage::Closed { message, .. }) => {
                    println!("🔌 Subscription closed: {}", message);
                    break;
                }
                Ok(RelayMessage::Notice { message }) => println!("📣 {}", message),
                Ok(RelayMessage::Other(_)) => {}
                Err(e) => println!("⚠️ {}", e),
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(60), drain).await.is_err() {
        println!("⏱️ No EOSE within 60 seconds");
    }

    let close = ClientMessage::Close {
        subscription_id: "probe".to_string(),
    };
    let _ = write.send(Message::Text(close.to_json()?)).await;

    println!("live={} retired={} skipped={}", upserts, deletes, skipped);
    Ok(())
}
