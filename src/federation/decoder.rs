//! Relay event → normalized order decoder.
//!
//! Each tag name maps to a small decoder that writes into a draft record.
//! The event's tags are folded through the table in order; unknown tags are
//! skipped. `finish` then enforces the amount/range invariant and decides
//! between an upsert and a deletion.
//!
//! A malformed tag only degrades its own field. The one hard requirement is
//! the `d` tag: without a book key there is nothing to store or delete.

use chrono::{DateTime, Duration, Utc};

use super::directory::{CurrencyTable, Directory};
use super::geohash;
use super::messages::{Decoded, RelayEvent};
use super::types::{OrderType, PublicOrder};

/// Event kind of public order announcements.
pub const ORDER_EVENT_KIND: u16 = 38383;

/// Status value of a live order. Anything else retires the book entry.
pub const STATUS_PENDING: &str = "pending";

/// Expiry assumed when an event carries no usable `expiration` tag.
const DEFAULT_ORDER_LIFETIME_HOURS: i64 = 24;

/// Lookups the decoder needs. All pure.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub directory: &'a Directory,
    pub currencies: &'a CurrencyTable,
    pub now: DateTime<Utc>,
}

#[derive(Debug)]
struct Draft {
    key: Option<String>,
    status: Option<String>,
    explicit_expiration: bool,
    order: PublicOrder,
}

impl Draft {
    fn new(event: &RelayEvent) -> Self {
        let created_at = i64::try_from(event.created_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();
        // Saturates at created_at when the lifetime would leave chrono's range.
        let expires_at = created_at
            .checked_add_signed(Duration::hours(DEFAULT_ORDER_LIFETIME_HOURS))
            .unwrap_or(created_at);
        Self {
            key: None,
            status: None,
            explicit_expiration: false,
            order: PublicOrder {
                created_at,
                expires_at,
                order_type: OrderType::Sell,
                ..Default::default()
            },
        }
    }

    fn finish(mut self, now: DateTime<Utc>) -> Option<Decoded> {
        let key = self.key.filter(|k| !k.is_empty())?;

        let retired = self.status.as_deref().is_some_and(|s| s != STATUS_PENDING);
        let expired = self.explicit_expiration && self.order.expires_at <= now;
        if retired || expired {
            return Some(Decoded::Delete { key });
        }

        self.order.normalize_amount();
        Some(Decoded::Upsert {
            key,
            order: self.order,
        })
    }
}

type TagDecoder = fn(&mut Draft, &[String], &DecodeContext<'_>);

const TAG_DECODERS: &[(&str, TagDecoder)] = &[
    ("d", decode_key),
    ("s", decode_status),
    ("k", decode_side),
    ("expiration", decode_expiration),
    ("fa", decode_fiat_amount),
    ("bond", decode_bond),
    ("premium", decode_premium),
    ("name", decode_name),
    ("pm", decode_payment_methods),
    ("g", decode_geohash),
    ("f", decode_currency),
    ("source", decode_source),
];

fn tag_decoder(name: &str) -> Option<TagDecoder> {
    TAG_DECODERS
        .iter()
        .find(|(tag, _)| *tag == name)
        .map(|(_, f)| *f)
}

/// Decode one relay event. `None` means the event is unusable and must be
/// skipped without touching the book.
pub fn decode_event(event: &RelayEvent, ctx: &DecodeContext<'_>) -> Option<Decoded> {
    let draft = event.tags.iter().fold(Draft::new(event), |mut draft, tag| {
        if let Some((name, values)) = tag.split_first() {
            if let Some(decode) = tag_decoder(name) {
                decode(&mut draft, values, ctx);
            }
        }
        draft
    });
    draft.finish(ctx.now)
}

fn first(values: &[String]) -> Option<&str> {
    values.first().map(String::as_str)
}

fn decode_key(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    if let Some(v) = first(values) {
        d.key = Some(v.to_string());
    }
}

fn decode_status(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    if let Some(v) = first(values) {
        d.status = Some(v.to_string());
    }
}

// Only "sell" is a sell; any other value, including a missing one, is a buy.
fn decode_side(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    d.order.order_type = match first(values) {
        Some("sell") => OrderType::Sell,
        _ => OrderType::Buy,
    };
}

fn decode_expiration(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    let parsed = first(values)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    if let Some(ts) = parsed {
        d.order.expires_at = ts;
        d.explicit_expiration = true;
    }
}

fn decode_fiat_amount(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    match values {
        [min, max, ..] if !max.is_empty() => {
            d.order.has_range = true;
            d.order.min_amount = Some(min.clone());
            d.order.max_amount = Some(max.clone());
        }
        [amount, ..] => {
            d.order.has_range = false;
            d.order.amount = amount.clone();
        }
        [] => {}
    }
}

fn decode_bond(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    if let Some(v) = first(values) {
        d.order.bond_size = v.to_string();
    }
}

fn decode_premium(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    if let Some(v) = first(values) {
        d.order.premium = v.to_string();
    }
}

fn decode_name(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    if let Some(v) = first(values) {
        d.order.maker_nick = v.to_string();
    }
}

fn decode_payment_methods(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    d.order.payment_method = values.join(" ");
}

fn decode_geohash(d: &mut Draft, values: &[String], _: &DecodeContext<'_>) {
    let coords = first(values).and_then(geohash::decode);
    d.order.latitude = coords.map(|(lat, _)| lat);
    d.order.longitude = coords.map(|(_, lon)| lon);
}

fn decode_currency(d: &mut Draft, values: &[String], ctx: &DecodeContext<'_>) {
    d.order.currency = first(values).and_then(|sym| ctx.currencies.code_for_symbol(sym));
}

/// `source` is the order URL: `.../<coordinator identifier>/<order id>`.
fn decode_source(d: &mut Draft, values: &[String], ctx: &DecodeContext<'_>) {
    let Some(url) = first(values) else {
        return;
    };
    let mut segments = url.trim_end_matches('/').rsplit('/');
    d.order.id = segments
        .next()
        .and_then(|id| id.parse::<u64>().ok())
        .unwrap_or(0);
    d.order.coordinator_short_alias = segments
        .next()
        .and_then(|identifier| ctx.directory.alias_for_identifier(identifier))
        .map(str::to_string);
}
