// =============================================================================
// Decoder (C5) — stream-name classification and payload normalization
// =============================================================================
//
// Grounded on `market_data/trade_stream.rs::parse_agg_trade` and
// `market_data/orderbook.rs::parse_depth_message`'s string-or-number JSON
// field idiom, generalized from a single hard-coded stream kind into the
// full classification cascade of spec §4.5.
// =============================================================================

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Level, RawPayload, StreamKind, TradeEvent};

/// Parse a JSON value that may be a string or a number into `f64`, the way
/// Binance payloads mix both representations across endpoints.
fn parse_num(v: &Value) -> Option<f64> {
    if let Some(s) = v.as_str() {
        s.parse::<f64>().ok()
    } else {
        v.as_f64()
    }
}

fn parse_level(v: &Value) -> Option<Level> {
    let arr = v.as_array()?;
    let price = parse_num(arr.first()?)?;
    let qty = parse_num(arr.get(1)?)?;
    Some((price, qty))
}

fn parse_levels(v: &Value) -> Vec<Level> {
    v.as_array()
        .map(|arr| arr.iter().filter_map(parse_level).collect())
        .unwrap_or_default()
}

/// Stream suffix, e.g. `"btcusdt@aggtrade"` → `(AggTrade, "BTCUSDT")`.
fn classify_stream_name(name: &str) -> Option<(StreamKind, String)> {
    let (symbol, suffix) = name.split_once('@')?;
    let kind = match suffix.to_ascii_lowercase().as_str() {
        "aggtrade" => StreamKind::AggTrade,
        "ticker" => StreamKind::Ticker,
        "bookticker" => StreamKind::BookTicker,
        "depth5" | "depth5@100ms" => StreamKind::Depth5,
        _ => return None,
    };
    Some((kind, symbol.to_ascii_uppercase()))
}

/// Heuristic shape-based classification for raw (non-enveloped,
/// non-`"e"`-tagged) payloads (spec §4.5 step 4). Returns `None` for shapes
/// this core does not emit (`MarkPrice`, `Kline`, full depth) or cannot
/// recognize at all.
fn classify_by_shape(obj: &serde_json::Map<String, Value>) -> Option<StreamKind> {
    if obj.contains_key("a") && obj.contains_key("p") && obj.contains_key("q") {
        return Some(StreamKind::AggTrade);
    }
    if obj.contains_key("markPrice") || obj.contains_key("r") {
        return None; // MarkPrice — reserved, not emitted by this core.
    }
    if obj.contains_key("k") {
        return None; // Kline — reserved, not emitted by this core.
    }
    if obj.contains_key("b") && obj.contains_key("B") && obj.contains_key("a") && obj.contains_key("A") {
        return Some(StreamKind::BookTicker);
    }
    if let (Some(b), Some(a)) = (obj.get("b"), obj.get("a")) {
        if let (Some(bl), Some(al)) = (b.as_array(), a.as_array()) {
            if bl.len() <= 5 && al.len() <= 5 {
                return Some(StreamKind::Depth5);
            }
        }
        return None; // full depth — reserved, not emitted by this core.
    }
    None
}

/// Decode one JSON frame body into a normalized [`TradeEvent`], or `None`
/// when the frame carries no event (control ack, unrecognized shape, or a
/// reserved-but-not-emitted kind). Parse failures are logged and treated
/// the same as "no event" — the connection is always preserved.
pub fn decode_frame(now_ms: i64, body: &Value) -> Option<TradeEvent> {
    let obj = body.as_object()?;

    // 1. Control ack: {"result": ..., "id": ...}
    if obj.contains_key("result") && obj.contains_key("id") {
        return None;
    }

    // 2. Combined envelope: {"stream": name, "data": obj}
    if let (Some(stream), Some(data)) = (obj.get("stream").and_then(Value::as_str), obj.get("data")) {
        let (kind, symbol) = classify_stream_name(stream)?;
        return normalize(kind, &symbol, data, now_ms);
    }

    // 3. Raw payload with "e" field.
    if let Some(e) = obj.get("e").and_then(Value::as_str) {
        let symbol = obj.get("s").and_then(Value::as_str).unwrap_or_default().to_uppercase();
        let kind = match e {
            "aggTrade" => StreamKind::AggTrade,
            "24hrTicker" => StreamKind::Ticker,
            "depthUpdate" => {
                let b = obj.get("b").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
                let a = obj.get("a").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
                if b <= 5 && a <= 5 {
                    StreamKind::Depth5
                } else {
                    return None; // full depth — reserved, not emitted.
                }
            }
            _ => return None,
        };
        return normalize(kind, &symbol, body, now_ms);
    }

    // 4. Heuristic from shape.
    if let Some(kind) = classify_by_shape(obj) {
        let symbol = obj
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        return normalize(kind, &symbol, body, now_ms);
    }

    // 5. Otherwise → drop.
    None
}

fn normalize(kind: StreamKind, symbol: &str, data: &Value, now_ms: i64) -> Option<TradeEvent> {
    let event = match kind {
        StreamKind::AggTrade => normalize_agg_trade(symbol, data),
        StreamKind::Ticker => normalize_ticker(symbol, data),
        StreamKind::BookTicker => normalize_book_ticker(symbol, data, now_ms),
        StreamKind::Depth5 => normalize_depth5(symbol, data, now_ms),
    };

    match event {
        Ok(e) => match e.validate() {
            Ok(()) => Some(e),
            Err(err) => {
                warn!(%symbol, ?kind, error = %err, "decoded event failed validation");
                None
            }
        },
        Err(err) => {
            warn!(%symbol, ?kind, error = %err, "failed to normalize frame");
            None
        }
    }
}

fn normalize_agg_trade(symbol: &str, data: &Value) -> Result<TradeEvent, CoreError> {
    let price = parse_num(&data["p"]).ok_or_else(|| CoreError::ParseError("missing p".into()))?;
    let quantity = parse_num(&data["q"]).ok_or_else(|| CoreError::ParseError("missing q".into()))?;
    let is_maker = data["m"].as_bool().ok_or_else(|| CoreError::ParseError("missing m".into()))?;
    let timestamp_ms = data["T"].as_i64().ok_or_else(|| CoreError::ParseError("missing T".into()))?;
    let agg_id = data["a"].as_i64().ok_or_else(|| CoreError::ParseError("missing a".into()))?;

    Ok(TradeEvent {
        market: symbol.to_string(),
        stream_kind: StreamKind::AggTrade,
        price,
        quantity,
        total_value: price * quantity,
        is_buy: !is_maker,
        timestamp_ms,
        event_id: agg_id.to_string(),
        raw: RawPayload::default(),
    })
}

fn normalize_ticker(symbol: &str, data: &Value) -> Result<TradeEvent, CoreError> {
    let price = parse_num(&data["c"]).ok_or_else(|| CoreError::ParseError("missing c".into()))?;
    let quantity = parse_num(&data["v"]).ok_or_else(|| CoreError::ParseError("missing v".into()))?;
    let total_value = parse_num(&data["q"]).ok_or_else(|| CoreError::ParseError("missing q".into()))?;
    let timestamp_ms = data["E"].as_i64().ok_or_else(|| CoreError::ParseError("missing E".into()))?;

    Ok(TradeEvent {
        market: symbol.to_string(),
        stream_kind: StreamKind::Ticker,
        price,
        quantity,
        total_value,
        is_buy: true,
        timestamp_ms,
        event_id: format!("ticker_{symbol}_{timestamp_ms}"),
        raw: RawPayload {
            change_pct_24h: parse_num(&data["P"]),
            high_24h: parse_num(&data["h"]),
            low_24h: parse_num(&data["l"]),
            ..Default::default()
        },
    })
}

fn normalize_book_ticker(symbol: &str, data: &Value, now_ms: i64) -> Result<TradeEvent, CoreError> {
    let best_bid = parse_num(&data["b"]).ok_or_else(|| CoreError::ParseError("missing b".into()))?;
    let best_ask = parse_num(&data["a"]).ok_or_else(|| CoreError::ParseError("missing a".into()))?;
    let best_bid_qty = parse_num(&data["B"]).ok_or_else(|| CoreError::ParseError("missing B".into()))?;
    let best_ask_qty = parse_num(&data["A"]).ok_or_else(|| CoreError::ParseError("missing A".into()))?;
    let update_id = data["u"].as_u64();

    let price = (best_bid + best_ask) / 2.0;
    let avg_qty = (best_bid_qty + best_ask_qty) / 2.0;

    Ok(TradeEvent {
        market: symbol.to_string(),
        stream_kind: StreamKind::BookTicker,
        price,
        quantity: avg_qty,
        total_value: price * avg_qty,
        is_buy: true,
        timestamp_ms: now_ms,
        event_id: format!("book_{symbol}_{}", update_id.unwrap_or(0)),
        raw: RawPayload {
            best_bid: Some(best_bid),
            best_ask: Some(best_ask),
            best_bid_qty: Some(best_bid_qty),
            best_ask_qty: Some(best_ask_qty),
            update_id,
            ..Default::default()
        },
    })
}

fn normalize_depth5(symbol: &str, data: &Value, now_ms: i64) -> Result<TradeEvent, CoreError> {
    let bids = parse_levels(&data["b"]);
    let asks = parse_levels(&data["a"]);

    if bids.is_empty() && asks.is_empty() {
        return Err(CoreError::ParseError("depth payload has zero levels on both sides".into()));
    }

    let best_bid = bids.first().map(|(p, _)| *p).unwrap_or(0.0);
    let best_ask = asks.first().map(|(p, _)| *p).unwrap_or(best_bid);
    let bid_qty = bids.first().map(|(_, q)| *q).unwrap_or(0.0);
    let ask_qty = asks.first().map(|(_, q)| *q).unwrap_or(0.0);

    let price = if best_bid > 0.0 && best_ask > 0.0 {
        (best_bid + best_ask) / 2.0
    } else if best_bid > 0.0 {
        best_bid
    } else {
        best_ask
    };
    if !(price > 0.0) {
        return Err(CoreError::ParseError("depth payload yielded non-positive price".into()));
    }
    let quantity = (bid_qty + ask_qty) / 2.0;

    let timestamp_ms = data["E"].as_i64().unwrap_or(now_ms);
    let update_id = data["u"]
        .as_u64()
        .or_else(|| data["lastUpdateId"].as_u64())
        .unwrap_or(0);

    debug!(%symbol, bids = bids.len(), asks = asks.len(), "decoded depth5 frame");

    Ok(TradeEvent {
        market: symbol.to_string(),
        stream_kind: StreamKind::Depth5,
        price,
        quantity,
        total_value: price * quantity,
        is_buy: true,
        timestamp_ms,
        event_id: format!("depth_{symbol}_{update_id}"),
        raw: RawPayload {
            bids,
            asks,
            ..Default::default()
        },
    })
}
