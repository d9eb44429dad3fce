//! OKX v5 WebSocket codec.
//!
//! Requests carry one channel argument each:
//!
//! ```json
//! {"id":"7","op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}
//! ```
//!
//! Pushes echo that argument under `arg`, so the [`ChannelKey`] is derived
//! from the argument object on both sides (`tickers:BTC-USDT`,
//! `orders:SPOT`). OKX error events do not echo the argument; they are
//! attributed to a channel through the request `id`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use serde_json::{Map, Value, json};
use wsmux_core::ws::Frame;
use wsmux_core::{ChannelKey, ChannelRequest, ControlEvent, Envelope, MuxError, Result, WireCodec};

use super::config::{OkxCredentials, to_okx_inst_id};
use crate::auth::{hmac_sha256_base64, now_ms};
use crate::event::{BookUpdate, FeedData, FeedEvent, Side, Ticker, Trade};
use crate::json_util::{field_string, parse_levels, parse_str_f64, parse_str_u64};

/// Argument fields that identify a subscription, in key order.
const KEY_FIELDS: &[&str] = &["instType", "instFamily", "instId", "ccy"];

pub struct OkxCodec {
    credentials: Option<OkxCredentials>,
    next_id: AtomicU64,
    /// Subscribe request id -> channel, until acknowledged or rejected.
    pending: Mutex<AHashMap<String, ChannelKey>>,
}

impl OkxCodec {
    pub fn new(credentials: Option<OkxCredentials>) -> Self {
        Self { credentials, next_id: AtomicU64::new(1), pending: Mutex::new(AHashMap::new()) }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, AHashMap<String, ChannelKey>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, op: &str, arg: Map<String, Value>) -> (String, Frame) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = Frame::Text(json!({ "id": id, "op": op, "args": [arg] }).to_string());
        (id, frame)
    }
}

/// Build the `args` entry for `request`.
pub fn channel_arg(request: &ChannelRequest) -> Result<Map<String, Value>> {
    let mut arg = Map::new();
    arg.insert("channel".into(), Value::String(request.name.clone()));
    match request.name.as_str() {
        "orders" | "positions" | "orders-algo" | "algo-advance" | "fills" => {
            let inst_type = request.arg(0).unwrap_or("ANY");
            arg.insert("instType".into(), Value::String(inst_type.to_ascii_uppercase()));
            if let Some(inst) = request.arg(1) {
                arg.insert("instId".into(), Value::String(to_okx_inst_id(inst)));
            }
        }
        "account" => {
            if let Some(ccy) = request.arg(0) {
                arg.insert("ccy".into(), Value::String(ccy.to_ascii_uppercase()));
            }
        }
        "balance_and_position" | "liquidation-warning" | "account-greeks" => {}
        "instruments" => {
            let inst_type =
                request.arg(0).ok_or_else(|| MuxError::Encode("instruments needs an instrument type".into()))?;
            arg.insert("instType".into(), Value::String(inst_type.to_ascii_uppercase()));
        }
        name => {
            let inst = request.arg(0).ok_or_else(|| MuxError::Encode(format!("{name} needs an instrument id")))?;
            arg.insert("instId".into(), Value::String(to_okx_inst_id(inst)));
        }
    }
    Ok(arg)
}

/// Channel key of an argument object (request or echoed `arg`).
pub fn key_of_arg(arg: &Value) -> Option<ChannelKey> {
    let channel = arg.get("channel")?.as_str()?;
    let parts = KEY_FIELDS.iter().filter_map(|f| arg.get(*f).and_then(Value::as_str));
    Some(ChannelKey::new(channel, parts))
}

impl WireCodec for OkxCodec {
    type Notification = FeedEvent;

    fn encode_subscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        let arg = channel_arg(request)?;
        let key = key_of_arg(&Value::Object(arg.clone())).unwrap_or_else(|| request.default_key());
        let (id, frame) = self.request("subscribe", arg);
        self.pending().insert(id, key);
        Ok(frame)
    }

    fn encode_unsubscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        Ok(self.request("unsubscribe", channel_arg(request)?).1)
    }

    fn decode(&self, frame: &Frame) -> Result<Envelope<FeedEvent>> {
        let text = frame.as_text().ok_or_else(|| MuxError::Decode("unexpected binary frame".into()))?;
        // Reply to the text keep-alive.
        if text == "pong" {
            return Ok(Envelope::Control(ControlEvent::Heartbeat));
        }
        let mut v: Value = serde_json::from_str(text).map_err(|e| MuxError::Decode(e.to_string()))?;

        if let Some(event) = v.get("event").and_then(Value::as_str) {
            return Ok(Envelope::Control(self.decode_event(event, &v)));
        }

        let arg = v.get("arg").ok_or_else(|| MuxError::Decode("message without event or arg".into()))?;
        let key = key_of_arg(arg).ok_or_else(|| MuxError::Decode("arg without channel".into()))?;
        let channel = key.channel().to_string();
        let snapshot = v.get("action").and_then(Value::as_str) != Some("update");
        let data = v.get_mut("data").map(Value::take).ok_or_else(|| MuxError::Decode(format!("{key}: no data")))?;

        let data = match channel.as_str() {
            "tickers" => FeedData::Ticker(parse_ticker(&data).ok_or_else(|| bad_payload(&key))?),
            "trades" | "trades-all" => FeedData::Trades(parse_trades(&data).ok_or_else(|| bad_payload(&key))?),
            "books" | "books5" | "bbo-tbt" | "books-l2-tbt" | "books50-l2-tbt" => {
                FeedData::Book(parse_book(&data, key.as_str(), snapshot).ok_or_else(|| bad_payload(&key))?)
            }
            _ => FeedData::Raw(Arc::new(data)),
        };
        Ok(Envelope::Data(FeedEvent { key, data }))
    }

    fn channel_key_of(&self, event: &FeedEvent) -> Option<ChannelKey> {
        Some(event.key.clone())
    }

    fn subscription_key(&self, request: &ChannelRequest) -> ChannelKey {
        channel_arg(request)
            .ok()
            .and_then(|arg| key_of_arg(&Value::Object(arg)))
            .unwrap_or_else(|| request.default_key())
    }

    fn reset(&self) {
        self.pending().clear();
    }

    fn encode_login(&self) -> Result<Option<Frame>> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        let timestamp = (now_ms() / 1000).to_string();
        let sign = hmac_sha256_base64(&creds.secret_key, &format!("{timestamp}GET/users/self/verify"))?;
        let login = json!({
            "op": "login",
            "args": [{
                "apiKey": creds.api_key,
                "passphrase": creds.passphrase,
                "timestamp": timestamp,
                "sign": sign,
            }]
        });
        Ok(Some(Frame::Text(login.to_string())))
    }
}

impl OkxCodec {
    fn decode_event(&self, event: &str, v: &Value) -> ControlEvent {
        let id = v.get("id").and_then(Value::as_str);
        let arg_key = v.get("arg").and_then(key_of_arg);
        let code = field_string(v, "code").unwrap_or_default();
        let msg = field_string(v, "msg").unwrap_or_default();

        match event {
            "subscribe" => {
                let mut pending = self.pending();
                match (id, &arg_key) {
                    (Some(id), _) => {
                        pending.remove(id);
                    }
                    // Acks without an id are matched by their argument.
                    (None, Some(key)) => pending.retain(|_, pending_key| pending_key != key),
                    (None, None) => {}
                }
                arg_key.map_or(ControlEvent::Heartbeat, ControlEvent::SubscribeAck)
            }
            "unsubscribe" => arg_key.map_or(ControlEvent::Heartbeat, ControlEvent::UnsubscribeAck),
            "login" if code.is_empty() || code == "0" => ControlEvent::LoginAck,
            "login" => ControlEvent::LoginError(format!("{code}: {msg}")),
            "error" => {
                let key = id.and_then(|id| self.pending().remove(id)).or(arg_key);
                match key {
                    Some(key) => ControlEvent::SubscribeError { key, reason: format!("{code}: {msg}") },
                    None => ControlEvent::Error(format!("{code}: {msg}")),
                }
            }
            "notice" | "channel-conn-count-error" => ControlEvent::Error(format!("{event} {code}: {msg}")),
            _ => ControlEvent::Heartbeat,
        }
    }
}

fn bad_payload(key: &ChannelKey) -> MuxError {
    MuxError::Decode(format!("{key}: unexpected payload shape"))
}

fn parse_ticker(data: &Value) -> Option<Ticker> {
    let d = data.as_array()?.first()?;
    Some(Ticker {
        symbol: d.get("instId")?.as_str()?.to_string(),
        last: parse_str_f64(d.get("last")),
        bid_price: parse_str_f64(d.get("bidPx")),
        bid_size: parse_str_f64(d.get("bidSz")),
        ask_price: parse_str_f64(d.get("askPx")),
        ask_size: parse_str_f64(d.get("askSz")),
        ts_ms: parse_str_u64(d.get("ts")).unwrap_or(0),
    })
}

fn parse_trades(data: &Value) -> Option<Vec<Trade>> {
    data.as_array()?
        .iter()
        .map(|d| {
            Some(Trade {
                symbol: d.get("instId")?.as_str()?.to_string(),
                trade_id: field_string(d, "tradeId")?,
                price: parse_str_f64(d.get("px"))?,
                size: parse_str_f64(d.get("sz"))?,
                side: Side::parse(d.get("side")?.as_str()?)?,
                ts_ms: parse_str_u64(d.get("ts"))?,
            })
        })
        .collect()
}

fn parse_book(data: &Value, key: &str, snapshot: bool) -> Option<BookUpdate> {
    let d = data.as_array()?.first()?;
    let symbol = d
        .get("instId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| key.rsplit(':').next().unwrap_or(key).to_string());
    Some(BookUpdate {
        symbol,
        snapshot,
        bids: parse_levels(d.get("bids")),
        asks: parse_levels(d.get("asks")),
        seq: parse_str_u64(d.get("seqId")),
        ts_ms: parse_str_u64(d.get("ts"))?,
    })
}
