//! Bybit v5 WebSocket codec.
//!
//! Channels are dotted topics (`orderbook.50.BTCUSDT`, `publicTrade.BTCUSDT`,
//! `order`); the topic string is the [`ChannelKey`]. Operation replies do not
//! echo the topic, only the `req_id`, so each request id is remembered until
//! its reply arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use serde_json::{Value, json};
use wsmux_core::ws::Frame;
use wsmux_core::{ChannelKey, ChannelRequest, ControlEvent, Envelope, MuxError, Result, WireCodec};

use super::config::{BybitCredentials, to_bybit_symbol};
use crate::auth::{hmac_sha256_hex, now_ms};
use crate::event::{BookUpdate, FeedData, FeedEvent, Side, Ticker, Trade};
use crate::json_util::{field_string, parse_levels, parse_str_f64, parse_str_u64};

/// Validity window of the auth signature.
const AUTH_EXPIRY_MS: u64 = 10_000;

#[derive(Debug, Clone)]
enum PendingOp {
    Subscribe(ChannelKey),
    Unsubscribe(ChannelKey),
}

pub struct BybitCodec {
    credentials: Option<BybitCredentials>,
    next_id: AtomicU64,
    pending: Mutex<AHashMap<String, PendingOp>>,
}

/// Topic for `request`: name and arguments joined by `.`; the last argument
/// is the symbol and is normalized.
pub fn topic(request: &ChannelRequest) -> String {
    let mut topic = request.name.trim().to_string();
    let n = request.args.len();
    for (i, arg) in request.args.iter().enumerate() {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        topic.push('.');
        if i + 1 == n { topic.push_str(&to_bybit_symbol(arg)) } else { topic.push_str(arg) }
    }
    topic
}

impl BybitCodec {
    pub fn new(credentials: Option<BybitCredentials>) -> Self {
        Self { credentials, next_id: AtomicU64::new(1), pending: Mutex::new(AHashMap::new()) }
    }

    fn next_req_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn op(&self, op: &str, request: &ChannelRequest, pending: fn(ChannelKey) -> PendingOp) -> Frame {
        let topic = topic(request);
        let req_id = self.next_req_id();
        let frame = Frame::Text(json!({ "req_id": req_id, "op": op, "args": [topic] }).to_string());
        self.pending().insert(req_id, pending(ChannelKey::from_raw(topic)));
        frame
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, AHashMap<String, PendingOp>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self, req_id: &str) -> Option<PendingOp> {
        self.pending().remove(req_id)
    }

    fn decode_op(&self, op: &str, v: &Value) -> ControlEvent {
        let success = v.get("success").and_then(Value::as_bool).unwrap_or(true);
        let ret_msg = field_string(v, "ret_msg").unwrap_or_default();
        let pending = field_string(v, "req_id").and_then(|id| self.take_pending(&id));

        match (op, pending) {
            ("auth", _) if success => ControlEvent::LoginAck,
            ("auth", _) => ControlEvent::LoginError(ret_msg),
            (_, Some(PendingOp::Subscribe(key))) if success => ControlEvent::SubscribeAck(key),
            (_, Some(PendingOp::Subscribe(key))) => ControlEvent::SubscribeError { key, reason: ret_msg },
            (_, Some(PendingOp::Unsubscribe(key))) => ControlEvent::UnsubscribeAck(key),
            ("ping" | "pong", None) => ControlEvent::Heartbeat,
            (_, None) if !success => ControlEvent::Error(ret_msg),
            (_, None) => ControlEvent::Heartbeat,
        }
    }
}

impl WireCodec for BybitCodec {
    type Notification = FeedEvent;

    fn encode_subscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        if request.name.trim().is_empty() {
            return Err(MuxError::Encode("empty topic".into()));
        }
        Ok(self.op("subscribe", request, PendingOp::Subscribe))
    }

    fn encode_unsubscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        Ok(self.op("unsubscribe", request, PendingOp::Unsubscribe))
    }

    fn decode(&self, frame: &Frame) -> Result<Envelope<FeedEvent>> {
        let text = frame.as_text().ok_or_else(|| MuxError::Decode("unexpected binary frame".into()))?;
        let mut v: Value = serde_json::from_str(text).map_err(|e| MuxError::Decode(e.to_string()))?;

        if let Some(op) = v.get("op").and_then(Value::as_str) {
            return Ok(Envelope::Control(self.decode_op(op, &v)));
        }

        let topic = v
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| MuxError::Decode("message without op or topic".into()))?
            .to_string();
        let key = ChannelKey::from_raw(topic.as_str());
        let snapshot = v.get("type").and_then(Value::as_str) != Some("delta");
        let ts_ms = parse_str_u64(v.get("ts")).unwrap_or(0);
        let data = v.get_mut("data").map(Value::take).ok_or_else(|| MuxError::Decode(format!("{key}: no data")))?;

        let data = match topic.split('.').next().unwrap_or_default() {
            "orderbook" => FeedData::Book(parse_book(&data, snapshot, ts_ms).ok_or_else(|| bad_payload(&key))?),
            "publicTrade" => FeedData::Trades(parse_trades(&data).ok_or_else(|| bad_payload(&key))?),
            "tickers" => FeedData::Ticker(parse_ticker(&data, ts_ms).ok_or_else(|| bad_payload(&key))?),
            _ => FeedData::Raw(Arc::new(data)),
        };
        Ok(Envelope::Data(FeedEvent { key, data }))
    }

    fn channel_key_of(&self, event: &FeedEvent) -> Option<ChannelKey> {
        Some(event.key.clone())
    }

    fn subscription_key(&self, request: &ChannelRequest) -> ChannelKey {
        ChannelKey::from_raw(topic(request))
    }

    fn reset(&self) {
        self.pending().clear();
    }

    fn encode_login(&self) -> Result<Option<Frame>> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        let expires = now_ms() + AUTH_EXPIRY_MS;
        let signature = hmac_sha256_hex(&creds.secret_key, &format!("GET/realtime{expires}"))?;
        let auth = json!({
            "req_id": self.next_req_id(),
            "op": "auth",
            "args": [creds.api_key, expires, signature],
        });
        Ok(Some(Frame::Text(auth.to_string())))
    }
}

fn bad_payload(key: &ChannelKey) -> MuxError {
    MuxError::Decode(format!("{key}: unexpected payload shape"))
}

fn parse_book(data: &Value, snapshot: bool, ts_ms: u64) -> Option<BookUpdate> {
    Some(BookUpdate {
        symbol: data.get("s")?.as_str()?.to_string(),
        snapshot,
        bids: parse_levels(data.get("b")),
        asks: parse_levels(data.get("a")),
        seq: parse_str_u64(data.get("u")),
        ts_ms,
    })
}

fn parse_trades(data: &Value) -> Option<Vec<Trade>> {
    data.as_array()?
        .iter()
        .map(|d| {
            Some(Trade {
                symbol: d.get("s")?.as_str()?.to_string(),
                trade_id: field_string(d, "i")?,
                price: parse_str_f64(d.get("p"))?,
                size: parse_str_f64(d.get("v"))?,
                side: Side::parse(d.get("S")?.as_str()?)?,
                ts_ms: parse_str_u64(d.get("T"))?,
            })
        })
        .collect()
}

fn parse_ticker(data: &Value, ts_ms: u64) -> Option<Ticker> {
    Some(Ticker {
        symbol: data.get("symbol")?.as_str()?.to_string(),
        last: parse_str_f64(data.get("lastPrice")),
        bid_price: parse_str_f64(data.get("bid1Price")),
        bid_size: parse_str_f64(data.get("bid1Size")),
        ask_price: parse_str_f64(data.get("ask1Price")),
        ask_size: parse_str_f64(data.get("ask1Size")),
        ts_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(frame: Frame) -> Value {
        serde_json::from_str(frame.as_text().unwrap()).unwrap()
    }

    fn decode(codec: &BybitCodec, raw: &str) -> Envelope<FeedEvent> {
        codec.decode(&Frame::Text(raw.into())).unwrap()
    }

    #[test]
    fn topics_from_requests() {
        assert_eq!(topic(&ChannelRequest::new("orderbook", ["50", "btc-usdt"])), "orderbook.50.BTCUSDT");
        assert_eq!(topic(&ChannelRequest::new("publicTrade", ["ETHUSDT"])), "publicTrade.ETHUSDT");
        assert_eq!(topic(&ChannelRequest::new("order", Vec::<String>::new())), "order");
    }

    #[test]
    fn subscribe_ack_is_correlated_by_req_id() {
        let codec = BybitCodec::new(None);
        let req = ChannelRequest::new("orderbook", ["50", "BTCUSDT"]);
        let v = text(codec.encode_subscribe(&req).unwrap());
        assert_eq!(v["args"], json!(["orderbook.50.BTCUSDT"]));
        let req_id = v["req_id"].as_str().unwrap();

        let ack = format!(r#"{{"success":true,"ret_msg":"subscribe","conn_id":"c","req_id":"{req_id}","op":"subscribe"}}"#);
        assert_eq!(
            decode(&codec, &ack),
            Envelope::Control(ControlEvent::SubscribeAck(ChannelKey::from_raw("orderbook.50.BTCUSDT")))
        );
        // A duplicate reply no longer matches anything.
        assert_eq!(decode(&codec, &ack), Envelope::Control(ControlEvent::Heartbeat));
    }

    #[test]
    fn rejected_topic_becomes_subscribe_error() {
        let codec = BybitCodec::new(None);
        let v = text(codec.encode_subscribe(&ChannelRequest::new("foo", ["BAR"])).unwrap());
        let req_id = v["req_id"].as_str().unwrap();
        let nack = format!(
            r#"{{"success":false,"ret_msg":"error:handler not found,topic:foo.BAR","conn_id":"c","req_id":"{req_id}","op":"subscribe"}}"#
        );
        assert_eq!(
            decode(&codec, &nack),
            Envelope::Control(ControlEvent::SubscribeError {
                key: ChannelKey::from_raw("foo.BAR"),
                reason: "error:handler not found,topic:foo.BAR".into()
            })
        );
    }

    #[test]
    fn unsubscribe_ack() {
        let codec = BybitCodec::new(None);
        let v = text(codec.encode_unsubscribe(&ChannelRequest::new("tickers", ["BTCUSDT"])).unwrap());
        assert_eq!(v["op"], "unsubscribe");
        let req_id = v["req_id"].as_str().unwrap();
        let ack = format!(r#"{{"success":true,"ret_msg":"","conn_id":"c","req_id":"{req_id}","op":"unsubscribe"}}"#);
        assert_eq!(
            decode(&codec, &ack),
            Envelope::Control(ControlEvent::UnsubscribeAck(ChannelKey::from_raw("tickers.BTCUSDT")))
        );
    }

    #[test]
    fn reset_forgets_requests_of_the_previous_connection() {
        let codec = BybitCodec::new(None);
        let v = text(codec.encode_subscribe(&ChannelRequest::new("tickers", ["BTCUSDT"])).unwrap());
        codec.encode_unsubscribe(&ChannelRequest::new("tickers", ["ETHUSDT"])).unwrap();
        assert_eq!(codec.pending().len(), 2);

        codec.reset();
        assert!(codec.pending().is_empty());
        // A late reply from the old connection is not attributed to a channel.
        let req_id = v["req_id"].as_str().unwrap();
        let late = format!(r#"{{"success":true,"ret_msg":"","conn_id":"c","req_id":"{req_id}","op":"subscribe"}}"#);
        assert_eq!(decode(&codec, &late), Envelope::Control(ControlEvent::Heartbeat));
    }

    #[test]
    fn decodes_orderbook_delta() {
        let codec = BybitCodec::new(None);
        let raw = r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1700000000000,
            "data":{"s":"BTCUSDT","b":[["64000.5","0"]],"a":[["64001","1.2"]],"u":42,"seq":7},"cts":1699999999999}"#;
        let Envelope::Data(event) = decode(&codec, raw) else { panic!("expected data") };
        assert_eq!(event.key.as_str(), "orderbook.50.BTCUSDT");
        let FeedData::Book(book) = event.data else { panic!("expected book") };
        assert!(!book.snapshot);
        assert_eq!(book.seq, Some(42));
        assert_eq!(book.best_bid().unwrap().size, 0.0);
        assert_eq!(book.ts_ms, 1_700_000_000_000);
    }

    #[test]
    fn decodes_trades_and_tickers() {
        let codec = BybitCodec::new(None);
        let raw = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1700000000000,"data":[
            {"T":1700000000000,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"64000.1","L":"PlusTick",
             "i":"20f43950-d8dd-5b31-9112-a178eb6023af","BT":false}]}"#;
        let Envelope::Data(event) = decode(&codec, raw) else { panic!("expected data") };
        let FeedData::Trades(trades) = event.data else { panic!("expected trades") };
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].trade_id, "20f43950-d8dd-5b31-9112-a178eb6023af");

        let raw = r#"{"topic":"tickers.BTCUSDT","type":"delta","ts":1700000000001,"cs":1,
            "data":{"symbol":"BTCUSDT","bid1Price":"64000","bid1Size":"3.1"}}"#;
        let Envelope::Data(event) = decode(&codec, raw) else { panic!("expected data") };
        let FeedData::Ticker(t) = event.data else { panic!("expected ticker") };
        assert_eq!(t.bid_price, Some(64000.0));
        assert_eq!(t.last, None);
    }

    #[test]
    fn private_topics_are_raw() {
        let codec = BybitCodec::new(None);
        let raw = r#"{"id":"5923240c","topic":"order","creationTime":1672364262474,"data":[{"orderId":"1"}]}"#;
        let Envelope::Data(event) = decode(&codec, raw) else { panic!("expected data") };
        assert_eq!(event.key.as_str(), "order");
        assert!(matches!(event.data, FeedData::Raw(_)));
    }

    #[test]
    fn auth_frame_and_replies() {
        let codec = BybitCodec::new(Some(BybitCredentials { api_key: "key".into(), secret_key: "secret".into() }));
        let before = now_ms();
        let v = text(codec.encode_login().unwrap().unwrap());
        assert_eq!(v["op"], "auth");
        assert_eq!(v["args"][0], "key");
        let expires = v["args"][1].as_u64().unwrap();
        assert!(expires >= before + AUTH_EXPIRY_MS);
        let expected = hmac_sha256_hex("secret", &format!("GET/realtime{expires}")).unwrap();
        assert_eq!(v["args"][2], expected);

        assert_eq!(
            decode(&codec, r#"{"success":true,"ret_msg":"","op":"auth","conn_id":"c"}"#),
            Envelope::Control(ControlEvent::LoginAck)
        );
        assert_eq!(
            decode(&codec, r#"{"success":false,"ret_msg":"Invalid apikey","op":"auth","conn_id":"c"}"#),
            Envelope::Control(ControlEvent::LoginError("Invalid apikey".into()))
        );
    }

    #[test]
    fn pong_is_heartbeat() {
        let codec = BybitCodec::new(None);
        let pong = r#"{"success":true,"ret_msg":"pong","conn_id":"c","req_id":"ping","op":"ping"}"#;
        assert_eq!(decode(&codec, pong), Envelope::Control(ControlEvent::Heartbeat));
        let pong = r#"{"op":"pong","args":["1700000000000"],"conn_id":"c"}"#;
        assert_eq!(decode(&codec, pong), Envelope::Control(ControlEvent::Heartbeat));
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let codec = BybitCodec::new(None);
        for raw in ["not json", r#"{"hello":1}"#, r#"{"topic":"publicTrade.X","data":[{"p":"1"}]}"#] {
            assert!(matches!(codec.decode(&Frame::Text(raw.into())), Err(MuxError::Decode(_))), "{raw}");
        }
    }
}
