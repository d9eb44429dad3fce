//! Normalized notifications produced by the exchange codecs.
//!
//! Market channels with a well-known shape (tickers, trades, order books)
//! are decoded into typed structs; everything else, including private
//! account channels, is passed through as raw JSON.

use std::fmt;
use std::sync::Arc;

use wsmux_core::ChannelKey;

/// One decoded push for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    /// Channel the push belongs to.
    pub key: ChannelKey,
    pub data: FeedData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedData {
    Ticker(Ticker),
    Trades(Vec<Trade>),
    Book(BookUpdate),
    /// Channel without a typed model; the `data` payload as sent.
    Raw(Arc<serde_json::Value>),
}

impl FeedData {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ticker(_) => "ticker",
            Self::Trades(_) => "trades",
            Self::Book(_) => "book",
            Self::Raw(_) => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse `"buy"`/`"Buy"`/`"sell"`/`"Sell"`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Self::Sell)
        } else {
            None
        }
    }
}

/// Best bid/ask and last price. Fields absent from a delta push are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub last: Option<f64>,
    pub bid_price: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_price: Option<f64>,
    pub ask_size: Option<f64>,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: String,
    pub price: f64,
    pub size: f64,
    /// Taker side.
    pub side: Side,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot or incremental update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookUpdate {
    pub symbol: String,
    /// Full book (`true`) or delta to apply (`false`).
    pub snapshot: bool,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    /// Exchange sequence / update id, when provided.
    pub seq: Option<u64>,
    pub ts_ms: u64,
}

impl BookUpdate {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }
}

impl fmt::Display for FeedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            FeedData::Ticker(t) => write!(
                f,
                "{} last={:?} bid={:?}@{:?} ask={:?}@{:?}",
                self.key, t.last, t.bid_price, t.bid_size, t.ask_price, t.ask_size
            ),
            FeedData::Trades(trades) => match trades.last() {
                Some(t) => write!(f, "{} {} trade(s), last {:?} {}@{}", self.key, trades.len(), t.side, t.size, t.price),
                None => write!(f, "{} 0 trades", self.key),
            },
            FeedData::Book(b) => {
                let bid = b.best_bid().map(|l| l.price);
                let ask = b.best_ask().map(|l| l.price);
                let kind = if b.snapshot { "snapshot" } else { "delta" };
                write!(f, "{} book {kind} bid={bid:?} ask={ask:?}", self.key)
            }
            FeedData::Raw(v) => write!(f, "{} {v}", self.key),
        }
    }
}
