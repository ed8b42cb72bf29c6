//! External USD ticker feed
//!
//! [`PriceFeed`] is the event contract the peg controller consumes:
//! subscribe by symbol, receive last-price updates. [`CoinbaseTickerFeed`]
//! implements it over the Coinbase exchange WebSocket (`<SYM>-USD` tickers).
//! Dropping the returned stream closes the connection.
//!
//! Created: 2026-02-05

use crate::chain::EventStream;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

#[derive(Debug, Clone, PartialEq)]
pub struct TickerUpdate {
    /// Base asset symbol, e.g. `BTC`
    pub symbol: String,
    pub last_price: f64,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn subscribe(&self, symbols: &[String]) -> Result<EventStream<TickerUpdate>>;
}

pub struct CoinbaseTickerFeed {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseMessage {
    #[serde(rename = "type")]
    kind: String,
    product_id: Option<String>,
    price: Option<String>,
    message: Option<String>,
}

impl CoinbaseTickerFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn subscribe_message(symbols: &[String]) -> String {
        let products: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}-USD", s.to_uppercase()))
            .collect();
        serde_json::json!({
            "type": "subscribe",
            "product_ids": products,
            "channels": ["ticker"],
        })
        .to_string()
    }

    fn parse(text: &str) -> Option<TickerUpdate> {
        let msg: CoinbaseMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!("Unparsable ticker message: {}", e);
                return None;
            }
        };
        match msg.kind.as_str() {
            "ticker" => {
                let product = msg.product_id?;
                let symbol = product.strip_suffix("-USD")?.to_string();
                let last_price = msg.price?.parse::<f64>().ok()?;
                (last_price > 0.0).then_some(TickerUpdate { symbol, last_price })
            }
            "error" => {
                warn!("Ticker feed error: {}", msg.message.unwrap_or_default());
                None
            }
            _ => None,
        }
    }
}

impl Default for CoinbaseTickerFeed {
    fn default() -> Self {
        Self::new(COINBASE_WS_URL)
    }
}

#[async_trait]
impl PriceFeed for CoinbaseTickerFeed {
    async fn subscribe(&self, symbols: &[String]) -> Result<EventStream<TickerUpdate>> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to ticker feed {}", self.url))?;

        ws.send(Message::Text(Self::subscribe_message(symbols)))
            .await
            .context("Failed to send ticker subscription")?;
        info!("📡 Ticker feed subscribed: {:?}", symbols);

        let stream = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Self::parse(&text),
                Ok(_) => None,
                Err(e) => {
                    warn!("Ticker feed read error: {}", e);
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker() {
        let text = r#"{"type":"ticker","sequence":1,"product_id":"BTC-USD","price":"67012.45","best_bid":"67012.44"}"#;
        assert_eq!(
            CoinbaseTickerFeed::parse(text),
            Some(TickerUpdate {
                symbol: "BTC".to_string(),
                last_price: 67012.45
            })
        );
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert!(CoinbaseTickerFeed::parse(r#"{"type":"subscriptions","channels":[]}"#).is_none());
        assert!(CoinbaseTickerFeed::parse(r#"{"type":"ticker","product_id":"BTC-EUR","price":"1"}"#).is_none());
        assert!(CoinbaseTickerFeed::parse(r#"{"type":"ticker","product_id":"ETH-USD","price":"abc"}"#).is_none());
        assert!(CoinbaseTickerFeed::parse(r#"{"type":"error","message":"bad"}"#).is_none());
        assert!(CoinbaseTickerFeed::parse("not json").is_none());
    }

    #[test]
    fn test_subscribe_message() {
        let msg = CoinbaseTickerFeed::subscribe_message(&["btc".to_string(), "ETH".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["type"], "subscribe");
        assert_eq!(v["product_ids"][0], "BTC-USD");
        assert_eq!(v["product_ids"][1], "ETH-USD");
    }
}
