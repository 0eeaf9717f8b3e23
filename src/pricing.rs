//! Off-chain token price listings
//!
//! Fetches an exchange's token price listing to put a value on position
//! amounts and pending rewards. Prices are optional everywhere: a missing
//! listing, a missing token or a malformed entry means "value unknown",
//! never a failed request.
//!
//! Accepted shapes:
//! - `{"tokens": [{"address": "0x..", "price": 1.23}, ...]}`
//! - `[{"id": "0x..", "price": "1.23"}, ...]`

use alloy_primitives::Address;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::exchanges::ExchangeDescriptor;
use crate::range::TokenAmounts;

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingResponse {
    Wrapped { tokens: Vec<Value> },
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    #[serde(alias = "id")]
    address: String,
    price: Value,
}

impl ListingEntry {
    fn parse(self) -> Option<(Address, f64)> {
        let address = Address::from_str(self.address.trim()).ok()?;
        let price = match self.price {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (price.is_finite() && price >= 0.0).then_some((address, price))
    }
}

// ============================================
// LISTING
// ============================================

#[derive(Debug, Clone, Default)]
pub struct PriceListing {
    prices: HashMap<Address, f64>,
}

impl PriceListing {
    pub fn parse(body: &str) -> Result<Self> {
        let response: ListingResponse =
            serde_json::from_str(body).map_err(|e| Error::transient(format!("malformed price listing: {}", e)))?;

        let entries = match response {
            ListingResponse::Wrapped { tokens } => tokens,
            ListingResponse::Bare(tokens) => tokens,
        };

        let mut prices = HashMap::new();
        let mut skipped = 0;
        for entry in entries {
            match serde_json::from_value::<ListingEntry>(entry).ok().and_then(ListingEntry::parse) {
                Some((address, price)) => {
                    prices.insert(address, price);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            trace!("Skipped {} unparseable price entries", skipped);
        }

        Ok(Self { prices })
    }

    pub fn price_of(&self, token: &Address) -> Option<f64> {
        self.prices.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Value of both legs, known only if both tokens are priced
    pub fn value_of_amounts(&self, token0: &Address, token1: &Address, amounts: &TokenAmounts) -> Option<f64> {
        let value0 = self.price_of(token0)? * amounts.amount0_f64();
        let value1 = self.price_of(token1)? * amounts.amount1_f64();
        Some(value0 + value1)
    }
}

// ============================================
// CLIENT
// ============================================

pub struct PriceClient {
    http_client: Client,
}

impl PriceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Listing for the exchange, `Ok(None)` if it has no price API configured
    pub async fn fetch_prices(&self, exchange: &ExchangeDescriptor) -> Result<Option<PriceListing>> {
        let Some(url) = exchange.price_api.as_deref() else {
            return Ok(None);
        };

        let body = self.http_client.get(url).send().await?.error_for_status()?.text().await?;
        let listing = PriceListing::parse(&body)?;

        debug!("Fetched {} token prices for {}", listing.len(), exchange.exchange);
        Ok(Some(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, U256};

    const WETH: Address = address!("e5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f");
    const USDC: Address = address!("176211869cA2b568f2A7D4EE941E073a821EE1ff");

    #[test]
    fn test_parse_wrapped_listing() {
        let body = r#"{"tokens": [
            {"address": "0xe5d7c2a44ffddf6b295a15c148167daaaf5cf34f", "price": 3500.5, "symbol": "WETH"},
            {"address": "0x176211869cA2b568f2A7D4EE941E073a821EE1ff", "price": "1.0001"}
        ]}"#;
        let listing = PriceListing::parse(body).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing.price_of(&WETH), Some(3500.5));
        assert_eq!(listing.price_of(&USDC), Some(1.0001));
    }

    #[test]
    fn test_parse_bare_listing_with_id_alias() {
        let body = r#"[{"id": "0xe5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f", "price": 10}]"#;
        let listing = PriceListing::parse(body).unwrap();
        assert_eq!(listing.price_of(&WETH), Some(10.0));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let body = r#"{"tokens": [
            {"address": "not-an-address", "price": 1},
            {"address": "0xe5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f", "price": null},
            {"price": 4},
            {"address": "0x176211869cA2b568f2A7D4EE941E073a821EE1ff", "price": 1}
        ]}"#;
        let listing = PriceListing::parse(body).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.price_of(&WETH), None);
    }

    #[test]
    fn test_malformed_body_is_transient() {
        assert!(matches!(PriceListing::parse("<html>"), Err(Error::Transient(_))));
    }

    #[test]
    fn test_value_requires_both_prices() {
        let listing = PriceListing::parse(
            r#"[{"id": "0xe5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f", "price": 2000},
                {"id": "0x176211869cA2b568f2A7D4EE941E073a821EE1ff", "price": 1}]"#,
        )
        .unwrap();
        let amounts = TokenAmounts {
            amount0: U256::from(500_000_000_000_000_000u128),
            amount1: U256::from(250_000_000u64),
            decimals0: 18,
            decimals1: 6,
        };
        let value = listing.value_of_amounts(&WETH, &USDC, &amounts).unwrap();
        assert!((value - 1250.0).abs() < 1e-9);

        let partial = PriceListing::parse(r#"[{"id": "0xe5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f", "price": 2000}]"#)
            .unwrap();
        assert_eq!(partial.value_of_amounts(&WETH, &USDC, &amounts), None);
    }

    #[tokio::test]
    async fn test_no_price_api_is_none() {
        let client = PriceClient::new(Duration::from_secs(1)).unwrap();
        let descriptor = ExchangeDescriptor::builtin(crate::exchanges::Exchange::Nile);
        assert!(client.fetch_prices(&descriptor).await.unwrap().is_none());
    }
}
