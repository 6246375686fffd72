//! Reference pricing and symbol resolution
//!
//! A thin read-mostly cache over the venue mark price, plus the
//! coin-to-pair mapping and the listed/TRADING check every open goes
//! through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use venue_client::{FuturesVenue, SymbolFilters, VenueError};

const PRICE_TTL: Duration = Duration::from_secs(5);

pub struct PriceService {
    venue: Arc<dyn FuturesVenue>,
    cache: RwLock<HashMap<String, (f64, Instant)>>,
}

impl PriceService {
    pub fn new(venue: Arc<dyn FuturesVenue>) -> Self {
        Self {
            venue,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Venue trading pair for a signal's coin symbol.
    pub fn resolve_pair(coin_symbol: &str) -> String {
        format!("{}USDT", coin_symbol.to_uppercase())
    }

    /// Filters for the pair, rejecting symbols that are delisted or
    /// suspended.
    pub async fn ensure_tradable(&self, pair: &str) -> Result<SymbolFilters, VenueError> {
        let filters = self.venue.get_symbol_filters(pair).await?;
        if !filters.is_trading() {
            return Err(VenueError::SymbolUnsupported(format!(
                "{pair} not trading (status {})",
                filters.status
            )));
        }
        Ok(filters)
    }

    /// Mark price with a short TTL; the gate tolerances are far wider
    /// than seconds of drift.
    pub async fn reference_price(&self, pair: &str) -> Result<f64, VenueError> {
        {
            let cache = self.cache.read().await;
            if let Some((price, at)) = cache.get(pair) {
                if at.elapsed() < PRICE_TTL {
                    return Ok(*price);
                }
            }
        }
        let price = self.venue.get_mark_price(pair).await?;
        self.cache
            .write()
            .await
            .insert(pair.to_string(), (price, Instant::now()));
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_resolution_uppercases() {
        assert_eq!(PriceService::resolve_pair("hype"), "HYPEUSDT");
        assert_eq!(PriceService::resolve_pair("ETH"), "ETHUSDT");
    }
}
