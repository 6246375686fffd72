//! Symbol trading filters and quantization
//!
//! Every outbound order is clamped against the venue's `LOT_SIZE`,
//! `PRICE_FILTER` and `MIN_NOTIONAL` rules before it leaves the process.
//! Quantization is floor-based: a quantity is rounded *down* to the step
//! grid so the submitted order can never exceed the intended notional.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::VenueError;

/// Per-symbol trading rules, as cached from the venue's exchange info.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    pub symbol: String,
    /// Venue listing status; orders are only placed on `TRADING` symbols.
    pub status: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterViolation {
    BelowMinQty,
    AboveMaxQty,
    BelowMinNotional,
}

impl SymbolFilters {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING" || self.status == "Open"
    }

    /// Floor `qty` to the step-size grid.
    pub fn quantize_qty(&self, qty: Decimal) -> Decimal {
        quantize_floor(qty, self.step_size)
    }

    /// Floor `price` to the tick-size grid.
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize_floor(price, self.tick_size)
    }

    /// Validate an already-quantized order against min/max bounds.
    /// `price` is the reference price used for the notional check.
    pub fn validate(&self, qty: Decimal, price: Decimal) -> Result<(), FilterViolation> {
        if qty < self.min_qty {
            return Err(FilterViolation::BelowMinQty);
        }
        if self.max_qty > Decimal::ZERO && qty > self.max_qty {
            return Err(FilterViolation::AboveMaxQty);
        }
        if qty * price < self.min_notional {
            return Err(FilterViolation::BelowMinNotional);
        }
        Ok(())
    }
}

/// `floor(value / step) * step`, with the step's own scale.
pub fn quantize_floor(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Read-mostly cache of symbol filters with a TTL. Refresh is lazy on a
/// cache miss and eager when the venue reports the symbol as unknown.
pub struct FilterCache {
    ttl: Duration,
    inner: RwLock<HashMap<String, CachedEntry>>,
}

struct CachedEntry {
    filters: SymbolFilters,
    fetched_at: Instant,
}

impl FilterCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<SymbolFilters> {
        let map = self.inner.read().await;
        map.get(symbol).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.filters.clone())
            } else {
                None
            }
        })
    }

    pub async fn insert(&self, filters: SymbolFilters) {
        let mut map = self.inner.write().await;
        map.insert(
            filters.symbol.clone(),
            CachedEntry {
                filters,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn insert_all(&self, filters: Vec<SymbolFilters>) {
        let mut map = self.inner.write().await;
        let now = Instant::now();
        for f in filters {
            map.insert(
                f.symbol.clone(),
                CachedEntry {
                    filters: f,
                    fetched_at: now,
                },
            );
        }
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.inner.write().await.remove(symbol);
    }
}

impl FilterViolation {
    pub fn into_venue_error(self, symbol: &str) -> VenueError {
        match self {
            FilterViolation::BelowMinQty => VenueError::QtyOutOfBounds {
                code: 0,
                msg: format!("{symbol}: quantity below minQty"),
            },
            FilterViolation::AboveMaxQty => VenueError::QtyOutOfBounds {
                code: 0,
                msg: format!("{symbol}: quantity above maxQty"),
            },
            FilterViolation::BelowMinNotional => VenueError::NotionalTooSmall {
                code: 0,
                msg: format!("{symbol}: notional below minNotional"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "HYPEUSDT".to_string(),
            status: "TRADING".to_string(),
            step_size: dec!(0.01),
            tick_size: dec!(0.001),
            min_qty: dec!(0.01),
            max_qty: dec!(100000),
            min_notional: dec!(5),
        }
    }

    #[test]
    fn quantization_floors_to_grid() {
        let f = filters();
        assert_eq!(f.quantize_qty(dec!(3.17859)), dec!(3.17));
        assert_eq!(f.quantize_price(dec!(32.20049)), dec!(32.2));
        // Already on the grid: unchanged.
        assert_eq!(f.quantize_qty(dec!(3.17)), dec!(3.17));
    }

    #[test]
    fn quantization_law_holds() {
        // floor(target / step) * step, never above the target
        let f = filters();
        for raw in ["1.2345", "0.019999", "99.999"] {
            let target: Decimal = raw.parse().unwrap();
            let q = f.quantize_qty(target);
            assert!(q <= target);
            assert_eq!((q / f.step_size).fract(), Decimal::ZERO);
        }
    }

    #[test]
    fn validation_bounds() {
        let f = filters();
        assert_eq!(f.validate(dec!(0.001), dec!(30)), Err(FilterViolation::BelowMinQty));
        assert_eq!(
            f.validate(dec!(0.1), dec!(30)),
            Err(FilterViolation::BelowMinNotional)
        );
        assert!(f.validate(dec!(3.17), dec!(31.8)).is_ok());
    }

    #[tokio::test]
    async fn cache_ttl_expires() {
        let cache = FilterCache::new(Duration::from_millis(0));
        cache.insert(filters()).await;
        // Zero TTL: entry is immediately stale.
        assert!(cache.get("HYPEUSDT").await.is_none());

        let cache = FilterCache::new(Duration::from_secs(3600));
        cache.insert(filters()).await;
        assert!(cache.get("HYPEUSDT").await.is_some());
        cache.invalidate("HYPEUSDT").await;
        assert!(cache.get("HYPEUSDT").await.is_none());
    }
}
