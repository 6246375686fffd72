//! Binance USDⓈ-M Futures client
//!
//! Signed REST client implementing [`FuturesVenue`]. Requests are signed
//! with HMAC-SHA256 over the query string; every order create is
//! validated and floor-quantized against the cached symbol filters before
//! it is sent. Venue throttle responses pause the outbound lane and
//! retry; other transient transport failures retry up to the per-call
//! budget.

pub mod models;
pub mod stream;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::VenueError;
use crate::filters::{FilterCache, SymbolFilters};
use crate::rate_limit::RateLimiter;
use crate::types::{
    AccountTrade, AssetBalance, BookTop, FuturesOrderType, IncomeEvent, NewOrder, OrderSide,
    PlacedOrder, PositionRisk,
};
use crate::util::sign_hmac_sha256_hex;
use crate::FuturesVenue;

use models::{
    BookTicker, ExchangeInfo, FuturesBalance, Income, ListenKey, OrderResponse, PositionRiskV2,
    PremiumIndex, SymbolFilter, UserTrade,
};

const RECV_WINDOW: i64 = 5000;
const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FILTER_TTL: Duration = Duration::from_secs(3600);
const OUTBOUND_PER_SEC: usize = 10;

pub struct BinanceFuturesClient {
    client: reqwest::Client,
    api_url: String,
    stream_url: String,
    api_key: String,
    secret: String,
    filters: FilterCache,
    limiter: RateLimiter,
}

impl BinanceFuturesClient {
    pub fn new(api_url: &str, stream_url: &str, api_key: &str, secret: &str) -> Self {
        Self::with_filter_ttl(api_url, stream_url, api_key, secret, DEFAULT_FILTER_TTL)
    }

    pub fn with_filter_ttl(
        api_url: &str,
        stream_url: &str,
        api_key: &str,
        secret: &str,
        filter_ttl: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_url: api_url.trim_end_matches('/').to_string(),
            stream_url: stream_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            filters: FilterCache::new(filter_ttl),
            limiter: RateLimiter::new(OUTBOUND_PER_SEC),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: String,
        signed: bool,
    ) -> Result<Value, VenueError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let url = if signed {
                let timestamp = Utc::now().timestamp_millis();
                let query = if params.is_empty() {
                    format!("recvWindow={RECV_WINDOW}&timestamp={timestamp}")
                } else {
                    format!("{params}&recvWindow={RECV_WINDOW}&timestamp={timestamp}")
                };
                let signature = sign_hmac_sha256_hex(&self.secret, &query);
                format!("{}{}?{}&signature={}", self.api_url, path, query, signature)
            } else if params.is_empty() {
                format!("{}{}", self.api_url, path)
            } else {
                format!("{}{}?{}", self.api_url, path, params)
            };

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Accept", "application/json");
            if signed {
                req = req.header("X-MBX-APIKEY", &self.api_key);
            }

            let outcome: Result<Value, reqwest::Error> =
                match req.send().await {
                    Ok(resp) => resp.json().await,
                    Err(e) => Err(e),
                };

            match outcome {
                Ok(value) => {
                    if let Some(code) = value.get("code").and_then(Value::as_i64) {
                        if code < 0 {
                            let msg = value
                                .get("msg")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            let err = VenueError::from_binance_code(code, msg);
                            if err.is_rate_limit() {
                                self.limiter.penalize().await;
                                if attempt < MAX_ATTEMPTS {
                                    continue;
                                }
                            }
                            return Err(err);
                        }
                    }
                    self.limiter.record_success().await;
                    return Ok(value);
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                        warn!(?e, %path, attempt, "binance request failed, retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(VenueError::Transport(e));
                }
            }
        }
    }

    async fn refresh_filters(&self) -> Result<(), VenueError> {
        let value = self
            .request(Method::GET, "/fapi/v1/exchangeInfo", String::new(), false)
            .await?;
        let info: ExchangeInfo =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        let mut all = Vec::with_capacity(info.symbols.len());
        for symbol in info.symbols {
            all.push(symbol_filters_from_info(symbol)?);
        }
        self.filters.insert_all(all).await;
        Ok(())
    }

    fn parse_order(&self, value: Value) -> Result<PlacedOrder, VenueError> {
        let typed: OrderResponse = serde_json::from_value(value.clone())
            .map_err(|e| VenueError::Malformed(format!("order response: {e}")))?;
        Ok(PlacedOrder {
            order_id: typed.order_id.to_string(),
            client_order_id: typed.client_order_id,
            symbol: typed.symbol,
            status: typed.status,
            side: if typed.side == "BUY" {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            order_type: typed.order_type,
            orig_qty: typed.orig_qty,
            executed_qty: typed.executed_qty,
            avg_price: typed.avg_price,
            price: typed.price,
            stop_price: typed.stop_price,
            reduce_only: typed.reduce_only || typed.close_position,
            update_time: typed.update_time,
            raw: value,
        })
    }

    fn order_params(order: &NewOrder) -> String {
        let mut params = format!(
            "symbol={}&side={}&type={}&newClientOrderId={}",
            order.symbol,
            order.side.as_str(),
            order.order_type.as_str(),
            order.client_order_id
        );
        if let Some(qty) = order.quantity {
            params.push_str(&format!("&quantity={}", qty.normalize()));
        }
        if let Some(price) = order.price {
            params.push_str(&format!("&price={}", price.normalize()));
        }
        if order.order_type == FuturesOrderType::Limit {
            params.push_str("&timeInForce=GTC");
        }
        if let Some(stop) = order.stop_price {
            params.push_str(&format!("&stopPrice={}", stop.normalize()));
        }
        if order.close_position {
            params.push_str("&closePosition=true");
        } else if order.reduce_only {
            params.push_str("&reduceOnly=true");
        }
        params
    }
}

fn symbol_filters_from_info(info: models::SymbolInfo) -> Result<SymbolFilters, VenueError> {
    let mut step_size = Decimal::ZERO;
    let mut tick_size = Decimal::ZERO;
    let mut min_qty = Decimal::ZERO;
    let mut max_qty = Decimal::ZERO;
    let mut min_notional = Decimal::ZERO;

    let parse = |s: &str| -> Result<Decimal, VenueError> {
        s.parse()
            .map_err(|_| VenueError::Malformed(format!("bad filter value: {s}")))
    };

    for filter in &info.filters {
        match filter {
            SymbolFilter::LotSize {
                step_size: step,
                min_qty: min,
                max_qty: max,
            } => {
                step_size = parse(step)?;
                min_qty = parse(min)?;
                max_qty = parse(max)?;
            }
            SymbolFilter::PriceFilter { tick_size: tick } => {
                tick_size = parse(tick)?;
            }
            SymbolFilter::MinNotional { notional } => {
                min_notional = parse(notional)?;
            }
            SymbolFilter::Other => {}
        }
    }

    Ok(SymbolFilters {
        symbol: info.symbol,
        status: info.status,
        step_size,
        tick_size,
        min_qty,
        max_qty,
        min_notional,
    })
}

#[async_trait]
impl FuturesVenue for BinanceFuturesClient {
    fn venue_name(&self) -> &'static str {
        "binance"
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, VenueError> {
        if let Some(filters) = self.filters.get(symbol).await {
            return Ok(filters);
        }
        self.refresh_filters().await?;
        self.filters
            .get(symbol)
            .await
            .ok_or_else(|| VenueError::SymbolUnsupported(symbol.to_string()))
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                format!("symbol={symbol}"),
                false,
            )
            .await?;
        let index: PremiumIndex =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(index.mark_price)
    }

    async fn get_order_book_top(&self, symbol: &str) -> Result<BookTop, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/ticker/bookTicker",
                format!("symbol={symbol}"),
                false,
            )
            .await?;
        let ticker: BookTicker =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(BookTop {
            bid: ticker.bid_price,
            ask: ticker.ask_price,
        })
    }

    async fn create_futures_order(&self, order: &NewOrder) -> Result<PlacedOrder, VenueError> {
        let filters = self.get_symbol_filters(&order.symbol).await?;

        // Re-validate at the adapter boundary; the caller has already
        // quantized but this client is the last line before the wire.
        let mut order = order.clone();
        if let Some(qty) = order.quantity {
            let qty = filters.quantize_qty(qty);
            let reference = order.price.or(order.stop_price);
            if let Some(price) = reference {
                let price = filters.quantize_price(price);
                // Protective/reduce-only orders shrink an existing
                // position; the notional floor applies to entries only.
                if !order.reduce_only && !order.close_position {
                    filters
                        .validate(qty, price)
                        .map_err(|v| v.into_venue_error(&order.symbol))?;
                }
            } else if qty < filters.min_qty
                || (filters.max_qty > Decimal::ZERO && qty > filters.max_qty)
            {
                return Err(VenueError::QtyOutOfBounds {
                    code: 0,
                    msg: format!("{}: quantity outside lot bounds", order.symbol),
                });
            }
            order.quantity = Some(qty);
        }
        if let Some(price) = order.price {
            order.price = Some(filters.quantize_price(price));
        }
        if let Some(stop) = order.stop_price {
            order.stop_price = Some(filters.quantize_price(stop));
        }

        let params = Self::order_params(&order);
        debug!(symbol = %order.symbol, %params, "submitting futures order");
        let result = self
            .request(Method::POST, "/fapi/v1/order", params, true)
            .await;
        match result {
            Ok(value) => self.parse_order(value),
            Err(err) => {
                // Unknown symbol means the cached filters are stale.
                if matches!(err, VenueError::SymbolUnsupported(_)) {
                    self.filters.invalidate(&order.symbol).await;
                }
                Err(err)
            }
        }
    }

    async fn cancel_futures_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError> {
        let value = self
            .request(
                Method::DELETE,
                "/fapi/v1/order",
                format!("symbol={symbol}&orderId={order_id}"),
                true,
            )
            .await?;
        self.parse_order(value)
    }

    async fn cancel_all_futures_orders(&self, symbol: &str) -> Result<(), VenueError> {
        self.request(
            Method::DELETE,
            "/fapi/v1/allOpenOrders",
            format!("symbol={symbol}"),
            true,
        )
        .await?;
        Ok(())
    }

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/order",
                format!("symbol={symbol}&orderId={order_id}"),
                true,
            )
            .await?;
        self.parse_order(value)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>, VenueError> {
        let params = symbol.map(|s| format!("symbol={s}")).unwrap_or_default();
        let value = self
            .request(Method::GET, "/fapi/v1/openOrders", params, true)
            .await?;
        let Value::Array(items) = value else {
            return Err(VenueError::Malformed("openOrders: expected array".into()));
        };
        items.into_iter().map(|v| self.parse_order(v)).collect()
    }

    async fn get_position_risk(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionRisk>, VenueError> {
        let params = symbol.map(|s| format!("symbol={s}")).unwrap_or_default();
        let value = self
            .request(Method::GET, "/fapi/v2/positionRisk", params, true)
            .await?;
        let positions: Vec<PositionRiskV2> =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(positions
            .into_iter()
            .map(|p| PositionRisk {
                symbol: p.symbol,
                position_amt: p.position_amt,
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_pnl,
                leverage: p.leverage as u32,
                update_time: p.update_time,
            })
            .collect())
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError> {
        self.request(
            Method::POST,
            "/fapi/v1/leverage",
            format!("symbol={symbol}&leverage={leverage}"),
            true,
        )
        .await?;
        Ok(())
    }

    async fn change_position_tpsl_mode(
        &self,
        _symbol: &str,
        _enabled: bool,
    ) -> Result<bool, VenueError> {
        // Position-scoped TP/SL on this venue is expressed per order via
        // closePosition=true; there is no account switch to flip.
        Ok(true)
    }

    async fn get_income(&self, start_ms: i64, end_ms: i64) -> Result<Vec<IncomeEvent>, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/income",
                format!("startTime={start_ms}&endTime={end_ms}&limit=1000"),
                true,
            )
            .await?;
        let incomes: Vec<Income> =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(incomes
            .into_iter()
            .map(|i| IncomeEvent {
                time: i.time,
                income_type: i.income_type,
                income: i.income,
                asset: i.asset,
                symbol: i.symbol,
            })
            .collect())
    }

    async fn get_account_trades(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<AccountTrade>, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/userTrades",
                format!("symbol={symbol}&startTime={start_ms}&endTime={end_ms}&limit=1000"),
                true,
            )
            .await?;
        let trades: Vec<UserTrade> =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(trades
            .into_iter()
            .map(|t| AccountTrade {
                symbol: t.symbol,
                order_id: t.order_id.to_string(),
                side: if t.side == "BUY" {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                price: t.price,
                qty: t.qty,
                realized_pnl: t.realized_pnl,
                commission: t.commission,
                commission_asset: t.commission_asset,
                time: t.time,
            })
            .collect())
    }

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, VenueError> {
        let value = self
            .request(Method::GET, "/fapi/v2/balance", String::new(), true)
            .await?;
        let balances: Vec<FuturesBalance> =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(balances
            .into_iter()
            .map(|b| AssetBalance {
                asset: b.asset,
                free: b.available_balance,
                locked: (b.balance - b.available_balance).max(0.0),
                total: b.balance,
                unrealized_pnl: b.cross_un_pnl,
            })
            .collect())
    }

    async fn start_user_data_stream(&self) -> Result<String, VenueError> {
        let value = self
            .request(Method::POST, "/fapi/v1/listenKey", String::new(), true)
            .await?;
        let key: ListenKey =
            serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))?;
        Ok(key.listen_key)
    }

    async fn keepalive_user_data_stream(&self) -> Result<(), VenueError> {
        self.request(Method::PUT, "/fapi/v1/listenKey", String::new(), true)
            .await?;
        Ok(())
    }

    async fn close_user_data_stream(&self) -> Result<(), VenueError> {
        self.request(Method::DELETE, "/fapi/v1/listenKey", String::new(), true)
            .await?;
        Ok(())
    }

    fn user_stream_url(&self, listen_key: &str) -> String {
        format!("{}/ws/{}", self.stream_url, listen_key)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn exchange_info_body() -> &'static str {
        r#"{
            "symbols": [{
                "symbol": "HYPEUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "PRICE_FILTER", "tickSize": "0.001"},
                    {"filterType": "LOT_SIZE", "stepSize": "0.01", "minQty": "0.01", "maxQty": "100000"},
                    {"filterType": "MIN_NOTIONAL", "notional": "5"}
                ]
            }]
        }"#
    }

    fn client(url: &str) -> BinanceFuturesClient {
        BinanceFuturesClient::new(url, "wss://example.invalid", "key", "secret")
    }

    #[tokio::test]
    async fn fetches_and_caches_filters() {
        let mut server = mockito::Server::new_async().await;
        let info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(exchange_info_body())
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url());
        let filters = client.get_symbol_filters("HYPEUSDT").await.unwrap();
        assert_eq!(filters.step_size, dec!(0.01));
        assert_eq!(filters.min_notional, dec!(5));

        // Second lookup is served from the cache.
        client.get_symbol_filters("HYPEUSDT").await.unwrap();
        info.assert_async().await;
    }

    #[tokio::test]
    async fn placement_quantizes_and_returns_order_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(exchange_info_body())
            .create_async()
            .await;
        let order_mock = server
            .mock("POST", "/fapi/v1/order")
            .match_query(mockito::Matcher::Regex("quantity=3.17&".into()))
            .with_body(
                r#"{"orderId": 42, "clientOrderId": "pp-1", "symbol": "HYPEUSDT",
                    "status": "NEW", "price": "32.2", "avgPrice": "0",
                    "origQty": "3.17", "executedQty": "0", "stopPrice": "0",
                    "side": "BUY", "type": "LIMIT", "reduceOnly": false,
                    "closePosition": false, "updateTime": 1}"#,
            )
            .create_async()
            .await;

        let client = client(&server.url());
        let order = NewOrder::limit(
            "HYPEUSDT",
            OrderSide::Buy,
            dec!(3.1786),
            dec!(32.2),
            "pp-1".to_string(),
        );
        let placed = client.create_futures_order(&order).await.unwrap();
        assert_eq!(placed.order_id, "42");
        assert_eq!(placed.raw["orderId"], 42);
        order_mock.assert_async().await;
    }

    #[tokio::test]
    async fn margin_error_classifies() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(exchange_info_body())
            .create_async()
            .await;
        server
            .mock("POST", "/fapi/v1/order")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"code": -2019, "msg": "Margin is insufficient."}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let order = NewOrder::market("HYPEUSDT", OrderSide::Buy, dec!(3.17), "pp-2".to_string());
        let err = client.create_futures_order(&order).await.unwrap_err();
        assert!(matches!(err, VenueError::MarginInsufficient { .. }));
        assert!(err.is_terminal_placement_failure());
    }

    #[tokio::test]
    async fn sub_min_notional_is_rejected_before_the_wire() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(exchange_info_body())
            .create_async()
            .await;
        // No order mock: a request reaching the wire would 501.

        let client = client(&server.url());
        let order = NewOrder::limit(
            "HYPEUSDT",
            OrderSide::Buy,
            dec!(0.1),
            dec!(30),
            "pp-3".to_string(),
        );
        let err = client.create_futures_order(&order).await.unwrap_err();
        assert!(matches!(err, VenueError::NotionalTooSmall { .. }));
    }

    #[tokio::test]
    async fn listen_key_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/fapi/v1/listenKey")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"listenKey": "abcdef"}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let key = client.start_user_data_stream().await.unwrap();
        assert_eq!(key, "abcdef");
        assert_eq!(
            client.user_stream_url(&key),
            "wss://example.invalid/ws/abcdef"
        );
    }
}
