//! KuCoin Futures client
//!
//! Same [`FuturesVenue`] contract as the Binance client. Differences the
//! engine must not see: requests are signed over
//! `timestamp + method + endpoint + body` with base64 HMAC headers,
//! leverage travels per order instead of per symbol, and there is no
//! position-scoped TP/SL mode, so `change_position_tpsl_mode` reports
//! `false` and protective orders always take the reduce-only stop path.

pub mod models;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use rust_decimal::prelude::FromPrimitive;
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
use crate::util::sign_hmac_sha256_base64;
use crate::FuturesVenue;

use models::{
    AccountOverview, BulletToken, Contract, Envelope, FillPage, MarkPrice, OrderAck, OrderDetail,
    OrderPage, Position, Ticker, TransactionPage,
};

const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FILTER_TTL: Duration = Duration::from_secs(3600);
const OUTBOUND_PER_SEC: usize = 10;

pub struct KuCoinFuturesClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    secret: String,
    passphrase: String,
    default_leverage: Mutex<u32>,
    stream_endpoint: Mutex<String>,
    filters: FilterCache,
    limiter: RateLimiter,
}

impl KuCoinFuturesClient {
    pub fn new(api_url: &str, api_key: &str, secret: &str, passphrase: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            passphrase: passphrase.to_string(),
            default_leverage: Mutex::new(1),
            stream_endpoint: Mutex::new(String::new()),
            filters: FilterCache::new(DEFAULT_FILTER_TTL),
            limiter: RateLimiter::new(OUTBOUND_PER_SEC),
        }
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Value, VenueError> {
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let timestamp = Utc::now().timestamp_millis().to_string();
            let to_sign = format!("{timestamp}{method}{endpoint}{body_str}");
            let signature = sign_hmac_sha256_base64(&self.secret, &to_sign);
            let passphrase = sign_hmac_sha256_base64(&self.secret, &self.passphrase);

            let mut req = self
                .client
                .request(method.clone(), format!("{}{}", self.api_url, endpoint))
                .header("KC-API-KEY", &self.api_key)
                .header("KC-API-SIGN", signature)
                .header("KC-API-TIMESTAMP", &timestamp)
                .header("KC-API-PASSPHRASE", passphrase)
                .header("KC-API-KEY-VERSION", "2")
                .header("Content-Type", "application/json");
            if !body_str.is_empty() {
                req = req.body(body_str.clone());
            }

            let outcome: Result<Envelope, reqwest::Error> = match req.send().await {
                Ok(resp) => resp.json().await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(envelope) if envelope.code == "200000" => {
                    self.limiter.record_success().await;
                    return Ok(envelope.data.unwrap_or(Value::Null));
                }
                Ok(envelope) => {
                    let msg = envelope.msg.unwrap_or_default();
                    let err = VenueError::from_kucoin_code(&envelope.code, msg);
                    if err.is_rate_limit() {
                        self.limiter.penalize().await;
                        if attempt < MAX_ATTEMPTS {
                            continue;
                        }
                    }
                    return Err(err);
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                        warn!(?e, %endpoint, attempt, "kucoin request failed, retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(VenueError::Transport(e));
                }
            }
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, VenueError> {
        serde_json::from_value(value).map_err(|e| VenueError::Malformed(e.to_string()))
    }

    fn order_from_detail(detail: OrderDetail, raw: Value) -> PlacedOrder {
        let status = if detail.is_active {
            if detail.deal_size > 0.0 {
                "PARTIALLY_FILLED"
            } else {
                "NEW"
            }
        } else if detail.cancel_exist {
            "CANCELED"
        } else if detail.deal_size >= detail.size && detail.size > 0.0 {
            "FILLED"
        } else {
            "EXPIRED"
        };
        let avg_price = if detail.deal_size > 0.0 {
            detail
                .deal_value
                .as_deref()
                .and_then(|v| v.parse::<f64>().ok())
                .map(|value| value / detail.deal_size)
                .unwrap_or(0.0)
        } else {
            0.0
        };
        PlacedOrder {
            order_id: detail.id,
            client_order_id: detail.client_oid,
            symbol: detail.symbol,
            status: status.to_string(),
            side: if detail.side.eq_ignore_ascii_case("buy") {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            order_type: detail.order_type.to_uppercase(),
            orig_qty: detail.size,
            executed_qty: detail.deal_size,
            avg_price,
            price: detail
                .price
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            stop_price: detail
                .stop_price
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            reduce_only: detail.reduce_only,
            update_time: detail.updated_at,
            raw,
        }
    }
}

#[async_trait]
impl FuturesVenue for KuCoinFuturesClient {
    fn venue_name(&self) -> &'static str {
        "kucoin"
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, VenueError> {
        if let Some(filters) = self.filters.get(symbol).await {
            return Ok(filters);
        }
        let value = self
            .request(
                Method::GET,
                &format!("/api/v1/contracts/{symbol}"),
                None,
            )
            .await?;
        let contract: Contract = Self::parse(value)?;
        let filters = SymbolFilters {
            symbol: contract.symbol.clone(),
            status: contract.status,
            step_size: Decimal::from_f64(contract.lot_size).unwrap_or(Decimal::ONE),
            tick_size: Decimal::from_f64(contract.tick_size).unwrap_or(Decimal::ONE),
            min_qty: Decimal::from_f64(contract.lot_size).unwrap_or(Decimal::ONE),
            max_qty: Decimal::from_f64(contract.max_order_qty).unwrap_or(Decimal::ZERO),
            min_notional: Decimal::ZERO,
        };
        self.filters.insert(filters.clone()).await;
        Ok(filters)
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let value = self
            .request(
                Method::GET,
                &format!("/api/v1/mark-price/{symbol}/current"),
                None,
            )
            .await?;
        let mark: MarkPrice = Self::parse(value)?;
        Ok(mark.value)
    }

    async fn get_order_book_top(&self, symbol: &str) -> Result<BookTop, VenueError> {
        let value = self
            .request(Method::GET, &format!("/api/v1/ticker?symbol={symbol}"), None)
            .await?;
        let ticker: Ticker = Self::parse(value)?;
        Ok(BookTop {
            bid: ticker.best_bid_price.parse().unwrap_or(0.0),
            ask: ticker.best_ask_price.parse().unwrap_or(0.0),
        })
    }

    async fn create_futures_order(&self, order: &NewOrder) -> Result<PlacedOrder, VenueError> {
        let filters = self.get_symbol_filters(&order.symbol).await?;

        let mut body = serde_json::json!({
            "clientOid": order.client_order_id,
            "symbol": order.symbol,
            "side": match order.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            "leverage": self.default_leverage.lock().map(|l| *l).unwrap_or(1).to_string(),
        });

        if let Some(qty) = order.quantity {
            let qty = filters.quantize_qty(qty);
            if !order.reduce_only {
                let reference = order.price.or(order.stop_price).unwrap_or(Decimal::ONE);
                filters
                    .validate(qty, reference)
                    .map_err(|v| v.into_venue_error(&order.symbol))?;
            }
            body["size"] = Value::from(qty.normalize().to_string());
        }
        match order.order_type {
            FuturesOrderType::Limit => {
                body["type"] = Value::from("limit");
                if let Some(price) = order.price {
                    body["price"] = Value::from(filters.quantize_price(price).normalize().to_string());
                }
            }
            FuturesOrderType::Market => {
                body["type"] = Value::from("market");
            }
            FuturesOrderType::StopMarket | FuturesOrderType::TakeProfitMarket => {
                body["type"] = Value::from("market");
                if let Some(stop) = order.stop_price {
                    // "down" triggers when the mark price falls to the
                    // stop, "up" when it rises; direction depends on which
                    // side the protective order exits.
                    let trigger = match (order.order_type, order.side) {
                        (FuturesOrderType::StopMarket, OrderSide::Sell) => "down",
                        (FuturesOrderType::StopMarket, OrderSide::Buy) => "up",
                        (_, OrderSide::Sell) => "up",
                        (_, OrderSide::Buy) => "down",
                    };
                    body["stop"] = Value::from(trigger);
                    body["stopPrice"] = Value::from(filters.quantize_price(stop).normalize().to_string());
                    body["stopPriceType"] = Value::from("MP");
                }
            }
        }
        if order.reduce_only || order.close_position {
            body["reduceOnly"] = Value::from(true);
        }

        debug!(symbol = %order.symbol, "submitting kucoin futures order");
        let value = self.request(Method::POST, "/api/v1/orders", Some(body)).await?;
        let ack: OrderAck = Self::parse(value.clone())?;
        Ok(PlacedOrder {
            order_id: ack.order_id,
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            status: "NEW".to_string(),
            side: order.side,
            order_type: order.order_type.as_str().to_string(),
            orig_qty: order
                .quantity
                .and_then(|q| q.normalize().to_string().parse().ok())
                .unwrap_or(0.0),
            executed_qty: 0.0,
            avg_price: 0.0,
            price: order
                .price
                .and_then(|p| p.normalize().to_string().parse().ok())
                .unwrap_or(0.0),
            stop_price: order
                .stop_price
                .and_then(|p| p.normalize().to_string().parse().ok())
                .unwrap_or(0.0),
            reduce_only: order.reduce_only || order.close_position,
            update_time: Utc::now().timestamp_millis(),
            raw: value,
        })
    }

    async fn cancel_futures_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError> {
        self.request(Method::DELETE, &format!("/api/v1/orders/{order_id}"), None)
            .await?;
        self.get_order_status(symbol, order_id).await
    }

    async fn cancel_all_futures_orders(&self, symbol: &str) -> Result<(), VenueError> {
        self.request(Method::DELETE, &format!("/api/v1/orders?symbol={symbol}"), None)
            .await?;
        self.request(
            Method::DELETE,
            &format!("/api/v1/stopOrders?symbol={symbol}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn get_order_status(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> Result<PlacedOrder, VenueError> {
        let value = self
            .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await?;
        let detail: OrderDetail = Self::parse(value.clone())?;
        Ok(Self::order_from_detail(detail, value))
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>, VenueError> {
        let endpoint = match symbol {
            Some(s) => format!("/api/v1/orders?status=active&symbol={s}"),
            None => "/api/v1/orders?status=active".to_string(),
        };
        let value = self.request(Method::GET, &endpoint, None).await?;
        let page: OrderPage = Self::parse(value)?;
        Ok(page
            .items
            .into_iter()
            .map(|detail| {
                let raw = serde_json::to_value(&detail.id).unwrap_or(Value::Null);
                Self::order_from_detail(detail, raw)
            })
            .collect())
    }

    async fn get_position_risk(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionRisk>, VenueError> {
        let positions: Vec<Position> = match symbol {
            Some(s) => {
                let value = self
                    .request(Method::GET, &format!("/api/v1/position?symbol={s}"), None)
                    .await?;
                vec![Self::parse(value)?]
            }
            None => {
                let value = self.request(Method::GET, "/api/v1/positions", None).await?;
                Self::parse(value)?
            }
        };
        Ok(positions
            .into_iter()
            .map(|p| PositionRisk {
                symbol: p.symbol,
                position_amt: p.current_qty,
                entry_price: p.avg_entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealised_pnl,
                leverage: p.real_leverage.round() as u32,
                update_time: p.current_timestamp,
            })
            .collect())
    }

    async fn change_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), VenueError> {
        // Leverage is an order attribute on this venue; remember it for
        // subsequent placements.
        if let Ok(mut slot) = self.default_leverage.lock() {
            *slot = leverage;
        }
        Ok(())
    }

    async fn change_position_tpsl_mode(
        &self,
        _symbol: &str,
        _enabled: bool,
    ) -> Result<bool, VenueError> {
        Ok(false)
    }

    async fn get_income(&self, start_ms: i64, end_ms: i64) -> Result<Vec<IncomeEvent>, VenueError> {
        let value = self
            .request(
                Method::GET,
                &format!("/api/v1/transaction-history?startAt={start_ms}&endAt={end_ms}&maxCount=100"),
                None,
            )
            .await?;
        let page: TransactionPage = Self::parse(value)?;
        Ok(page
            .data_list
            .into_iter()
            .map(|tx| IncomeEvent {
                time: tx.time,
                income_type: match tx.tx_type.as_str() {
                    "RealisedPNL" => "REALIZED_PNL".to_string(),
                    other => other.to_uppercase(),
                },
                income: tx.amount,
                asset: tx.currency,
                symbol: tx.remark,
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
                &format!("/api/v1/fills?symbol={symbol}&startAt={start_ms}&endAt={end_ms}"),
                None,
            )
            .await?;
        let page: FillPage = Self::parse(value)?;
        Ok(page
            .items
            .into_iter()
            .map(|fill| AccountTrade {
                symbol: fill.symbol,
                order_id: fill.order_id,
                side: if fill.side.eq_ignore_ascii_case("buy") {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                price: fill.price.parse().unwrap_or(0.0),
                qty: fill.size,
                realized_pnl: 0.0,
                commission: fill.fee.parse().unwrap_or(0.0),
                commission_asset: fill.fee_currency,
                time: fill.trade_time,
            })
            .collect())
    }

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, VenueError> {
        let value = self
            .request(
                Method::GET,
                "/api/v1/account-overview?currency=USDT",
                None,
            )
            .await?;
        let overview: AccountOverview = Self::parse(value)?;
        Ok(vec![AssetBalance {
            asset: overview.currency,
            free: overview.available_balance,
            locked: overview.order_margin + overview.position_margin,
            total: overview.account_equity,
            unrealized_pnl: overview.unrealised_pnl,
        }])
    }

    async fn start_user_data_stream(&self) -> Result<String, VenueError> {
        let value = self
            .request(Method::POST, "/api/v1/bullet-private", None)
            .await?;
        let bullet: BulletToken = Self::parse(value)?;
        let endpoint = bullet
            .instance_servers
            .first()
            .map(|s| s.endpoint.clone())
            .ok_or_else(|| VenueError::Malformed("bullet-private: no instance servers".into()))?;
        if let Ok(mut slot) = self.stream_endpoint.lock() {
            *slot = endpoint;
        }
        Ok(bullet.token)
    }

    async fn keepalive_user_data_stream(&self) -> Result<(), VenueError> {
        // The private bullet token is kept alive by WebSocket pings; there
        // is no REST keepalive to call.
        Ok(())
    }

    async fn close_user_data_stream(&self) -> Result<(), VenueError> {
        Ok(())
    }

    fn user_stream_url(&self, listen_key: &str) -> String {
        let endpoint = self
            .stream_endpoint
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        format!("{endpoint}?token={listen_key}")
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn client(url: &str) -> KuCoinFuturesClient {
        KuCoinFuturesClient::new(url, "key", "secret", "passphrase")
    }

    #[tokio::test]
    async fn placement_returns_order_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/contracts/XBTUSDTM")
            .with_body(
                r#"{"code":"200000","data":{"symbol":"XBTUSDTM","status":"Open",
                    "lotSize":1,"tickSize":0.1,"maxOrderQty":1000000,"multiplier":0.001}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/api/v1/orders")
            .with_body(r#"{"code":"200000","data":{"orderId":"5bd6e9286d99522a52e458de"}}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let order = NewOrder::market("XBTUSDTM", OrderSide::Buy, dec!(3), "pp-k1".to_string());
        let placed = client.create_futures_order(&order).await.unwrap();
        assert_eq!(placed.order_id, "5bd6e9286d99522a52e458de");
    }

    #[tokio::test]
    async fn error_envelope_classifies() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/contracts/XBTUSDTM")
            .with_body(r#"{"code":"300003","msg":"Balance insufficient"}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let err = client.get_symbol_filters("XBTUSDTM").await.unwrap_err();
        assert!(matches!(err, VenueError::MarginInsufficient { .. }));
    }

    #[tokio::test]
    async fn tpsl_mode_unsupported() {
        let client = client("http://127.0.0.1:1");
        let supported = client
            .change_position_tpsl_mode("XBTUSDTM", true)
            .await
            .unwrap();
        assert!(!supported);
    }
}
