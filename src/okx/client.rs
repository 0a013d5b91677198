//! OKX v5 REST client for USDT-margined perpetual swaps
//!
//! - Request signing and optional demo-trading header
//! - Minimum spacing between calls
//! - Retry with exponential backoff for idempotent reads
//! - Short-lived position cache and instrument cache
//!
//! # Example
//!
//! ```no_run
//! use perp_trader::okx::{OkxClient, OkxConfig};
//! use perp_trader::types::Symbol;
//! use perp_trader::venue::VenueClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OkxClient::public(OkxConfig::default())?;
//!     let bars = client.fetch_bars(&Symbol::new("FIL-USDT-SWAP"), "15m", 100).await?;
//!     println!("{} bars", bars.len());
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, Method};
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::auth::{timestamp, Credentials};
use super::types::*;
use crate::common::{Throttle, ThrottleConfig};
use crate::error::VenueError;
use crate::types::{
    Candle, ConditionalKind, ConditionalOrder, InstrumentSpec, MarketOrder, OpenOrder, OrderSide,
    Position, PositionSide, Symbol,
};
use crate::venue::VenueClient;

/// Base URL for the OKX API
pub const API_BASE_URL: &str = "https://www.okx.com";

/// Client configuration
#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub base_url: String,
    /// Send `x-simulated-trading: 1` (demo account)
    pub simulated: bool,
    /// Retries for read requests
    pub max_retries: u32,
    pub timeout: Duration,
    pub throttle: ThrottleConfig,
    /// How long a non-forced position read may be served from cache
    pub position_cache_ttl: Duration,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            simulated: false,
            max_retries: 2,
            timeout: Duration::from_secs(10),
            throttle: ThrottleConfig::default(),
            position_cache_ttl: Duration::from_secs(5),
        }
    }
}

impl OkxConfig {
    pub fn with_simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// OKX exchange client
#[derive(Clone)]
pub struct OkxClient {
    credentials: Option<Credentials>,
    http_client: Client,
    throttle: Throttle,
    config: OkxConfig,
    instruments: Arc<Mutex<HashMap<Symbol, InstrumentSpec>>>,
    positions: Arc<Mutex<HashMap<Symbol, (Instant, Position)>>>,
}

impl OkxClient {
    pub fn new(config: OkxConfig, credentials: Credentials) -> Result<Self, VenueError> {
        Self::build(config, Some(credentials))
    }

    /// Client limited to public market data
    pub fn public(config: OkxConfig) -> Result<Self, VenueError> {
        Self::build(config, None)
    }

    fn build(config: OkxConfig, credentials: Option<Credentials>) -> Result<Self, VenueError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| VenueError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            credentials,
            http_client,
            throttle: Throttle::new(config.throttle.clone()),
            config,
            instruments: Arc::new(Mutex::new(HashMap::new())),
            positions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Send one request and unwrap the response envelope
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<String>,
        signed: bool,
    ) -> Result<OkxResponse<T>, VenueError> {
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            let qs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{}?{}", path, qs.join("&"))
        };
        let url = format!("{}{}", self.config.base_url, request_path);
        let body = body.unwrap_or_default();

        self.throttle.wait().await;

        let mut req = self
            .http_client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");

        if signed {
            let creds = self
                .credentials
                .as_ref()
                .ok_or_else(|| VenueError::Auth("credentials required for private endpoint".into()))?;
            let ts = timestamp(Utc::now());
            let signature = creds.sign(&ts, method.as_str(), &request_path, &body)?;
            req = req
                .header("OK-ACCESS-KEY", creds.api_key())
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", ts)
                .header("OK-ACCESS-PASSPHRASE", creds.passphrase());
        }
        if self.config.simulated {
            req = req.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: OkxResponse<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(VenueError::Parse(e.to_string())),
            Err(_) => {
                return Err(VenueError::Network(format!("HTTP {status}: {text}")));
            }
        };

        if !envelope.is_ok() {
            return Err(classify(&envelope.code, &envelope.msg));
        }
        Ok(envelope)
    }

    /// GET with retry and exponential backoff on transient failures
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        signed: bool,
    ) -> Result<Vec<T>, VenueError> {
        let mut attempt = 0;
        loop {
            match self.request::<T>(Method::GET, path, query, None, signed).await {
                Ok(envelope) => return Ok(envelope.data),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                    warn!(
                        "GET {} failed (attempt {}/{}): {}, retrying in {}ms",
                        path,
                        attempt,
                        self.config.max_retries + 1,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// POST a trade request; per-order failures become `Rejected`
    async fn post_trade<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<OrderAck>, VenueError> {
        let json = serde_json::to_string(body)?;
        let acks = match self
            .request::<OrderAck>(Method::POST, path, &[], Some(json), true)
            .await
        {
            Ok(envelope) => envelope.data,
            // Whole batch failed, per-order detail is not returned
            Err(VenueError::Api { code, msg }) if code == "1" || code == "2" => {
                return Err(VenueError::Rejected(format!("{code}: {msg}")));
            }
            Err(e) => return Err(e),
        };

        if let Some(failed) = acks.iter().find(|a| !a.is_ok()) {
            return Err(VenueError::Rejected(format!(
                "{}: {}",
                failed.s_code, failed.s_msg
            )));
        }
        Ok(acks)
    }

    async fn fetch_position_uncached(&self, symbol: &Symbol) -> Result<Position, VenueError> {
        let inst_id = to_inst_id(symbol);
        let rows: Vec<PositionData> = self
            .get(
                "/api/v5/account/positions",
                &[("instType", "SWAP".into()), ("instId", inst_id.clone())],
                true,
            )
            .await?;

        let open = rows.iter().find(|p| {
            p.inst_id == inst_id && parse_num(&p.pos).is_some_and(|size| size.abs() > 0.0)
        });

        Ok(match open {
            Some(p) => Position {
                symbol: symbol.clone(),
                side: p.side(),
                size: parse_num(&p.pos).unwrap_or(0.0).abs(),
                entry_price: parse_num(&p.avg_px).unwrap_or(0.0),
                unrealized_pnl: parse_num(&p.upl).unwrap_or(0.0),
                leverage: parse_num(&p.lever).unwrap_or(0.0),
                liquidation_price: parse_num(&p.liq_px).filter(|v| *v > 0.0),
            },
            None => Position::flat(symbol.clone()),
        })
    }
}

/// Map an OKX error code to the venue error taxonomy
fn classify(code: &str, msg: &str) -> VenueError {
    let detail = format!("{code}: {msg}");
    if code.starts_with("5010") || code.starts_with("5011") {
        VenueError::Auth(detail)
    } else if code.starts_with("51") || code.starts_with("59") {
        VenueError::Rejected(detail)
    } else {
        VenueError::Api {
            code: code.to_string(),
            msg: msg.to_string(),
        }
    }
}

/// OKX bar name for a timeframe ("1h" -> "1H")
fn okx_bar(timeframe: &str) -> String {
    let unit = timeframe.chars().last().unwrap_or('m');
    match unit {
        'h' | 'd' | 'w' => timeframe.to_uppercase(),
        _ => timeframe.to_string(),
    }
}

/// Decimal string without binary noise or trailing zeros
fn fmt_decimal(value: f64) -> String {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(10).normalize().to_string())
        .unwrap_or_else(|| value.to_string())
}

fn parse_candle(row: &[String]) -> Option<Candle> {
    let ts: i64 = row.first()?.parse().ok()?;
    let num = |i: usize| row.get(i).and_then(|v| parse_num(v));
    let candle = Candle {
        datetime: Utc.timestamp_millis_opt(ts).single()?,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5).unwrap_or(0.0),
    };
    candle.validate().ok()?;
    Some(candle)
}

#[async_trait]
impl VenueClient for OkxClient {
    fn name(&self) -> &str {
        if self.config.simulated {
            "okx-demo"
        } else {
            "okx"
        }
    }

    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError> {
        let rows: Vec<Vec<String>> = self
            .get(
                "/api/v5/market/candles",
                &[
                    ("instId", to_inst_id(symbol)),
                    ("bar", okx_bar(timeframe)),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        let mut bars: Vec<Candle> = rows.iter().filter_map(|r| parse_candle(r)).collect();
        if bars.len() < rows.len() {
            debug!("{}: skipped {} malformed bars", symbol, rows.len() - bars.len());
        }
        // Newest first on the wire
        bars.sort_by_key(|b| b.datetime);
        Ok(bars)
    }

    async fn fetch_position(
        &self,
        symbol: &Symbol,
        force_refresh: bool,
    ) -> Result<Position, VenueError> {
        if !force_refresh {
            let cache = self.positions.lock().await;
            if let Some((at, pos)) = cache.get(symbol) {
                if at.elapsed() < self.config.position_cache_ttl {
                    return Ok(pos.clone());
                }
            }
        }

        let position = self.fetch_position_uncached(symbol).await?;
        self.positions
            .lock()
            .await
            .insert(symbol.clone(), (Instant::now(), position.clone()));
        Ok(position)
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>, VenueError> {
        let rows: Vec<PendingOrder> = self
            .get(
                "/api/v5/trade/orders-pending",
                &[("instType", "SWAP".into()), ("instId", to_inst_id(symbol))],
                true,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|o| OpenOrder {
                id: o.ord_id,
                symbol: symbol.clone(),
                side: if o.side == "buy" {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                size: parse_num(&o.sz).unwrap_or(0.0),
                price: parse_num(&o.px),
            })
            .collect())
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<String, VenueError> {
        let req = PlaceOrderRequest {
            inst_id: to_inst_id(&order.symbol),
            td_mode: "cross".into(),
            side: order.side.to_string(),
            pos_side: pos_side_str(order.position_side).into(),
            ord_type: "market".into(),
            sz: fmt_decimal(order.size),
            reduce_only: order.reduce_only.then_some(true),
        };

        let acks = self.post_trade("/api/v5/trade/order", &req).await?;
        self.positions.lock().await.remove(&order.symbol);

        let id = acks.first().map(|a| a.ord_id.clone()).unwrap_or_default();
        info!(
            "{} market {} {} sz {} reduce_only={} -> order {}",
            order.symbol, order.side, order.position_side, req.sz, order.reduce_only, id
        );
        Ok(id)
    }

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<String, VenueError> {
        let trigger = fmt_decimal(order.trigger_price);
        let (sl, tp) = match order.kind {
            ConditionalKind::StopLoss => (Some(trigger), None),
            ConditionalKind::TakeProfit => (None, Some(trigger)),
        };
        let req = PlaceAlgoRequest {
            inst_id: to_inst_id(&order.symbol),
            td_mode: "cross".into(),
            side: order.side.to_string(),
            pos_side: pos_side_str(order.position_side).into(),
            ord_type: "conditional".into(),
            sz: fmt_decimal(order.size),
            sl_ord_px: sl.as_ref().map(|_| "-1".to_string()),
            sl_trigger_px: sl,
            tp_ord_px: tp.as_ref().map(|_| "-1".to_string()),
            tp_trigger_px: tp,
            reduce_only: order.reduce_only.then_some(true),
        };

        let acks = self.post_trade("/api/v5/trade/order-algo", &req).await?;
        let id = acks.first().map(|a| a.algo_id.clone()).unwrap_or_default();
        info!(
            "{} {} {} trigger {} sz {} -> algo {}",
            order.symbol, order.kind, order.side, order.trigger_price, req.sz, id
        );
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &Symbol) -> Result<(), VenueError> {
        let req = CancelOrderRequest {
            inst_id: to_inst_id(symbol),
            ord_id: order_id.to_string(),
        };
        self.post_trade("/api/v5/trade/cancel-order", &req).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &Symbol) -> Result<usize, VenueError> {
        let orders = self.fetch_open_orders(symbol).await?;
        let mut cancelled = 0;
        for order in &orders {
            match self.cancel_order(&order.id, symbol).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("{}: failed to cancel order {}: {}", symbol, order.id, e),
            }
        }
        Ok(cancelled)
    }

    async fn cancel_conditional_orders(&self, symbol: &Symbol) -> Result<usize, VenueError> {
        let inst_id = to_inst_id(symbol);
        let pending: Vec<AlgoOrder> = self
            .get(
                "/api/v5/trade/orders-algo-pending",
                &[
                    ("instType", "SWAP".into()),
                    ("instId", inst_id.clone()),
                    ("ordType", "conditional".into()),
                ],
                true,
            )
            .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        let req: Vec<CancelAlgoRequest> = pending
            .iter()
            .map(|a| CancelAlgoRequest {
                algo_id: a.algo_id.clone(),
                inst_id: inst_id.clone(),
            })
            .collect();
        self.post_trade("/api/v5/trade/cancel-algos", &req).await?;
        debug!("{}: cancelled {} conditional orders", symbol, req.len());
        Ok(req.len())
    }

    async fn fetch_balance(&self) -> Result<f64, VenueError> {
        let balances: Vec<Balance> = self
            .get("/api/v5/account/balance", &[("ccy", "USDT".into())], true)
            .await?;

        Ok(balances
            .iter()
            .flat_map(|b| b.details.iter())
            .find(|d| d.ccy == "USDT")
            .and_then(BalanceDetail::free)
            .unwrap_or(0.0))
    }

    async fn fetch_last_price(&self, symbol: &Symbol) -> Result<f64, VenueError> {
        let tickers: Vec<Ticker> = self
            .get(
                "/api/v5/market/ticker",
                &[("instId", to_inst_id(symbol))],
                false,
            )
            .await?;

        tickers
            .first()
            .and_then(|t| parse_num(&t.last))
            .ok_or_else(|| VenueError::NotFound(format!("no ticker for {symbol}")))
    }

    async fn instrument(&self, symbol: &Symbol) -> Result<InstrumentSpec, VenueError> {
        if let Some(spec) = self.instruments.lock().await.get(symbol) {
            return Ok(spec.clone());
        }

        let rows: Vec<Instrument> = self
            .get(
                "/api/v5/public/instruments",
                &[("instType", "SWAP".into()), ("instId", to_inst_id(symbol))],
                false,
            )
            .await?;
        let inst = rows
            .first()
            .ok_or_else(|| VenueError::NotFound(format!("instrument {symbol}")))?;

        let fallback = InstrumentSpec::fallback(symbol.clone());
        let spec = InstrumentSpec {
            symbol: symbol.clone(),
            min_size: parse_num(&inst.min_sz).unwrap_or(fallback.min_size),
            lot_size: parse_num(&inst.lot_sz).unwrap_or(fallback.lot_size),
            tick_size: parse_num(&inst.tick_sz).unwrap_or(fallback.tick_size),
            contract_value: parse_num(&inst.ct_val).unwrap_or(fallback.contract_value),
        };
        self.instruments
            .lock()
            .await
            .insert(symbol.clone(), spec.clone());
        Ok(spec)
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: f64) -> Result<(), VenueError> {
        for side in [PositionSide::Long, PositionSide::Short] {
            let req = SetLeverageRequest {
                inst_id: to_inst_id(symbol),
                lever: fmt_decimal(leverage),
                mgn_mode: "cross".into(),
                pos_side: pos_side_str(side).into(),
            };
            let json = serde_json::to_string(&req)?;
            self.request::<serde_json::Value>(
                Method::POST,
                "/api/v5/account/set-leverage",
                &[],
                Some(json),
                true,
            )
            .await?;
        }
        info!("{}: leverage set to {}x (cross)", symbol, leverage);
        Ok(())
    }
}
