//! Binance USDT-M Futures REST client.
//!
//! Signed endpoints follow the exchange's request signing scheme:
//! - parameters are sent as a query string with `recvWindow` and `timestamp`
//! - the query string is signed with HMAC-SHA256 using the API secret
//! - the API key travels in the `X-MBX-APIKEY` header
//!
//! Timestamps come from a local clock corrected by the offset measured in
//! [`BinanceClient::sync_time`], so requests are not rejected for clock skew.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info};

use crate::models::{PositionInfo, SymbolFilters};

use super::exchange::{Exchange, OrderAck, OrderKind, OrderRequest};
use super::types::*;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW_MS: u64 = 5000;

/// Which Binance environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn from_testnet_flag(testnet: bool) -> Self {
        if testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }

    pub fn rest_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://fapi.binance.com",
            Network::Testnet => "https://testnet.binancefuture.com",
        }
    }

    pub fn stream_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://fstream.binance.com/ws",
            Network::Testnet => "wss://stream.binancefuture.com/ws",
        }
    }
}

/// REST client for one futures account.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    stream_url: String,
    time_offset_ms: AtomicI64,
}

impl BinanceClient {
    /// Create a new client for the given network.
    pub fn new(api_key: &str, api_secret: &str, network: Network) -> Result<Self> {
        Self::with_urls(api_key, api_secret, network.rest_url(), network.stream_url())
    }

    /// Create with custom endpoints (for testing).
    pub fn with_urls(
        api_key: &str,
        api_secret: &str,
        base_url: &str,
        stream_url: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            stream_url: stream_url.trim_end_matches('/').to_string(),
            time_offset_ms: AtomicI64::new(0),
        })
    }

    /// Base websocket URL for user data streams.
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Measure the offset between the local clock and exchange server time.
    ///
    /// Returns the offset in milliseconds.
    pub async fn sync_time(&self) -> Result<i64> {
        let before = Utc::now().timestamp_millis();
        let server: ServerTime = self.get_public("/fapi/v1/time", &[]).await?;
        let after = Utc::now().timestamp_millis();

        let estimated_local = before + (after - before) / 2;
        let offset = server.server_time - estimated_local;
        self.time_offset_ms.store(offset, Ordering::Relaxed);

        info!(offset_ms = offset, round_trip_ms = after - before, "Synced server time");
        Ok(offset)
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Sign a query string with HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("Invalid API secret: {}", e))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build the full signed query string for `params`.
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            RECV_WINDOW_MS,
            self.timestamp_ms()
        ));

        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut url = format!("{}{}", self.base_url, path);
        if !params.is_empty() {
            url = format!("{}?{}", url, encode_params(params));
        }

        debug!(url = %url, "Public request");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        Self::parse_response(resp, path).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        debug!(method = %method, path = path, params = %encode_params(params), "Signed request");

        let resp = self
            .http
            .request(method.clone(), &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        Self::parse_response(resp, path).await
    }

    /// Requests authenticated by API key only (user data stream management).
    async fn send_keyed<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .http
            .request(method.clone(), &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        Self::parse_response(resp, path).await
    }

    async fn parse_response<T: DeserializeOwned>(resp: Response, path: &str) -> Result<T> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", path))?;

        if !status.is_success() {
            if let Ok(api_err) = serde_json::from_str::<BinanceError>(&body) {
                bail!("Binance API error {}: {}", api_err.code, api_err.msg);
            }
            bail!("{} request failed: {} - {}", path, status, body);
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", path))
    }

    /// Test connectivity to the REST API.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.get_public("/fapi/v1/ping", &[]).await?;
        Ok(())
    }

    /// Get futures account balances.
    pub async fn account(&self) -> Result<AccountInfo> {
        self.send_signed(Method::GET, "/fapi/v2/account", &[]).await
    }

    /// Get trading rules for all symbols.
    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        self.get_public("/fapi/v1/exchangeInfo", &[]).await
    }

    /// Open a user data stream, returning its listen key.
    pub async fn start_user_stream(&self) -> Result<String> {
        let key: ListenKey = self.send_keyed(Method::POST, "/fapi/v1/listenKey").await?;
        Ok(key.listen_key)
    }

    /// Extend the validity of the current listen key by 60 minutes.
    pub async fn keepalive_user_stream(&self) -> Result<()> {
        let _: serde_json::Value = self.send_keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        Ok(())
    }
}

impl Exchange for BinanceClient {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker: TickerPrice = self
            .get_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn usdt_balance(&self) -> Result<Decimal> {
        self.account()
            .await?
            .wallet_balance("USDT")
            .ok_or_else(|| anyhow!("No USDT asset in futures account"))
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<Option<SymbolFilters>> {
        let info = self.exchange_info().await?;
        match info.symbol(symbol) {
            None => Ok(None),
            Some(symbol_info) => symbol_info
                .trading_filters()
                .map(Some)
                .ok_or_else(|| anyhow!("{} has no PRICE_FILTER/LOT_SIZE rules", symbol)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn open_order_count(&self, symbol: &str) -> Result<usize> {
        let orders: Vec<OpenOrder> = self
            .send_signed(Method::GET, "/fapi/v1/openOrders", &[("symbol", symbol.to_string())])
            .await?;
        if !orders.is_empty() {
            let order_ids: Vec<i64> = orders.iter().map(|o| o.order_id).collect();
            debug!(symbol = symbol, order_ids = ?order_ids, "Open orders");
        }
        Ok(orders.len())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let resp: OrderResponse = self
            .send_signed(Method::POST, "/fapi/v1/order", &order_params(order))
            .await?;
        debug!(
            symbol = %resp.symbol,
            order_id = resp.order_id,
            order_type = %resp.order_type,
            side = %resp.side,
            status = %resp.status,
            "Order accepted"
        );

        Ok(OrderAck {
            order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            status: resp.status,
        })
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<PositionInfo>> {
        let risks: Vec<PositionRisk> = self
            .send_signed(Method::GET, "/fapi/v2/positionRisk", &[("symbol", symbol.to_string())])
            .await?;

        Ok(risks
            .into_iter()
            .map(|r| PositionInfo {
                symbol: r.symbol,
                position_amt: r.position_amt,
                entry_price: r.entry_price,
            })
            .collect())
    }
}

/// Query parameters for an order.
fn order_params(order: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", order.symbol.clone()),
        ("side", order.side.as_str().to_string()),
        ("type", order.type_name().to_string()),
        ("newClientOrderId", order.client_order_id.clone()),
    ];

    match &order.kind {
        OrderKind::Market {
            quantity,
            reduce_only,
        } => {
            params.push(("quantity", format_decimal(*quantity)));
            if *reduce_only {
                params.push(("reduceOnly", "true".to_string()));
            }
        }
        OrderKind::TakeProfitMarket { stop_price } | OrderKind::StopMarket { stop_price } => {
            params.push(("stopPrice", format_decimal(*stop_price)));
            params.push(("closePosition", "true".to_string()));
            params.push(("timeInForce", "GTE_GTC".to_string()));
            params.push(("workingType", "MARK_PRICE".to_string()));
            params.push(("priceProtect", "TRUE".to_string()));
        }
    }

    params
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Plain decimal notation without trailing zeros.
fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn client(secret: &str) -> BinanceClient {
        BinanceClient::with_urls("key", secret, "http://localhost:1", "ws://localhost:1").unwrap()
    }

    #[test]
    fn test_sign_matches_reference_vector() {
        // Example from the Binance API signing documentation
        let client = client("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j");
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signed_query_layout() {
        let client = client("secret");
        let query = client.signed_query(&[("symbol", "BTCUSDT".to_string())]).unwrap();

        assert!(query.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        let signature = query.rsplit("&signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_market_order_params() {
        let order = OrderRequest::close("BTCUSDT", OrderSide::Sell, dec!(0.100));
        let params = order_params(&order);

        assert!(params.contains(&("type", "MARKET".to_string())));
        assert!(params.contains(&("side", "SELL".to_string())));
        assert!(params.contains(&("quantity", "0.1".to_string())));
        assert!(params.contains(&("reduceOnly", "true".to_string())));
    }

    #[test]
    fn test_protective_order_params() {
        let order = OrderRequest::stop_loss("BTCUSDT", OrderSide::Sell, dec!(80000.00));
        let params = order_params(&order);

        assert!(params.contains(&("type", "STOP_MARKET".to_string())));
        assert!(params.contains(&("stopPrice", "80000".to_string())));
        assert!(params.contains(&("closePosition", "true".to_string())));
        assert!(params.contains(&("workingType", "MARK_PRICE".to_string())));
        assert!(params.contains(&("priceProtect", "TRUE".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "quantity"));
    }

    /// Serve `count` requests with canned bodies keyed by path, recording "METHOD url key".
    fn fake_binance(
        routes: Vec<(&'static str, u16, &'static str)>,
        count: usize,
    ) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr().to_ip().unwrap());

        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for request in server.incoming_requests().take(count) {
                let path = request.url().split('?').next().unwrap().to_string();
                let keyed = request.headers().iter().any(|h| h.field.equiv("X-MBX-APIKEY"));
                seen.push(format!("{} {} {}", request.method(), request.url(), keyed));

                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, r#"{"code":-1,"msg":"no route"}"#));
                request
                    .respond(tiny_http::Response::from_string(body).with_status_code(status))
                    .unwrap();
            }
            seen
        });

        (base, handle)
    }

    #[tokio::test]
    async fn test_requests_against_fake_exchange() {
        let (base, server) = fake_binance(
            vec![
                ("/fapi/v1/ticker/price", 200, r#"{"symbol":"BTCUSDT","price":"84000.10","time":1}"#),
                (
                    "/fapi/v1/exchangeInfo",
                    200,
                    r#"{"symbols":[{"symbol":"BTCUSDT","filters":[
                        {"filterType":"PRICE_FILTER","tickSize":"0.10"},
                        {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001","maxQty":"1000"}]}]}"#,
                ),
                ("/fapi/v1/order", 400, r#"{"code":-2021,"msg":"Order would immediately trigger."}"#),
            ],
            4,
        );
        let client = BinanceClient::with_urls("key", "secret", &base, "ws://localhost:1").unwrap();

        assert_eq!(client.ticker_price("BTCUSDT").await.unwrap(), dec!(84000.10));

        let filters = client.symbol_filters("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(filters.tick_size, dec!(0.10));
        assert!(client.symbol_filters("FOOUSDT").await.unwrap().is_none());

        let order = OrderRequest::take_profit("BTCUSDT", OrderSide::Sell, dec!(84100));
        let err = client.place_order(&order).await.unwrap_err();
        assert_eq!(err.to_string(), "Binance API error -2021: Order would immediately trigger.");

        let seen = server.join().unwrap();
        assert!(seen[0].starts_with("GET /fapi/v1/ticker/price?symbol=BTCUSDT "));
        assert!(seen[0].ends_with("false"));
        assert!(seen[3].starts_with("POST /fapi/v1/order?symbol=BTCUSDT&side=SELL&type=TAKE_PROFIT_MARKET"));
        assert!(seen[3].contains("&signature="));
        assert!(seen[3].ends_with("true"));
    }

    #[test]
    fn test_network_urls() {
        assert_eq!(Network::from_testnet_flag(true).rest_url(), "https://testnet.binancefuture.com");
        assert_eq!(Network::from_testnet_flag(false).stream_url(), "wss://fstream.binance.com/ws");
    }
}
