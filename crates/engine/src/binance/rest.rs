use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use common::{
    Error, ExchangeGateway, GatewayError, GatewayResult, MarginMode, Network, Order,
    OrderConfirmation, Position, Result, Side,
};

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: u64 = 5_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Binance answers this when the margin type is already the requested one.
const NO_MARGIN_CHANGE: i64 = -4046;

/// REST client for Binance USDⓈ-M futures.
///
/// The network (mainnet or testnet) is chosen explicitly at construction.
pub struct BinanceFuturesClient {
    network: Network,
    credentials: Option<Credentials>,
    http: Client,
}

struct Credentials {
    api_key: String,
    secret: String,
}

impl BinanceFuturesClient {
    /// Authenticated client able to trade.
    pub fn new(network: Network, api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Self::build(
            network,
            Some(Credentials { api_key: api_key.into(), secret: secret.into() }),
        )
    }

    /// Market-data-only client. Signed calls fail with a configuration error.
    pub fn public(network: Network) -> Result<Self> {
        Self::build(network, None)
    }

    fn build(network: Network, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        info!(network = %network, authenticated = credentials.is_some(), "Binance futures client ready");
        Ok(Self { network, credentials, http })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn base_url(&self) -> &'static str {
        base_url(self.network)
    }

    fn credentials(&self) -> GatewayResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| GatewayError::configuration("API credentials are required for this call"))
    }

    async fn public_get(&self, path: &str, params: &str) -> GatewayResult<String> {
        let url = format!("{}{path}?{params}", self.base_url());
        debug!(path, "Binance public GET");
        let resp = self.http.get(&url).send().await.map_err(transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        expect_success(status, body)
    }

    async fn send_signed(&self, method: Method, path: &str, params: &str) -> GatewayResult<(StatusCode, String)> {
        let creds = self.credentials()?;
        let ts = Utc::now().timestamp_millis();
        let query = format!("{params}&recvWindow={RECV_WINDOW_MS}&timestamp={ts}");
        let signature = sign(&creds.secret, &query);
        let signed = format!("{query}&signature={signature}");

        debug!(%method, path, "Binance signed request");
        let request = if method == Method::GET {
            self.http.get(format!("{}{path}?{signed}", self.base_url()))
        } else {
            self.http
                .request(method, format!("{}{path}", self.base_url()))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed)
        };

        let resp = request
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        Ok((status, body))
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> GatewayResult<String> {
        let (status, body) = self.send_signed(method, path, params).await?;
        expect_success(status, body)
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    async fn candles(&self, symbol: &str, timeframe: &str, limit: usize) -> GatewayResult<Vec<f64>> {
        // Binance caps klines at 1500 per request.
        let limit = limit.min(1500);
        let body = self
            .public_get("/fapi/v1/klines", &format!("symbol={symbol}&interval={timeframe}&limit={limit}"))
            .await?;
        parse_klines(&body)
    }

    async fn current_price(&self, symbol: &str) -> GatewayResult<f64> {
        let body = self.public_get("/fapi/v1/ticker/price", &format!("symbol={symbol}")).await?;
        let ticker: PriceTicker = serde_json::from_str(&body).map_err(malformed)?;
        parse_decimal(&ticker.price)
    }

    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>> {
        let body = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &format!("symbol={symbol}"))
            .await?;
        parse_position(&body, symbol)
    }

    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32> {
        let body = self.public_get("/fapi/v1/exchangeInfo", "").await?;
        parse_quantity_precision(&body, symbol)
    }

    async fn place_market_order(&self, order: &Order) -> GatewayResult<OrderConfirmation> {
        let mut params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}",
            order.symbol,
            order.side,
            order.quantity,
            client_order_id(&order.id),
        );
        if order.reduce_only {
            params.push_str("&reduceOnly=true");
        }

        debug!(symbol = %order.symbol, side = %order.side, qty = order.quantity, reduce_only = order.reduce_only, "Submitting futures order");
        let body = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body).map_err(malformed)?;

        Ok(OrderConfirmation {
            order_id: resp.order_id.to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.signed(Method::POST, "/fapi/v1/leverage", &format!("symbol={symbol}&leverage={leverage}"))
            .await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> GatewayResult<()> {
        let (status, body) = self
            .send_signed(Method::POST, "/fapi/v1/marginType", &format!("symbol={symbol}&marginType={mode}"))
            .await?;
        if !status.is_success() && api_error(&body).map(|e| e.code) == Some(NO_MARGIN_CHANGE) {
            return Ok(());
        }
        expect_success(status, body)?;
        Ok(())
    }
}

fn base_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => MAINNET_URL,
        Network::Testnet => TESTNET_URL,
    }
}

fn sign(secret: &str, query: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Binance limits client order ids to 36 characters of `[.A-Z:/a-z0-9_-]`.
fn client_order_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(36)
        .collect()
}

// ─── Error classification ────────────────────────────────────────────────────

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::transient(format!("HTTP transport error: {e}"))
}

fn malformed(e: serde_json::Error) -> GatewayError {
    GatewayError::transient(format!("unexpected response from Binance: {e}"))
}

fn expect_success(status: StatusCode, body: String) -> GatewayResult<String> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_failure(status.as_u16(), &body))
    }
}

/// Map a failed HTTP response to the engine's error taxonomy.
fn classify_failure(status: u16, body: &str) -> GatewayError {
    let api = api_error(body);
    let message = match &api {
        Some(e) => format!("HTTP {status} (code {}): {}", e.code, e.msg),
        None => format!("HTTP {status}: {body}"),
    };
    let code = api.map(|e| e.code);

    if matches!(status, 418 | 429) || status >= 500 || code == Some(-1003) {
        GatewayError::transient(message)
    } else if matches!(status, 401 | 403) || matches!(code, Some(-1022 | -2014 | -2015 | -1121)) {
        GatewayError::configuration(message)
    } else {
        GatewayError::rejected(message)
    }
}

fn api_error(body: &str) -> Option<ApiError> {
    serde_json::from_str(body).ok()
}

// ─── Response parsing ────────────────────────────────────────────────────────

fn parse_decimal(raw: &str) -> GatewayResult<f64> {
    raw.parse::<f64>()
        .map_err(|e| GatewayError::transient(format!("invalid number '{raw}' from Binance: {e}")))
}

/// Kline rows are arrays; the close price is the string at index 4.
fn parse_klines(body: &str) -> GatewayResult<Vec<f64>> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body).map_err(malformed)?;
    rows.iter()
        .map(|row| {
            let close = row
                .get(4)
                .and_then(|v| v.as_str())
                .ok_or_else(|| GatewayError::transient("kline row without close price"))?;
            parse_decimal(close)
        })
        .collect()
}

fn parse_position(body: &str, symbol: &str) -> GatewayResult<Option<Position>> {
    let entries: Vec<PositionRisk> = serde_json::from_str(body).map_err(malformed)?;
    for entry in entries.iter().filter(|p| p.symbol == symbol) {
        let amount = parse_decimal(&entry.position_amt)?;
        if amount == 0.0 {
            continue;
        }
        return Ok(Some(Position {
            side: if amount > 0.0 { Side::Long } else { Side::Short },
            quantity: amount.abs(),
            entry_price: parse_decimal(&entry.entry_price)?,
        }));
    }
    Ok(None)
}

fn parse_quantity_precision(body: &str, symbol: &str) -> GatewayResult<u32> {
    let info: ExchangeInfo = serde_json::from_str(body).map_err(malformed)?;
    info.symbols
        .into_iter()
        .find(|s| s.symbol == symbol)
        .map(|s| s.quantity_precision)
        .ok_or_else(|| GatewayError::configuration(format!("unknown symbol {symbol}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    quantity_precision: u32,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::GatewayErrorKind;

    #[test]
    fn signature_matches_binance_reference() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn network_selects_endpoint() {
        assert_eq!(base_url(Network::Mainnet), "https://fapi.binance.com");
        assert_eq!(base_url(Network::Testnet), "https://testnet.binancefuture.com");
    }

    #[test]
    fn failures_are_classified() {
        assert_eq!(classify_failure(429, "").kind, GatewayErrorKind::Transient);
        assert_eq!(classify_failure(503, "oops").kind, GatewayErrorKind::Transient);
        assert_eq!(
            classify_failure(400, r#"{"code":-1003,"msg":"Too many requests"}"#).kind,
            GatewayErrorKind::Transient
        );
        assert_eq!(
            classify_failure(401, r#"{"code":-2015,"msg":"Invalid API-key"}"#).kind,
            GatewayErrorKind::Configuration
        );
        assert_eq!(
            classify_failure(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#).kind,
            GatewayErrorKind::Configuration
        );
        let margin = classify_failure(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#);
        assert_eq!(margin.kind, GatewayErrorKind::Rejected);
        assert!(margin.message.contains("-2019"));
    }

    #[test]
    fn klines_yield_close_prices() {
        let body = r#"[
            [1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"],
            [1499040060000,"0.01577100","0.01600000","0.01570000","0.01590000","100.0",1499644859999,"1.0",3,"1.0","1.0","0"]
        ]"#;
        assert_eq!(parse_klines(body).unwrap(), vec![0.015771, 0.0159]);
        assert!(parse_klines("[[1,2]]").is_err());
    }

    #[test]
    fn position_sign_gives_side() {
        let body = r#"[
            {"symbol":"ETHUSDT","positionAmt":"3.0","entryPrice":"2000.0"},
            {"symbol":"BTCUSDT","positionAmt":"-0.250","entryPrice":"30000.5"}
        ]"#;
        let pos = parse_position(body, "BTCUSDT").unwrap().unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.quantity, 0.25);
        assert_eq!(pos.entry_price, 30000.5);

        let flat = r#"[{"symbol":"BTCUSDT","positionAmt":"0.000","entryPrice":"0.0"}]"#;
        assert!(parse_position(flat, "BTCUSDT").unwrap().is_none());
    }

    #[test]
    fn precision_lookup_by_symbol() {
        let body = r#"{"symbols":[
            {"symbol":"BTCUSDT","quantityPrecision":3,"pricePrecision":2},
            {"symbol":"DOGEUSDT","quantityPrecision":0,"pricePrecision":6}
        ]}"#;
        assert_eq!(parse_quantity_precision(body, "DOGEUSDT").unwrap(), 0);
        let err = parse_quantity_precision(body, "NOPE").unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Configuration);
    }

    #[test]
    fn client_order_id_fits_binance_limits() {
        let id = client_order_id("3f2b9c1e-8a7d-4e6f-9b0a-1c2d3e4f5a6b");
        assert_eq!(id.len(), 36);
        assert!(!client_order_id("a b:c").contains(' '));
    }
}
