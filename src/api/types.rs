//! Response types for the Binance USDT-M Futures API.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::SymbolFilters;

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceError {
    pub code: i64,
    pub msg: String,
}

/// `/fapi/v1/time`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// `/fapi/v1/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// `/fapi/v2/account`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub total_wallet_balance: Decimal,
    #[serde(default)]
    pub available_balance: Decimal,
    #[serde(default)]
    pub assets: Vec<AccountAsset>,
}

impl AccountInfo {
    /// Wallet balance of one asset, `None` if the account does not hold it.
    pub fn wallet_balance(&self, asset: &str) -> Option<Decimal> {
        self.assets
            .iter()
            .find(|a| a.asset == asset)
            .map(|a| a.wallet_balance)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAsset {
    pub asset: String,
    pub wallet_balance: Decimal,
}

/// `/fapi/v1/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

impl ExchangeInfo {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl SymbolInfo {
    /// Combine PRICE_FILTER and LOT_SIZE into the rules orders must follow.
    pub fn trading_filters(&self) -> Option<SymbolFilters> {
        let tick_size = self.filters.iter().find_map(|f| match f {
            FilterSpec::Price { tick_size } => Some(*tick_size),
            _ => None,
        })?;
        let (step_size, min_qty, max_qty) = self.filters.iter().find_map(|f| match f {
            FilterSpec::LotSize {
                step_size,
                min_qty,
                max_qty,
            } => Some((*step_size, *min_qty, *max_qty)),
            _ => None,
        })?;

        Some(SymbolFilters {
            tick_size,
            step_size,
            min_qty,
            max_qty,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum FilterSpec {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        step_size: Decimal,
        min_qty: Decimal,
        max_qty: Decimal,
    },
    #[serde(other)]
    Other,
}

/// `/fapi/v1/order` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub client_order_id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
}

/// `/fapi/v1/openOrders` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: i64,
}

/// `/fapi/v2/positionRisk` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: Decimal,
    #[serde(default)]
    pub entry_price: Decimal,
}

/// `/fapi/v1/listenKey`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}
