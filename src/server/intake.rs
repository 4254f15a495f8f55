//! Webhook payload validation and dispatch to the executor.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::api::Exchange;
use crate::models::{SignalSide, TradingSignal};
use crate::trading::{ErrorClass, LevelSource, TradeError, TradeExecutor};

/// Inbound JSON body. Every field is optional so missing ones can be reported.
#[derive(Debug, Default, Deserialize)]
pub struct RawSignal {
    pub side: Option<String>,
    pub symbol: Option<String>,
    pub tp: Option<Decimal>,
    pub sl: Option<Decimal>,
}

/// Body returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    pub message: String,
}

impl WebhookResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Response plus the HTTP status to send it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status_code: u16,
    pub body: WebhookResponse,
}

impl WebhookReply {
    fn from_error(err: &TradeError) -> Self {
        let status_code = match err.class() {
            ErrorClass::Input => 400,
            ErrorClass::ExchangeState | ErrorClass::Protective | ErrorClass::BestEffort => 502,
        };
        Self {
            status_code,
            body: WebhookResponse::error(err.to_string()),
        }
    }
}

/// Fields a payload must carry for the given level source.
pub fn required_fields(level_source: LevelSource) -> Vec<&'static str> {
    match level_source {
        LevelSource::Signal => vec!["side", "symbol", "tp", "sl"],
        LevelSource::Computed => vec!["side", "symbol"],
    }
}

/// Turn a raw payload into a signal without touching the exchange.
pub fn parse_signal(body: &str, level_source: LevelSource) -> Result<TradingSignal, TradeError> {
    let raw: RawSignal = serde_json::from_str(body)
        .map_err(|e| TradeError::InvalidSignal(format!("malformed payload: {}", e)))?;

    let side = raw.side.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let symbol = raw.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let missing = match level_source {
        LevelSource::Signal => raw.tp.is_none() || raw.sl.is_none(),
        LevelSource::Computed => false,
    };
    let (side, symbol) = match (side, symbol) {
        (Some(side), Some(symbol)) if !missing => (side, symbol),
        _ => return Err(TradeError::MissingFields(required_fields(level_source))),
    };

    let side: SignalSide = side.parse().map_err(TradeError::InvalidSignal)?;
    let mut signal = TradingSignal::new(side, symbol.to_uppercase());
    signal.take_profit = raw.tp;
    signal.stop_loss = raw.sl;

    for (name, value) in [("tp", raw.tp), ("sl", raw.sl)] {
        if let Some(value) = value {
            if value <= Decimal::ZERO {
                return Err(TradeError::InvalidSignal(format!("{} must be positive, got {}", name, value)));
            }
        }
    }

    Ok(signal)
}

/// Entry point for webhook requests.
pub struct SignalIntake<E> {
    executor: Arc<TradeExecutor<E>>,
}

impl<E: Exchange> SignalIntake<E> {
    pub fn new(executor: Arc<TradeExecutor<E>>) -> Self {
        Self { executor }
    }

    /// Validate and execute one payload. Never fails: every outcome becomes a reply.
    pub async fn handle(&self, body: &str) -> WebhookReply {
        let level_source = self.executor.config().level_source;

        let signal = match parse_signal(body, level_source) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Rejected webhook payload");
                return WebhookReply::from_error(&e);
            }
        };

        info!(
            side = %signal.side,
            symbol = %signal.symbol,
            tp = ?signal.take_profit,
            sl = ?signal.stop_loss,
            "Received trading signal"
        );

        match self.executor.execute(&signal).await {
            Ok(report) => {
                info!(summary = %report, "Signal processed");
                WebhookReply {
                    status_code: 200,
                    body: WebhookResponse::success("Signal processed"),
                }
            }
            Err(e) => {
                error!(symbol = %signal.symbol, error = %e, "Error processing webhook");
                WebhookReply::from_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockExchange;
    use crate::trading::{PositionTracker, SettleConfig, TradingConfig};
    use rust_decimal_macros::dec;

    fn intake(exchange: MockExchange, level_source: LevelSource) -> (SignalIntake<MockExchange>, Arc<MockExchange>) {
        let exchange = Arc::new(exchange);
        let config = TradingConfig {
            level_source,
            settle: SettleConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                max_attempts: 3,
            },
            ..Default::default()
        };
        let executor = TradeExecutor::new(exchange.clone(), config, PositionTracker::new());
        (SignalIntake::new(Arc::new(executor)), exchange)
    }

    #[test]
    fn test_parse_accepts_numbers_and_strings() {
        let signal = parse_signal(
            r#"{"side": "LONG", "symbol": "btcusdt", "tp": 84683.8, "sl": "84533.8"}"#,
            LevelSource::Signal,
        )
        .unwrap();

        assert_eq!(signal.side, SignalSide::Long);
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.take_profit, Some(dec!(84683.8)));
        assert_eq!(signal.stop_loss, Some(dec!(84533.8)));
    }

    #[test]
    fn test_parse_required_fields_depend_on_level_source() {
        let body = r#"{"side": "short", "symbol": "BTCUSDT"}"#;

        let err = parse_signal(body, LevelSource::Signal).unwrap_err();
        assert_eq!(err.to_string(), "Invalid signal format. Required fields: side, symbol, tp, sl");

        let signal = parse_signal(body, LevelSource::Computed).unwrap();
        assert_eq!(signal.take_profit, None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let unknown_side = parse_signal(r#"{"side": "up", "symbol": "BTCUSDT"}"#, LevelSource::Computed);
        assert!(matches!(unknown_side, Err(TradeError::InvalidSignal(_))));

        let not_json = parse_signal("side=long", LevelSource::Computed);
        assert!(matches!(not_json, Err(TradeError::InvalidSignal(_))));

        let bad_tp = parse_signal(
            r#"{"side": "long", "symbol": "BTCUSDT", "tp": "lots", "sl": 1}"#,
            LevelSource::Signal,
        );
        assert!(matches!(bad_tp, Err(TradeError::InvalidSignal(_))));

        let blank_symbol = parse_signal(r#"{"side": "long", "symbol": "  "}"#, LevelSource::Computed);
        assert!(matches!(blank_symbol, Err(TradeError::MissingFields(_))));
    }

    #[tokio::test]
    async fn test_missing_fields_never_reach_exchange() {
        let (intake, exchange) = intake(MockExchange::btc_at(dec!(84000)), LevelSource::Signal);

        let reply = intake.handle(r#"{"symbol": "BTCUSDT"}"#).await;

        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.body.status, "error");
        assert!(reply.body.message.starts_with("Invalid signal format"));
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_successful_signal() {
        let (intake, exchange) = intake(MockExchange::btc_at(dec!(84000)), LevelSource::Signal);

        let reply = intake
            .handle(r#"{"side": "long", "symbol": "BTCUSDT", "tp": 88000, "sl": 80000}"#)
            .await;

        assert_eq!(reply.status_code, 200);
        assert_eq!(reply.body, WebhookResponse::success("Signal processed"));
        assert_eq!(exchange.open_order_ids("BTCUSDT").len(), 2);
    }

    #[tokio::test]
    async fn test_inverted_levels_report_both_bounds() {
        let (intake, exchange) = intake(MockExchange::btc_at(dec!(84000)), LevelSource::Signal);

        let reply = intake
            .handle(r#"{"side": "long", "symbol": "BTCUSDT", "tp": 80000, "sl": 85000}"#)
            .await;

        assert_eq!(reply.status_code, 400);
        assert!(reply.body.message.contains("take profit 80000 must be above"));
        assert!(reply.body.message.contains("stop loss 85000 must be below"));
        assert!(exchange.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_take_profit_gets_structured_reply() {
        let (intake, exchange) = intake(MockExchange::btc_at(dec!(84000)), LevelSource::Signal);
        let intake = Arc::new(intake);

        // Decimal::MAX passes the sign and direction checks
        let task = tokio::spawn(async move {
            intake
                .handle(r#"{"side": "long", "symbol": "BTCUSDT", "tp": "79228162514264337593543950335", "sl": 80000}"#)
                .await
        });
        let reply = task.await.unwrap();

        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.body.status, "error");
        assert!(reply.body.message.contains("out of range"));
        assert!(exchange.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_failures_map_to_bad_gateway() {
        let exchange = MockExchange::btc_at(dec!(84000)).failing_order("STOP_MARKET");
        let (intake, _exchange) = intake(exchange, LevelSource::Computed);

        let reply = intake.handle(r#"{"side": "short", "symbol": "BTCUSDT"}"#).await;

        assert_eq!(reply.status_code, 502);
        assert!(reply.body.message.contains("stop-loss"));
    }
}
