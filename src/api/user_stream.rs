//! Binance user data stream: account updates pushed over a websocket.
//!
//! The stream is identified by a listen key that expires after 60 minutes
//! unless it is kept alive. The connection is re-established with exponential
//! backoff whenever it drops or the key expires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::BinanceClient;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Event pushed on the user data stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserDataEvent {
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "a")]
        account: AccountUpdate,
    },
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired,
    #[serde(other)]
    Other,
}

/// Balance and position changes of one `ACCOUNT_UPDATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountUpdate {
    /// Reason for the update (ORDER, FUNDING_FEE, ...)
    #[serde(rename = "m", default)]
    pub reason: String,

    #[serde(rename = "P", default)]
    pub positions: Vec<PositionUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionUpdate {
    #[serde(rename = "s")]
    pub symbol: String,

    /// Signed position amount after the update
    #[serde(rename = "pa")]
    pub position_amount: Decimal,
}

pub fn parse_event(text: &str) -> Result<UserDataEvent> {
    serde_json::from_str(text).context("Failed to parse user data event")
}

/// Forward account updates to `updates` until the receiver is dropped.
pub async fn run_user_stream(
    client: Arc<BinanceClient>,
    updates: mpsc::Sender<AccountUpdate>,
) -> Result<()> {
    let mut reconnect = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(MAX_RECONNECT_DELAY)
        .with_max_elapsed_time(None)
        .build();

    loop {
        match stream_once(&client, &updates).await {
            Ok(()) => {
                info!("User data stream ended");
                reconnect.reset();
            }
            Err(e) => warn!(error = %e, "User data stream failed"),
        }

        if updates.is_closed() {
            return Ok(());
        }

        let delay = reconnect.next_backoff().unwrap_or(MAX_RECONNECT_DELAY);
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting user data stream");
        tokio::time::sleep(delay).await;
    }
}

async fn stream_once(client: &BinanceClient, updates: &mpsc::Sender<AccountUpdate>) -> Result<()> {
    let listen_key = client.start_user_stream().await?;
    let url = format!("{}/{}", client.stream_url(), listen_key);

    let (ws_stream, _response) = connect_async(url.as_str())
        .await
        .context("Failed to connect user data stream")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    info!("Connected to user data stream");

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                match client.keepalive_user_stream().await {
                    Ok(()) => debug!("Listen key kept alive"),
                    Err(e) => warn!(error = %e, "Listen key keepalive failed"),
                }
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_event(&text) {
                        Ok(UserDataEvent::AccountUpdate { event_time, account }) => {
                            debug!(
                                event_time = event_time,
                                reason = %account.reason,
                                positions = account.positions.len(),
                                "Account update"
                            );
                            if updates.send(account).await.is_err() {
                                return Ok(());
                            }
                        }
                        Ok(UserDataEvent::ListenKeyExpired) => {
                            warn!("Listen key expired");
                            return Ok(());
                        }
                        Ok(UserDataEvent::Other) => {}
                        Err(e) => warn!(error = %e, "Unrecognized user data message"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        ws_sender.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("User data stream read failed"),
                }
            }
        }
    }
}
