// Live Source - normalized trade gateway over WebSocket
// Reconnects forever with exponential backoff; only an auth rejection at the
// handshake is fatal

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::core::config::GatewayConfig;
use crate::core::error::SourceError;
use crate::core::types::{Aggressor, Trade};
use crate::stream::{backoff_delay, TradeSource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Normalized trade message as the gateway sends it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayTrade {
    trade_id: u64,
    symbol: String,
    timestamp: u64,
    price: f64,
    size: u32,
    side: String,
}

pub struct LiveSource {
    config: GatewayConfig,
    symbols: Vec<String>,
    ws: Option<WsStream>,
    reconnect_attempt: u32,
    message_count: u64,
    malformed_count: u64,
}

impl LiveSource {
    pub fn new(config: GatewayConfig, symbols: Vec<String>) -> Self {
        Self {
            config,
            symbols,
            ws: None,
            reconnect_attempt: 0,
            message_count: 0,
            malformed_count: 0,
        }
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    fn parse_trade(&mut self, text: &str) -> Option<Trade> {
        let gateway: GatewayTrade = match serde_json::from_str(text) {
            Ok(t) => t,
            Err(error) => {
                self.malformed_count += 1;
                debug!(%error, "dropping malformed trade message");
                return None;
            }
        };
        let aggressor = match gateway.side.parse::<Aggressor>() {
            Ok(side) => side,
            Err(_) => {
                self.malformed_count += 1;
                return None;
            }
        };
        Some(Trade {
            trade_id: gateway.trade_id,
            symbol: gateway.symbol,
            timestamp: gateway.timestamp,
            price: gateway.price,
            size: gateway.size,
            aggressor,
        })
    }

    /// Connect and subscribe, backing off between attempts. Auth failures
    /// (401/403 at the handshake) are the one fatal path.
    async fn ensure_connected(&mut self) -> Result<(), SourceError> {
        while self.ws.is_none() {
            if self.reconnect_attempt > 0 {
                let delay = backoff_delay(self.reconnect_attempt - 1, &self.config);
                warn!(
                    attempt = self.reconnect_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "gateway reconnect backoff"
                );
                tokio::time::sleep(delay).await;
            }
            self.reconnect_attempt += 1;

            match connect_async(self.config.ws_url.as_str()).await {
                Ok((mut ws, _response)) => {
                    let subscribe = json!({
                        "action": "subscribe",
                        "symbols": self.symbols,
                        "apiKey": self.config.api_key,
                    });
                    if let Err(error) = ws.send(Message::Text(subscribe.to_string())).await {
                        warn!(%error, "subscribe failed, reconnecting");
                        continue;
                    }
                    info!(url = %self.config.ws_url, symbols = ?self.symbols, "gateway connected");
                    self.reconnect_attempt = 0;
                    self.ws = Some(ws);
                }
                Err(tokio_tungstenite::tungstenite::Error::Http(response))
                    if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
                {
                    return Err(SourceError::Fatal(format!(
                        "gateway rejected credentials: HTTP {}",
                        response.status()
                    )));
                }
                Err(error) => {
                    warn!(%error, "gateway connect failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TradeSource for LiveSource {
    async fn next(&mut self) -> Result<Option<Trade>, SourceError> {
        loop {
            self.ensure_connected().await?;
            let ws = self.ws.as_mut().expect("connected above");

            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.message_count += 1;
                    if let Some(trade) = self.parse_trade(&text) {
                        return Ok(Some(trade));
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "gateway closed the connection");
                    self.ws = None;
                    return Err(SourceError::Transient(
                        "gateway closed the connection".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "gateway read error, reconnecting");
                    self.ws = None;
                    return Err(SourceError::Transient(format!(
                        "gateway read error: {}",
                        error
                    )));
                }
                None => {
                    warn!("gateway stream ended, reconnecting");
                    self.ws = None;
                    return Err(SourceError::Transient("gateway stream ended".to_string()));
                }
            }
        }
    }

    fn malformed_count(&self) -> u64 {
        self.malformed_count
    }
}
