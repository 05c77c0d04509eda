use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Keepalive cadence. Binance drops idle connections silently, so a missed
/// pong past the interval plus this grace window counts as a dead link.
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on how long `stop` waits for the worker to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Event channel depth between the stream worker and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Uppercase instrument identifier, e.g. "BTCUSDT".
    pub symbol: String,
    pub endpoint_base: String,
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            endpoint_base: BINANCE_WS_URL.to_string(),
            reconnect_delay: Duration::from_secs(3),
        }
    }

    /// Trade stream endpoint for this symbol, e.g.
    /// `wss://stream.binance.com:9443/ws/btcusdt@trade`.
    pub fn stream_url(&self) -> String {
        format!("{}/{}@trade", self.endpoint_base, self.symbol.to_lowercase())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new("BTCUSDT")
    }
}

/// Connection lifecycle transitions, emitted alongside price ticks.
///
/// These are informational: a tick that arrives near a status change is
/// valid regardless of which one the consumer observes first.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error(String),
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One parsed trade price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub price: f64,
}

/// Single ordered channel item: ticks and status transitions are delivered
/// through one queue so statuses stay causally consistent with the ticks
/// of the connection they describe.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Tick(PriceTick),
    Status(ConnectionStatus),
}

/// Creates the event channel the stream worker publishes into.
pub fn event_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Self-healing Binance trade stream client.
///
/// Owns a background worker that connects to the `@trade` stream, forwards
/// parsed prices as [`StreamEvent::Tick`]s, and reconnects with a fixed
/// delay on any transport failure. Retries forever until [`stop`] is
/// called.
///
/// [`stop`]: PriceStreamClient::stop
pub struct PriceStreamClient {
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl PriceStreamClient {
    pub fn new(config: StreamConfig, events: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            config,
            events,
            shutdown: None,
            worker: None,
        }
    }

    /// Spawns the connect/receive loop. A no-op while the worker is alive,
    /// so calling it twice produces one worker and one `Connecting`.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("stream worker already running for {}", self.config.symbol);
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();
        let events = self.events.clone();
        self.worker = Some(tokio::spawn(run_stream_loop(config, events, shutdown_rx)));
        self.shutdown = Some(shutdown_tx);
        info!("price stream started for {}", self.config.symbol);
    }

    /// Signals the worker to shut down, closes any open connection, and
    /// waits for the worker bounded by [`STOP_TIMEOUT`]. On timeout the
    /// worker is abandoned rather than aborted; closing the transport
    /// already unblocks it in practice. No events are delivered after
    /// this returns.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if timeout(STOP_TIMEOUT, worker).await.is_err() {
            warn!(
                "stream worker for {} did not exit within {:?}",
                self.config.symbol, STOP_TIMEOUT
            );
        } else {
            info!("price stream stopped for {}", self.config.symbol);
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the read loop handed control back.
enum Disconnect {
    /// Shutdown was requested, or the consumer dropped its receiver.
    Stop,
    /// Server closed the connection or the stream ended.
    Closed(Option<String>),
    /// Transport error or keepalive timeout.
    Failed(String),
}

async fn run_stream_loop(
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = config.stream_url();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if !emit(&events, StreamEvent::Status(ConnectionStatus::Connecting)).await {
            break;
        }
        info!("connecting to {}", url);

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => Some(result),
            _ = shutdown.changed() => None,
        };

        match connected {
            Some(Ok((ws, _))) => {
                info!("websocket connected");
                if !emit(&events, StreamEvent::Status(ConnectionStatus::Connected)).await {
                    break;
                }
                match read_until_disconnect(ws, &events, &mut shutdown).await {
                    Disconnect::Stop => {
                        let _ = events
                            .send(StreamEvent::Status(ConnectionStatus::Disconnected))
                            .await;
                        break;
                    }
                    Disconnect::Closed(reason) => {
                        info!(
                            "websocket closed: {}",
                            reason.as_deref().unwrap_or("stream ended")
                        );
                        if !emit(&events, StreamEvent::Status(ConnectionStatus::Disconnected))
                            .await
                        {
                            break;
                        }
                    }
                    Disconnect::Failed(reason) => {
                        error!("websocket failed: {}", reason);
                        if !emit(
                            &events,
                            StreamEvent::Status(ConnectionStatus::Error(reason)),
                        )
                        .await
                        {
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!("connection error: {}", e);
                if !emit(
                    &events,
                    StreamEvent::Status(ConnectionStatus::Error(e.to_string())),
                )
                .await
                {
                    break;
                }
            }
            // Shutdown arrived while the connect was in flight.
            None => break,
        }

        if *shutdown.borrow() {
            break;
        }
        if !emit(&events, StreamEvent::Status(ConnectionStatus::Reconnecting)).await {
            break;
        }
        debug!("reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("stream worker exited");
}

async fn read_until_disconnect(
    mut ws: WsStream,
    events: &mpsc::Sender<StreamEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Disconnect {
    let mut ping_timer = interval(PING_INTERVAL);
    // The first interval tick completes immediately; consume it so the
    // first ping goes out one full interval after connect.
    ping_timer.tick().await;
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws.close(None).await;
                return Disconnect::Stop;
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(price) = parse_trade_price(&text) {
                        if !emit(events, StreamEvent::Tick(PriceTick { price })).await {
                            let _ = ws.close(None).await;
                            return Disconnect::Stop;
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    last_pong = Instant::now();
                }
                Some(Ok(Message::Close(frame))) => {
                    return Disconnect::Closed(frame.map(|f| f.reason.to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Disconnect::Failed(e.to_string()),
                None => return Disconnect::Closed(None),
            },
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PING_INTERVAL + PONG_TIMEOUT {
                    return Disconnect::Failed("keepalive timeout".to_string());
                }
                if let Err(e) = ws.send(Message::Ping(Vec::new())).await {
                    return Disconnect::Failed(e.to_string());
                }
            }
        }
    }
}

/// Sends one event to the consumer; false means the receiver is gone and
/// the worker should wind down.
async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    if events.send(event).await.is_err() {
        warn!("event receiver dropped, stopping stream worker");
        return false;
    }
    true
}

/// Extracts the trade price from one raw feed message.
///
/// Binance trade events carry the price in field `p`, usually as a string.
/// Anything that does not yield a finite positive number is feed noise and
/// produces no tick.
fn parse_trade_price(text: &str) -> Option<f64> {
    let payload: Value = serde_json::from_str(text).ok()?;
    let price = match payload.get("p")? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_price() {
        let text = r#"{"e":"trade","s":"BTCUSDT","p":"65000.10","q":"0.001"}"#;
        assert_eq!(parse_trade_price(text), Some(65000.10));
    }

    #[test]
    fn parses_numeric_price() {
        assert_eq!(parse_trade_price(r#"{"p":65250.5}"#), Some(65250.5));
    }

    #[test]
    fn drops_message_without_price_field() {
        assert_eq!(parse_trade_price(r#"{"e":"trade","s":"BTCUSDT"}"#), None);
    }

    #[test]
    fn drops_non_numeric_price() {
        assert_eq!(parse_trade_price(r#"{"p":"not-a-number"}"#), None);
        assert_eq!(parse_trade_price(r#"{"p":true}"#), None);
        assert_eq!(parse_trade_price(r#"{"p":null}"#), None);
    }

    #[test]
    fn drops_non_positive_and_non_finite_prices() {
        assert_eq!(parse_trade_price(r#"{"p":"0"}"#), None);
        assert_eq!(parse_trade_price(r#"{"p":"-5.0"}"#), None);
        assert_eq!(parse_trade_price(r#"{"p":"NaN"}"#), None);
        assert_eq!(parse_trade_price(r#"{"p":"inf"}"#), None);
    }

    #[test]
    fn drops_malformed_payloads() {
        assert_eq!(parse_trade_price("not json"), None);
        assert_eq!(parse_trade_price(""), None);
        assert_eq!(parse_trade_price(r#"[1,2,3]"#), None);
        assert_eq!(parse_trade_price(r#""just a string""#), None);
    }

    #[test]
    fn stream_url_is_lowercased_trade_stream() {
        let config = StreamConfig::new("BtcUsdt");
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(
            config.stream_url(),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );
    }

    #[test]
    fn default_config_targets_btcusdt_with_three_second_delay() {
        let config = StreamConfig::default();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
    }
}
