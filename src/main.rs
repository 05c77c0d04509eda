use env_logger::Builder;
use log::{debug, info, LevelFilter};
use std::error::Error;
use std::io::Write;
use std::time::Instant;

use pricewatch::alerts::{AlertDirection, AlertEngine, AlertThresholds};
use pricewatch::api::binance::ws::{
    event_channel, ConnectionStatus, PriceStreamClient, StreamConfig, StreamEvent,
};
use pricewatch::config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Configure logger
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("pricewatch", LevelFilter::Debug)
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();

    info!("Starting pricewatch...");

    let app_config = config::load()?;
    let symbol = app_config.symbol.clone();
    let thresholds = AlertThresholds {
        above: app_config.alert_above,
        below: app_config.alert_below,
    };
    info!(
        "watching {} (alert above: {:?}, below: {:?})",
        symbol, thresholds.above, thresholds.below
    );

    let (event_tx, mut event_rx) = event_channel();
    let mut client = PriceStreamClient::new(StreamConfig::new(&symbol), event_tx);
    client.start();

    let mut alerts = AlertEngine::new(thresholds);
    let mut last_price: Option<f64> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            event = event_rx.recv() => match event {
                Some(StreamEvent::Tick(tick)) => {
                    let movement = match last_price {
                        Some(prev) if tick.price > prev => "+",
                        Some(prev) if tick.price < prev => "-",
                        _ => " ",
                    };
                    debug!("{} {} {:.2}", symbol, movement, tick.price);
                    last_price = Some(tick.price);

                    for alert in alerts.on_tick(tick.price, Instant::now()) {
                        match alert.direction {
                            AlertDirection::Above => info!(
                                "ALERT: {} reached {:.2} (above threshold: {:.2})",
                                symbol,
                                tick.price,
                                alerts.thresholds().above.unwrap_or(tick.price)
                            ),
                            AlertDirection::Below => info!(
                                "ALERT: {} reached {:.2} (below threshold: {:.2})",
                                symbol,
                                tick.price,
                                alerts.thresholds().below.unwrap_or(tick.price)
                            ),
                        }
                    }
                }
                Some(StreamEvent::Status(status)) => {
                    info!("Connection status: {}", status);
                }
                None => break,
            }
        }
    }

    client.stop().await;
    info!("Shutdown complete");
    Ok(())
}
