//! Live trade-price monitor for Binance.
//!
//! The library splits into a self-healing WebSocket stream client
//! ([`api::binance::ws`]), a hysteresis-based alert engine ([`alerts`]),
//! and JSON config persistence ([`config`]). The binary wires them into
//! a console front-end.

pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
