use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::error::PriceWatchError;

const CONFIG_DIR_NAME: &str = "pricewatch";
const CONFIG_FILE_NAME: &str = "config.json";

/// Persisted application settings: the watched symbol plus the two alert
/// thresholds. Anything unreadable on disk falls back to these defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    pub symbol: String,
    pub alert_above: Option<f64>,
    pub alert_below: Option<f64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            alert_above: None,
            alert_below: None,
        }
    }
}

fn config_base_dir() -> PathBuf {
    match env::var("XDG_CONFIG_HOME") {
        Ok(base) if !base.is_empty() => PathBuf::from(base),
        _ => {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(".config")
        }
    }
}

pub fn config_file_path() -> PathBuf {
    config_base_dir().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Loads the config from the default location, creating it with defaults
/// when missing and replacing it when unreadable. Parse damage is not an
/// error; only filesystem failures are.
pub fn load() -> Result<AppConfig, PriceWatchError> {
    load_from(&config_file_path())
}

/// Persists new alert thresholds, preserving the stored symbol.
pub fn save_alerts(
    alert_above: Option<f64>,
    alert_below: Option<f64>,
) -> Result<(), PriceWatchError> {
    save_alerts_to(&config_file_path(), alert_above, alert_below)
}

fn load_from(path: &Path) -> Result<AppConfig, PriceWatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        let config = AppConfig::default();
        write_config(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path)?;
    match parse_config(&raw) {
        Some(config) => Ok(config),
        None => {
            warn!("config file at {} is unreadable, rewriting defaults", path.display());
            let config = AppConfig::default();
            write_config(path, &config)?;
            Ok(config)
        }
    }
}

fn save_alerts_to(
    path: &Path,
    alert_above: Option<f64>,
    alert_below: Option<f64>,
) -> Result<(), PriceWatchError> {
    let mut config = load_from(path)?;
    config.alert_above = alert_above;
    config.alert_below = alert_below;
    write_config(path, &config)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), PriceWatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(())
}

/// Lenient parse: the file must be a JSON object, but individual keys fall
/// back to defaults when missing or the wrong shape. Thresholds accept
/// numbers and numeric strings (hand-edited configs), anything else reads
/// as "disabled".
fn parse_config(raw: &str) -> Option<AppConfig> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let map = value.as_object()?;
    let defaults = AppConfig::default();
    Some(AppConfig {
        symbol: map
            .get("symbol")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_uppercase())
            .unwrap_or(defaults.symbol),
        alert_above: map.get("alert_above").and_then(coerce_threshold),
        alert_below: map.get("alert_below").and_then(coerce_threshold),
    })
}

fn coerce_threshold(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_creates_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_replaced_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not valid json").unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());

        // The file on disk was healed too.
        let reloaded = load_from(&path).unwrap();
        assert_eq!(reloaded, AppConfig::default());
    }

    #[test]
    fn non_object_file_is_replaced_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert_eq!(load_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_config_takes_defaults_for_missing_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"symbol": "ethusdt"}"#).unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.alert_above, None);
        assert_eq!(config.alert_below, None);
    }

    #[test]
    fn thresholds_coerce_numbers_and_numeric_strings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"symbol": "BTCUSDT", "alert_above": "102500", "alert_below": 98000.5}"#,
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.alert_above, Some(102500.0));
        assert_eq!(config.alert_below, Some(98000.5));
    }

    #[test]
    fn garbage_threshold_reads_as_disabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"alert_above": [1], "alert_below": "oops"}"#).unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.alert_above, None);
        assert_eq!(config.alert_below, None);
    }

    #[test]
    fn save_alerts_round_trips_and_preserves_symbol() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"symbol": "SOLUSDT"}"#).unwrap();

        save_alerts_to(&path, Some(250.0), None).unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.symbol, "SOLUSDT");
        assert_eq!(config.alert_above, Some(250.0));
        assert_eq!(config.alert_below, None);

        save_alerts_to(&path, None, Some(120.25)).unwrap();
        let config = load_from(&path).unwrap();
        assert_eq!(config.alert_above, None);
        assert_eq!(config.alert_below, Some(120.25));
    }
}
