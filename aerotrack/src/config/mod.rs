//! Service configuration.
//!
//! Settings are loaded from a JSON file whose path comes from the CLI;
//! a missing file simply yields the defaults, while an unreadable or
//! malformed file is a startup error. CLI flags override file values
//! (the CLI crate applies those on top of the loaded config).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::model::ReceiverLocation;
use crate::webhook::WebhookConfig;

/// Configuration errors; all of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid duration '{0}' (expected forms like '60s', '5m', '1h30m')")]
    Duration(String),
}

/// The `database` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "adsb".to_string(),
            sslmode: "disable".to_string(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed host.
    pub sbs_host: String,
    /// Feed port; 30003 for SBS, 30005 for Beast.
    pub sbs_port: u16,
    /// `sbs` or `beast`.
    pub feed_format: String,
    /// HTTP listen address; a bare `:port` binds all interfaces.
    pub http_addr: String,
    /// Receiver coordinates; zero means unset.
    pub rx_lat: f64,
    pub rx_lon: f64,
    /// Staleness eviction timeout as a duration string.
    pub stale_timeout: String,
    /// RTL-SDR device index handed to dump1090 when we launch it.
    pub device_index: i32,
    /// Maximum trail points per aircraft.
    pub trail_length: usize,
    /// Display label reported by the health endpoint.
    pub node_name: String,
    pub database: DatabaseSettings,
    pub webhooks: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sbs_host: "127.0.0.1".to_string(),
            sbs_port: 30003,
            feed_format: "sbs".to_string(),
            http_addr: ":8080".to_string(),
            rx_lat: 0.0,
            rx_lon: 0.0,
            stale_timeout: "60s".to_string(),
            device_index: 0,
            trail_length: 50,
            node_name: String::new(),
            database: DatabaseSettings::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`. A missing file returns defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(Path::new(path)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })
    }

    /// Parsed staleness timeout.
    pub fn stale_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.stale_timeout)
            .ok_or_else(|| ConfigError::Duration(self.stale_timeout.clone()))
    }

    /// Receiver location, if coordinates are configured.
    pub fn receiver(&self) -> Option<ReceiverLocation> {
        if self.rx_lat == 0.0 && self.rx_lon == 0.0 {
            return None;
        }
        Some(ReceiverLocation {
            lat: self.rx_lat,
            lon: self.rx_lon,
        })
    }
}

/// Parse duration strings like `500ms`, `60s`, `5m`, `1h30m`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = s.chars().peekable();
    let mut saw_component = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let mut unit = String::from(c);
        if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            unit.push('s');
        }

        let value: f64 = number.parse().ok()?;
        number.clear();
        saw_component = true;

        let seconds = match unit.as_str() {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        if seconds < 0.0 {
            return None;
        }
        total += Duration::from_secs_f64(seconds);
    }

    // A trailing number without a unit is malformed.
    if !number.is_empty() || !saw_component {
        return None;
    }
    Some(total)
}

/// Expand a bare `:port` listen address to bind all interfaces.
pub fn normalize_http_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sbs_host, "127.0.0.1");
        assert_eq!(config.sbs_port, 30003);
        assert_eq!(config.feed_format, "sbs");
        assert_eq!(config.http_addr, ":8080");
        assert_eq!(config.trail_length, 50);
        assert_eq!(config.stale_timeout().unwrap(), Duration::from_secs(60));
        assert!(config.receiver().is_none());
        assert!(!config.webhooks.enabled());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let raw = r#"{
            "sbs_port": 30005,
            "feed_format": "beast",
            "rx_lat": 33.2878,
            "rx_lon": -96.9826,
            "stale_timeout": "2m",
            "webhooks": {
                "discord_url": "https://discord.test/hook",
                "events": {
                    "emergency_squawk": true,
                    "aircraft_watchlist": ["AE*"]
                },
                "health_thresholds": { "cpu_percent": 90 }
            }
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.sbs_port, 30005);
        assert_eq!(config.feed_format, "beast");
        // Untouched keys keep their defaults.
        assert_eq!(config.sbs_host, "127.0.0.1");
        assert_eq!(config.trail_length, 50);
        assert_eq!(config.database.port, 5432);

        assert_eq!(config.stale_timeout().unwrap(), Duration::from_secs(120));
        let rx = config.receiver().unwrap();
        assert_eq!(rx.lat, 33.2878);

        assert!(config.webhooks.enabled());
        assert!(config.webhooks.events.emergency_squawk);
        assert_eq!(config.webhooks.events.aircraft_watchlist, vec!["AE*"]);
        assert_eq!(config.webhooks.health_thresholds.cpu_percent, 90.0);
    }

    #[test]
    fn test_load_missing_file_is_defaults() {
        let config = Config::load("/nonexistent/aerotrack-config.json").unwrap();
        assert_eq!(config.sbs_port, 30003);
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = std::env::temp_dir().join("aerotrack-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = Config::load(path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));

        assert!(parse_duration("").is_none());
        assert!(parse_duration("60").is_none());
        assert!(parse_duration("60x").is_none());
        assert!(parse_duration("abc").is_none());
    }

    #[test]
    fn test_normalize_http_addr() {
        assert_eq!(normalize_http_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_http_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
