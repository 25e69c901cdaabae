//! Webhook event types and constructors.

use chrono::{DateTime, Utc};

use crate::model::Aircraft;

/// Squawk codes that indicate an emergency condition.
pub const EMERGENCY_SQUAWKS: [&str; 3] = ["7500", "7600", "7700"];

/// True for the three emergency transponder codes.
pub fn is_emergency_squawk(squawk: &str) -> bool {
    EMERGENCY_SQUAWKS.contains(&squawk)
}

/// Category of an outbound webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    EmergencySquawk,
    WatchlistMatch,
    NewAircraft,
    HealthAlert,
}

/// System metrics attached to a health alert.
#[derive(Debug, Clone)]
pub struct HealthData {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub temp_celsius: f64,
    pub uptime_secs: u64,
}

/// One queued webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub timestamp: DateTime<Utc>,
    pub aircraft: Option<Aircraft>,
    pub health: Option<HealthData>,
    pub message: String,
}

impl WebhookEvent {
    pub fn emergency(ac: &Aircraft, squawk: &str) -> Self {
        let message = match squawk {
            "7500" => "HIJACK - Aircraft is being hijacked",
            "7600" => "RADIO FAILURE - Lost communications",
            "7700" => "EMERGENCY - General emergency declared",
            _ => "Unknown emergency",
        };
        Self {
            kind: WebhookEventKind::EmergencySquawk,
            timestamp: Utc::now(),
            aircraft: Some(ac.clone()),
            health: None,
            message: message.to_string(),
        }
    }

    pub fn watchlist(ac: &Aircraft, pattern: &str) -> Self {
        Self {
            kind: WebhookEventKind::WatchlistMatch,
            timestamp: Utc::now(),
            aircraft: Some(ac.clone()),
            health: None,
            message: format!("Matched watchlist pattern: {}", pattern),
        }
    }

    pub fn new_aircraft(ac: &Aircraft) -> Self {
        Self {
            kind: WebhookEventKind::NewAircraft,
            timestamp: Utc::now(),
            aircraft: Some(ac.clone()),
            health: None,
            message: "New aircraft detected".to_string(),
        }
    }

    pub fn health_alert(health: HealthData, alert: &str) -> Self {
        Self {
            kind: WebhookEventKind::HealthAlert,
            timestamp: Utc::now(),
            aircraft: None,
            health: Some(health),
            message: alert.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_squawks() {
        assert!(is_emergency_squawk("7500"));
        assert!(is_emergency_squawk("7600"));
        assert!(is_emergency_squawk("7700"));
        assert!(!is_emergency_squawk("7701"));
        assert!(!is_emergency_squawk("1200"));
        assert!(!is_emergency_squawk(""));
    }

    #[test]
    fn test_emergency_messages() {
        let ac = Aircraft::new("ABC123", Utc::now());
        assert!(WebhookEvent::emergency(&ac, "7500").message.contains("HIJACK"));
        assert!(WebhookEvent::emergency(&ac, "7600").message.contains("RADIO"));
        assert!(WebhookEvent::emergency(&ac, "7700").message.contains("EMERGENCY"));
    }
}
