//! Discord-compatible message payloads.

use chrono::SecondsFormat;
use serde::Serialize;

use super::events::{WebhookEvent, WebhookEventKind};
use crate::model::Aircraft;

pub const COLOR_EMERGENCY: u32 = 0xFF0000;
pub const COLOR_WATCHLIST: u32 = 0xFFAA00;
pub const COLOR_NEW: u32 = 0x00D4FF;
pub const COLOR_HEALTH: u32 = 0xFF6B6B;

const USERNAME: &str = "aerotrack";
const FOOTER: &str = "aerotrack ADS-B tracker";

#[derive(Debug, Clone, Serialize)]
pub struct DiscordMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<DiscordField>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<DiscordFooter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscordField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscordFooter {
    pub text: String,
}

/// Render a queued event into the webhook envelope.
pub fn format_message(event: &WebhookEvent) -> DiscordMessage {
    let embed = match event.kind {
        WebhookEventKind::EmergencySquawk => emergency_embed(event),
        WebhookEventKind::WatchlistMatch => aircraft_embed(
            event,
            "Watchlist Aircraft Detected".to_string(),
            COLOR_WATCHLIST,
        ),
        WebhookEventKind::NewAircraft => {
            aircraft_embed(event, "New Aircraft".to_string(), COLOR_NEW)
        }
        WebhookEventKind::HealthAlert => health_embed(event),
    };

    DiscordMessage {
        username: Some(USERNAME.to_string()),
        content: None,
        embeds: vec![embed],
    }
}

/// The fixed payload sent by the test endpoint.
pub fn test_message() -> DiscordMessage {
    DiscordMessage {
        username: Some(USERNAME.to_string()),
        content: None,
        embeds: vec![DiscordEmbed {
            title: "Test Webhook".to_string(),
            description: "Webhook is configured correctly".to_string(),
            color: COLOR_NEW,
            fields: Vec::new(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            footer: footer(),
        }],
    }
}

fn footer() -> Option<DiscordFooter> {
    Some(DiscordFooter {
        text: FOOTER.to_string(),
    })
}

fn emergency_embed(event: &WebhookEvent) -> DiscordEmbed {
    let squawk = event
        .aircraft
        .as_ref()
        .and_then(|ac| ac.squawk.as_deref())
        .unwrap_or("");
    let title = match squawk {
        "7500" => "HIJACK SQUAWK 7500",
        "7600" => "RADIO FAILURE SQUAWK 7600",
        "7700" => "EMERGENCY SQUAWK 7700",
        _ => "EMERGENCY SQUAWK",
    };

    let mut embed = aircraft_embed(event, title.to_string(), COLOR_EMERGENCY);
    if !squawk.is_empty() {
        embed.fields.insert(
            1,
            DiscordField {
                name: "Squawk".to_string(),
                value: squawk.to_string(),
                inline: true,
            },
        );
    }
    embed
}

fn aircraft_embed(event: &WebhookEvent, title: String, color: u32) -> DiscordEmbed {
    let mut fields = Vec::new();
    if let Some(ac) = &event.aircraft {
        fields = aircraft_fields(ac);
    }

    DiscordEmbed {
        title,
        description: event.message.clone(),
        color,
        fields,
        timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        footer: footer(),
    }
}

fn aircraft_fields(ac: &Aircraft) -> Vec<DiscordField> {
    let mut fields = Vec::new();
    let mut push = |name: &str, value: String| {
        fields.push(DiscordField {
            name: name.to_string(),
            value,
            inline: true,
        });
    };

    if let Some(callsign) = &ac.callsign {
        push("Callsign", callsign.clone());
    }
    push("ICAO", ac.icao.clone());
    if let Some(registration) = &ac.registration {
        push("Registration", registration.clone());
    }
    if let Some(aircraft_type) = &ac.aircraft_type {
        push("Type", aircraft_type.clone());
    }
    if let Some(operator) = &ac.operator {
        push("Operator", operator.clone());
    }
    if let Some(alt) = ac.alt_ft {
        push("Altitude", format!("{} ft", alt));
    }
    if let Some(speed) = ac.speed_kt {
        push("Speed", format!("{:.0} kt", speed));
    }
    if let (Some(lat), Some(lon)) = (ac.lat, ac.lon) {
        push(
            "Position",
            format!(
                "[{:.4}, {:.4}](https://www.google.com/maps?q={:.4},{:.4})",
                lat, lon, lat, lon
            ),
        );
    }

    fields
}

fn health_embed(event: &WebhookEvent) -> DiscordEmbed {
    let mut fields = Vec::new();
    if let Some(h) = &event.health {
        fields = vec![
            DiscordField {
                name: "CPU".to_string(),
                value: format!("{:.1}%", h.cpu_percent),
                inline: true,
            },
            DiscordField {
                name: "Memory".to_string(),
                value: format!("{:.1}%", h.memory_percent),
                inline: true,
            },
            DiscordField {
                name: "Temperature".to_string(),
                value: format!("{:.1}C", h.temp_celsius),
                inline: true,
            },
            DiscordField {
                name: "Uptime".to_string(),
                value: format!("{}s", h.uptime_secs),
                inline: true,
            },
        ];
    }

    DiscordEmbed {
        title: "Health Alert".to_string(),
        description: event.message.clone(),
        color: COLOR_HEALTH,
        fields,
        timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        footer: footer(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::HealthData;
    use chrono::Utc;

    fn emergency_aircraft() -> Aircraft {
        let mut ac = Aircraft::new("A0A96C", Utc::now());
        ac.callsign = Some("AAL123".to_string());
        ac.squawk = Some("7700".to_string());
        ac.alt_ft = Some(12_000);
        ac.lat = Some(33.1234);
        ac.lon = Some(-96.789);
        ac
    }

    #[test]
    fn test_emergency_message_shape() {
        let ac = emergency_aircraft();
        let event = WebhookEvent::emergency(&ac, "7700");
        let msg = format_message(&event);

        assert_eq!(msg.embeds.len(), 1);
        let embed = &msg.embeds[0];
        assert_eq!(embed.title, "EMERGENCY SQUAWK 7700");
        assert_eq!(embed.color, COLOR_EMERGENCY);

        let names: Vec<&str> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Callsign"));
        assert!(names.contains(&"ICAO"));
        assert!(names.contains(&"Squawk"));
        assert!(names.contains(&"Position"));

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["username"], "aerotrack");
        assert_eq!(json["embeds"][0]["fields"][1]["name"], "Squawk");
        assert_eq!(json["embeds"][0]["fields"][1]["value"], "7700");
    }

    #[test]
    fn test_health_message_shape() {
        let event = WebhookEvent::health_alert(
            HealthData {
                cpu_percent: 93.2,
                memory_percent: 41.0,
                temp_celsius: 71.5,
                uptime_secs: 3600,
            },
            "High CPU usage: 93.2%",
        );
        let msg = format_message(&event);

        let embed = &msg.embeds[0];
        assert_eq!(embed.color, COLOR_HEALTH);
        assert_eq!(embed.fields[0].value, "93.2%");
        assert!(embed.description.contains("High CPU"));
    }

    #[test]
    fn test_minimal_aircraft_omits_absent_fields() {
        let ac = Aircraft::new("ABC123", Utc::now());
        let event = WebhookEvent::new_aircraft(&ac);
        let msg = format_message(&event);

        let embed = &msg.embeds[0];
        assert_eq!(embed.color, COLOR_NEW);
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(embed.fields[0].name, "ICAO");
    }
}
