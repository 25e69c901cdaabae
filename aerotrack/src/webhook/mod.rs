//! Outbound chat-webhook dispatcher.
//!
//! Detected conditions (emergency squawk, watchlist match, new aircraft,
//! health threshold) are formatted as Discord-style embeds and POSTed to
//! the configured URL. The dispatcher sits behind a bounded queue with
//! drop-on-overflow, and re-alerts for the same key are suppressed for
//! five minutes so a squawking aircraft does not flood the channel.
//! Failed deliveries are logged and never retried.

mod discord;
mod events;

pub use discord::{format_message, test_message, DiscordEmbed, DiscordField, DiscordMessage};
pub use events::{is_emergency_squawk, HealthData, WebhookEvent, WebhookEventKind};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::Aircraft;

const QUEUE_CAPACITY: usize = 100;
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5 * 60);
const RECENT_TTL: Duration = Duration::from_secs(10 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which event classes are delivered, from the `webhooks.events` config
/// section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvents {
    #[serde(default)]
    pub emergency_squawk: bool,
    #[serde(default)]
    pub aircraft_watchlist: Vec<String>,
    #[serde(default)]
    pub new_aircraft: bool,
    #[serde(default)]
    pub health_alerts: bool,
}

/// Alert thresholds; zero disables a check.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HealthThresholds {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub temp_celsius: f64,
}

/// The `webhooks` config section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub discord_url: String,
    #[serde(default)]
    pub events: WebhookEvents,
    #[serde(default)]
    pub health_thresholds: HealthThresholds,
}

impl WebhookConfig {
    pub fn enabled(&self) -> bool {
        !self.discord_url.is_empty()
    }
}

/// Debounced, queue-backed webhook sender.
pub struct WebhookDispatcher {
    config: WebhookConfig,
    client: reqwest::Client,
    events_tx: mpsc::Sender<WebhookEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<WebhookEvent>>>,
    recent: Mutex<HashMap<String, Instant>>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(POST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an emergency-squawk alert, debounced per aircraft.
    pub fn send_emergency(&self, ac: &Aircraft) {
        if !self.config.events.emergency_squawk {
            return;
        }
        if !self.should_send(&format!("emergency:{}", ac.icao)) {
            return;
        }
        let squawk = ac.squawk.clone().unwrap_or_default();
        self.enqueue(WebhookEvent::emergency(ac, &squawk));
    }

    /// Queue a watchlist alert, debounced per aircraft.
    pub fn send_watchlist_match(&self, ac: &Aircraft, pattern: &str) {
        if self.config.events.aircraft_watchlist.is_empty() {
            return;
        }
        if !self.should_send(&format!("watchlist:{}", ac.icao)) {
            return;
        }
        self.enqueue(WebhookEvent::watchlist(ac, pattern));
    }

    /// Queue a new-aircraft notification. Not debounced: each ICAO adds
    /// at most once per session by construction.
    pub fn send_new_aircraft(&self, ac: &Aircraft) {
        if !self.config.events.new_aircraft {
            return;
        }
        self.enqueue(WebhookEvent::new_aircraft(ac));
    }

    /// Queue a health alert, debounced per alert type.
    pub fn send_health_alert(&self, health: HealthData, alert: &str) {
        if !self.config.events.health_alerts {
            return;
        }
        if !self.should_send(&format!("health:{}", alert)) {
            return;
        }
        self.enqueue(WebhookEvent::health_alert(health, alert));
    }

    /// Match an aircraft against the watchlist patterns. A trailing `*`
    /// makes the pattern a prefix match; comparison is case-insensitive
    /// over ICAO, registration, and callsign.
    pub fn watchlist_match(&self, ac: &Aircraft) -> Option<String> {
        let candidates = [
            Some(ac.icao.as_str()),
            ac.registration.as_deref(),
            ac.callsign.as_deref(),
        ];

        for pattern in &self.config.events.aircraft_watchlist {
            let pattern_upper = pattern.to_uppercase();

            let matched = if let Some(prefix) = pattern_upper.strip_suffix('*') {
                candidates
                    .iter()
                    .flatten()
                    .any(|c| c.to_uppercase().starts_with(prefix))
            } else {
                candidates
                    .iter()
                    .flatten()
                    .any(|c| c.eq_ignore_ascii_case(&pattern_upper))
            };

            if matched {
                return Some(pattern_upper);
            }
        }
        None
    }

    fn enqueue(&self, event: WebhookEvent) {
        if !self.config.enabled() {
            return;
        }
        if self.events_tx.try_send(event).is_err() {
            warn!("Webhook queue full, dropping event");
        }
    }

    /// Deliver queued events until cancelled, periodically expiring the
    /// debounce map.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(mut rx) = self.events_rx.lock().unwrap().take() else {
            return;
        };
        info!("Webhook dispatcher started");

        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = cleanup.tick() => self.cleanup_recent(),
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.deliver(&event).await;
                }
            }
        }
        info!("Webhook dispatcher stopped");
    }

    async fn deliver(&self, event: &WebhookEvent) {
        let message = format_message(event);
        self.post(&message).await;
    }

    /// POST the fixed test payload immediately, bypassing the queue.
    pub async fn send_test(&self) {
        self.post(&test_message()).await;
    }

    async fn post(&self, message: &DiscordMessage) {
        if !self.config.enabled() {
            return;
        }

        match self
            .client
            .post(&self.config.discord_url)
            .json(message)
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Webhook endpoint rejected message");
            }
            Ok(_) => debug!("Webhook delivered"),
            Err(e) => warn!(error = %e, "Webhook delivery failed"),
        }
    }

    fn should_send(&self, key: &str) -> bool {
        let mut recent = self.recent.lock().unwrap();
        if let Some(last) = recent.get(key) {
            if last.elapsed() < DEBOUNCE_WINDOW {
                return false;
            }
        }
        recent.insert(key.to_string(), Instant::now());
        true
    }

    fn cleanup_recent(&self) {
        self.recent
            .lock()
            .unwrap()
            .retain(|_, last| last.elapsed() <= RECENT_TTL);
    }
}
