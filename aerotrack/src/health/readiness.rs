//! Component readiness registry.
//!
//! Every long-lived component marks itself not-ready when launched,
//! ready when it enters its main loop, and not-ready again on exit. The
//! service is ready only when at least one component has registered and
//! none of them is down.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::Serialize;

/// Readiness of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentState {
    pub ready: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Thread-safe component readiness map.
#[derive(Default)]
pub struct Readiness {
    components: DashMap<String, ComponentState>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, component: &str, ready: bool, message: &str) {
        self.components.insert(
            component.to_string(),
            ComponentState {
                ready,
                message: message.to_string(),
            },
        );
    }

    pub fn mark_ready(&self, component: &str) {
        self.set(component, true, "running");
    }

    pub fn mark_not_ready(&self, component: &str, reason: &str) {
        let reason = if reason.is_empty() { "stopped" } else { reason };
        self.set(component, false, reason);
    }

    /// Copy of the full map for the API.
    pub fn snapshot(&self) -> HashMap<String, ComponentState> {
        self.components
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// True when at least one component is registered and all are ready.
    pub fn ready(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(|entry| entry.value().ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_not_ready() {
        let r = Readiness::new();
        assert!(!r.ready());
    }

    #[test]
    fn test_all_ready() {
        let r = Readiness::new();
        r.mark_ready("tracker");
        r.mark_ready("feed_client");
        assert!(r.ready());
    }

    #[test]
    fn test_one_not_ready_blocks() {
        let r = Readiness::new();
        r.mark_ready("tracker");
        r.mark_not_ready("feed_client", "reconnecting");
        assert!(!r.ready());

        let snapshot = r.snapshot();
        assert_eq!(snapshot["feed_client"].message, "reconnecting");
        assert!(snapshot["tracker"].ready);
    }

    #[test]
    fn test_transitions() {
        let r = Readiness::new();
        r.mark_not_ready("http_server", "starting");
        assert!(!r.ready());

        r.mark_ready("http_server");
        assert!(r.ready());

        r.mark_not_ready("http_server", "");
        assert!(!r.ready());
        assert_eq!(r.snapshot()["http_server"].message, "stopped");
    }
}
