use std::time::Duration;

use crate::events::Priority;

/// Delay between a run finishing and the idle probe firing for its node.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(10);

/// Tuning for the completion listener and the idle-check scheduler.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// How long a probe waits before re-validating its node
    pub probe_delay: Duration,
    /// Skip scheduling while a probe for the same node is still pending
    pub dedupe_probes: bool,
    /// Priority the completion listener subscribes with on the run event bus
    pub listener_priority: Priority,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            probe_delay: DEFAULT_PROBE_DELAY,
            dedupe_probes: false,
            listener_priority: Priority::HIGHEST,
        }
    }
}

impl DrainConfig {
    pub fn new(probe_delay: Duration) -> Self {
        Self {
            probe_delay,
            ..Default::default()
        }
    }

    pub fn with_dedupe(mut self, dedupe_probes: bool) -> Self {
        self.dedupe_probes = dedupe_probes;
        self
    }

    pub fn with_listener_priority(mut self, priority: Priority) -> Self {
        self.listener_priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_config_default() {
        let cfg = DrainConfig::default();
        assert_eq!(cfg.probe_delay, Duration::from_secs(10));
        assert!(!cfg.dedupe_probes);
        assert_eq!(cfg.listener_priority, Priority::HIGHEST);
    }

    #[test]
    fn drain_config_new() {
        let cfg = DrainConfig::new(Duration::from_millis(250));
        assert_eq!(cfg.probe_delay, Duration::from_millis(250));
        assert!(!cfg.dedupe_probes);
    }

    #[test]
    fn drain_config_builders() {
        let cfg = DrainConfig::default()
            .with_dedupe(true)
            .with_listener_priority(Priority(7));
        assert!(cfg.dedupe_probes);
        assert_eq!(cfg.listener_priority, Priority(7));
        assert_eq!(cfg.probe_delay, DEFAULT_PROBE_DELAY);
    }
}
