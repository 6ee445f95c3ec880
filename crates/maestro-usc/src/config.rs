use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Waits the firmware needs after a reinitialize before it accepts further commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleDelays {
    pub reinitialize_ms: u64,
    pub script_upload_ms: u64,
    pub restore_defaults_ms: u64,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            reinitialize_ms: 50,
            script_upload_ms: 100,
            restore_defaults_ms: 1500,
        }
    }
}

impl SettleDelays {
    /// No waiting at all; for simulated devices.
    pub fn none() -> Self {
        Self {
            reinitialize_ms: 0,
            script_upload_ms: 0,
            restore_defaults_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-transfer timeout handed to the transport.
    pub timeout_ms: u64,
    pub settle: SettleDelays,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            settle: SettleDelays::default(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: SessionConfig = serde_yaml::from_str("settle:\n  reinitialize_ms: 5\n").unwrap();
        assert_eq!(cfg.timeout_ms, 500);
        assert_eq!(cfg.settle.reinitialize_ms, 5);
        assert_eq!(cfg.settle.restore_defaults_ms, 1500);
    }
}
