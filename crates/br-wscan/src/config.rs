use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Ceiling on the whole trigger-and-wait cycle.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_ms: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_initial_buffer")]
    pub initial_buffer: usize,
    /// Scans to run before giving up on an empty result.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Read whatever the driver has cached instead of triggering a scan.
    #[serde(default)]
    pub cached_only: bool,
}

impl ScanConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_overall_timeout() -> u64 {
    15_000
}

fn default_initial_delay() -> u64 {
    250
}

fn default_retry_delay() -> u64 {
    100
}

fn default_initial_buffer() -> usize {
    // IW_SCAN_MAX_DATA, the minimum WE < 17 drivers accept
    4096
}

fn default_attempts() -> u32 {
    2
}

impl Default for ScanConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.interface, "wlan0");
        assert_eq!(config.overall_timeout(), Duration::from_secs(15));
        assert_eq!(config.initial_delay(), Duration::from_millis(250));
        assert_eq!(config.retry_delay(), Duration::from_millis(100));
        assert_eq!(config.initial_buffer, 4096);
        assert_eq!(config.attempts, 2);
        assert!(!config.cached_only);
    }

    #[test]
    fn test_partial_override() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"interface": "wlp2s0", "cached_only": true}"#).unwrap();
        assert_eq!(config.interface, "wlp2s0");
        assert!(config.cached_only);
        assert_eq!(config.attempts, 2);
    }
}
