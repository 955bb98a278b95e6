//! Command queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the command queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Per-attempt timeout in milliseconds (default: 5000)
    pub command_timeout_ms: u64,
    /// Total attempts per command before reporting failure (default: 3)
    pub max_retries: u32,
    /// Backoff base in milliseconds; attempt `n` waits `n * retry_delay_ms`
    pub retry_delay_ms: u64,
    /// Buffered responses per broadcast subscriber
    pub response_channel_capacity: usize,
}

impl QueueConfig {
    /// Per-attempt timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            max_retries: 3,
            retry_delay_ms: 100,
            response_channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let config = QueueConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(3), Duration::from_millis(300));
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
    }
}
