//! Minimum spacing between outbound venue calls
//!
//! Not a token bucket: each call waits until `min_interval` has passed
//! since the previous one started.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the throttle
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum time between two calls
    pub min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
        }
    }
}

impl ThrottleConfig {
    /// Set the minimum interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Override the interval from `OKX_API_MIN_INTERVAL_MS` when set
    pub fn with_env_override(self) -> Self {
        match std::env::var("OKX_API_MIN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(ms) => self.with_min_interval(Duration::from_millis(ms)),
            None => self,
        }
    }
}

/// Spacing gate shared by clones
///
/// # Example
///
/// ```
/// use perp_trader::common::{Throttle, ThrottleConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let throttle = Throttle::new(ThrottleConfig::default().with_min_interval(Duration::from_millis(10)));
///     throttle.wait().await;
///     // Make API request...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Throttle {
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            min_interval: config.min_interval,
        }
    }

    /// Throttle with the default 200ms spacing
    pub fn with_defaults() -> Self {
        Self::new(ThrottleConfig::default())
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `now - last_call >= min_interval`, then claim the slot
    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config() {
        let config = ThrottleConfig::default();
        assert_eq!(config.min_interval, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let throttle = Throttle::new(ThrottleConfig::default().with_min_interval(Duration::from_secs(5)));
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_second_call_is_spaced() {
        let throttle = Throttle::new(ThrottleConfig::default().with_min_interval(Duration::from_millis(50)));
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let throttle1 = Throttle::new(ThrottleConfig::default().with_min_interval(Duration::from_millis(50)));
        let throttle2 = throttle1.clone();
        let start = Instant::now();
        throttle1.wait().await;
        throttle2.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
