use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Which payloads are resent after the session has been re-established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResendPolicy {
    /// Resend the message whose send failed.
    #[default]
    Failed,
    /// Resend the message sent before the failed one, then the failed one.
    ///
    /// Reproduces the legacy publisher, which can deliver the previous
    /// message twice and reorders the wire sequence across a failure.
    Previous,
}

impl ResendPolicy {
    /// Payloads to put on the wire, in order, for one retry attempt.
    pub fn payloads<'a>(&self, failed: &'a str, previous: Option<&'a str>) -> Vec<&'a str> {
        match (self, previous) {
            (ResendPolicy::Previous, Some(prev)) if !prev.is_empty() => vec![prev, failed],
            _ => vec![failed],
        }
    }
}

/// Bounded exponential backoff between reconnect attempts.
pub struct RetryStrategy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleeps before retry number `attempt` (zero-based).
    pub async fn wait(&self, attempt: u32) {
        let delay = self.calculate_delay(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let strategy = RetryStrategy::new(5, Duration::from_millis(100));

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(strategy.calculate_delay(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_delay_saturates() {
        let strategy = RetryStrategy::new(100, Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(64), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_zero_base_delay() {
        let strategy = RetryStrategy::new(3, Duration::ZERO);
        assert_eq!(strategy.calculate_delay(10), Duration::ZERO);
        assert_eq!(strategy.max_retries(), 3);
    }

    #[tokio::test]
    async fn test_wait_sleeps_for_backoff() {
        let strategy = RetryStrategy::new(2, Duration::from_millis(10));
        let started = std::time::Instant::now();
        strategy.wait(1).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_failed_policy_resends_failed_message() {
        let policy = ResendPolicy::Failed;
        assert_eq!(policy.payloads("b", Some("a")), vec!["b"]);
        assert_eq!(policy.payloads("b", None), vec!["b"]);
    }

    #[test]
    fn test_previous_policy_resends_previous_first() {
        let policy = ResendPolicy::Previous;
        assert_eq!(policy.payloads("b", Some("a")), vec!["a", "b"]);
        // nothing cached yet
        assert_eq!(policy.payloads("b", None), vec!["b"]);
        assert_eq!(policy.payloads("b", Some("")), vec!["b"]);
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&ResendPolicy::Previous).unwrap(),
            "\"previous\""
        );
        assert_eq!(
            serde_json::from_str::<ResendPolicy>("\"failed\"").unwrap(),
            ResendPolicy::Failed
        );
    }
}
