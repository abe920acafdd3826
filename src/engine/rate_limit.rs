use std::time::Duration;
use tracing::info;

/// Threshold-triggered cooldown on cumulative token use.
///
/// Totals only grow within a run, so once the threshold is crossed every
/// later unit of work pays the cooldown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiter {
    threshold: u64,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(threshold: u64, cooldown: Duration) -> Self {
        Self { threshold, cooldown }
    }

    pub fn cooldown_for(&self, total_tokens: u64) -> Option<Duration> {
        (total_tokens > self.threshold).then_some(self.cooldown)
    }

    pub async fn throttle(&self, total_tokens: u64) {
        if let Some(cooldown) = self.cooldown_for(total_tokens) {
            info!(
                tokens = total_tokens,
                threshold = self.threshold,
                "High token usage, cooling down for {}s",
                cooldown.as_secs()
            );
            tokio::time::sleep(cooldown).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(50_000, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_only_above_threshold() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.cooldown_for(50_000), None);
        assert_eq!(limiter.cooldown_for(50_001), Some(Duration::from_secs(30)));
        assert_eq!(limiter.cooldown_for(1_000_000), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_sleeps_the_cooldown() {
        let limiter = RateLimiter::new(10, Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        limiter.throttle(5).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.throttle(11).await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
