use std::time::Duration;

/// Exponential reconnect delay, capped, never exhausted
#[derive(Debug)]
pub struct ReconnectBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            current_attempt: 0,
        }
    }

    /// Delay before the next attempt; doubles each call up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let delay = std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay);

        self.current_attempt = self.current_attempt.saturating_add(1);
        log::warn!(
            "⏳ Reconnect attempt {} in {}ms",
            self.current_attempt,
            delay.as_millis()
        );

        delay
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
