//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;
use vigil_settings::ReconnectSettings;

/// Delay schedule for reconnect attempts.
#[derive(Clone, Debug)]
pub struct Backoff {
    settings: ReconnectSettings,
    attempt: u32,
}

impl Backoff {
    /// Start at attempt zero.
    pub fn new(settings: ReconnectSettings) -> Self {
        Self {
            settings,
            attempt: 0,
        }
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, then count the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget failed attempts after a successful session.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// `initial * multiplier^attempt`, capped at the maximum, then spread by
    /// `± jitter_factor`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn delay_for(&self, attempt: u32) -> Duration {
        let s = &self.settings;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let exp_ms = s.initial_delay_ms as f64 * s.multiplier.powi(exponent);
        let capped = exp_ms.min(s.max_delay_ms as f64);

        let spread = capped * s.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}
