/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Exponential backoff for reconnect and retry scheduling.
//!
//! See <https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md>.

use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// The delay used for the first retry.
    pub base_delay: Duration,

    /// Factor applied to the delay after every retry. Must be at least 1.
    pub multiplier: f64,

    /// Each delay is randomized by up to this fraction in either direction.
    pub jitter: f64,

    /// The upper bound of the (unjittered) delay.
    pub max_delay: Duration,
}

/// Connection backoff defaults, also used by the balancer call retries.
pub const DEFAULT_EXPONENTIAL_CONFIG: BackoffConfig = BackoffConfig {
    base_delay: Duration::from_secs(1),
    multiplier: 1.6,
    jitter: 0.2,
    max_delay: Duration::from_secs(120),
};

impl Default for BackoffConfig {
    fn default() -> Self {
        DEFAULT_EXPONENTIAL_CONFIG
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        // 0 <= base_delay <= max_delay
        if self.base_delay > self.max_delay {
            Err("base_delay must not be greater than max_delay")?;
        }
        // 1 <= multiplier
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            Err("multiplier must be at least 1.0")?;
        }
        // 0 <= jitter <= 1
        if !(0.0..=1.0).contains(&self.jitter) {
            Err("jitter must be between 0 and 1")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,

    /// The delay for the next retry, without jitter. Kept as f64 to avoid
    /// accumulating rounding errors.
    next_delay_secs: f64,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Result<Self, &'static str> {
        config.validate()?;
        let next_delay_secs = config.base_delay.as_secs_f64();
        Ok(ExponentialBackoff {
            config,
            next_delay_secs,
        })
    }

    pub fn reset(&mut self) {
        self.next_delay_secs = self.config.base_delay.as_secs_f64();
    }

    /// Returns the jittered delay for the next attempt and advances the
    /// sequence.
    pub fn backoff_duration(&mut self) -> Duration {
        let next_delay = self.next_delay_secs;
        let jitter = if self.config.jitter > 0.0 {
            self.config.jitter * rand::rng().random_range(-1.0..1.0)
        } else {
            0.0
        };
        self.next_delay_secs = self
            .config
            .max_delay
            .as_secs_f64()
            .min(next_delay * self.config.multiplier);
        Duration::from_secs_f64(next_delay * (1.0 + jitter))
    }

    /// Like [`ExponentialBackoff::backoff_duration`], expressed as a deadline
    /// relative to `now`.
    pub fn next_attempt_time(&mut self, now: Instant) -> Instant {
        now + self.backoff_duration()
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            next_delay_secs: DEFAULT_EXPONENTIAL_CONFIG.base_delay.as_secs_f64(),
            config: DEFAULT_EXPONENTIAL_CONFIG,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{BackoffConfig, DEFAULT_EXPONENTIAL_CONFIG, ExponentialBackoff};

    const EPSILON: f64 = 1e-9;

    fn no_jitter(base: u64, multiplier: f64, max: u64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_secs(base),
            multiplier,
            jitter: 0.0,
            max_delay: Duration::from_secs(max),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ExponentialBackoff::new(DEFAULT_EXPONENTIAL_CONFIG).is_ok());
        assert_eq!(BackoffConfig::default(), DEFAULT_EXPONENTIAL_CONFIG);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(ExponentialBackoff::new(no_jitter(100, 2.0, 10)).is_err());
        assert!(ExponentialBackoff::new(no_jitter(1, 0.5, 10)).is_err());
        assert!(ExponentialBackoff::new(no_jitter(1, f64::NAN, 10)).is_err());
        let mut config = no_jitter(1, 2.0, 10);
        config.jitter = -0.1;
        assert!(ExponentialBackoff::new(config.clone()).is_err());
        config.jitter = 1.5;
        assert!(ExponentialBackoff::new(config).is_err());
    }

    #[test]
    fn first_delay_is_base_then_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(no_jitter(1, 2.0, 15)).unwrap();
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(1));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(2));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(4));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(8));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(15));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(15));

        backoff.reset();
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(1));
        assert_eq!(backoff.backoff_duration(), Duration::from_secs(2));
    }

    #[test]
    fn next_attempt_time_is_relative_to_now() {
        let mut backoff = ExponentialBackoff::new(no_jitter(3, 2.0, 15)).unwrap();
        let now = Instant::now();
        assert_eq!(backoff.next_attempt_time(now), now + Duration::from_secs(3));
        assert_eq!(backoff.next_attempt_time(now), now + Duration::from_secs(6));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = BackoffConfig {
            jitter: 0.2,
            ..no_jitter(1, 2.0, 15)
        };
        let mut backoff = ExponentialBackoff::new(config).unwrap();
        for expected in [1.0, 2.0, 4.0] {
            let duration = backoff.backoff_duration().as_secs_f64();
            assert!(duration > expected * 0.8 - EPSILON);
            assert!(duration < expected * 1.2 + EPSILON);
        }
    }
}
