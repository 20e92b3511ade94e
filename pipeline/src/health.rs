//! Per-pipeline health tracking (§4.7 "Health signals").
//!
//! The EMA-of-frame-interval idea generalizes an `FpsCalc`-style helper
//! into a running exponential average rather than an N-frame window,
//! since health needs a continuously updated signal rather than a
//! periodic one.

const DEFAULT_FRAME_TIMEOUT_S: f32 = 30.0;
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;
const DEFAULT_HEALTH_CHECK_INTERVAL_S: f32 = 10.0;
const INTERVAL_EMA_ALPHA: f32 = 0.2;

pub struct HealthConfig {
    pub frame_timeout_s: f32,
    pub max_consecutive_errors: u32,
    pub health_check_interval_s: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            frame_timeout_s: DEFAULT_FRAME_TIMEOUT_S,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            health_check_interval_s: DEFAULT_HEALTH_CHECK_INTERVAL_S,
        }
    }
}

/// Tracks the signals behind a pipeline's healthy/unhealthy status:
/// frame-rate stability, frame timeout, and consecutive errors (§4.7).
/// Status itself only toggles at `health_check_interval_s`
/// boundaries, not on every sample.
pub struct HealthTracker {
    config: HealthConfig,
    expected_interval_ms: f32,
    ema_interval_ms: Option<f32>,
    last_frame_monotonic_ms: Option<i64>,
    consecutive_errors: u32,
    last_check_ms: i64,
    healthy: bool,
    last_error: Option<String>,
}

impl HealthTracker {
    pub fn new(expected_fps: f32, config: HealthConfig) -> Self {
        Self {
            config,
            expected_interval_ms: if expected_fps > 0.0 {
                1000.0 / expected_fps
            } else {
                1000.0
            },
            ema_interval_ms: None,
            last_frame_monotonic_ms: None,
            consecutive_errors: 0,
            last_check_ms: 0,
            healthy: true,
            last_error: None,
        }
    }

    pub fn record_frame(&mut self, now_ms: i64) {
        if let Some(prev) = self.last_frame_monotonic_ms {
            let dt = (now_ms - prev).max(1) as f32;
            self.ema_interval_ms = Some(match self.ema_interval_ms {
                Some(prev_ema) => {
                    INTERVAL_EMA_ALPHA * dt + (1.0 - INTERVAL_EMA_ALPHA) * prev_ema
                }
                None => dt,
            });
        }
        self.last_frame_monotonic_ms = Some(now_ms);
        self.consecutive_errors = 0;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.consecutive_errors += 1;
        self.last_error = Some(message.into());
    }

    /// Re-evaluate the healthy flag if `health_check_interval_s` has
    /// elapsed since the last check; otherwise a no-op (§4.7
    /// "Status toggles only at HEALTH_CHECK_INTERVAL_S boundaries").
    pub fn maybe_recheck(&mut self, now_ms: i64) {
        let interval_ms = (self.config.health_check_interval_s * 1000.0) as i64;
        if now_ms - self.last_check_ms < interval_ms {
            return;
        }
        self.last_check_ms = now_ms;

        let rate_ok = match self.ema_interval_ms {
            Some(ema) => ema <= self.expected_interval_ms * 2.0,
            None => true,
        };
        let timeout_ok = match self.last_frame_monotonic_ms {
            Some(last) => {
                (now_ms - last) as f32 / 1000.0 <= self.config.frame_timeout_s
            }
            None => true,
        };
        let errors_ok = self.consecutive_errors < self.config.max_consecutive_errors;

        self.healthy = rate_ok && timeout_ok && errors_ok;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn current_fps(&self) -> Option<f32> {
        self.ema_interval_ms.map(|ms| 1000.0 / ms.max(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_frame_rate_stays_healthy() {
        let mut tracker = HealthTracker::new(10.0, HealthConfig::default());
        let mut t = 0i64;
        for _ in 0..20 {
            tracker.record_frame(t);
            t += 100;
        }
        tracker.maybe_recheck(t + 10_000);
        assert!(tracker.is_healthy());
    }

    #[test]
    fn excessive_consecutive_errors_marks_unhealthy() {
        let mut tracker = HealthTracker::new(10.0, HealthConfig::default());
        tracker.record_frame(0);
        for _ in 0..11 {
            tracker.record_error("decode failed");
        }
        tracker.maybe_recheck(11_000);
        assert!(!tracker.is_healthy());
    }

    #[test]
    fn recheck_is_a_no_op_before_interval_elapses() {
        let mut tracker = HealthTracker::new(10.0, HealthConfig::default());
        tracker.record_frame(0);
        for _ in 0..20 {
            tracker.record_error("x");
        }
        // before any check has happened, healthy starts true and a
        // recheck inside the interval should not flip it yet.
        tracker.maybe_recheck(500);
        assert!(tracker.is_healthy());
    }
}
