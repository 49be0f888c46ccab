//! Delay before each reconnect attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_FIXED_DELAY_MS: u64 = 5_000;

/// `{"kind":"fixed","delayMs":5000}` or `{"kind":"exponential","initialMs":1000,"maxMs":30000,"jitter":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReconnectPolicy {
    #[serde(rename_all = "camelCase")]
    Fixed {
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,
    },
    /// Doubles per attempt up to `max_ms`; with jitter the delay is uniform in [d/2, d].
    #[serde(rename_all = "camelCase")]
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

fn default_fixed_delay_ms() -> u64 {
    DEFAULT_FIXED_DELAY_MS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: DEFAULT_FIXED_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0 = first retry after a loss).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::Exponential {
                initial_ms,
                max_ms,
                jitter,
            } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let ms = initial_ms.saturating_mul(factor).min(max_ms);
                let ms = if jitter && ms > 1 {
                    rand::thread_rng().gen_range(ms / 2..=ms)
                } else {
                    ms
                };
                Duration::from_millis(ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(5));
        assert_eq!(p.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let p = ReconnectPolicy::Exponential {
            initial_ms: 500,
            max_ms: 8_000,
            jitter: false,
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(p.delay_for(10), Duration::from_millis(8_000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(8_000));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let p = ReconnectPolicy::Exponential {
            initial_ms: 1_000,
            max_ms: 1_000,
            jitter: true,
        };
        for _ in 0..50 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn config_shapes() {
        let p: ReconnectPolicy = serde_json::from_str(r#"{"kind":"fixed"}"#).unwrap();
        assert_eq!(p, ReconnectPolicy::default());
        let p: ReconnectPolicy =
            serde_json::from_str(r#"{"kind":"exponential","initialMs":100,"maxMs":900}"#).unwrap();
        assert_eq!(
            p,
            ReconnectPolicy::Exponential {
                initial_ms: 100,
                max_ms: 900,
                jitter: false
            }
        );
    }
}
