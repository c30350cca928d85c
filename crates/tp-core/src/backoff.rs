use crate::error::{ClassifiedError, ConfigError, RetryError};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(rename = "initial_ms", with = "duration_ms")]
    pub initial: Duration,
    #[serde(rename = "max_ms", with = "duration_ms")]
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction in `[0, 1]`; each delay is scaled by a uniform factor in
    /// `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
    /// Re-attempts after the first call.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
            max_retries: 3,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidInput {
                message: format!("retry multiplier must be >= 1, got {}", self.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidInput {
                message: format!("retry jitter must be within [0, 1], got {}", self.jitter),
            });
        }
        if self.max < self.initial {
            return Err(ConfigError::InvalidInput {
                message: "retry max delay must not be below the initial delay".to_string(),
            });
        }
        Ok(())
    }

    /// `initial * multiplier^attempt`, capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max.as_secs_f64());
        if capped.is_nan() {
            return self.max;
        }
        Duration::from_secs_f64(capped)
    }

    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, RetryError>,
    pub retries: u32,
}

/// Runs `operation` until it succeeds, fails with a non-transient error,
/// exhausts `cfg.max_retries` re-attempts, or `cancel` fires during a wait.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    cfg: &BackoffConfig,
    mut operation: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    let mut retries = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries,
                };
            }
            Err(err) => err,
        };

        if !err.is_transient() || retries >= cfg.max_retries {
            return Retried {
                result: Err(RetryError::Failed(err)),
                retries,
            };
        }

        let delay = cfg.next(retries);
        warn!(
            attempt = retries + 1,
            max_retries = cfg.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient failure, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Retried {
                    result: Err(RetryError::Cancelled),
                    retries,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
        retries += 1;
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{make_permanent, make_transient};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_retries,
        }
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let cfg = BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        assert_eq!(cfg.base_delay(0), Duration::from_secs(1));
        assert_eq!(cfg.base_delay(1), Duration::from_secs(2));
        assert_eq!(cfg.base_delay(3), Duration::from_secs(8));
        assert_eq!(cfg.base_delay(4), Duration::from_secs(10));
        assert_eq!(cfg.base_delay(u32::MAX), Duration::from_secs(10));
        assert_eq!(cfg.next(2), cfg.base_delay(2));
    }

    #[test]
    fn zero_initial_never_waits() {
        let cfg = BackoffConfig {
            initial: Duration::ZERO,
            ..BackoffConfig::default()
        };
        assert_eq!(cfg.base_delay(u32::MAX), Duration::ZERO);
        assert_eq!(cfg.next(5), Duration::ZERO);
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(BackoffConfig::default().validate().is_ok());
        let bad = [
            BackoffConfig {
                multiplier: 0.5,
                ..BackoffConfig::default()
            },
            BackoffConfig {
                jitter: 1.5,
                ..BackoffConfig::default()
            },
            BackoffConfig {
                max: Duration::from_millis(1),
                ..BackoffConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn config_reads_millisecond_fields() {
        let cfg: BackoffConfig = toml::from_str("initial_ms = 250\nmax_retries = 5").unwrap();
        assert_eq!(cfg.initial, Duration::from_millis(250));
        assert_eq!(cfg.max, Duration::from_secs(10));
        assert_eq!(cfg.max_retries, 5);
    }

    proptest! {
        #[test]
        fn unjittered_delays_are_monotonic(
            initial_ms in 0u64..5_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let cfg = BackoffConfig {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(initial_ms + extra_ms),
                multiplier,
                jitter: 0.0,
                max_retries: 3,
            };
            prop_assert!(cfg.base_delay(attempt) <= cfg.base_delay(attempt + 1));
            prop_assert!(cfg.base_delay(attempt) <= cfg.max);
            prop_assert_eq!(cfg.next(attempt), cfg.base_delay(attempt));
        }

        #[test]
        fn jittered_delay_stays_in_band(jitter in 0.0f64..=1.0, attempt in 0u32..16) {
            let cfg = BackoffConfig { jitter, ..BackoffConfig::default() };
            let base = cfg.base_delay(attempt).as_secs_f64();
            let got = cfg.next(attempt).as_secs_f64();
            prop_assert!(got >= base * (1.0 - jitter) - 1e-6);
            prop_assert!(got <= base * (1.0 + jitter) + 1e-6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_no_retries() {
        let cancel = CancellationToken::new();
        let out = retry(&cancel, &fast(3), || async { Ok::<_, ClassifiedError>(7) }).await;
        assert_eq!(out.retries, 0);
        assert_eq!(out.result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let out = retry(&cancel, &fast(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(make_transient("flaky"))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.retries, 3);
        match out.result {
            Err(RetryError::Failed(err)) => assert!(err.is_transient()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let out = retry(&cancel, &fast(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(make_transient("flaky"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(out.retries, 2);
        assert_eq!(out.result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_and_unclassified_errors_stop_immediately() {
        for err in [
            make_permanent("denied"),
            ClassifiedError::unclassified("who knows"),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let cancel = CancellationToken::new();
            let counter = Arc::clone(&calls);
            let mut err = Some(err);
            let out = retry(&cancel, &fast(3), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let err = err.take().unwrap_or_else(|| make_permanent("again"));
                async move { Err::<(), _>(err) }
            })
            .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(out.retries, 0);
            assert!(matches!(out.result, Err(RetryError::Failed(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let cfg = BackoffConfig {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(60),
            ..fast(3)
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let counter = Arc::clone(&calls);
        let out = retry(&cancel, &cfg, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(make_transient("flaky"))
            }
        })
        .await;
        assert!(matches!(out.result, Err(RetryError::Cancelled)));
        assert_eq!(out.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
