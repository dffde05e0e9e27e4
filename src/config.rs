//! Declarative retry configuration for HTTP calls.
//!
//! [`RetryConfig`] is the explicit replacement for per-endpoint retry annotations: a retry
//! budget plus a policy selector, with the same defaults (10 retries, the 429 policy). Enable
//! the `serde` feature to load it from JSON, TOML, or any other serde format:
//!
//! ```json
//! { "max_attempts": 5, "policy": { "kind": "fixed", "delay_ms": 1000 } }
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::error::BuildError;
use crate::http429::Http429Policy;
use crate::layer::RetryCallLayer;
use crate::policy::{BackoffPolicy, FixedDelay, NeverRetry, RetryPolicy};
use crate::retrying_call::{RetryParams, DEFAULT_MAX_ATTEMPTS};
use crate::scheduler::DelayScheduler;
use std::sync::Arc;
use std::time::Duration;

/// Which built-in policy to use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum PolicyConfig {
    /// Honour `Retry-After` on 429 responses.
    #[default]
    TooManyRequests,
    /// Retry transport failures after a constant delay.
    Fixed { delay_ms: u64 },
    /// Retry transport failures with exponential backoff, optionally capped.
    Exponential {
        base_ms: u64,
        #[cfg_attr(feature = "serde", serde(default))]
        max_ms: Option<u64>,
    },
    /// Never retry.
    Never,
}

/// Retry budget plus policy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    /// Retries allowed after the initial call. Must be > 0.
    pub max_attempts: usize,
    pub policy: PolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, policy: PolicyConfig::default() }
    }
}

fn exponential(base_ms: u64, max_ms: Option<u64>) -> Result<Backoff, BackoffError> {
    let backoff = Backoff::exponential(Duration::from_millis(base_ms));
    match max_ms {
        Some(max_ms) => backoff.with_max(Duration::from_millis(max_ms)),
        None => Ok(backoff),
    }
}

impl RetryConfig {
    /// Check the configuration without building anything.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if let PolicyConfig::Exponential { base_ms, max_ms } = self.policy {
            exponential(base_ms, max_ms)?;
        }
        Ok(())
    }

    /// Build retry parameters for calls producing `http::Response<B>`.
    pub fn params<Req, B, E>(&self) -> Result<RetryParams<Req, http::Response<B>, E>, BuildError> {
        self.validate()?;
        let policy: Arc<dyn RetryPolicy<Req, http::Response<B>, E>> = match self.policy {
            PolicyConfig::TooManyRequests => Arc::new(Http429Policy::new()),
            PolicyConfig::Fixed { delay_ms } => {
                Arc::new(FixedDelay::new(Duration::from_millis(delay_ms)))
            }
            PolicyConfig::Exponential { base_ms, max_ms } => {
                Arc::new(BackoffPolicy::new(exponential(base_ms, max_ms)?))
            }
            PolicyConfig::Never => Arc::new(NeverRetry),
        };
        RetryParams::from_shared(self.max_attempts, policy)
    }

    /// Build a layer that decorates calls with this configuration.
    pub fn layer<Req, B, E>(
        &self,
        scheduler: Arc<dyn DelayScheduler>,
    ) -> Result<RetryCallLayer<Req, http::Response<B>, E>, BuildError> {
        Ok(RetryCallLayer::new(self.params()?, scheduler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallOutcome;
    use crate::error::CallError;
    use crate::outcome::Outcome;
    use crate::policy::Decision;
    use crate::scheduler::ManualScheduler;
    use std::io;

    type HttpOutcome = CallOutcome<http::Response<()>, io::Error>;

    fn decide(config: &RetryConfig, outcome: &HttpOutcome) -> Decision {
        let params = config.params::<(), (), io::Error>().unwrap();
        params.policy().decide(&(), outcome, 1, params.max_attempts())
    }

    fn transport_failure() -> HttpOutcome {
        Outcome::Failure(CallError::Transport(io::Error::new(io::ErrorKind::Other, "down")))
    }

    fn too_many_requests() -> HttpOutcome {
        let response =
            http::Response::builder().status(429).header("Retry-After", "3").body(()).unwrap();
        Outcome::Success(response)
    }

    #[test]
    fn defaults_are_ten_retries_and_429() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.policy, PolicyConfig::TooManyRequests);
        assert!(config.validate().is_ok());
        assert_eq!(decide(&config, &too_many_requests()), Decision::Retry(Duration::from_secs(3)));
        assert_eq!(decide(&config, &transport_failure()), Decision::Stop);
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = RetryConfig { max_attempts: 0, ..RetryConfig::default() };
        assert_eq!(config.validate(), Err(BuildError::InvalidMaxAttempts(0)));
        assert!(config.params::<(), (), io::Error>().is_err());
        let scheduler = Arc::new(ManualScheduler::new());
        assert!(config.layer::<(), (), io::Error>(scheduler).is_err());
    }

    #[test]
    fn bad_exponential_cap_rejected() {
        let config = RetryConfig {
            max_attempts: 3,
            policy: PolicyConfig::Exponential { base_ms: 500, max_ms: Some(100) },
        };
        assert!(matches!(
            config.validate(),
            Err(BuildError::InvalidBackoff(BackoffError::MaxLessThanBase { .. }))
        ));
    }

    #[test]
    fn each_policy_kind_builds() {
        let fixed = RetryConfig { max_attempts: 5, policy: PolicyConfig::Fixed { delay_ms: 1000 } };
        assert_eq!(
            decide(&fixed, &transport_failure()),
            Decision::Retry(Duration::from_millis(1000))
        );

        let exponential = RetryConfig {
            max_attempts: 5,
            policy: PolicyConfig::Exponential { base_ms: 100, max_ms: Some(1000) },
        };
        assert_eq!(
            decide(&exponential, &transport_failure()),
            Decision::Retry(Duration::from_millis(100))
        );

        let never = RetryConfig { max_attempts: 5, policy: PolicyConfig::Never };
        assert_eq!(decide(&never, &transport_failure()), Decision::Stop);
        assert_eq!(decide(&never, &too_many_requests()), Decision::Stop);
    }

    #[test]
    fn layer_carries_budget() {
        let config = RetryConfig { max_attempts: 4, policy: PolicyConfig::Never };
        let layer = config.layer::<(), (), io::Error>(Arc::new(ManualScheduler::new())).unwrap();
        assert_eq!(layer.params().max_attempts(), 4);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_from_json() {
        let config: RetryConfig = serde_json::from_str(
            r#"{ "max_attempts": 5, "policy": { "kind": "fixed", "delay_ms": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(
            config,
            RetryConfig { max_attempts: 5, policy: PolicyConfig::Fixed { delay_ms: 1000 } }
        );

        let defaulted: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaulted, RetryConfig::default());

        let capped: RetryConfig =
            serde_json::from_str(r#"{ "policy": { "kind": "exponential", "base_ms": 50 } }"#)
                .unwrap();
        assert_eq!(capped.policy, PolicyConfig::Exponential { base_ms: 50, max_ms: None });

        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["policy"]["kind"], "too_many_requests");
    }
}
