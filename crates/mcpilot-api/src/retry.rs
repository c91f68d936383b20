//! Retry with exponential backoff for chat requests.
//!
//! Off by default: a failed model call is reported to the user rather than
//! silently repeated. Operators opt in through `[model] max_retries`.

use mcpilot_types::ApiError;
use rand::Rng;
use std::time::Duration;

/// Backoff settings for chat requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of the computed delay added or removed at random.
    /// Zero gives deterministic delays.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Default backoff with `max_retries` attempts.
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Returns `true` if the error is transient and the request may be retried.
///
/// A local model server answers 503 while it loads a model and refuses
/// connections while it starts, so both are worth another attempt.
/// Timeouts are not retried: the model timeout is already long, and a
/// retry would double the user's wait.
pub fn is_retryable(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Network(_)
    )
}

/// Delay before retry number `attempt` (zero-based) after `error`.
///
/// A rate limit that names its own wait is honored exactly, clamped to
/// `max_delay_ms`. Everything else backs off exponentially with jitter.
pub fn calculate_delay(config: &RetryConfig, attempt: u32, error: &ApiError) -> Duration {
    if let ApiError::RateLimited {
        retry_after_ms: Some(wait),
    } = error
    {
        return Duration::from_millis((*wait).min(config.max_delay_ms));
    }

    let max = config.max_delay_ms as f64;
    let base = (config.initial_delay_ms as f64 * config.backoff_factor.powi(attempt as i32)).min(max);
    let spread = config.jitter.clamp(0.0, 1.0);
    let factor = if spread > 0.0 {
        rand::rng().random_range((1.0 - spread)..=(1.0 + spread))
    } else {
        1.0
    };
    Duration::from_millis((base * factor).min(max) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_are_disabled_by_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.initial_delay_ms, 500);
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn with_retries_keeps_backoff_defaults() {
        let config = RetryConfig::with_retries(3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_delay_ms, 30_000);
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(is_retryable(&ApiError::RateLimited {
            retry_after_ms: None,
        }));
        assert!(is_retryable(&ApiError::Server {
            status: 503,
            message: "loading model".into(),
        }));
        assert!(is_retryable(&ApiError::Network("connection refused".into())));
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!is_retryable(&ApiError::BadRequest {
            message: "bad input".into(),
        }));
        assert!(!is_retryable(&ApiError::ModelNotFound {
            model: "nope".into(),
        }));
        assert!(!is_retryable(&ApiError::MalformedResponse("eof".into())));
        assert!(!is_retryable(&ApiError::Timeout));
    }

    fn fixed(initial_delay_ms: u64, max_delay_ms: u64, backoff_factor: f64) -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            initial_delay_ms,
            max_delay_ms,
            backoff_factor,
            jitter: 0.0,
        }
    }

    #[test]
    fn model_loading_backs_off_exponentially() {
        let config = fixed(1000, 60_000, 2.0);
        let loading = ApiError::Server {
            status: 503,
            message: "loading model".into(),
        };
        assert_eq!(calculate_delay(&config, 0, &loading), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2, &loading), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            ..RetryConfig::with_retries(3)
        };
        let refused = ApiError::Network("connection refused".into());
        for _ in 0..20 {
            let delay = calculate_delay(&config, 0, &refused).as_millis();
            assert!((750..=1250).contains(&delay), "delay={delay}");
        }
    }

    #[test]
    fn retry_after_is_honored_without_jitter() {
        let config = RetryConfig::with_retries(1);
        let limited = |ms| ApiError::RateLimited {
            retry_after_ms: Some(ms),
        };
        assert_eq!(calculate_delay(&config, 3, &limited(5000)), Duration::from_secs(5));
        assert_eq!(calculate_delay(&config, 0, &limited(90_000)), Duration::from_secs(30));
    }

    #[test]
    fn rate_limit_without_hint_uses_backoff() {
        let config = fixed(200, 60_000, 3.0);
        let limited = ApiError::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(calculate_delay(&config, 1, &limited), Duration::from_millis(600));
    }

    #[test]
    fn delay_capped_at_max() {
        let config = fixed(1000, 5000, 10.0);
        let err = ApiError::Network("reset".into());
        assert_eq!(calculate_delay(&config, 5, &err), Duration::from_secs(5));
    }
}
