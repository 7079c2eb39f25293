//! Automatic retry policy for failed step executions.
//!
//! Stateless: everything is decided from the engine config and the attempt's
//! retry count. Expansions never go through here.

use relflow_types::config::EngineConfig;

/// Decides whether a failed execution is retried without operator action.
pub struct RetryPolicy;

impl RetryPolicy {
    /// `retry_count` is the number of retries already consumed by the failed
    /// attempt, so the first attempt has `retry_count == 0` and a step gets
    /// `max_retries` attempts in total.
    pub fn should_retry(config: &EngineConfig, retry_count: u32, disabled: bool) -> bool {
        !disabled && retry_count.saturating_add(1) < config.max_retries
    }

    /// The line written to the step's log sink when a retry is scheduled.
    pub fn announcement(config: &EngineConfig, retry_count: u32, error: &str) -> String {
        format!(
            "step failed, will retry ({} of {}): {error}",
            retry_count + 1,
            config.max_retries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32) -> EngineConfig {
        EngineConfig {
            max_retries,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_should_retry_until_budget_is_spent() {
        let config = config(3);
        assert!(RetryPolicy::should_retry(&config, 0, false));
        assert!(RetryPolicy::should_retry(&config, 1, false));
        assert!(!RetryPolicy::should_retry(&config, 2, false));
    }

    #[test]
    fn test_disabled_never_retries() {
        assert!(!RetryPolicy::should_retry(&config(3), 0, true));
    }

    #[test]
    fn test_zero_or_one_attempt_budget() {
        assert!(!RetryPolicy::should_retry(&config(0), 0, false));
        assert!(!RetryPolicy::should_retry(&config(1), 0, false));
    }

    #[test]
    fn test_announcement_format() {
        let msg = RetryPolicy::announcement(&config(3), 0, "connection reset");
        assert_eq!(msg, "step failed, will retry (1 of 3): connection reset");
    }
}
