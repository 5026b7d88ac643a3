//! Bounded retry with exponential backoff.
//!
//! Every stage retries only errors classified retryable, up to its
//! configured budget, with a doubling delay capped by config. Permanent
//! errors never retry.

use std::time::Duration;

use autoblogger_shared::{PipelineStage, RetriesConfig};

/// Backoff delay before retry number `attempt` (1-based): `base * 2^(n-1)`,
/// capped.
pub fn backoff_delay(retries: &RetriesConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = retries
        .backoff_base_ms
        .saturating_mul(1u64 << exp)
        .min(retries.backoff_cap_ms);
    Duration::from_millis(ms)
}

/// Whether a stage's retry budget is exhausted at `recorded` failures.
pub fn budget_exhausted(retries: &RetriesConfig, stage: PipelineStage, recorded: u32) -> bool {
    recorded >= retries.budget(stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retries() -> RetriesConfig {
        RetriesConfig {
            backoff_base_ms: 100,
            backoff_cap_ms: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let r = retries();
        assert_eq!(backoff_delay(&r, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&r, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&r, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&r, 10), Duration::from_millis(1_000));
    }

    #[test]
    fn budget_counts_failures() {
        let r = RetriesConfig::default();
        assert!(!budget_exhausted(&r, PipelineStage::Rewrite, 2));
        assert!(budget_exhausted(&r, PipelineStage::Rewrite, 3));
        assert!(budget_exhausted(&r, PipelineStage::Enrich, 1));
    }
}
