use crate::config::SyncPolicy;
use crate::core::SyncRecord;
use crate::store::AttemptFailure;
use chrono::{DateTime, Duration, Utc};

/// Longest delay ever scheduled; only reachable with absurd policies.
const MAX_DELAY_DAYS: i64 = 36_500;

/// Delay before the attempt following a failure observed at `retry_count`
/// prior failures: `base * 2^retry_count`.
pub fn backoff_delay(base_delay_ms: u64, retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count);
    let delay_ms = base_delay_ms.max(1).saturating_mul(factor);
    let cap_ms = MAX_DELAY_DAYS * 24 * 60 * 60 * 1_000;
    Duration::milliseconds(delay_ms.min(cap_ms as u64) as i64)
}

/// Retry bookkeeping for a failed attempt of `record` at `now`.
pub fn next_failure(
    record: &SyncRecord,
    policy: &SyncPolicy,
    now: DateTime<Utc>,
    error: impl Into<String>,
) -> AttemptFailure {
    let delay = backoff_delay(policy.base_delay_ms, record.retry_count);
    AttemptFailure {
        retry_count: record.retry_count.saturating_add(1),
        next_attempt_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        error: error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn delays_double_from_base() {
        let deltas: Vec<i64> = (0..4)
            .map(|retry| backoff_delay(5_000, retry).num_milliseconds())
            .collect();
        assert_eq!(deltas, vec![5_000, 10_000, 20_000, 40_000]);
    }

    #[test]
    fn first_and_second_failure_follow_the_schedule() {
        let policy = SyncPolicy::default();
        let now = Utc::now();
        let mut record = SyncRecord::create_mirror(Uuid::new_v4(), now);

        let first = next_failure(&record, &policy, now, "boom");
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.next_attempt_at - now, Duration::milliseconds(5_000));

        record.retry_count = first.retry_count;
        let second = next_failure(&record, &policy, now, "boom");
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.next_attempt_at - now, Duration::milliseconds(10_000));
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let delay = backoff_delay(u64::MAX, u32::MAX);
        assert_eq!(delay, Duration::days(MAX_DELAY_DAYS));
    }
}
