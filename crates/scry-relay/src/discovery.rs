use std::time::Duration;

use tokio::time;

/// Cap and cadence for polling a producer that may not exist yet.
///
/// Explicit so callers and tests can reason about the attempt budget
/// instead of relying on a buried constant.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Poll `probe` until it yields a value or the attempt cap is spent. The
/// first probe runs immediately. Exhaustion is `None`, never an error;
/// the caller decides what an absent producer means.
pub async fn discover<T, F>(policy: RetryPolicy, mut probe: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let mut ticker = time::interval(policy.interval);
    for attempt in 1..=policy.attempts {
        ticker.tick().await;
        if let Some(found) = probe() {
            tracing::debug!(attempt, "producer discovered");
            return Some(found);
        }
    }
    tracing::debug!(attempts = policy.attempts, "producer not found, giving up");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn immediate_success_probes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let found = discover(RetryPolicy::default(), move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Some("store")
        })
        .await;

        assert_eq!(found, Some("store"));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let found = discover(RetryPolicy::default(), move || {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            (n == 4).then_some(n)
        })
        .await;

        assert_eq!(found, Some(4));
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_exactly_the_attempt_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = RetryPolicy {
            attempts: 3,
            interval: Duration::from_secs(1),
        };
        let found: Option<()> = discover(policy, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            None
        })
        .await;

        assert_eq!(found, None);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
