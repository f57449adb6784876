//! Shared AWS SDK client construction and the single bounded-retry wrapper
//! used across the engine (Design Notes §9: "add a bounded exponential
//! backoff in a single place... not inside handlers").

use std::future::Future;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

/// Build an `SdkConfig` scoped to the given region, the same way every
/// teacher-derived handler constructor does.
pub async fn region_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// Retry a fallible cloud-API call with bounded exponential backoff.
///
/// The AWS SDK clients already retry transport-level failures internally;
/// this wrapper exists for the handful of call sites (tag-search pagination,
/// stabilization polling) where a transient `Err` should be retried by the
/// engine itself rather than surfaced immediately. Bounded to a handful of
/// attempts over a few seconds — this is not a substitute for a handler's
/// own wait/poll loop, which has its own timeout semantics.
pub async fn with_backoff<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(200))
        .with_max_interval(Duration::from_secs(2))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .build();

    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match backoff.next_backoff() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn with_backoff_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
