//! Timeout-bounded polling

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use tracing::debug;

use crate::{Error, Result};

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = std::result::Result<Option<T>, String>;

/// Poll `check_fn` every `interval` until it yields a value, fails, or
/// `timeout` elapses.
pub async fn wait_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::command_failed(format!(
                "Timeout waiting for {}",
                description
            )));
        }

        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                debug!("Waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(Error::command_failed(format!(
                    "Error waiting for {}: {}",
                    description, e
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_value_once_ready() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        let value = wait_with_timeout(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "counter",
            || {
                let p = p.clone();
                async move {
                    if p.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok(None)
                    } else {
                        Ok(Some("ready"))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out() {
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "nothing",
            || async { Ok(None) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Timeout waiting for nothing"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_follows_the_runtime_clock() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        let err = wait_with_timeout::<(), _, _>(
            Duration::from_secs(60),
            Duration::from_secs(5),
            "paused",
            || {
                let p = p.clone();
                async move {
                    p.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Timeout waiting for paused"));
        // One poll at t=0 and one after each 5s sleep up to the deadline
        let polls = polls.load(Ordering::SeqCst);
        assert!((12..=13).contains(&polls), "polled {} times", polls);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "thing",
            || async { Err("forbidden".to_string()) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }
}
