use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, SnapshotError};

/// Longest uninterrupted sleep inside [`poll_until`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared flag used to abandon a wait from another thread (e.g. a Ctrl-C handler).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Interval and deadline for a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Call `probe` every `policy.interval` until it yields `Some`, an error, the
/// deadline passes, or `cancel` fires. The first probe runs immediately.
pub fn poll_until<T, F>(what: &str, policy: PollPolicy, cancel: &CancelToken, mut probe: F) -> Result<T>
where
    F: FnMut(u32) -> Result<Option<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled(what.to_string()));
        }
        attempt += 1;
        if let Some(value) = probe(attempt)? {
            return Ok(value);
        }
        if start.elapsed() + policy.interval > policy.deadline {
            return Err(SnapshotError::Timeout {
                what: what.to_string(),
                elapsed: start.elapsed(),
            });
        }
        sleep_interruptible(policy.interval, cancel);
    }
}

fn sleep_interruptible(total: Duration, cancel: &CancelToken) {
    let wake = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= wake || cancel.is_cancelled() {
            return;
        }
        thread::sleep((wake - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: PollPolicy = PollPolicy::new(Duration::from_millis(5), Duration::from_millis(200));

    #[test]
    fn test_returns_first_ready_value() {
        let v = poll_until("counter", FAST, &CancelToken::new(), |attempt| {
            Ok((attempt == 3).then_some(attempt))
        })
        .unwrap();
        assert_eq!(v, 3);
    }

    #[test]
    fn test_times_out() {
        let mut calls = 0;
        let err = poll_until::<(), _>("never", FAST, &CancelToken::new(), |_| {
            calls += 1;
            Ok(None)
        })
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Timeout { .. }));
        assert!(calls > 1);
    }

    #[test]
    fn test_probe_error_stops_polling() {
        let err = poll_until::<(), _>("broken", FAST, &CancelToken::new(), |_| {
            Err(SnapshotError::InvalidArgument("boom".into()))
        })
        .unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidArgument(_)));
    }

    #[test]
    fn test_cancel_interrupts_long_sleep() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let policy = PollPolicy::new(Duration::from_secs(30), Duration::from_secs(60));
        let start = Instant::now();
        let err = poll_until::<(), _>("slow", policy, &cancel, |_| Ok(None)).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, SnapshotError::Cancelled(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
