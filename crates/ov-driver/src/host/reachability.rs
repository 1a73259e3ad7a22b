//! Waiting for an installing host to answer over SSH.

use std::time::Duration;

use tracing::{debug, info};

use super::shell::{RemoteShell, ShellTarget};
use crate::error::{DriverError, Result};

/// Command used as the reachability probe.
pub const PROBE_COMMAND: &str = "echo hello";

/// How long and how often to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total budget.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
    /// Upper bound for one attempt.
    pub attempt_timeout: Duration,
}

impl Default for PollPolicy {
    /// An hour of probes, every 30 seconds; an OS install from virtual
    /// media takes most of that.
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            interval: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Number of attempts: `ceil(timeout / interval)`, at least one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        let interval = self.interval.as_millis();
        if interval == 0 {
            return 1;
        }
        let attempts = self.timeout.as_millis().div_ceil(interval).max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX)
    }
}

/// Probe `target` until a command succeeds or the attempt budget runs out,
/// returning the number of the attempt that succeeded.
///
/// Failed attempts are logged and swallowed. There is no sleep after the
/// last attempt.
///
/// # Errors
/// Returns [`DriverError::Timeout`] once every attempt has failed.
pub async fn wait_until_reachable<S>(
    shell: &S,
    target: &ShellTarget,
    policy: &PollPolicy,
) -> Result<u32>
where
    S: RemoteShell + ?Sized,
{
    let attempts = policy.attempts();
    info!(
        host = %target,
        attempts,
        interval_secs = policy.interval.as_secs(),
        "Waiting for host to become reachable"
    );

    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(
            policy.attempt_timeout,
            shell.exec(target, PROBE_COMMAND, policy.attempt_timeout),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!(host = %target, attempt, "Host is reachable");
                return Ok(attempt);
            }
            Ok(Err(e)) => debug!(host = %target, attempt, error = %e, "Host not reachable yet"),
            Err(_) => debug!(host = %target, attempt, "Reachability probe timed out"),
        }

        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(DriverError::Timeout {
        target: target.to_string(),
        attempts,
        timeout_secs: policy.timeout.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::host::shell::MockRemoteShell;

    fn target() -> ShellTarget {
        ShellTarget {
            host: "10.0.0.5".into(),
            port: 22,
            user: "root".into(),
            password: "password".into(),
        }
    }

    fn fast_policy(timeout_ms: u64, interval_ms: u64) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(interval_ms),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_attempts_round_up() {
        assert_eq!(PollPolicy::default().attempts(), 120);
        assert_eq!(fast_policy(10, 3).attempts(), 4);
        assert_eq!(fast_policy(9, 3).attempts(), 3);
        assert_eq!(fast_policy(0, 3).attempts(), 1);
        assert_eq!(fast_policy(10, 0).attempts(), 1);
    }

    #[tokio::test]
    async fn test_never_reachable_exhausts_budget() {
        let mut shell = MockRemoteShell::new();
        shell
            .expect_exec()
            .withf(|_, command, _| command == PROBE_COMMAND)
            .times(4)
            .returning(|_, _, _| Err(DriverError::Shell("connection refused".into())));

        let err = wait_until_reachable(&shell, &target(), &fast_policy(10, 3))
            .await
            .unwrap_err();
        match err {
            DriverError::Timeout { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut shell = MockRemoteShell::new();
        shell.expect_exec().times(3).returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DriverError::Shell("connection refused".into()))
            } else {
                Ok(())
            }
        });

        let attempt = wait_until_reachable(&shell, &target(), &fast_policy(100, 1))
            .await
            .unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
