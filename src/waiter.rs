//! Waiting for remote resources to reach a lifecycle status.
//!
//! Most mutating calls against the Selectel APIs return before the change is
//! applied: a backup plan is created `suspended` and later becomes `started`,
//! a dedicated server is paid for and deployed before it turns `ACTIVE`. The
//! [`wait_for_state`] function polls a status-fetch callback until the status
//! lands in a target set, an unknown status shows up, the deadline passes or
//! the host cancels the operation.
//!
//! # Example
//!
//! ```ignore
//! use selectel_provider::waiter::{wait_for_state, Refresh, WaitSpec};
//!
//! let spec = WaitSpec::new(["suspended"], ["started"], Duration::from_secs(600))?;
//! wait_for_state(&cancel, &spec, || async {
//!     let plan = client.plan(&project_id, &plan_id).await?;
//!     Ok(Refresh::Status(plan.status))
//! })
//! .await?;
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

/// Lower bound for the interval between two status fetches.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Deadline used when the timeout does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The outcome of a single status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// The API reported this status.
    Status(String),
    /// The API reported that the resource does not exist.
    Gone,
}

/// Acceptance criteria and timing of one wait.
///
/// Built fresh for every create, update or delete and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    pending: BTreeSet<String>,
    target: BTreeSet<String>,
    timeout: Duration,
    poll_interval: Duration,
    min_poll_interval: Duration,
    gone_is_target: bool,
}

impl WaitSpec {
    /// Create a spec that succeeds once the status is one of `target`.
    ///
    /// Fails when a status is both pending and target, since such a wait
    /// could never tell progress from completion.
    pub fn new<P, T, S1, S2>(pending: P, target: T, timeout: Duration) -> Result<Self, ProviderError>
    where
        P: IntoIterator<Item = S1>,
        T: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let pending: BTreeSet<String> = pending.into_iter().map(Into::into).collect();
        let target: BTreeSet<String> = target.into_iter().map(Into::into).collect();

        if let Some(both) = pending.intersection(&target).next() {
            return Err(ProviderError::InvalidRequest(format!(
                "status '{}' is both pending and target",
                both
            )));
        }

        Ok(Self {
            pending,
            target,
            timeout,
            poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            gone_is_target: false,
        })
    }

    /// Create a spec for a delete: any pending status keeps polling and a
    /// not-found answer ends the wait successfully.
    pub fn deletion<P, S>(pending: P, timeout: Duration) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: BTreeSet::new(),
            timeout,
            poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            gone_is_target: true,
        }
    }

    /// Also accept `target` statuses when waiting for a deletion.
    pub fn with_target<T, S>(mut self, target: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.extend(target.into_iter().map(Into::into));
        self.pending.retain(|s| !self.target.contains(s));
        self
    }

    /// Set the interval between two fetches.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lower bound applied to the poll interval.
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    /// The interval actually slept between fetches.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(self.min_poll_interval)
    }

    /// The overall deadline of the wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `status` keeps the wait going.
    pub fn is_pending(&self, status: &str) -> bool {
        self.pending.contains(status)
    }

    /// Whether `status` ends the wait successfully.
    pub fn is_target(&self, status: &str) -> bool {
        self.target.contains(status)
    }

    fn describe_target(&self) -> String {
        if self.target.is_empty() && self.gone_is_target {
            return "deleted".to_string();
        }
        self.target.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Poll `fetch` until the status satisfies `spec`.
///
/// `fetch` is called immediately and then once per poll interval; only one
/// call is in flight at a time. A call still running at the deadline is
/// dropped and the wait times out. Errors returned by `fetch` end the wait as
/// they are. Returns the final [`Refresh`] on success.
pub async fn wait_for_state<F, Fut>(
    cancel: &CancellationToken,
    spec: &WaitSpec,
    mut fetch: F,
) -> Result<Refresh, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Refresh, ProviderError>>,
{
    let started = Instant::now();
    let deadline = started
        .checked_add(spec.timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started);
    let interval = spec.effective_poll_interval();
    let target = spec.describe_target();
    let mut last_state = String::new();
    let mut polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(&target, &last_state));
        }

        polls += 1;
        let refresh = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&target, &last_state)),
            refresh = fetch() => refresh?,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(timed_out(spec, polls, target, last_state));
            },
        };

        match refresh {
            Refresh::Gone if spec.gone_is_target => {
                info!(polls, elapsed = ?started.elapsed(), "Resource is gone");
                return Ok(Refresh::Gone);
            },
            Refresh::Gone => {
                warn!(polls, target = %target, "Resource disappeared while waiting");
                return Err(ProviderError::NotFound(format!(
                    "resource disappeared while waiting for state '{}'",
                    target
                )));
            },
            Refresh::Status(status) => {
                if spec.is_target(&status) {
                    info!(polls, status = %status, elapsed = ?started.elapsed(), "Target state reached");
                    return Ok(Refresh::Status(status));
                }
                if !spec.is_pending(&status) {
                    warn!(polls, status = %status, target = %target, "Unexpected state");
                    return Err(ProviderError::UnexpectedState {
                        state: status,
                        target,
                    });
                }
                debug!(polls, status = %status, "Still pending");
                last_state = status;
            },
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(spec, polls, target, last_state));
        }

        let pause = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&target, &last_state)),
            _ = tokio::time::sleep(pause) => {},
        }
    }
}

fn timed_out(spec: &WaitSpec, polls: u32, target: String, last_state: String) -> ProviderError {
    warn!(polls, last_state = %last_state, timeout = ?spec.timeout, "State wait timed out");
    ProviderError::WaitTimeout {
        target,
        last_state,
        timeout: spec.timeout,
    }
}

fn cancelled(target: &str, last_state: &str) -> ProviderError {
    ProviderError::Cancelled(format!(
        "stopped waiting for state '{}' (last state: '{}')",
        target, last_state
    ))
}
