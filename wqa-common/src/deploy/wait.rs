//! Fixed-interval polling until the cluster matches an expected state.
//!
//! A wait either converges or times out; timing out is a reported outcome
//! ([`WaitOutcome::TimedOut`]), not an error. Errors from the status source
//! do propagate, since a broken status endpoint is not "still converging".

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{Span, debug, info, warn};

use crate::errors::HarnessResult;
use crate::status::{ClusterStatusSnapshot, ProtectionScheme, StatusSource, StatusTarget};

/// Target condition for a wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedState {
    pub require_clusterized: bool,
    pub total_drives: Option<u32>,
    pub active_drives: Option<u32>,
    pub protection: Option<ProtectionScheme>,
}

/// Why a snapshot does or does not satisfy an [`ExpectedState`].
///
/// Checks run in a fixed order and the first failing one is reported:
/// clusterization, total drives, active drives, protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    NotClusterized,
    TotalMismatch {
        expected: u32,
        actual: Option<u32>,
    },
    ActiveMismatch {
        expected: u32,
        actual: Option<u32>,
    },
    ProtectionMismatch {
        expected: ProtectionScheme,
        actual: Option<ProtectionScheme>,
    },
    Satisfied,
}

impl Evaluation {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

fn fmt_count(value: Option<u32>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotClusterized => write!(f, "cluster is not clusterized yet"),
            Self::TotalMismatch { expected, actual } => write!(
                f,
                "total drives {} (expected {expected})",
                fmt_count(*actual)
            ),
            Self::ActiveMismatch { expected, actual } => write!(
                f,
                "active drives {} (expected {expected})",
                fmt_count(*actual)
            ),
            Self::ProtectionMismatch { expected, actual } => match actual {
                Some(actual) => write!(f, "protection {actual} (expected {expected})"),
                None => write!(f, "protection unknown (expected {expected})"),
            },
            Self::Satisfied => write!(f, "satisfied"),
        }
    }
}

impl ExpectedState {
    /// Fully healthy cluster of `drives` drive containers.
    pub fn converged(drives: u32) -> Self {
        Self {
            require_clusterized: true,
            total_drives: Some(drives),
            active_drives: Some(drives),
            protection: None,
        }
    }

    /// Only the active drive count matters (fault detection).
    pub fn active_drives(active: u32) -> Self {
        Self {
            require_clusterized: false,
            total_drives: None,
            active_drives: Some(active),
            protection: None,
        }
    }

    pub fn with_protection(mut self, protection: ProtectionScheme) -> Self {
        self.protection = Some(protection);
        self
    }

    pub fn evaluate(&self, snapshot: &ClusterStatusSnapshot) -> Evaluation {
        if self.require_clusterized && !snapshot.clusterized {
            return Evaluation::NotClusterized;
        }
        if let Some(expected) = self.total_drives
            && snapshot.total_drives() != Some(expected)
        {
            return Evaluation::TotalMismatch {
                expected,
                actual: snapshot.total_drives(),
            };
        }
        if let Some(expected) = self.active_drives
            && snapshot.active_drives() != Some(expected)
        {
            return Evaluation::ActiveMismatch {
                expected,
                actual: snapshot.active_drives(),
            };
        }
        if let Some(expected) = self.protection
            && snapshot.protection != Some(expected)
        {
            return Evaluation::ProtectionMismatch {
                expected,
                actual: snapshot.protection,
            };
        }
        Evaluation::Satisfied
    }
}

/// How often to poll and for how long in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            budget: Duration::from_secs(1800),
        }
    }
}

/// Result of [`wait_until`]. Timing out is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Converged {
        snapshot: ClusterStatusSnapshot,
        polls: u32,
        elapsed: Duration,
    },
    TimedOut {
        last: Option<ClusterStatusSnapshot>,
        last_evaluation: Option<Evaluation>,
        polls: u32,
        elapsed: Duration,
    },
}

impl WaitOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub fn polls(&self) -> u32 {
        match self {
            Self::Converged { polls, .. } | Self::TimedOut { polls, .. } => *polls,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Converged { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// The converged snapshot, or the last one seen before timing out.
    pub fn snapshot(&self) -> Option<&ClusterStatusSnapshot> {
        match self {
            Self::Converged { snapshot, .. } => Some(snapshot),
            Self::TimedOut { last, .. } => last.as_ref(),
        }
    }
}

/// Poll `source` until `expected` holds or `policy.budget` elapses.
///
/// The first poll happens immediately. After an unsatisfied poll the loop
/// sleeps for `policy.interval` (clipped to the remaining budget) and
/// polls again; once the budget is spent it reports
/// [`WaitOutcome::TimedOut`] with the last snapshot seen.
pub async fn wait_until<S>(
    source: &S,
    target: StatusTarget<'_>,
    expected: &ExpectedState,
    policy: WaitPolicy,
    span: &Span,
) -> HarnessResult<WaitOutcome>
where
    S: StatusSource + ?Sized,
{
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        let snapshot = source.get_status(target).await?;
        polls += 1;
        let evaluation = expected.evaluate(&snapshot);
        let elapsed = started.elapsed();

        if evaluation.is_satisfied() {
            info!(parent: span, polls, elapsed_s = elapsed.as_secs(), %snapshot, "expected cluster state reached");
            return Ok(WaitOutcome::Converged {
                snapshot,
                polls,
                elapsed,
            });
        }

        if elapsed >= policy.budget {
            warn!(
                parent: span,
                polls,
                budget_s = policy.budget.as_secs(),
                %evaluation,
                "gave up waiting for expected cluster state"
            );
            return Ok(WaitOutcome::TimedOut {
                last: Some(snapshot),
                last_evaluation: Some(evaluation),
                polls,
                elapsed,
            });
        }

        let pause = policy.interval.min(policy.budget - elapsed);
        debug!(
            parent: span,
            polls,
            %evaluation,
            sleep_s = pause.as_secs(),
            "cluster not ready yet"
        );
        tokio::time::sleep(pause).await;
    }
}
