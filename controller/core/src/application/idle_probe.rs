// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Idle-Activity Probe
//!
//! Decides whether a credential under an idle cleanup policy is still in
//! use. The activity signal comes from the generator that produced the
//! credential; this module only turns it into a decision.
//!
//! A missing signal is [`IdleDecision::Unknown`], never "idle": a credential
//! that has not reported activity yet is not garbage-collected on that pass.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::context::OperationContext;
use crate::domain::generator::{Generator, GeneratorError, GeneratorResource, OpaqueState};
use crate::domain::resources::ResourceAccessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    /// No activity signal available. Re-check after the full idle timeout.
    Unknown,
    /// Used recently. Re-check once the rest of the idle budget has elapsed.
    Active { remaining: Duration },
    /// Idle for at least the timeout.
    Expired { idle_for: Duration },
}

impl IdleDecision {
    /// Minimum delay before the next evaluation, if the credential survives.
    pub fn requeue_after(&self, idle_timeout: Duration) -> Option<Duration> {
        match self {
            Self::Unknown => Some(idle_timeout),
            Self::Active { remaining } => Some(*remaining),
            Self::Expired { .. } => None,
        }
    }
}

/// Pure decision over an already-fetched activity signal.
///
/// Activity stamped in the future (clock skew between the backend and this
/// process) counts as activity right now.
pub fn evaluate(
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    idle_timeout: Duration,
) -> IdleDecision {
    let Some(last_activity) = last_activity else {
        return IdleDecision::Unknown;
    };

    let idle_for = (now - last_activity).to_std().unwrap_or(Duration::ZERO);
    if idle_for >= idle_timeout {
        IdleDecision::Expired { idle_for }
    } else {
        IdleDecision::Active {
            remaining: idle_timeout - idle_for,
        }
    }
}

/// Ask `generator` for its last activity and evaluate it. One attempt; the
/// call honours the context's cancellation and deadline.
#[allow(clippy::too_many_arguments)]
pub async fn probe(
    ctx: &OperationContext,
    generator: &dyn Generator,
    resource: &GeneratorResource,
    state: Option<&OpaqueState>,
    resources: &dyn ResourceAccessor,
    namespace: &str,
    idle_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<IdleDecision, GeneratorError> {
    let last_activity = ctx
        .run(generator.last_activity_time(ctx, resource, state, resources, namespace))
        .await?;
    Ok(evaluate(last_activity, now, idle_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_signal_is_not_idle() {
        let decision = evaluate(None, now(), TEN_MINUTES);
        assert_eq!(decision, IdleDecision::Unknown);
        assert_eq!(decision.requeue_after(TEN_MINUTES), Some(TEN_MINUTES));
    }

    #[test]
    fn test_recent_activity_requeues_remaining_budget() {
        let last = now() - chrono::Duration::minutes(3);
        let decision = evaluate(Some(last), now(), TEN_MINUTES);
        assert_eq!(
            decision,
            IdleDecision::Active {
                remaining: Duration::from_secs(7 * 60)
            }
        );
        assert_eq!(decision.requeue_after(TEN_MINUTES), Some(Duration::from_secs(420)));
    }

    #[test]
    fn test_stale_activity_expires() {
        let last = now() - chrono::Duration::minutes(11);
        assert_eq!(
            evaluate(Some(last), now(), TEN_MINUTES),
            IdleDecision::Expired {
                idle_for: Duration::from_secs(11 * 60)
            }
        );
    }

    #[test]
    fn test_exact_timeout_boundary_expires() {
        let last = now() - chrono::Duration::minutes(10);
        assert!(matches!(
            evaluate(Some(last), now(), TEN_MINUTES),
            IdleDecision::Expired { .. }
        ));
    }

    #[test]
    fn test_future_activity_is_clamped() {
        let last = now() + chrono::Duration::minutes(5);
        assert_eq!(
            evaluate(Some(last), now(), TEN_MINUTES),
            IdleDecision::Active {
                remaining: TEN_MINUTES
            }
        );
    }
}
