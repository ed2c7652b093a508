//! Self-healing table: maps a failure kind to a bounded, deterministic
//! recovery sequence tried once before the failure counts against the retry
//! budget. New strategies are added as table rows, not new branches.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryAction {
    /// Send Escape to dismiss whatever dialog or menu is in the way.
    Dismiss,
    Wait(Duration),
}

#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    /// Fail fast: no recovery, surface the error to the caller.
    pub stop: bool,
    pub actions: &'static [RecoveryAction],
    pub hint: &'static str,
}

static WAIT_FOR_SETTLE: [RecoveryAction; 1] =
    [RecoveryAction::Wait(Duration::from_millis(1000))];
static DISMISS_THEN_SETTLE: [RecoveryAction; 2] = [
    RecoveryAction::Dismiss,
    RecoveryAction::Wait(Duration::from_millis(300)),
];

pub fn recovery_plan(failure_kind: &str) -> RecoveryPlan {
    match failure_kind {
        "permission_denied" => RecoveryPlan {
            stop: true,
            actions: &[],
            hint: "grant accessibility permissions; retrying would spam the OS",
        },
        // No deterministic input helps a dead id; the step goes straight
        // back to planning, which re-observes and picks a fresh one.
        "stale_reference" => RecoveryPlan {
            stop: false,
            actions: &[],
            hint: "ids are per-snapshot; replan against a fresh tree",
        },
        "timeout" => RecoveryPlan {
            stop: false,
            actions: &WAIT_FOR_SETTLE,
            hint: "wait for the UI to settle before retrying",
        },
        "soft_failure" => RecoveryPlan {
            stop: false,
            actions: &DISMISS_THEN_SETTLE,
            hint: "nothing changed; a dialog may be swallowing input",
        },
        // execution_failed and anything unrecognized
        _ => RecoveryPlan {
            stop: false,
            actions: &DISMISS_THEN_SETTLE,
            hint: "dismiss whatever is in the way, settle, then retry",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_stops_immediately() {
        let plan = recovery_plan("permission_denied");
        assert!(plan.stop);
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn stale_reference_goes_straight_to_replanning() {
        let plan = recovery_plan("stale_reference");
        assert!(!plan.stop);
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn timeout_waits_before_the_retry() {
        let plan = recovery_plan("timeout");
        assert!(!plan.stop);
        assert_eq!(
            plan.actions,
            [RecoveryAction::Wait(Duration::from_millis(1000))]
        );
    }

    #[test]
    fn unknown_failures_get_the_generic_sequence() {
        let plan = recovery_plan("something_new");
        assert!(!plan.stop);
        assert_eq!(plan.actions[0], RecoveryAction::Dismiss);
    }
}
