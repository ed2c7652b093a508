//! Detects the observe-forever failure mode: a planner that keeps proposing
//! snapshots makes no progress, so after two consecutive observation-only
//! proposals the loop substitutes a fallback action instead of observing a
//! third time.

use crate::llm_gateway::PlanStep;

#[derive(Default)]
pub struct LoopDetector {
    consecutive_observations: u32,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plan result. Returns true when a fallback action must be
    /// forced in place of the proposal; the streak resets once forced.
    pub fn should_force_fallback(&mut self, step: &PlanStep) -> bool {
        if step.is_observation_only() {
            self.consecutive_observations += 1;
        } else {
            self.consecutive_observations = 0;
        }

        if self.consecutive_observations >= 2 {
            self.consecutive_observations = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AgentAction;

    fn observe() -> PlanStep {
        PlanStep::Act(AgentAction::UiSnapshot { scope: None })
    }

    fn click() -> PlanStep {
        PlanStep::Act(AgentAction::UiClick {
            element_id: "e".to_string(),
        })
    }

    #[test]
    fn second_consecutive_observation_forces_fallback() {
        let mut detector = LoopDetector::new();
        assert!(!detector.should_force_fallback(&observe()));
        assert!(detector.should_force_fallback(&observe()));
    }

    #[test]
    fn actionable_step_resets_streak() {
        let mut detector = LoopDetector::new();
        assert!(!detector.should_force_fallback(&observe()));
        assert!(!detector.should_force_fallback(&click()));
        assert!(!detector.should_force_fallback(&observe()));
        assert!(detector.should_force_fallback(&observe()));
    }

    #[test]
    fn streak_resets_after_forcing() {
        let mut detector = LoopDetector::new();
        let _ = detector.should_force_fallback(&observe());
        assert!(detector.should_force_fallback(&observe()));
        assert!(!detector.should_force_fallback(&observe()));
    }
}
