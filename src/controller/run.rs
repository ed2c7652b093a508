//! The orchestrator: Observe -> Plan -> Gate -> Act -> Verify, with bounded
//! retries, bounded replans, self-healing and loop detection.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::env_u32;
use crate::context_pruning::ChatMessage;
use crate::controller::loop_detector::LoopDetector;
use crate::controller::recovery::{recovery_plan, RecoveryAction};
use crate::controller::verify;
use crate::error::{classify_remote_error, AgentError};
use crate::ipc::Adapter;
use crate::llm_gateway::{PlanRequest, PlanStep, PlannerClient};
use crate::policy::{Decision, PolicyEngine};
use crate::schema::{AgentAction, RetryContext, UiNode};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const ESCAPE: &str = "\u{1b}";

#[derive(Debug, Clone)]
pub struct Budgets {
    /// Per-step failures tolerated before the run fails.
    pub max_retries: u32,
    /// Goal-level replans (including policy denials) tolerated.
    pub max_replans: u32,
    /// Hard cap on loop iterations, whatever else happens.
    pub max_steps: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_replans: 1,
            max_steps: 25,
        }
    }
}

impl Budgets {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_u32("AGENT_MAX_RETRIES", 2),
            max_replans: env_u32("AGENT_MAX_REPLANS", 1),
            max_steps: env_u32("AGENT_MAX_STEPS", 25),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done { message: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: u32,
    pub history: Vec<String>,
}

/// One session's control loop. The policy engine is shared behind a mutex so
/// a supervisor can unlock or grant approval out-of-band while a run is in
/// flight; within the run, steps are strictly sequential.
pub struct ControlLoop<A: Adapter> {
    adapter: A,
    planner: Arc<dyn PlannerClient>,
    policy: Arc<Mutex<PolicyEngine>>,
    audit: Arc<dyn AuditSink>,
    budgets: Budgets,
}

impl<A: Adapter> ControlLoop<A> {
    pub fn new(
        adapter: A,
        planner: Arc<dyn PlannerClient>,
        policy: Arc<Mutex<PolicyEngine>>,
        audit: Arc<dyn AuditSink>,
        budgets: Budgets,
    ) -> Self {
        Self {
            adapter,
            planner,
            policy,
            audit,
            budgets,
        }
    }

    /// Drive one goal to completion, budget exhaustion or planner surrender.
    /// `PermissionDenied` and `BudgetExhausted` surface as errors; a planner
    /// `fail` or step-cap overrun is a `Failed` outcome.
    pub async fn run(&mut self, goal: &str) -> Result<RunReport, AgentError> {
        info!(goal, "run started");
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut transcript: Vec<String> = Vec::new();
        let mut retry_ctx = RetryContext::default();
        let mut retries: u32 = 0;
        let mut replans: u32 = 0;
        let mut detector = LoopDetector::new();
        let mut steps: u32 = 0;

        while steps < self.budgets.max_steps {
            steps += 1;

            // Observe
            let before = match self.observe().await {
                Ok(tree) => tree,
                Err(AgentError::PermissionDenied) => return Err(AgentError::PermissionDenied),
                Err(e) => {
                    retries += 1;
                    retry_ctx.record(None, e.to_string());
                    if retries > self.budgets.max_retries {
                        return Err(AgentError::BudgetExhausted(retry_ctx));
                    }
                    continue;
                }
            };

            // Plan
            let request = PlanRequest {
                goal: goal.to_string(),
                snapshot: serde_json::to_value(&before)?,
                history: history.clone(),
                retry: (retry_ctx.attempt > 0).then(|| retry_ctx.clone()),
                vision: false,
            };
            // Planner failures (timeouts included) are charged to the retry
            // budget like any other step failure, never an instant abort.
            let mut step = match self.planner.plan(&request).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(error = %e, "planning failed");
                    retries += 1;
                    retry_ctx.record(None, e.to_string());
                    if retries > self.budgets.max_retries {
                        return Err(AgentError::BudgetExhausted(retry_ctx));
                    }
                    continue;
                }
            };

            if detector.should_force_fallback(&step) {
                warn!("observation loop detected; forcing fallback action");
                transcript.push("LOOP: forced fallback action".to_string());
                step = PlanStep::Act(AgentAction::KeyboardType {
                    text: ESCAPE.to_string(),
                });
            }

            let action = match step {
                PlanStep::Done { message } => {
                    info!(steps, "run complete");
                    return Ok(RunReport {
                        outcome: RunOutcome::Done { message },
                        steps,
                        history: transcript,
                    });
                }
                PlanStep::Fail { reason } => {
                    warn!(reason, "planner gave up");
                    return Ok(RunReport {
                        outcome: RunOutcome::Failed { reason },
                        steps,
                        history: transcript,
                    });
                }
                PlanStep::Act(action) => action,
            };

            // Gate
            let decision = {
                let mut policy = self.policy.lock().expect("policy engine poisoned");
                policy.check(&action)
            };
            if let Decision::Deny { reason } = decision {
                warn!(action = action.kind(), reason, "gate denied action");
                transcript.push(format!("BLOCKED {}: {}", action.kind(), reason));
                retry_ctx.record(Some(action), format!("policy denied: {reason}"));
                if replans >= self.budgets.max_replans {
                    return Err(AgentError::BudgetExhausted(retry_ctx));
                }
                replans += 1;
                continue; // Replanning
            }

            // Act, with one self-heal-then-retry before the budget is charged
            if let Err(e) = self.act_with_healing(&action).await {
                if matches!(e, AgentError::PermissionDenied) {
                    return Err(e);
                }
                retries += 1;
                retry_ctx.record(Some(action), e.to_string());
                if retries > self.budgets.max_retries {
                    return Err(AgentError::BudgetExhausted(retry_ctx));
                }
                continue;
            }
            // The idle relock measures time since the last real Act; pure
            // observations don't keep the lock open.
            if !action.is_observation() {
                let mut policy = self.policy.lock().expect("policy engine poisoned");
                policy.note_activity();
            }

            // Verify: re-observe and compare; a mutating action with zero
            // structural diff is a soft failure.
            if action.mutates_ui() {
                let after = match self.observe().await {
                    Ok(tree) => tree,
                    Err(AgentError::PermissionDenied) => return Err(AgentError::PermissionDenied),
                    Err(e) => {
                        retries += 1;
                        retry_ctx.record(Some(action), e.to_string());
                        if retries > self.budgets.max_retries {
                            return Err(AgentError::BudgetExhausted(retry_ctx));
                        }
                        continue;
                    }
                };
                if verify::diff(&before, &after).is_unchanged() {
                    warn!(action = action.kind(), "no ui change after mutating action");
                    self.heal("soft_failure").await;
                    retries += 1;
                    retry_ctx.record(Some(action), "no ui change after mutating action");
                    if retries > self.budgets.max_retries {
                        return Err(AgentError::BudgetExhausted(retry_ctx));
                    }
                    continue;
                }
            }

            transcript.push(format!("OK {}", action.kind()));
            history.push(ChatMessage::new(
                "assistant",
                format!("executed {}", action.kind()),
            ));
            retry_ctx = RetryContext::default();
            retries = 0;
        }

        Ok(RunReport {
            outcome: RunOutcome::Failed {
                reason: "step budget exhausted".to_string(),
            },
            steps,
            history: transcript,
        })
    }

    /// Gate and execute one externally supplied action (REPL path). Denials
    /// surface as `PolicyDenied`; the same audit events fire as in a run.
    pub async fn submit(&mut self, action: AgentAction) -> Result<crate::schema::IpcResponse, AgentError> {
        let decision = {
            let mut policy = self.policy.lock().expect("policy engine poisoned");
            policy.check(&action)
        };
        if let Decision::Deny { reason } = decision {
            return Err(AgentError::PolicyDenied(reason));
        }
        let resp = self.adapter.request(action.clone()).await?;
        self.audit.emit(AuditEvent::act(
            action.kind(),
            resp.is_success(),
            resp.error.clone(),
        ));
        if resp.is_success() && !action.is_observation() {
            let mut policy = self.policy.lock().expect("policy engine poisoned");
            policy.note_activity();
        }
        Ok(resp)
    }

    async fn observe(&mut self) -> Result<UiNode, AgentError> {
        let resp = self
            .adapter
            .request(AgentAction::UiSnapshot { scope: None })
            .await?;
        if !resp.is_success() {
            let msg = resp.error.unwrap_or_else(|| "snapshot failed".to_string());
            return Err(classify_remote_error(&msg));
        }
        let data = resp
            .data
            .ok_or_else(|| AgentError::Ipc("snapshot response had no data".to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    async fn act(&mut self, action: &AgentAction) -> Result<(), AgentError> {
        let resp = self.adapter.request(action.clone()).await;
        let outcome = match resp {
            Ok(r) if r.is_success() => Ok(()),
            Ok(r) => {
                let msg = r.error.unwrap_or_else(|| "action failed".to_string());
                Err(classify_remote_error(&msg))
            }
            Err(e) => Err(e),
        };
        self.audit.emit(AuditEvent::act(
            action.kind(),
            outcome.is_ok(),
            outcome.as_ref().err().map(|e| e.to_string()),
        ));
        outcome
    }

    async fn act_with_healing(&mut self, action: &AgentAction) -> Result<(), AgentError> {
        let first = match self.act(action).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !self.heal(first.kind()).await {
            return Err(first);
        }
        // One deterministic retry after recovery; a second failure is final.
        self.act(action).await
    }

    /// Execute the recovery sequence for a failure kind. Returns false when
    /// the table says to stop (fail fast) instead of recovering.
    async fn heal(&mut self, failure_kind: &str) -> bool {
        let plan = recovery_plan(failure_kind);
        if plan.stop || plan.actions.is_empty() {
            warn!(failure_kind, hint = plan.hint, "no recovery applicable");
            return false;
        }
        info!(failure_kind, hint = plan.hint, "self-healing");
        for step in plan.actions {
            match step {
                RecoveryAction::Dismiss => {
                    let _ = self
                        .adapter
                        .request(AgentAction::KeyboardType {
                            text: ESCAPE.to_string(),
                        })
                        .await;
                }
                RecoveryAction::Wait(duration) => tokio::time::sleep(*duration).await,
            }
        }
        true
    }
}
