//! Policy engine: the stateful gate between a proposed action and its
//! execution. Two states, Locked (initial) and Unlocked; unlocking is never
//! implicit in a plan, only an explicit user or supervisor call.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::{env_bool, env_list, env_u64};
use crate::schema::AgentAction;
use crate::security::{CommandClassifier, RiskTier, ShellOptions};
use crate::shell_analysis;
use crate::tool_policy::ToolPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// No Act for this long forces a relock.
    pub idle_lock: Duration,
    /// Automation mode: Caution-tier actions also need an approval grant.
    pub require_approval_for_caution: bool,
    pub shell_allowlist: Vec<String>,
    pub shell_denylist: Vec<String>,
    pub shell_options: ShellOptions,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            idle_lock: Duration::from_secs(300),
            require_approval_for_caution: false,
            shell_allowlist: Vec::new(),
            shell_denylist: Vec::new(),
            shell_options: ShellOptions::default(),
        }
    }
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        Self {
            idle_lock: Duration::from_secs(env_u64("POLICY_IDLE_LOCK_SECS", 300)),
            require_approval_for_caution: env_bool("POLICY_REQUIRE_APPROVAL", false),
            shell_allowlist: env_list("SHELL_ALLOWLIST"),
            shell_denylist: env_list("SHELL_DENYLIST"),
            shell_options: ShellOptions::from_env(),
        }
    }
}

pub struct PolicyEngine {
    locked: bool,
    last_activity: Instant,
    approval_granted: bool,
    config: PolicyConfig,
    tools: ToolPolicy,
    audit: Arc<dyn AuditSink>,
}

impl PolicyEngine {
    /// Starts Locked.
    pub fn new(config: PolicyConfig, tools: ToolPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            locked: true,
            last_activity: Instant::now(),
            approval_granted: false,
            config,
            tools,
            audit,
        }
    }

    pub fn from_env(audit: Arc<dyn AuditSink>) -> Self {
        Self::new(PolicyConfig::from_env(), ToolPolicy::from_env(), audit)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn unlock(&mut self) {
        self.locked = false;
        self.last_activity = Instant::now();
        info!("write lock released");
    }

    pub fn lock(&mut self) {
        self.locked = true;
        info!("write lock engaged");
    }

    /// Single-use, out-of-band confirmation for Critical-tier actions (and
    /// for Caution in automation mode). Consumed by the next check that
    /// needs it; the engine never issues one itself.
    pub fn grant_approval(&mut self) {
        self.approval_granted = true;
        info!("single-use approval granted");
    }

    /// Called by the control loop after every executed action, so the idle
    /// relock measures time since the last Act.
    pub fn note_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Authorize or reject one proposed action. Emits a gate audit event
    /// synchronously for every decision.
    pub fn check(&mut self, action: &AgentAction) -> Decision {
        self.maybe_idle_relock();

        let tier = self.grade(action);
        let decision = self.evaluate(action, tier);
        self.audit.emit(AuditEvent::gate(
            action.kind(),
            tier.as_str(),
            decision.is_allow(),
            decision.reason().map(str::to_string),
        ));
        decision
    }

    fn evaluate(&mut self, action: &AgentAction, tier: RiskTier) -> Decision {
        if !self.tools.is_allowed(action.kind()) {
            return Decision::deny(format!("tool policy blocks {}", action.kind()));
        }
        if let AgentAction::ShellExec { command } = action {
            if let Some(reason) = self.shell_list_rejection(command) {
                return Decision::deny(reason);
            }
        }

        match tier {
            RiskTier::Safe => Decision::Allow,
            RiskTier::Caution => {
                if self.locked {
                    return Decision::deny("write lock engaged: caution-tier action requires unlock");
                }
                if self.config.require_approval_for_caution && !self.take_approval() {
                    return Decision::deny("automation mode: caution-tier action requires approval");
                }
                Decision::Allow
            }
            RiskTier::Critical => {
                if self.take_approval() {
                    Decision::Allow
                } else {
                    Decision::deny("critical-tier action requires explicit single-use approval")
                }
            }
            RiskTier::Forbidden => Decision::deny("forbidden action: never executable"),
        }
    }

    fn grade(&self, action: &AgentAction) -> RiskTier {
        match action {
            AgentAction::UiSnapshot { .. } => RiskTier::Safe,
            AgentAction::UiClick { .. }
            | AgentAction::MouseMove { .. }
            | AgentAction::KeyboardType { .. } => RiskTier::Caution,
            AgentAction::ShellExec { command } => {
                // A shell invocation is never Safe from the gate's point of
                // view, whatever the classifier says about the string.
                CommandClassifier::classify_with(command, &self.config.shell_options)
                    .max(RiskTier::Caution)
            }
            AgentAction::FileDelete { .. } => RiskTier::Critical,
            AgentAction::Terminate => RiskTier::Forbidden,
        }
    }

    fn shell_list_rejection(&self, command: &str) -> Option<String> {
        let trimmed = command.trim();
        if self
            .config
            .shell_denylist
            .iter()
            .any(|d| trimmed.contains(d.as_str()))
        {
            return Some("shell command matches denylist".to_string());
        }

        let allow = &self.config.shell_allowlist;
        if allow.is_empty() || allow.iter().any(|a| a == "*" || a == "all") {
            return None;
        }

        let analysis = shell_analysis::analyze_shell_command(trimmed);
        let segments = if analysis.segments.is_empty() {
            vec![trimmed.to_string()]
        } else {
            analysis.segments
        };
        for segment in segments {
            if !allow.iter().any(|a| segment == *a || segment.starts_with(a.as_str())) {
                return Some(format!("shell segment '{segment}' not in allowlist"));
            }
        }
        None
    }

    fn take_approval(&mut self) -> bool {
        if self.approval_granted {
            self.approval_granted = false;
            return true;
        }
        false
    }

    fn maybe_idle_relock(&mut self) {
        if !self.locked && self.last_activity.elapsed() >= self.config.idle_lock {
            info!(
                idle_secs = self.config.idle_lock.as_secs(),
                "idle timeout: re-engaging write lock"
            );
            self.locked = true;
        }
    }
}
