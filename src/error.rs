use crate::schema::RetryContext;
use thiserror::Error;

/// Failure taxonomy of the decision-to-execution pipeline.
///
/// Recovery matrix:
/// - `StaleReference`, `ExecutionFailed`, `Timeout` are locally recoverable
///   (re-observe, self-heal, retry) within the step budget.
/// - `ProviderRefused` triggers a single fallback-provider retry.
/// - `PermissionDenied`, `PolicyDenied` (without an approval path) and
///   `BudgetExhausted` are surfaced to the caller.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("accessibility permission denied")]
    PermissionDenied,

    #[error("stale element reference: {0}")]
    StaleReference(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("provider refused request: {0}")]
    ProviderRefused(String),

    #[error("timeout waiting on {0}")]
    Timeout(String),

    #[error("budget exhausted after {} attempts: {}", .0.attempt, .0.error_summary.as_deref().unwrap_or("no error recorded"))]
    BudgetExhausted(RetryContext),

    #[error("ipc failure: {0}")]
    Ipc(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Stable label used in audit events and the self-healing table.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::PermissionDenied => "permission_denied",
            AgentError::StaleReference(_) => "stale_reference",
            AgentError::PolicyDenied(_) => "policy_denied",
            AgentError::ExecutionFailed(_) => "execution_failed",
            AgentError::ProviderRefused(_) => "provider_refused",
            AgentError::Timeout(_) => "timeout",
            AgentError::BudgetExhausted(_) => "budget_exhausted",
            AgentError::Ipc(_) => "ipc",
            AgentError::Serde(_) => "serde",
            AgentError::Io(_) => "io",
        }
    }
}

/// Map an adapter error string back onto the taxonomy. The adapter reports
/// errors as flat text on the wire, so classification is by marker substring.
pub fn classify_remote_error(msg: &str) -> AgentError {
    let lower = msg.to_lowercase();
    if lower.contains("permission") || lower.contains("not authorized") {
        AgentError::PermissionDenied
    } else if lower.contains("stale") {
        AgentError::StaleReference(msg.to_string())
    } else if lower.contains("timeout") {
        AgentError::Timeout(msg.to_string())
    } else {
        AgentError::ExecutionFailed(msg.to_string())
    }
}
