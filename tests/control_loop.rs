//! End-to-end scenarios: a full control loop over the in-process adapter,
//! with a scripted planner standing in for the network gateway.

use async_trait::async_trait;
use desktop_agent::adapter::{Dispatcher, InProcAdapter};
use desktop_agent::audit::MemoryAuditSink;
use desktop_agent::backend::{FakeBackend, NativeBackend, NodeHandle, NodeInfo, Scope};
use desktop_agent::controller::{verify, Budgets, ControlLoop, RunOutcome};
use desktop_agent::error::AgentError;
use desktop_agent::executor::ActionExecutor;
use desktop_agent::llm_gateway::{PlanRequest, PlanStep, PlannerClient};
use desktop_agent::observer::Observer;
use desktop_agent::policy::{PolicyConfig, PolicyEngine};
use desktop_agent::schema::{AgentAction, UiNode};
use desktop_agent::security::ShellOptions;
use desktop_agent::tool_policy::ToolPolicy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const ESCAPE: &str = "\u{1b}";

/// Fake backend that reacts to input the way a real UI would: a press can
/// reveal a new node, and typing Escape can dismiss into a new state.
struct ReactiveBackend {
    inner: FakeBackend,
    root: NodeHandle,
    reveal_on_press: Option<(NodeHandle, &'static str)>,
    reveal_on_escape: Option<&'static str>,
    typed: Arc<Mutex<Vec<String>>>,
}

impl ReactiveBackend {
    fn reveal(&mut self, title: &str) {
        let node = self.inner.add_node("AXStaticText", Some(title), None, false);
        self.inner.attach(self.root, node);
    }
}

impl NativeBackend for ReactiveBackend {
    fn root(&mut self, scope: Scope) -> Result<NodeHandle, AgentError> {
        self.inner.root(scope)
    }

    fn node_info(&mut self, handle: NodeHandle) -> Result<NodeInfo, AgentError> {
        self.inner.node_info(handle)
    }

    fn children(&mut self, handle: NodeHandle) -> Result<Vec<NodeHandle>, AgentError> {
        self.inner.children(handle)
    }

    fn is_live(&self, handle: NodeHandle) -> bool {
        self.inner.is_live(handle)
    }

    fn press(&mut self, handle: NodeHandle) -> Result<(), AgentError> {
        self.inner.press(handle)?;
        if let Some((target, title)) = self.reveal_on_press {
            if handle == target {
                self.reveal(title);
                self.reveal_on_press = None;
            }
        }
        Ok(())
    }

    fn move_mouse(&mut self, x: f64, y: f64) -> Result<(), AgentError> {
        self.inner.move_mouse(x, y)
    }

    fn type_text(&mut self, text: &str) -> Result<(), AgentError> {
        self.typed.lock().unwrap().push(text.to_string());
        self.inner.type_text(text)?;
        if text == ESCAPE {
            if let Some(title) = self.reveal_on_escape.take() {
                self.reveal(title);
            }
        }
        Ok(())
    }
}

fn in_proc(backend: impl NativeBackend + 'static) -> InProcAdapter {
    InProcAdapter::new(Dispatcher::new(
        Box::new(backend),
        Observer::new(5),
        ActionExecutor::new(ShellOptions::default()),
    ))
}

fn shared_policy(audit: Arc<MemoryAuditSink>) -> Arc<Mutex<PolicyEngine>> {
    Arc::new(Mutex::new(PolicyEngine::new(
        PolicyConfig::default(),
        ToolPolicy::default(),
        audit,
    )))
}

/// Clicks the first child of the window until the "Saved" confirmation shows
/// up. The first proposal lands on a locked gate; on seeing the retry context
/// it unlocks (standing in for the supervisor) and proposes again.
struct ClickUntilSavedPlanner {
    policy: Arc<Mutex<PolicyEngine>>,
    calls: AtomicUsize,
}

#[async_trait]
impl PlannerClient for ClickUntilSavedPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlanStep, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tree: UiNode = serde_json::from_value(request.snapshot.clone()).unwrap();
        if verify::contains_title(&tree, "Saved") {
            return Ok(PlanStep::Done {
                message: Some("document saved".to_string()),
            });
        }
        if request.retry.is_some() {
            self.policy.lock().unwrap().unlock();
        }
        Ok(PlanStep::Act(AgentAction::UiClick {
            element_id: tree.children[0].id.clone(),
        }))
    }
}

#[tokio::test]
async fn denied_action_replans_and_succeeds_after_unlock() {
    let mut backend = FakeBackend::new();
    let root = backend.add_node("AXWindow", Some("Main"), None, false);
    let button = backend.add_node("AXButton", Some("Save"), None, true);
    backend.attach(root, button);
    let typed = Arc::new(Mutex::new(Vec::new()));
    let backend = ReactiveBackend {
        inner: backend,
        root,
        reveal_on_press: Some((button, "Saved")),
        reveal_on_escape: None,
        typed,
    };

    let audit = Arc::new(MemoryAuditSink::new());
    let policy = shared_policy(audit.clone());
    let planner = Arc::new(ClickUntilSavedPlanner {
        policy: policy.clone(),
        calls: AtomicUsize::new(0),
    });

    let mut control = ControlLoop::new(
        in_proc(backend),
        planner.clone(),
        policy,
        audit.clone(),
        Budgets::default(),
    );

    let report = control.run("save the document").await.unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::Done {
            message: Some("document saved".to_string())
        }
    );
    assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
    assert_eq!(audit.gate_denials(), 1);
    assert!(report.history.iter().any(|l| l.starts_with("BLOCKED ui.click")));
    assert!(report.history.iter().any(|l| l == "OK ui.click"));

    // The click really landed: the confirmation node is in the live tree.
    let resp = control
        .submit(AgentAction::UiSnapshot { scope: None })
        .await
        .unwrap();
    let tree: UiNode = serde_json::from_value(resp.data.unwrap()).unwrap();
    assert!(verify::contains_title(&tree, "Saved"));
}

/// Always proposes the same click, whatever happened before.
struct StubbornPlanner {
    calls: AtomicUsize,
}

#[async_trait]
impl PlannerClient for StubbornPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlanStep, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tree: UiNode = serde_json::from_value(request.snapshot.clone()).unwrap();
        Ok(PlanStep::Act(AgentAction::UiClick {
            element_id: tree.children[0].id.clone(),
        }))
    }
}

#[tokio::test]
async fn repeated_failures_exhaust_the_retry_budget() {
    let mut backend = FakeBackend::new();
    let root = backend.add_node("AXWindow", Some("Main"), None, false);
    // A label: resolvable and live, but the press is rejected every time.
    let label = backend.add_node("AXStaticText", Some("read me"), None, false);
    backend.attach(root, label);

    let audit = Arc::new(MemoryAuditSink::new());
    let policy = shared_policy(audit.clone());
    policy.lock().unwrap().unlock();
    let planner = Arc::new(StubbornPlanner {
        calls: AtomicUsize::new(0),
    });

    let mut control = ControlLoop::new(
        in_proc(backend),
        planner.clone(),
        policy,
        audit,
        Budgets::default(),
    );

    let err = control.run("click the label").await.unwrap_err();
    match err {
        AgentError::BudgetExhausted(ctx) => {
            assert_eq!(ctx.attempt, 3);
            assert!(ctx.error_summary.unwrap().contains("execution failed"));
        }
        other => panic!("expected BudgetExhausted, got {other:?}"),
    }
    // Two retries means three attempts, and never a fourth plan call.
    assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
}

/// A gateway whose provider never answers in time.
struct TimeoutPlanner {
    calls: AtomicUsize,
}

#[async_trait]
impl PlannerClient for TimeoutPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<PlanStep, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::Timeout("llm provider".to_string()))
    }
}

#[tokio::test]
async fn planner_timeouts_count_against_the_retry_budget() {
    let mut backend = FakeBackend::new();
    backend.add_node("AXWindow", Some("Main"), None, false);

    let audit = Arc::new(MemoryAuditSink::new());
    let policy = shared_policy(audit.clone());
    let planner = Arc::new(TimeoutPlanner {
        calls: AtomicUsize::new(0),
    });

    let mut control = ControlLoop::new(
        in_proc(backend),
        planner.clone(),
        policy,
        audit,
        Budgets::default(),
    );

    let err = control.run("open notes").await.unwrap_err();
    match err {
        AgentError::BudgetExhausted(ctx) => {
            assert_eq!(ctx.attempt, 3);
            assert!(ctx.error_summary.unwrap().contains("timeout"));
        }
        other => panic!("expected BudgetExhausted, got {other:?}"),
    }
    assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn snapshot_submissions_do_not_refresh_the_idle_timer() {
    let mut backend = FakeBackend::new();
    let root = backend.add_node("AXWindow", Some("Main"), None, false);
    let button = backend.add_node("AXButton", Some("Save"), None, true);
    backend.attach(root, button);

    let audit = Arc::new(MemoryAuditSink::new());
    let policy = Arc::new(Mutex::new(PolicyEngine::new(
        PolicyConfig {
            idle_lock: Duration::from_millis(600),
            ..PolicyConfig::default()
        },
        ToolPolicy::default(),
        audit.clone(),
    )));
    let planner = Arc::new(ObservingPlanner {
        calls: AtomicUsize::new(0),
    });
    let mut control = ControlLoop::new(in_proc(backend), planner, policy.clone(), audit, Budgets::default());

    policy.lock().unwrap().unlock();
    sleep(Duration::from_millis(400)).await;
    let snap = control
        .submit(AgentAction::UiSnapshot { scope: None })
        .await
        .unwrap();
    let tree: UiNode = serde_json::from_value(snap.data.unwrap()).unwrap();
    let button_id = tree.children[0].id.clone();

    // The snapshot was pure observation; the idle clock kept running and the
    // gate relocks before the click.
    sleep(Duration::from_millis(400)).await;
    let denied = control
        .submit(AgentAction::UiClick {
            element_id: button_id.clone(),
        })
        .await;
    assert!(matches!(denied, Err(AgentError::PolicyDenied(_))));

    // A real act does refresh the timer.
    policy.lock().unwrap().unlock();
    sleep(Duration::from_millis(400)).await;
    control
        .submit(AgentAction::UiClick {
            element_id: button_id.clone(),
        })
        .await
        .unwrap();
    sleep(Duration::from_millis(400)).await;
    let allowed = control
        .submit(AgentAction::UiClick {
            element_id: button_id,
        })
        .await
        .unwrap();
    assert!(allowed.is_success());
}

/// Proposes snapshots forever; a real planner stuck in an observation loop.
struct ObservingPlanner {
    calls: AtomicUsize,
}

#[async_trait]
impl PlannerClient for ObservingPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<PlanStep, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= 3 {
            return Ok(PlanStep::Done { message: None });
        }
        Ok(PlanStep::Act(AgentAction::UiSnapshot { scope: None }))
    }
}

#[tokio::test]
async fn observation_loop_forces_escape_fallback() {
    let mut backend = FakeBackend::new();
    let root = backend.add_node("AXWindow", Some("Main"), None, false);
    let sheet = backend.add_node("AXSheet", Some("Unsaved changes"), None, false);
    backend.attach(root, sheet);
    let typed = Arc::new(Mutex::new(Vec::new()));
    let backend = ReactiveBackend {
        inner: backend,
        root,
        reveal_on_press: None,
        reveal_on_escape: Some("Dismissed"),
        typed: typed.clone(),
    };

    let audit = Arc::new(MemoryAuditSink::new());
    let policy = shared_policy(audit.clone());
    policy.lock().unwrap().unlock();
    let planner = Arc::new(ObservingPlanner {
        calls: AtomicUsize::new(0),
    });

    let mut control = ControlLoop::new(
        in_proc(backend),
        planner.clone(),
        policy,
        audit,
        Budgets::default(),
    );

    let report = control.run("close the dialog").await.unwrap();

    assert!(matches!(report.outcome, RunOutcome::Done { .. }));
    // The second consecutive observation was replaced by the Escape press.
    assert_eq!(*typed.lock().unwrap(), vec![ESCAPE.to_string()]);
    assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
    assert!(report
        .history
        .iter()
        .any(|l| l == "LOOP: forced fallback action"));
}
