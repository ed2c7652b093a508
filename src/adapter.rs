//! Request dispatcher for the native execution process. One request line in,
//! exactly one response line out; shared between the `adapter` binary's
//! stdio loop and the in-process adapter used by tests.

use crate::backend::{NativeBackend, Scope};
use crate::error::AgentError;
use crate::executor::ActionExecutor;
use crate::ipc::Adapter;
use crate::observer::Observer;
use crate::registry::ElementRegistry;
use crate::schema::{AgentAction, IpcRequest, IpcResponse};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub struct Dispatcher {
    backend: Box<dyn NativeBackend>,
    registry: ElementRegistry,
    observer: Observer,
    executor: ActionExecutor,
    shutdown: bool,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn NativeBackend>, observer: Observer, executor: ActionExecutor) -> Self {
        Self {
            backend,
            registry: ElementRegistry::new(),
            observer,
            executor,
            shutdown: false,
        }
    }

    /// Whether a `system.terminate` has been processed; the stdio loop exits
    /// after writing the response for it.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Handle one raw input line. Never panics: unparseable input becomes a
    /// `status="error"` response with request_id "unknown", a well-formed
    /// request with an unrecognized action becomes `status="failed"`.
    pub fn handle_line(&mut self, line: &str) -> IpcResponse {
        let mut raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                return IpcResponse::protocol_error(format!("unparseable request: {e}"));
            }
        };

        let request_id = raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        // An absent or null payload means "no arguments" on the wire. Only
        // system.terminate genuinely carries none.
        if let Some(obj) = raw.as_object_mut() {
            let takes_payload =
                obj.get("action").and_then(Value::as_str) != Some("system.terminate");
            if takes_payload && obj.get("payload").map_or(true, Value::is_null) {
                obj.insert("payload".to_string(), Value::Object(Default::default()));
            }
        }

        match serde_json::from_value::<IpcRequest>(raw) {
            Ok(req) => self.handle_request(req),
            Err(e) => IpcResponse::failed(&request_id, format!("unrecognized action: {e}")),
        }
    }

    pub fn handle_request(&mut self, req: IpcRequest) -> IpcResponse {
        match self.dispatch(&req.action) {
            Ok(data) => IpcResponse::success(&req.id, data),
            Err(e) => IpcResponse::failed(&req.id, e.to_string()),
        }
    }

    fn dispatch(&mut self, action: &AgentAction) -> Result<Value, AgentError> {
        match action {
            AgentAction::UiSnapshot { scope } => {
                let scope = Scope::parse(scope.as_deref());
                let tree =
                    self.observer
                        .snapshot(self.backend.as_mut(), &mut self.registry, scope)?;
                Ok(serde_json::to_value(tree)?)
            }
            AgentAction::Terminate => {
                self.shutdown = true;
                self.executor
                    .execute(action, self.backend.as_mut(), &self.registry)
            }
            _ => self
                .executor
                .execute(action, self.backend.as_mut(), &self.registry),
        }
    }
}

/// In-process adapter: same dispatch path as the child process, without the
/// pipe. Used by the scenario tests and by `--local` runs.
pub struct InProcAdapter {
    dispatcher: Dispatcher,
}

impl InProcAdapter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Adapter for InProcAdapter {
    async fn request(&mut self, action: AgentAction) -> Result<IpcResponse, AgentError> {
        let req = IpcRequest {
            id: Uuid::new_v4().to_string(),
            action,
        };
        Ok(self.dispatcher.handle_request(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeBackend;
    use crate::observer::DEFAULT_MAX_DEPTH;
    use crate::security::ShellOptions;

    fn dispatcher_with_button() -> Dispatcher {
        let mut backend = FakeBackend::new();
        let root = backend.add_node("AXWindow", Some("Main"), None, false);
        let button = backend.add_node("AXButton", Some("OK"), None, true);
        backend.attach(root, button);
        Dispatcher::new(
            Box::new(backend),
            Observer::new(DEFAULT_MAX_DEPTH),
            ActionExecutor::new(ShellOptions::default()),
        )
    }

    #[test]
    fn malformed_line_yields_error_with_unknown_id() {
        let mut d = dispatcher_with_button();
        let resp = d.handle_line("this is not json");
        assert_eq!(resp.status, "error");
        assert_eq!(resp.request_id, "unknown");
        assert!(resp.error.is_some());
    }

    #[test]
    fn unrecognized_action_yields_failed_with_error() {
        let mut d = dispatcher_with_button();
        let resp = d.handle_line(r#"{"id":"r9","action":"ui.levitate","payload":{}}"#);
        assert_eq!(resp.status, "failed");
        assert_eq!(resp.request_id, "r9");
        assert!(resp.error.is_some());
    }

    #[test]
    fn loop_survives_bad_lines() {
        let mut d = dispatcher_with_button();
        let _ = d.handle_line("garbage");
        let _ = d.handle_line(r#"{"id":"r1","action":"no.such.action"}"#);
        let resp = d.handle_line(r#"{"id":"r2","action":"ui.snapshot","payload":{"scope":null}}"#);
        assert_eq!(resp.status, "success");
        assert_eq!(resp.request_id, "r2");
        let tree = resp.data.unwrap();
        assert_eq!(tree["role"], "AXWindow");
    }

    #[test]
    fn null_and_missing_payloads_read_as_empty() {
        let mut d = dispatcher_with_button();
        let null_payload = d.handle_line(r#"{"id":"s1","action":"ui.snapshot","payload":null}"#);
        assert!(null_payload.is_success());
        let no_payload = d.handle_line(r#"{"id":"s2","action":"ui.snapshot"}"#);
        assert!(no_payload.is_success());

        // Required arguments are still required once the payload is empty.
        let click = d.handle_line(r#"{"id":"c1","action":"ui.click","payload":null}"#);
        assert_eq!(click.status, "failed");
    }

    #[test]
    fn snapshot_then_click_round_trip() {
        let mut d = dispatcher_with_button();
        let snap = d.handle_line(r#"{"id":"s1","action":"ui.snapshot"}"#);
        assert!(snap.is_success());
        let tree = snap.data.unwrap();
        let button_id = tree["children"][0]["id"].as_str().unwrap().to_string();

        let click = d.handle_request(IpcRequest {
            id: "c1".to_string(),
            action: AgentAction::UiClick {
                element_id: button_id,
            },
        });
        assert!(click.is_success());
    }

    #[test]
    fn click_with_superseded_id_reports_stale() {
        let mut d = dispatcher_with_button();
        let first = d.handle_line(r#"{"id":"s1","action":"ui.snapshot"}"#);
        let stale_id = first.data.unwrap()["children"][0]["id"]
            .as_str()
            .unwrap()
            .to_string();
        // New snapshot supersedes every id from the first one.
        let _ = d.handle_line(r#"{"id":"s2","action":"ui.snapshot"}"#);

        let click = d.handle_request(IpcRequest {
            id: "c1".to_string(),
            action: AgentAction::UiClick {
                element_id: stale_id,
            },
        });
        assert_eq!(click.status, "failed");
        assert!(click.error.unwrap().contains("stale"));
    }

    #[test]
    fn terminate_sets_shutdown_flag() {
        let mut d = dispatcher_with_button();
        assert!(!d.shutdown_requested());
        let resp = d.handle_line(r#"{"id":"t1","action":"system.terminate"}"#);
        assert!(resp.is_success());
        assert!(d.shutdown_requested());
    }
}
