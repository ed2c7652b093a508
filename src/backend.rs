//! Platform seam for UI introspection and input.
//!
//! Native objects never cross this boundary: the backend hands out opaque
//! `NodeHandle` tokens and keeps the platform objects to itself. The element
//! registry maps public ids onto these tokens, and resolution is always
//! fallible because a token can die with its window.

use crate::error::AgentError;

/// Opaque token for one native UI object, meaningful only to the backend
/// instance that issued it.
pub type NodeHandle = u64;

/// Crawl root selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Focused window of the frontmost app, falling back to the app root.
    Window,
    /// The whole accessible tree. Slow; use sparingly.
    Screen,
}

impl Scope {
    pub fn parse(raw: Option<&str>) -> Scope {
        match raw {
            Some("screen") => Scope::Screen,
            _ => Scope::Window,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub role: String,
    pub title: Option<String>,
    pub value: Option<String>,
}

/// Accessibility backend. One implementation per platform plus an in-memory
/// fake for tests; the adapter process owns exactly one instance.
pub trait NativeBackend: Send {
    /// Root for the given scope. `PermissionDenied` when introspection is
    /// not authorized; never a partial result.
    fn root(&mut self, scope: Scope) -> Result<NodeHandle, AgentError>;

    fn node_info(&mut self, handle: NodeHandle) -> Result<NodeInfo, AgentError>;

    fn children(&mut self, handle: NodeHandle) -> Result<Vec<NodeHandle>, AgentError>;

    /// Whether the native object behind the token is still live.
    fn is_live(&self, handle: NodeHandle) -> bool;

    /// Release native references cached for earlier snapshots. Called at the
    /// start of every crawl, alongside the registry reset, so a long session
    /// can't accumulate retained platform objects. Backends that don't cache
    /// anything keep the no-op default.
    fn reset(&mut self) {}

    /// Semantic primary-action trigger (AXPress on macOS). Rejection is an
    /// `ExecutionFailed`; there is no coordinate fallback at this layer.
    fn press(&mut self, handle: NodeHandle) -> Result<(), AgentError>;

    fn move_mouse(&mut self, x: f64, y: f64) -> Result<(), AgentError>;

    fn type_text(&mut self, text: &str) -> Result<(), AgentError>;
}

/// In-memory backend used by unit and scenario tests. Holds a mutable node
/// tree; tests mutate it to simulate UI reactions and invalidate handles to
/// simulate elements dying under the agent.
pub struct FakeBackend {
    nodes: Vec<FakeNode>,
    root: Option<NodeHandle>,
    permission_granted: bool,
    pub typed: Vec<String>,
    pub pressed: Vec<NodeHandle>,
    pub mouse: Option<(f64, f64)>,
    pub resets: u32,
}

struct FakeNode {
    info: NodeInfo,
    children: Vec<NodeHandle>,
    live: bool,
    pressable: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            permission_granted: true,
            typed: Vec::new(),
            pressed: Vec::new(),
            mouse: None,
            resets: 0,
        }
    }

    pub fn deny_permission(&mut self) {
        self.permission_granted = false;
    }

    pub fn add_node(
        &mut self,
        role: &str,
        title: Option<&str>,
        value: Option<&str>,
        pressable: bool,
    ) -> NodeHandle {
        let handle = self.nodes.len() as NodeHandle;
        self.nodes.push(FakeNode {
            info: NodeInfo {
                role: role.to_string(),
                title: title.map(str::to_string),
                value: value.map(str::to_string),
            },
            children: Vec::new(),
            live: true,
            pressable,
        });
        if self.root.is_none() {
            self.root = Some(handle);
        }
        handle
    }

    pub fn attach(&mut self, parent: NodeHandle, child: NodeHandle) {
        self.nodes[parent as usize].children.push(child);
    }

    pub fn set_root(&mut self, handle: NodeHandle) {
        self.root = Some(handle);
    }

    /// Simulate the native object dying (window closed, element removed).
    pub fn invalidate(&mut self, handle: NodeHandle) {
        self.nodes[handle as usize].live = false;
    }

    fn node(&self, handle: NodeHandle) -> Result<&FakeNode, AgentError> {
        let node = self
            .nodes
            .get(handle as usize)
            .ok_or_else(|| AgentError::StaleReference(handle.to_string()))?;
        if !node.live {
            return Err(AgentError::StaleReference(handle.to_string()));
        }
        Ok(node)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend for FakeBackend {
    fn root(&mut self, _scope: Scope) -> Result<NodeHandle, AgentError> {
        if !self.permission_granted {
            return Err(AgentError::PermissionDenied);
        }
        self.root
            .ok_or_else(|| AgentError::ExecutionFailed("no focused window".to_string()))
    }

    fn node_info(&mut self, handle: NodeHandle) -> Result<NodeInfo, AgentError> {
        Ok(self.node(handle)?.info.clone())
    }

    fn children(&mut self, handle: NodeHandle) -> Result<Vec<NodeHandle>, AgentError> {
        Ok(self.node(handle)?.children.clone())
    }

    fn is_live(&self, handle: NodeHandle) -> bool {
        self.nodes
            .get(handle as usize)
            .map(|n| n.live)
            .unwrap_or(false)
    }

    // The fake's handles index the simulated UI itself, so there is nothing
    // to release; the counter lets tests assert the eviction hook fires.
    fn reset(&mut self) {
        self.resets += 1;
    }

    fn press(&mut self, handle: NodeHandle) -> Result<(), AgentError> {
        if !self.node(handle)?.pressable {
            return Err(AgentError::ExecutionFailed(format!(
                "node {handle} does not support the primary action"
            )));
        }
        self.pressed.push(handle);
        Ok(())
    }

    fn move_mouse(&mut self, x: f64, y: f64) -> Result<(), AgentError> {
        self.mouse = Some((x, y));
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<(), AgentError> {
        self.typed.push(text.to_string());
        Ok(())
    }
}

/// Placeholder backend for platforms without an accessibility adapter yet.
/// Every introspection call fails closed.
pub struct UnsupportedBackend;

impl NativeBackend for UnsupportedBackend {
    fn root(&mut self, _scope: Scope) -> Result<NodeHandle, AgentError> {
        Err(AgentError::PermissionDenied)
    }

    fn node_info(&mut self, _handle: NodeHandle) -> Result<NodeInfo, AgentError> {
        Err(AgentError::PermissionDenied)
    }

    fn children(&mut self, _handle: NodeHandle) -> Result<Vec<NodeHandle>, AgentError> {
        Err(AgentError::PermissionDenied)
    }

    fn is_live(&self, _handle: NodeHandle) -> bool {
        false
    }

    fn press(&mut self, _handle: NodeHandle) -> Result<(), AgentError> {
        Err(AgentError::PermissionDenied)
    }

    fn move_mouse(&mut self, _x: f64, _y: f64) -> Result<(), AgentError> {
        Err(AgentError::PermissionDenied)
    }

    fn type_text(&mut self, _text: &str) -> Result<(), AgentError> {
        Err(AgentError::PermissionDenied)
    }
}

/// Backend for the current platform.
pub fn platform_backend() -> Box<dyn NativeBackend> {
    #[cfg(target_os = "macos")]
    {
        Box::new(crate::macos::accessibility::AxBackend::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(UnsupportedBackend)
    }
}
