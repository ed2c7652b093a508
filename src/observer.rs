//! Observation service: crawls the accessible tree into a `UiNode` snapshot,
//! registering every visited node in pre-order so the planner can address
//! elements by id.

use crate::backend::{NativeBackend, NodeHandle, Scope};
use crate::config::env_usize;
use crate::error::AgentError;
use crate::registry::ElementRegistry;
use crate::schema::UiNode;
use tracing::{debug, warn};

pub const DEFAULT_MAX_DEPTH: usize = 5;

pub struct Observer {
    max_depth: usize,
}

impl Observer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn from_env() -> Self {
        Self::new(env_usize("OBSERVER_MAX_DEPTH", DEFAULT_MAX_DEPTH))
    }

    /// Take one snapshot. Resets the registry first: ids are only valid until
    /// the next snapshot, and this bounds registry growth across a session.
    ///
    /// Fails closed: an unreadable root surfaces `PermissionDenied` (or the
    /// backend's error) rather than a partial tree.
    pub fn snapshot(
        &self,
        backend: &mut dyn NativeBackend,
        registry: &mut ElementRegistry,
        scope: Scope,
    ) -> Result<UiNode, AgentError> {
        if scope == Scope::Screen {
            warn!("screen-scope snapshot requested; this walks the whole accessible tree");
        }
        registry.reset();
        backend.reset();
        let root = backend.root(scope)?;
        let tree = self.crawl(backend, registry, root, 0)?;
        debug!(
            nodes = registry.len(),
            generation = registry.generation(),
            "snapshot complete"
        );
        Ok(tree)
    }

    fn crawl(
        &self,
        backend: &mut dyn NativeBackend,
        registry: &mut ElementRegistry,
        handle: NodeHandle,
        depth: usize,
    ) -> Result<UiNode, AgentError> {
        let info = backend.node_info(handle)?;
        // Pre-order: the node is addressable before its children are visited.
        let id = registry.register(handle);

        let mut children = Vec::new();
        if depth < self.max_depth {
            // A child that died mid-crawl is skipped, not fatal; only the
            // root is all-or-nothing.
            for child in backend.children(handle).unwrap_or_default() {
                match self.crawl(backend, registry, child, depth + 1) {
                    Ok(node) => children.push(node),
                    Err(e) => debug!(error = %e, "skipping unreadable child"),
                }
            }
        }

        Ok(UiNode {
            id,
            role: info.role,
            title: info.title.filter(|t| !t.is_empty()),
            value: info.value.filter(|v| !v.is_empty()),
            children,
        })
    }
}
