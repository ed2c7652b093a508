//! Element registry: the arena that keeps native handles on this side of the
//! process boundary. The only thing that ever crosses the wire is the string
//! id; resolution is always fallible.
//!
//! Eviction policy: the observer resets the registry at the start of every
//! top-level snapshot, so ids from older snapshots resolve to a stale
//! reference instead of accumulating forever.

use crate::backend::NodeHandle;
use crate::error::AgentError;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct ElementRegistry {
    entries: HashMap<String, NodeHandle>,
    generation: u64,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always succeeds; every registration gets a fresh id even for a handle
    /// seen before, because identity is per-snapshot.
    pub fn register(&mut self, handle: NodeHandle) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.insert(id.clone(), handle);
        id
    }

    /// Look up an id. Absent ids (including everything from a superseded
    /// snapshot) are stale references, never a silently wrong handle.
    pub fn resolve(&self, id: &str) -> Result<NodeHandle, AgentError> {
        self.entries
            .get(id)
            .copied()
            .ok_or_else(|| AgentError::StaleReference(id.to_string()))
    }

    /// Drop all entries. Called by the observer before each crawl.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of times the registry has been reset; handy in logs.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
