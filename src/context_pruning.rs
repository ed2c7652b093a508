//! Bounds the planning context sent to model providers: keep only the most
//! recent K messages and/or messages younger than a TTL, so long sessions
//! don't grow token cost without bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextPruneConfig {
    pub max_messages: usize,
    pub ttl_seconds: Option<i64>,
}

impl Default for ContextPruneConfig {
    fn default() -> Self {
        Self {
            max_messages: 8,
            ttl_seconds: None,
        }
    }
}

impl ContextPruneConfig {
    pub fn from_env() -> Self {
        let max_messages = env::var("CONTEXT_MAX_MESSAGES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(8);

        let ttl_seconds = env::var("CONTEXT_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0);

        Self {
            max_messages,
            ttl_seconds,
        }
    }

    pub fn prune(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut filtered: Vec<ChatMessage> = match self.ttl_seconds {
            Some(ttl) => {
                let now = Utc::now();
                history
                    .iter()
                    .filter(|m| now.signed_duration_since(m.created_at).num_seconds() <= ttl)
                    .cloned()
                    .collect()
            }
            None => history.to_vec(),
        };

        if self.max_messages > 0 && filtered.len() > self.max_messages {
            filtered = filtered.split_off(filtered.len() - self.max_messages);
        }
        filtered
    }
}
