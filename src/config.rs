//! Env-backed configuration helpers shared across the crate.
//!
//! Components read their knobs through `from_env()` constructors at startup
//! and hold plain values afterwards, so tests can inject instances directly.

use std::env;

pub fn env_bool(key: &str, default_val: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default_val,
    }
}

pub fn env_u32(key: &str, default_val: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_val)
}

pub fn env_u64(key: &str, default_val: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_val)
}

pub fn env_usize(key: &str, default_val: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_val)
}

/// Comma-separated list, trimmed, empties dropped.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn env_list(key: &str) -> Vec<String> {
    parse_list(&env::var(key).unwrap_or_default())
}
