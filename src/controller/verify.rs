//! Structural diff between the pre-action and post-action snapshots. Ids are
//! fresh every snapshot, so comparison is over (role, title, value) content.

use crate::schema::UiNode;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeDiff {
    pub added: usize,
    pub removed: usize,
}

impl TreeDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

pub fn diff(before: &UiNode, after: &UiNode) -> TreeDiff {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for key in flatten(before) {
        *counts.entry(key).or_insert(0) -= 1;
    }
    for key in flatten(after) {
        *counts.entry(key).or_insert(0) += 1;
    }

    let mut result = TreeDiff::default();
    for delta in counts.values() {
        if *delta > 0 {
            result.added += *delta as usize;
        } else if *delta < 0 {
            result.removed += (-*delta) as usize;
        }
    }
    result
}

/// Whether any node in the tree carries the given title.
pub fn contains_title(node: &UiNode, title: &str) -> bool {
    if node.title.as_deref() == Some(title) {
        return true;
    }
    node.children.iter().any(|c| contains_title(c, title))
}

fn flatten(node: &UiNode) -> Vec<String> {
    let mut out = Vec::new();
    collect(node, &mut out);
    out
}

fn collect(node: &UiNode, out: &mut Vec<String>) {
    out.push(format!(
        "{}|{}|{}",
        node.role,
        node.title.as_deref().unwrap_or(""),
        node.value.as_deref().unwrap_or("")
    ));
    for child in &node.children {
        collect(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: &str, title: Option<&str>, children: Vec<UiNode>) -> UiNode {
        UiNode {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            title: title.map(str::to_string),
            value: None,
            children,
        }
    }

    #[test]
    fn identical_content_with_fresh_ids_is_unchanged() {
        let before = node("AXWindow", Some("Main"), vec![node("AXButton", Some("OK"), vec![])]);
        let after = node("AXWindow", Some("Main"), vec![node("AXButton", Some("OK"), vec![])]);
        assert!(diff(&before, &after).is_unchanged());
    }

    #[test]
    fn new_node_counts_as_added() {
        let before = node("AXWindow", Some("Main"), vec![]);
        let after = node(
            "AXWindow",
            Some("Main"),
            vec![node("AXTextField", Some("Untitled"), vec![])],
        );
        let d = diff(&before, &after);
        assert_eq!(d.added, 1);
        assert_eq!(d.removed, 0);
    }

    #[test]
    fn retitled_node_is_one_add_one_remove() {
        let before = node("AXWindow", Some("Old"), vec![]);
        let after = node("AXWindow", Some("New"), vec![]);
        let d = diff(&before, &after);
        assert_eq!(d.added, 1);
        assert_eq!(d.removed, 1);
    }

    #[test]
    fn contains_title_searches_recursively() {
        let tree = node(
            "AXWindow",
            Some("Main"),
            vec![node("AXGroup", None, vec![node("AXCell", Some("Groceries"), vec![])])],
        );
        assert!(contains_title(&tree, "Groceries"));
        assert!(!contains_title(&tree, "Missing"));
    }
}
