//! Structured view of visible UI surfaces (channel list, headers) taken from
//! the accessibility tree.

use crate::browser::PageDriver;
use crate::core::types::{AccessibilityNode, FlatEntry};
use std::collections::HashSet;
use tracing::warn;

pub const ROLE_TREEITEM: &str = "treeitem";
pub const ROLE_HEADING: &str = "heading";

/// Default presentation cap for [`summarize`].
pub const DEFAULT_SUMMARY_CAP: usize = 500;

/// Snapshot the page's accessibility tree. A driver failure is logged and
/// treated like an absent tree.
pub async fn snapshot(driver: &dyn PageDriver) -> Option<AccessibilityNode> {
    match driver.accessibility_snapshot().await {
        Ok(tree) => tree,
        Err(e) => {
            warn!("accessibility: snapshot unavailable: {}", e);
            None
        }
    }
}

/// Depth-first, document-order flattening. Only `treeitem` / `heading` nodes
/// with a non-empty trimmed name produce entries; the trail grows only when
/// descending through a named heading.
pub fn flatten(root: Option<&AccessibilityNode>) -> Vec<FlatEntry> {
    let mut out = Vec::new();
    if let Some(node) = root {
        let mut trail = Vec::new();
        walk(node, &mut trail, &mut out);
    }
    out
}

fn walk(node: &AccessibilityNode, trail: &mut Vec<String>, out: &mut Vec<FlatEntry>) {
    let name = node.name.trim();
    let is_heading = node.role == ROLE_HEADING;

    if !name.is_empty() && (is_heading || node.role == ROLE_TREEITEM) {
        out.push(FlatEntry {
            role: node.role.clone(),
            name: name.to_string(),
            trail: trail.clone(),
        });
    }

    let pushed = is_heading && !name.is_empty();
    if pushed {
        trail.push(name.to_string());
    }
    for child in &node.children {
        walk(child, trail, out);
    }
    if pushed {
        trail.pop();
    }
}

/// First-seen `role:name` keys over the first `cap` entries.
pub fn summarize(entries: &[FlatEntry], cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .take(cap)
        .map(|e| format!("{}:{}", e.role, e.name))
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

pub fn count_role(entries: &[FlatEntry], role: &str) -> usize {
    entries.iter().filter(|e| e.role == role).count()
}
