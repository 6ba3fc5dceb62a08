//! Reads the chat messages currently rendered in the DOM.
//!
//! No scrolling happens here; revealing older history is the caller's job.

use super::classify;
use crate::browser::{FieldQuery, NodeQuery, NodeSnapshot, PageDriver};
use crate::core::types::{extract_channel_id, extract_message_id, MessageRecord};
use anyhow::Result;
use tracing::debug;

pub const MESSAGE_CONTAINER: &str = r#"li[id^="chat-messages-"]"#;
pub const AUTHOR_SPAN: &str = r#"span[class*="username"]"#;
pub const AUTHOR_HEADING: &str = "h3";
pub const CONTENT_FRAGMENT: &str = r#"[id^="message-content-"]"#;

const FIELD_AUTHOR_SPAN: &str = "author_span";
const FIELD_AUTHOR_HEADING: &str = "author_heading";
const FIELD_CONTENT: &str = "content";

#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Case-insensitive substring the author must contain.
    pub author_includes: Option<String>,
    /// Keep only messages classified as templates.
    pub classify: bool,
}

pub fn message_query() -> NodeQuery {
    NodeQuery {
        container: MESSAGE_CONTAINER.to_string(),
        fields: vec![
            FieldQuery {
                name: FIELD_AUTHOR_SPAN,
                selector: AUTHOR_SPAN.to_string(),
                all: false,
            },
            FieldQuery {
                name: FIELD_AUTHOR_HEADING,
                selector: AUTHOR_HEADING.to_string(),
                all: false,
            },
            FieldQuery {
                name: FIELD_CONTENT,
                selector: CONTENT_FRAGMENT.to_string(),
                all: true,
            },
        ],
    }
}

/// Author-styled span first, then the heading.
fn author_of(node: &NodeSnapshot) -> String {
    [FIELD_AUTHOR_SPAN, FIELD_AUTHOR_HEADING]
        .iter()
        .map(|f| node.field(f).trim())
        .find(|a| !a.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Apply the filter to raw container snapshots, preserving DOM order.
///
/// Follow-up messages in a group render without a username header; they
/// inherit the author of the nearest preceding container that had one.
pub fn records_from_nodes(nodes: &[NodeSnapshot], filter: &ScanFilter) -> Vec<MessageRecord> {
    let needle = filter
        .author_includes
        .as_ref()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty());

    let mut carried = String::new();
    let mut out = Vec::new();
    for node in nodes {
        let own = author_of(node);
        if !own.is_empty() {
            carried = own;
        }
        let author = carried.clone();

        let text = node.field(FIELD_CONTENT).trim().to_string();
        if text.is_empty() {
            continue;
        }
        if let Some(n) = needle.as_deref() {
            if !author.to_lowercase().contains(n) {
                continue;
            }
        }
        if filter.classify && !classify::is_template(&text) {
            continue;
        }
        let Some(message_id) = extract_message_id(&node.id) else {
            continue;
        };
        out.push(MessageRecord {
            message_id,
            channel_id: extract_channel_id(&node.id).unwrap_or_default(),
            author,
            text,
            li_id: node.id.clone(),
        });
    }
    out
}

pub async fn collect(driver: &dyn PageDriver, filter: &ScanFilter) -> Result<Vec<MessageRecord>> {
    let nodes = driver.read_nodes(&message_query()).await?;
    let records = records_from_nodes(&nodes, filter);
    debug!(
        "scanner: {} containers, {} kept (author={:?}, classify={})",
        nodes.len(),
        records.len(),
        filter.author_includes,
        filter.classify
    );
    Ok(records)
}
