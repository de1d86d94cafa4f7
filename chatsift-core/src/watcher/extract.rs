use chrono::Local;

use super::dom::ChatNode;
use crate::config::ChatSelectors;
use crate::error::ChatsiftResult;
use crate::models::ChatMessage;

/// Pulls a [`ChatMessage`] out of an inserted node.
///
/// Returns `Ok(None)` for nodes that are not chat lines or lack an author or
/// body. Lookup failures surface as `Err` so the caller can log and skip.
pub fn extract_message(
    node: &dyn ChatNode,
    selectors: &ChatSelectors,
) -> ChatsiftResult<Option<ChatMessage>> {
    if !node.is_element() || !node.tag_name().eq_ignore_ascii_case(&selectors.message_tag) {
        return Ok(None);
    }

    let Some(author) = field(node, &selectors.author)? else {
        return Ok(None);
    };
    let Some(body) = field(node, &selectors.body)? else {
        return Ok(None);
    };

    let timestamp = field(node, &selectors.timestamp)?
        .unwrap_or_else(|| Local::now().format("%H:%M:%S").to_string());

    Ok(Some(ChatMessage::new(author, body).with_timestamp(timestamp)))
}

fn field(node: &dyn ChatNode, selector: &str) -> ChatsiftResult<Option<String>> {
    Ok(node
        .query_text(selector)?
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}
