use serde::Serialize;

use crate::error::ChatsiftResult;
use crate::models::Batch;

const MODERATOR_INSTRUCTION: &str = "\
You are a classroom moderator filtering a live chat.
Label every message in the input list with exactly one type:
QUESTION - an academic question or a request for clarification.
NOTE - a useful note, such as a definition of a term or a summary.
NOISE - spam, emoji, greetings and any other chatter.

Return ONLY a JSON array with one object per message, reusing the input ids:
[{\"id\": \"<id>\", \"type\": \"QUESTION\"}, {\"id\": \"<id>\", \"type\": \"NOISE\"}]";

#[derive(Serialize)]
struct PromptItem<'a> {
    id: &'a str,
    text: &'a str,
}

/// Builds the single-request prompt for a batch. Each text is cut to
/// `max_text_chars` characters.
pub fn build_prompt(batch: &Batch, max_text_chars: usize) -> ChatsiftResult<String> {
    let items: Vec<PromptItem<'_>> = batch
        .messages
        .iter()
        .map(|m| PromptItem {
            id: &m.id,
            text: m.truncated_text(max_text_chars),
        })
        .collect();

    let input = serde_json::to_string(&items)?;
    Ok(format!("{}\n\nInput:\n{}", MODERATOR_INSTRUCTION, input))
}
