use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{ChatsiftError, ChatsiftResult};
use crate::models::{Batch, Category, ChatMessage, ClassificationRecord, ClassifiedMessage};

/// Removes a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parses the model text into `{id, type}` records.
///
/// Falls back to the outermost `[...]` span when the model wraps the array in
/// prose.
pub fn parse_records(text: &str) -> ChatsiftResult<Vec<ClassificationRecord>> {
    let payload = strip_code_fences(text);
    if payload.is_empty() {
        return Err(ChatsiftError::EmptyResponse);
    }

    match serde_json::from_str::<Vec<ClassificationRecord>>(payload) {
        Ok(records) => Ok(records),
        Err(first_err) => {
            let span = payload
                .find('[')
                .zip(payload.rfind(']'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &payload[start..=end]);

            match span {
                Some(span) => serde_json::from_str(span)
                    .map_err(|e| ChatsiftError::ApiParseError(format!("model output: {}", e))),
                None => Err(ChatsiftError::ApiParseError(format!(
                    "model output is not a JSON array: {}",
                    first_err
                ))),
            }
        }
    }
}

/// Matches records back to the batch by id, in model order.
///
/// Drops NOISE, unknown ids and unknown types. For a repeated id the first
/// record wins.
pub fn correlate(batch: &Batch, records: Vec<ClassificationRecord>) -> Vec<ClassifiedMessage> {
    let inputs: HashMap<&str, &ChatMessage> =
        batch.messages.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut classified = Vec::new();

    for record in records {
        let category = match record.kind.parse::<Category>() {
            Ok(category) => category,
            Err(e) => {
                warn!(id = %record.id, "Skipping record: {}", e);
                continue;
            }
        };

        if !seen.insert(record.id.clone()) {
            warn!(id = %record.id, "Model returned duplicate id, keeping first");
            continue;
        }

        if !category.is_deliverable() {
            continue;
        }

        match inputs.get(record.id.as_str()) {
            Some(message) => classified.push(ClassifiedMessage::new((*message).clone(), category)),
            None => debug!(id = %record.id, "Model returned id not in batch"),
        }
    }

    classified
}
