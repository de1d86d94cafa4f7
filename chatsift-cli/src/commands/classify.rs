use anyhow::{bail, Context, Result};
use chatsift_core::{
    Batch, ChatMessage, ChatsiftConfig, ClassifiedMessage, Classifier, ContentFilter,
    FileCredentialStore, GeminiClassifier,
};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use super::OutputFormat;
use crate::render::category_badge;

/// One entry of the input array.
#[derive(Debug, Deserialize)]
pub struct InputMessage {
    pub author: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

pub(crate) fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Turns raw input into chat messages, dropping what the content filter rejects.
pub fn prepare_messages(raw: &str, filter: &ContentFilter) -> Result<(Vec<ChatMessage>, usize)> {
    let inputs: Vec<InputMessage> =
        serde_json::from_str(raw).context("Input must be a JSON array of {author, message}")?;

    let total = inputs.len();
    let messages: Vec<ChatMessage> = inputs
        .into_iter()
        .filter(|input| filter.admits(&input.message))
        .map(|input| {
            let message = ChatMessage::new(input.author.trim(), input.message.trim());
            match input.timestamp {
                Some(ts) => message.with_timestamp(ts),
                None => message,
            }
        })
        .collect();

    let skipped = total - messages.len();
    Ok((messages, skipped))
}

pub async fn cmd_classify(config: ChatsiftConfig, input: &Path, format: OutputFormat) -> Result<()> {
    let raw = read_input(input)?;
    let filter = ContentFilter::new(config.watcher.min_message_chars);
    let (messages, skipped) = prepare_messages(&raw, &filter)?;

    if messages.is_empty() {
        bail!("No messages left to classify ({} filtered out)", skipped);
    }

    let credentials = Arc::new(
        FileCredentialStore::open_default()
            .context("Failed to open settings")?
            .with_env_fallback(),
    );
    let classifier = GeminiClassifier::new(config.classifier.clone(), credentials)?;

    let mut results: Vec<ClassifiedMessage> = Vec::new();
    for chunk in messages.chunks(config.batcher.batch_size) {
        let batch = Batch::new(chunk.to_vec());
        results.extend(classifier.classify(&batch).await?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table => print_table(&results, messages.len(), skipped),
    }

    Ok(())
}

fn print_table(results: &[ClassifiedMessage], sent: usize, skipped: usize) {
    if results.is_empty() {
        println!(
            "{} None of the {} messages were questions or notes",
            "→".blue(),
            sent
        );
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Time").fg(comfy_table::Color::Cyan),
            Cell::new("Author").fg(comfy_table::Color::Cyan),
            Cell::new("Category").fg(comfy_table::Color::Cyan),
            Cell::new("Message").fg(comfy_table::Color::Cyan),
        ]);

    for item in results {
        table.add_row(vec![
            Cell::new(&item.message.timestamp),
            Cell::new(&item.message.author),
            Cell::new(category_badge(item.category).to_string()),
            Cell::new(&item.message.message),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "  {} {} shown, {} sent, {} filtered before sending",
        "✓".green().bold(),
        results.len(),
        sent,
        skipped
    );
}
