use chatsift_core::{CardRenderer, Category, FeedEntry, StatusKind, StatusNotice};
use chrono::Local;
use colored::{ColoredString, Colorize};

/// One line per card: `hh:mm:ss [CATEGORY] author: message`.
pub struct TerminalCardRenderer;

impl CardRenderer for TerminalCardRenderer {
    type Output = String;

    fn render(&self, entry: &FeedEntry) -> String {
        let message = &entry.item.message;
        format!(
            "{} {} {}: {}",
            message.timestamp.dimmed(),
            category_badge(entry.category()),
            message.author.bold(),
            message.message
        )
    }
}

pub fn category_badge(category: Category) -> ColoredString {
    let label = format!("[{}]", category);
    match category {
        Category::Question => label.yellow().bold(),
        Category::Note => label.cyan(),
        Category::Noise => label.dimmed(),
    }
}

pub fn format_status(notice: &StatusNotice) -> String {
    let at = notice.at.with_timezone(&Local).format("%H:%M:%S");
    let marker = match notice.kind {
        StatusKind::Info => "→".blue(),
        StatusKind::Retrying => "!".yellow().bold(),
        StatusKind::Configuration => "✗".red().bold(),
        StatusKind::Disconnected => "✗".red(),
    };
    let text = match notice.kind {
        StatusKind::Info => notice.message.normal(),
        StatusKind::Retrying => notice.message.yellow(),
        StatusKind::Configuration | StatusKind::Disconnected => notice.message.red(),
    };
    format!("{} {} {}", at.to_string().dimmed(), marker, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::{ChatMessage, ClassifiedMessage};

    fn entry(category: Category) -> FeedEntry {
        let message = ChatMessage::new("ana", "what is a trait object?").with_timestamp("19:02:11");
        FeedEntry {
            item: ClassifiedMessage::new(message, category),
            visible: true,
        }
    }

    #[test]
    fn test_card_contains_fields() {
        colored::control::set_override(false);
        let line = TerminalCardRenderer.render(&entry(Category::Question));
        assert_eq!(line, "19:02:11 [QUESTION] ana: what is a trait object?");
    }

    #[test]
    fn test_status_line_carries_message() {
        colored::control::set_override(false);
        let notice = StatusNotice::new(StatusKind::Retrying, "Service busy, will retry");
        let line = format_status(&notice);
        assert!(line.contains("! Service busy, will retry"));
    }
}
