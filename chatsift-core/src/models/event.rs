use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClassifiedMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Info,
    Configuration,
    Retrying,
    Disconnected,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Info => write!(f, "info"),
            StatusKind::Configuration => write!(f, "configuration"),
            StatusKind::Retrying => write!(f, "retrying"),
            StatusKind::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Human-readable status line for the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    pub kind: StatusKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusNotice {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, StatusKind::Configuration | StatusKind::Retrying)
    }
}

/// Outbound events from the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PipelineEvent {
    Results(Vec<ClassifiedMessage>),
    Status(StatusNotice),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Results(_) => "results",
            PipelineEvent::Status(_) => "status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ChatMessage};

    #[test]
    fn test_status_is_error() {
        assert!(StatusNotice::new(StatusKind::Configuration, "no key").is_error());
        assert!(StatusNotice::new(StatusKind::Retrying, "busy").is_error());
        assert!(!StatusNotice::new(StatusKind::Info, "attached").is_error());
    }

    #[test]
    fn test_event_json_shape() {
        let item = ClassifiedMessage::new(
            ChatMessage::new("kim", "define eigenvalue").with_id("x1"),
            Category::Note,
        );
        let json = serde_json::to_value(PipelineEvent::Results(vec![item])).unwrap();
        assert_eq!(json["type"], "results");
        assert_eq!(json["payload"][0]["category"], "NOTE");

        let json = serde_json::to_value(PipelineEvent::Status(StatusNotice::new(
            StatusKind::Retrying,
            "busy",
        )))
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["payload"]["kind"], "retrying");
    }
}
