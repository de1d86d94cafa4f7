use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ChatMessage;

/// Closed set of labels the model may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Question,
    Note,
    Noise,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Question => "QUESTION",
            Category::Note => "NOTE",
            Category::Noise => "NOISE",
        }
    }

    /// Whether items with this label ever reach the feed.
    pub fn is_deliverable(&self) -> bool {
        !matches!(self, Category::Noise)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUESTION" => Ok(Category::Question),
            "NOTE" => Ok(Category::Note),
            "NOISE" => Ok(Category::Noise),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// The active feed filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(&self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => *wanted == category,
        }
    }
}

impl std::fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryFilter::All => write!(f, "ALL"),
            CategoryFilter::Only(category) => write!(f, "{}", category),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        s.parse::<Category>().map(CategoryFilter::Only)
    }
}

/// One `{id, type}` record as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A chat message the model kept, with its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub category: Category,
}

impl ClassifiedMessage {
    pub fn new(message: ChatMessage, category: Category) -> Self {
        Self { message, category }
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }
}
