mod classification;
mod event;
mod message;

pub use classification::{Category, CategoryFilter, ClassificationRecord, ClassifiedMessage};
pub use event::{PipelineEvent, StatusKind, StatusNotice};
pub use message::{new_message_id, Batch, ChatMessage};
