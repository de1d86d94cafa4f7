#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::assertions_on_constants,
    clippy::type_complexity,
    clippy::len_zero
)]

pub mod batcher;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod transcript;
pub mod watcher;

pub use batcher::Batcher;
pub use classifier::{
    build_prompt, correlate, parse_records, strip_code_fences, Classifier, DynClassifier,
    GeminiClassifier, GeminiClient, RecordingDelay, RetryDelay, TokioDelay,
};
pub use config::{
    ensure_config_dir, get_config_dir, get_config_paths, AnalysisConfig, BatcherConfig,
    ChatSelectors, ChatsiftConfig, ClassifierConfig, ConfigLoadError, LoggingConfig,
    WatcherConfig,
};
pub use credentials::{
    mask_credential, CredentialStore, DynCredentialStore, FileCredentialStore,
    MemoryCredentialStore,
};
pub use dispatcher::{status_for_error, DispatchStats, Dispatched, Dispatcher};
pub use error::{
    retry_async_with, ChatsiftError, ChatsiftResult, CliErrorDisplay, RetryConfig,
};
pub use feed::{CardRenderer, Feed, FeedEntry};
pub use models::{
    new_message_id, Batch, Category, CategoryFilter, ChatMessage, ClassificationRecord,
    ClassifiedMessage, PipelineEvent, StatusKind, StatusNotice,
};
pub use pipeline::{Pipeline, PipelineHandle, PipelineSnapshot};
pub use transcript::{
    build_analysis_prompt, format_timestamp, parse_timeline, parse_timestamp, AnalysisSection,
    TimelineEntry, Transcript, TranscriptAnalysis, TranscriptAnalyzer, TranscriptSegment,
};
pub use watcher::{
    extract_message, is_symbols_only, ChatDocument, ChatNode, ChatWatcher, ContainerId,
    ContentFilter, DynChatDocument, MemoryDocument, MemoryNode, MutationRecord, MutationStream,
    NodeRef, WatcherEvent, WatcherHandle,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
