use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::timeline::{parse_timeline, TimelineEntry};
use super::{truncate_chars, Transcript};
use crate::classifier::{GeminiClient, RetryDelay};
use crate::config::ChatsiftConfig;
use crate::credentials::DynCredentialStore;
use crate::error::{ChatsiftError, ChatsiftResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSection {
    Summary,
    Timeline,
    Notes,
}

impl AnalysisSection {
    pub const ALL: [AnalysisSection; 3] = [
        AnalysisSection::Summary,
        AnalysisSection::Timeline,
        AnalysisSection::Notes,
    ];

    pub fn title(self) -> &'static str {
        match self {
            AnalysisSection::Summary => "Summary",
            AnalysisSection::Timeline => "Timeline",
            AnalysisSection::Notes => "Notes",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            AnalysisSection::Summary => {
                "Summarize this video transcript as a short bulleted list. \
                 Use plain text with '- ' bullets."
            }
            AnalysisSection::Timeline => {
                "Create a timestamped table of contents for this video transcript. \
                 Write one line per topic, formatted exactly as '[MM:SS] - Topic'."
            }
            AnalysisSection::Notes => {
                "Extract the formulas, definitions and key notes from this video \
                 transcript. Use plain text with '- ' bullets."
            }
        }
    }
}

/// Instruction plus the transcript text, cut to `max_input_chars`.
pub fn build_analysis_prompt(section: AnalysisSection, text: &str, max_input_chars: usize) -> String {
    format!(
        "{}\n\nInput:\n{}",
        section.instruction(),
        truncate_chars(text, max_input_chars)
    )
}

/// Each section succeeds or fails on its own.
#[derive(Debug)]
pub struct TranscriptAnalysis {
    pub summary: ChatsiftResult<String>,
    pub timeline: ChatsiftResult<Vec<TimelineEntry>>,
    pub notes: ChatsiftResult<String>,
}

impl TranscriptAnalysis {
    pub fn errors(&self) -> Vec<(AnalysisSection, &ChatsiftError)> {
        let mut errors = Vec::new();
        if let Err(e) = &self.summary {
            errors.push((AnalysisSection::Summary, e));
        }
        if let Err(e) = &self.timeline {
            errors.push((AnalysisSection::Timeline, e));
        }
        if let Err(e) = &self.notes {
            errors.push((AnalysisSection::Notes, e));
        }
        errors
    }

    pub fn all_failed(&self) -> bool {
        self.errors().len() == AnalysisSection::ALL.len()
    }
}

pub struct TranscriptAnalyzer {
    client: GeminiClient,
    max_input_chars: usize,
}

impl TranscriptAnalyzer {
    pub fn new(config: &ChatsiftConfig, credentials: DynCredentialStore) -> ChatsiftResult<Self> {
        let client = GeminiClient::new(&config.classifier, config.analysis.model.clone(), credentials)?;
        Ok(Self {
            client,
            max_input_chars: config.analysis.max_input_chars,
        })
    }

    /// Replaces the backoff clock.
    pub fn with_delay(mut self, delay: Arc<dyn RetryDelay>) -> Self {
        self.client = self.client.with_delay(delay);
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Runs the three sections concurrently. Fails outright only for an empty
    /// transcript or a missing key; otherwise per-section errors are kept.
    pub async fn analyze(&self, transcript: &Transcript) -> ChatsiftResult<TranscriptAnalysis> {
        if transcript.is_empty() {
            return Err(ChatsiftError::EmptyTranscript(
                "no transcript lines found".to_string(),
            ));
        }
        self.client.credential()?;

        let text = transcript.render();
        let chars = text.chars().count();
        if chars > self.max_input_chars {
            warn!(
                chars,
                limit = self.max_input_chars,
                "Transcript is longer than the input budget, analysing the beginning only"
            );
        }

        let (summary, timeline, notes) = tokio::join!(
            self.section(AnalysisSection::Summary, &text),
            self.section(AnalysisSection::Timeline, &text),
            self.section(AnalysisSection::Notes, &text),
        );

        let timeline = timeline.and_then(|raw| {
            let entries = parse_timeline(&raw);
            if entries.is_empty() {
                Err(ChatsiftError::ApiParseError(
                    "timeline has no '[MM:SS] - Topic' lines".to_string(),
                ))
            } else {
                Ok(entries)
            }
        });

        let analysis = TranscriptAnalysis {
            summary,
            timeline,
            notes,
        };
        info!(
            segments = transcript.len(),
            failed = analysis.errors().len(),
            "Analysed transcript"
        );
        Ok(analysis)
    }

    pub async fn section(&self, section: AnalysisSection, text: &str) -> ChatsiftResult<String> {
        let prompt = build_analysis_prompt(section, text, self.max_input_chars);
        self.client.generate(&prompt).await.map(|t| t.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_truncates_input() {
        let text = "x".repeat(100);
        let prompt = build_analysis_prompt(AnalysisSection::Timeline, &text, 10);

        let (instruction, input) = prompt.split_once("\n\nInput:\n").unwrap();
        assert!(instruction.contains("[MM:SS] - Topic"));
        assert_eq!(input, "x".repeat(10));
    }

    #[test]
    fn test_errors_by_section() {
        let analysis = TranscriptAnalysis {
            summary: Ok("- short".to_string()),
            timeline: Err(ChatsiftError::EmptyResponse),
            notes: Err(ChatsiftError::ApiTimeout(30)),
        };

        let sections: Vec<_> = analysis.errors().iter().map(|(s, _)| *s).collect();
        assert_eq!(sections, vec![AnalysisSection::Timeline, AnalysisSection::Notes]);
        assert!(!analysis.all_failed());
    }
}
