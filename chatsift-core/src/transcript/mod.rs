//! Video transcript analysis.
//!
//! A transcript is read from `[MM:SS] text` lines, or from the copy-paste
//! layout where each timestamp sits on its own line above its text, and
//! handed to the model three times: once each for a summary, a timestamped
//! table of contents and a list of notes.

mod analyzer;
mod timeline;

pub use analyzer::{build_analysis_prompt, AnalysisSection, TranscriptAnalysis, TranscriptAnalyzer};
pub use timeline::{format_timestamp, parse_timeline, parse_timestamp, TimelineEntry};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub timestamp: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut pending: Option<String> = None;

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some((timestamp, rest)) = split_bracketed_timestamp(line) {
                if rest.is_empty() {
                    pending = Some(timestamp.to_string());
                } else {
                    segments.push(TranscriptSegment {
                        timestamp: Some(timestamp.to_string()),
                        text: rest.to_string(),
                    });
                    pending = None;
                }
                continue;
            }

            if parse_timestamp(line).is_some() {
                pending = Some(line.to_string());
                continue;
            }

            segments.push(TranscriptSegment {
                timestamp: pending.take(),
                text: line.to_string(),
            });
        }

        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// One `[timestamp] text` line per segment.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if let Some(timestamp) = &segment.timestamp {
                out.push('[');
                out.push_str(timestamp);
                out.push_str("] ");
            }
            out.push_str(&segment.text);
            out.push('\n');
        }
        out
    }
}

fn split_bracketed_timestamp(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('[')?;
    let (inner, after) = rest.split_once(']')?;
    parse_timestamp(inner)?;
    Some((inner.trim(), after.trim()))
}

/// `text` cut to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bracketed_lines() {
        let transcript = Transcript::parse(
            "[0:00] welcome back\n[1:05] today: ownership\n\n[1:02:03] wrap up\n",
        );

        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.segments[0].timestamp.as_deref(), Some("0:00"));
        assert_eq!(transcript.segments[1].text, "today: ownership");
        assert_eq!(transcript.segments[2].timestamp.as_deref(), Some("1:02:03"));
    }

    #[test]
    fn test_parse_timestamp_on_its_own_line() {
        let transcript = Transcript::parse("0:00\nwelcome back\n0:12\nlet's start\nno stamp here");

        let stamps: Vec<_> = transcript
            .segments
            .iter()
            .map(|s| s.timestamp.as_deref())
            .collect();
        assert_eq!(stamps, vec![Some("0:00"), Some("0:12"), None]);
    }

    #[test]
    fn test_brackets_without_timestamp_are_text() {
        let transcript = Transcript::parse("[Music]\n[applause] thanks");
        assert_eq!(transcript.len(), 2);
        assert!(transcript.segments.iter().all(|s| s.timestamp.is_none()));
        assert_eq!(transcript.segments[0].text, "[Music]");
    }

    #[test]
    fn test_render_round_trips_layout() {
        let raw = "[0:00] hello\n[0:04] the borrow checker\n";
        assert_eq!(Transcript::parse(raw).render(), raw);
        assert!(Transcript::parse("  \n\n").is_empty());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
