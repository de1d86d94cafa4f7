use anyhow::{Context, Result};
use chatsift_core::{
    format_timestamp, parse_timestamp, AnalysisSection, ChatsiftConfig, FileCredentialStore,
    TimelineEntry, Transcript, TranscriptAnalysis, TranscriptAnalyzer,
};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::classify::read_input;
use super::OutputFormat;

#[derive(Debug, Serialize)]
pub struct TimelineRow {
    pub timestamp: String,
    pub seconds: u64,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SectionError {
    pub section: AnalysisSection,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub segments: usize,
    pub summary: Option<String>,
    pub timeline: Option<Vec<TimelineRow>>,
    pub notes: Option<String>,
    pub errors: Vec<SectionError>,
}

impl AnalysisReport {
    pub fn new(
        transcript: &Transcript,
        analysis: &TranscriptAnalysis,
        video_url: Option<&str>,
    ) -> Self {
        let timeline = analysis.timeline.as_ref().ok().map(|entries| {
            entries
                .iter()
                .map(|entry| timeline_row(entry, video_url))
                .collect()
        });

        Self {
            segments: transcript.len(),
            summary: analysis.summary.as_ref().ok().cloned(),
            timeline,
            notes: analysis.notes.as_ref().ok().cloned(),
            errors: analysis
                .errors()
                .into_iter()
                .map(|(section, err)| SectionError {
                    section,
                    code: err.error_code(),
                    message: err.to_string(),
                })
                .collect(),
        }
    }
}

fn timeline_row(entry: &TimelineEntry, video_url: Option<&str>) -> TimelineRow {
    TimelineRow {
        timestamp: entry.timestamp.clone(),
        seconds: entry.seconds,
        topic: entry.topic.clone(),
        seek_url: video_url.map(|url| entry.seek_url(url)),
    }
}

/// Latest timestamp in the transcript, normalised.
fn transcript_span(transcript: &Transcript) -> Option<String> {
    transcript
        .segments
        .iter()
        .filter_map(|s| s.timestamp.as_deref().and_then(parse_timestamp))
        .max()
        .map(format_timestamp)
}

pub async fn cmd_analyze(
    config: ChatsiftConfig,
    input: &Path,
    video_url: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let raw = read_input(input)?;
    let transcript = Transcript::parse(&raw);

    let credentials = Arc::new(
        FileCredentialStore::open_default()
            .context("Failed to open settings")?
            .with_env_fallback(),
    );
    let analyzer = TranscriptAnalyzer::new(&config, credentials)?;
    let analysis = analyzer.analyze(&transcript).await?;

    if analysis.all_failed() {
        if let Err(e) = analysis.summary {
            return Err(e.into());
        }
    }

    let report = AnalysisReport::new(&transcript, &analysis, video_url.as_deref());
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            print_report(&report, transcript_span(&transcript), analyzer.model())
        }
    }

    Ok(())
}

fn print_report(report: &AnalysisReport, span: Option<String>, model: &str) {
    let failed = |section: AnalysisSection| {
        report
            .errors
            .iter()
            .find(|e| e.section == section)
            .map(|e| format!("{} {}", "✗".red().bold(), e.message))
    };

    println!("{}", AnalysisSection::Summary.title().cyan().bold());
    match (&report.summary, failed(AnalysisSection::Summary)) {
        (Some(summary), _) => println!("{}", summary),
        (None, Some(error)) => println!("  {}", error),
        (None, None) => {}
    }
    println!();

    println!("{}", AnalysisSection::Timeline.title().cyan().bold());
    match (&report.timeline, failed(AnalysisSection::Timeline)) {
        (Some(rows), _) => println!("{}", timeline_table(rows)),
        (None, Some(error)) => println!("  {}", error),
        (None, None) => {}
    }
    println!();

    println!("{}", AnalysisSection::Notes.title().cyan().bold());
    match (&report.notes, failed(AnalysisSection::Notes)) {
        (Some(notes), _) => println!("{}", notes),
        (None, Some(error)) => println!("  {}", error),
        (None, None) => {}
    }
    println!();

    let span = span.map(|s| format!(" up to {}", s)).unwrap_or_default();
    println!(
        "  {} {} segments{} analysed with {}",
        "✓".green().bold(),
        report.segments,
        span,
        model
    );
}

fn timeline_table(rows: &[TimelineRow]) -> Table {
    let with_links = rows.iter().any(|r| r.seek_url.is_some());

    let mut header = vec![
        Cell::new("Time").fg(comfy_table::Color::Cyan),
        Cell::new("Topic").fg(comfy_table::Color::Cyan),
    ];
    if with_links {
        header.push(Cell::new("Seek").fg(comfy_table::Color::Cyan));
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);

    for row in rows {
        let mut cells = vec![Cell::new(&row.timestamp), Cell::new(&row.topic)];
        if let Some(url) = &row.seek_url {
            cells.push(Cell::new(url));
        }
        table.add_row(cells);
    }
    table
}
