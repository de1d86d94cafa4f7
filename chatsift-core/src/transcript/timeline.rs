use serde::{Deserialize, Serialize};

/// One table-of-contents line with its seek offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: String,
    pub seconds: u64,
    pub topic: String,
}

impl TimelineEntry {
    /// `video_url` positioned at this entry.
    pub fn seek_url(&self, video_url: &str) -> String {
        let separator = if video_url.contains('?') { '&' } else { '?' };
        format!("{}{}t={}s", video_url, separator, self.seconds)
    }
}

/// Seconds for `M:SS`, `MM:SS` or `H:MM:SS`.
pub fn parse_timestamp(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let width_ok = if i == 0 {
            (1..=2).contains(&part.len())
        } else {
            part.len() == 2
        };
        if !width_ok || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        values.push(part.parse::<u64>().ok()?);
    }

    match values[..] {
        [m, s] => Some(m * 60 + s),
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

pub fn format_timestamp(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Pulls `[MM:SS] - Topic` entries out of model text. Lines without a
/// bracketed timestamp are skipped, as is any bullet or emphasis before it.
pub fn parse_timeline(text: &str) -> Vec<TimelineEntry> {
    text.lines().filter_map(parse_timeline_line).collect()
}

fn parse_timeline_line(line: &str) -> Option<TimelineEntry> {
    let mut search = line;
    while let Some(open) = search.find('[') {
        let after_open = &search[open + 1..];
        let close = after_open.find(']')?;
        let inner = after_open[..close].trim();

        if let Some(seconds) = parse_timestamp(inner) {
            let topic = after_open[close + 1..]
                .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | ':' | '*'))
                .trim_end_matches(|c: char| c.is_whitespace() || c == '*')
                .to_string();
            if topic.is_empty() {
                return None;
            }
            return Some(TimelineEntry {
                timestamp: inner.to_string(),
                seconds,
                topic,
            });
        }
        search = &after_open[close + 1..];
    }
    None
}
