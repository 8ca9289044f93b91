//! # Response Formats
//!
//! Renders a [`Transcript`] into the body of a transcription response.
//!
//! ## Formats:
//! - **JSON family**: `json` (text only), `verbose_json` (everything),
//!   `vtt_json` (everything plus the WebVTT rendering)
//! - **Plain / subtitles**: `text`, `srt`, `vtt`, `aud` (Audacity labels)
//! - **Markdown**: `md_basic`, `md_list`, `md_quote`, `md_table`; these honor
//!   `include_timestamps` and label segments without a speaker as `Unknown`

use crate::transcription::transcript::{Segment, Transcript};
use serde_json::json;
use std::str::FromStr;

const UNKNOWN_SPEAKER: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    VerboseJson,
    VttJson,
    Text,
    Srt,
    Vtt,
    Aud,
    MdBasic,
    MdList,
    MdQuote,
    MdTable,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "verbose_json" => Ok(ResponseFormat::VerboseJson),
            "vtt_json" => Ok(ResponseFormat::VttJson),
            "text" => Ok(ResponseFormat::Text),
            "srt" => Ok(ResponseFormat::Srt),
            "vtt" => Ok(ResponseFormat::Vtt),
            "aud" => Ok(ResponseFormat::Aud),
            "md_basic" => Ok(ResponseFormat::MdBasic),
            "md_list" => Ok(ResponseFormat::MdList),
            "md_quote" => Ok(ResponseFormat::MdQuote),
            "md_table" => Ok(ResponseFormat::MdTable),
            other => Err(format!("Unsupported response format: {}", other)),
        }
    }
}

/// A rendered response body and its media type.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

impl Rendered {
    fn json(value: serde_json::Value) -> Self {
        Self {
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn text(content_type: &'static str, body: String) -> Self {
        Self { content_type, body }
    }
}

impl ResponseFormat {
    pub fn render(&self, transcript: &Transcript, include_timestamps: bool) -> Rendered {
        match self {
            ResponseFormat::Json => Rendered::json(json!({ "text": transcript.text })),
            ResponseFormat::VerboseJson => Rendered::json(json!(transcript)),
            ResponseFormat::VttJson => {
                let mut value = json!(transcript);
                value["vtt_text"] = json!(write_vtt(&transcript.segments));
                Rendered::json(value)
            }
            ResponseFormat::Text => Rendered::text("text/plain", transcript.text.clone()),
            ResponseFormat::Srt => Rendered::text("text/plain", write_srt(&transcript.segments)),
            ResponseFormat::Vtt => Rendered::text("text/vtt", write_vtt(&transcript.segments)),
            ResponseFormat::Aud => Rendered::text("text/plain", write_audacity(&transcript.segments)),
            ResponseFormat::MdBasic => {
                Rendered::text("text/markdown", md_basic(&transcript.segments, include_timestamps))
            }
            ResponseFormat::MdList => {
                Rendered::text("text/markdown", md_list(&transcript.segments, include_timestamps))
            }
            ResponseFormat::MdQuote => {
                Rendered::text("text/markdown", md_quote(&transcript.segments, include_timestamps))
            }
            ResponseFormat::MdTable => {
                Rendered::text("text/markdown", md_table(&transcript.segments, include_timestamps))
            }
        }
    }
}

/// `HH:MM:SS,mmm` / `MM:SS.mmm` style timestamps used by subtitle formats.
fn subtitle_timestamp(seconds: f64, always_include_hours: bool, decimal_marker: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    if always_include_hours || hours > 0 {
        format!("{:02}:{:02}:{:02}{}{:03}", hours, minutes, secs, decimal_marker, millis)
    } else {
        format!("{:02}:{:02}{}{:03}", minutes, secs, decimal_marker, millis)
    }
}

/// `MM:SS`, or `HH:MM:SS` past the first hour.
fn markdown_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

fn subtitle_text(segment: &Segment) -> String {
    let text = segment.text.trim().replace("-->", "->");
    match &segment.speaker {
        Some(speaker) => format!("[{}]: {}", speaker, text),
        None => text,
    }
}

fn write_srt(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                subtitle_timestamp(segment.start, true, ','),
                subtitle_timestamp(segment.end, true, ','),
                subtitle_text(segment)
            )
        })
        .collect()
}

fn write_vtt(segments: &[Segment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            subtitle_timestamp(segment.start, false, '.'),
            subtitle_timestamp(segment.end, false, '.'),
            subtitle_text(segment)
        ));
    }
    out
}

fn write_audacity(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| {
            format!(
                "{:.3}\t{:.3}\t{}\n",
                segment.start,
                segment.end,
                subtitle_text(segment)
            )
        })
        .collect()
}

/// Segments with text, paired with their speaker label.
fn spoken(segments: &[Segment]) -> impl Iterator<Item = (&str, &str, &Segment)> {
    segments.iter().filter_map(|segment| {
        let text = segment.text.trim();
        if text.is_empty() {
            return None;
        }
        let speaker = segment.speaker.as_deref().unwrap_or(UNKNOWN_SPEAKER);
        Some((speaker, text, segment))
    })
}

fn md_basic(segments: &[Segment], include_timestamps: bool) -> String {
    spoken(segments)
        .map(|(speaker, text, segment)| {
            if include_timestamps {
                format!("{} [{}]: {}", speaker, markdown_timestamp(segment.start), text)
            } else {
                format!("{}: {}", speaker, text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn md_list(segments: &[Segment], include_timestamps: bool) -> String {
    spoken(segments)
        .map(|(speaker, text, segment)| {
            if include_timestamps {
                format!("- **{}** [{}]: {}", speaker, markdown_timestamp(segment.start), text)
            } else {
                format!("- **{}**: {}", speaker, text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn md_quote(segments: &[Segment], include_timestamps: bool) -> String {
    spoken(segments)
        .map(|(speaker, text, segment)| {
            if include_timestamps {
                format!("> **{}** [{}]: {}", speaker, markdown_timestamp(segment.start), text)
            } else {
                format!("> **{}**: {}", speaker, text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n>\n")
}

/// Two speakers get one column each; anything else gets a speaker column.
fn md_table(segments: &[Segment], include_timestamps: bool) -> String {
    let mut speakers: Vec<&str> = Vec::new();
    for (speaker, _, _) in spoken(segments) {
        if !speakers.contains(&speaker) {
            speakers.push(speaker);
        }
    }

    let mut lines = Vec::new();
    if let [first, second] = speakers[..] {
        lines.push(format!("| {} | {} |", first, second));
        lines.push("| --- | --- |".to_string());
        for (speaker, text, segment) in spoken(segments) {
            let mut cell = text.replace('|', "\\|");
            if include_timestamps {
                cell = format!("[{}] {}", markdown_timestamp(segment.start), cell);
            }
            if speaker == first {
                lines.push(format!("| {} |  |", cell));
            } else {
                lines.push(format!("|  | {} |", cell));
            }
        }
    } else {
        if include_timestamps {
            lines.push("| Time | Speaker | Message |".to_string());
            lines.push("| --- | --- | --- |".to_string());
        } else {
            lines.push("| Speaker | Message |".to_string());
            lines.push("| --- | --- |".to_string());
        }
        for (speaker, text, segment) in spoken(segments) {
            let text = text.replace('|', "\\|");
            if include_timestamps {
                lines.push(format!(
                    "| {} | {} | {} |",
                    markdown_timestamp(segment.start),
                    speaker,
                    text
                ));
            } else {
                lines.push(format!("| {} | {} |", speaker, text));
            }
        }
    }

    lines.join("\n")
}
