use serde::{Deserialize, Serialize};

/// A timed piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    /// Seconds from the start of the audio.
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Result of one transcription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    /// Audio length in seconds.
    pub duration: f64,
    pub segments: Vec<Segment>,
}

impl Transcript {
    /// Assemble a transcript, deriving the full text from the segments.
    pub fn from_segments(language: impl Into<String>, duration: f64, segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|segment| segment.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            text,
            language: language.into(),
            duration,
            segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_joins_non_empty_segments() {
        let segments = vec![
            Segment { id: 0, start: 0.0, end: 30.0, text: " Hello there.".into(), speaker: None },
            Segment { id: 1, start: 30.0, end: 31.0, text: "  ".into(), speaker: None },
            Segment { id: 2, start: 31.0, end: 40.0, text: "General Kenobi. ".into(), speaker: None },
        ];
        let transcript = Transcript::from_segments("en", 40.0, segments);
        assert_eq!(transcript.text, "Hello there. General Kenobi.");
        assert_eq!(transcript.segments.len(), 3);
    }

    #[test]
    fn test_speaker_is_omitted_when_absent() {
        let segment = Segment { id: 0, start: 0.0, end: 1.0, text: "hi".into(), speaker: None };
        let json = serde_json::to_value(&segment).unwrap();
        assert!(json.get("speaker").is_none());
    }
}
