//! Core data model (spec.md §3 "Data model").

use serde::{Deserialize, Serialize};

/// A word clip: `(word, videoId, start, duration)`.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct WordClip {
    pub word: String,
    pub video_id: String,
    pub start: f64,
    pub duration: f64,
}

impl WordClip {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A hit returned by phrase lookup, whether served from the phrase index
/// or recovered via transcript scan fallback.
#[derive(Clone, Debug, PartialEq)]
pub struct PhraseHit {
    pub video_id: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One word of a parsed video transcript: `(text, start, end)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A video's full transcript, sorted by `start` (non-decreasing).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoTranscript {
    pub video_id: String,
    pub words: Vec<TranscriptWord>,
}

impl VideoTranscript {
    pub fn duration(&self) -> f64 {
        self.words.last().map(|w| w.end).unwrap_or(0.0)
    }
}

/// Summary stats exposed by the catalog (spec.md §4.1).
#[derive(Clone, Debug, Serialize)]
pub struct CatalogStats {
    pub words: u64,
    pub videos: u64,
    pub has_transcripts: bool,
    pub has_phrase_index: bool,
}

/// Optional filters applied to both lookup operations (spec.md §4.1).
#[derive(Clone, Debug, Default)]
pub struct LookupFilter {
    pub exclude_videos: Vec<String>,
    pub preferred_channels: Vec<String>,
}

/// One element of the planner's output (spec.md §3 "Segment Pick").
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentPick {
    Clip {
        video_id: String,
        start: f64,
        end: f64,
        text: String,
        word_span: (usize, usize),
    },
    Placeholder {
        text: String,
        word_span: (usize, usize),
    },
}

impl SegmentPick {
    pub fn word_span(&self) -> (usize, usize) {
        match self {
            SegmentPick::Clip { word_span, .. } => *word_span,
            SegmentPick::Placeholder { word_span, .. } => *word_span,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, SegmentPick::Placeholder { .. })
    }

    pub fn text(&self) -> &str {
        match self {
            SegmentPick::Clip { text, .. } => text,
            SegmentPick::Placeholder { text, .. } => text,
        }
    }
}

/// One entry of the word-level timing schedule returned by a completed job
/// (spec.md §4.7/§6).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// Pixel dimensions at the fixed 720-line profile (spec.md §6).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Widescreen => (1280, 720),
            AspectRatio::Portrait => (720, 1280),
            AspectRatio::Square => (720, 720),
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Widescreen
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}
