//! Internal events crossing the segmenter → router → orchestrator seams.
//!
//! These are in-process types, not wire shapes — the orchestrator maps
//! [`RouterEvent`]s onto [`crate::protocol::ServerMessage`]s per listener.

use crate::ids::UserId;
use crate::language::Language;
use crate::utterance::{InterimCaption, ListenerResult, Utterance};

/// Pipeline stage names used in speaker-facing error events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Recognition,
    Translation,
    Synthesis,
}

impl PipelineStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Translation => "translation",
            Self::Synthesis => "synthesis",
        }
    }
}

/// What a per-speaker segmenter emits.
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// Partial transcript while the speaker is still talking.
    Interim { text: String },

    /// A finalized utterance. The sequence number is stamped later by the
    /// router, so only the raw transcript and time span travel here.
    Finalized {
        text: String,
        language: Language,
        started_ms: u64,
        ended_ms: u64,
    },

    /// STT failed or timed out for the current utterance; it was dropped.
    RecognitionFailed { reason: String },
}

/// A segmenter event tagged with its speaker, as received by the router.
#[derive(Debug, Clone)]
pub struct SpeakerOutput {
    pub speaker: UserId,
    pub event: SegmenterEvent,
}

/// What the translation router emits toward the orchestrator.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// Live caption to fan out to every listener. Best-effort.
    InterimCaption(InterimCaption),

    /// One utterance, fully routed: ordered per (speaker, seq), carrying
    /// the per-listener translation/dubbing outcomes.
    FinalTranslation {
        utterance: Utterance,
        results: Vec<ListenerResult>,
    },

    /// A pipeline failure to report to the speaker only.
    SpeakerError {
        speaker: UserId,
        stage: PipelineStage,
        message: String,
    },
}
