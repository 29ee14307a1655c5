//! Speech pipeline error types.
//!
//! Every failure here is recoverable at utterance granularity — a session is
//! never torn down because an adapter call failed. The enum is `Clone` so
//! the TTS cache can hand one synthesis failure to every single-flight
//! waiter.

use voxbridge_core::PipelineStage;

/// Errors that can occur in the speech pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SpeechError {
    /// STT provider outage or finalization timeout. The current utterance
    /// is dropped; the session continues.
    #[error("speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// MT provider outage or timeout. The original text is surfaced with a
    /// degraded flag instead.
    #[error("translation unavailable: {0}")]
    TranslationUnavailable(String),

    /// TTS provider outage or timeout. The final result goes out text-only.
    #[error("speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// An internal pipeline channel closed mid-operation.
    #[error("pipeline channel closed")]
    ChannelClosed,
}

impl SpeechError {
    /// The pipeline stage this failure belongs to, for error events and
    /// metric labels.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        match self {
            Self::RecognitionUnavailable(_) | Self::ChannelClosed => PipelineStage::Recognition,
            Self::TranslationUnavailable(_) => PipelineStage::Translation,
            Self::SynthesisUnavailable(_) => PipelineStage::Synthesis,
        }
    }
}
