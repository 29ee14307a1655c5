//! Utterance and caption records flowing through the pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};
use crate::language::Language;

/// A finalized speech segment by one speaker.
///
/// `seq` is stamped by the translation router, monotonic per
/// (session, speaker), and drives ordering and deduplication downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub session: SessionId,
    pub speaker: UserId,
    pub seq: u64,
    /// Source language (the speaker's).
    pub language: Language,
    /// Finalized transcript text. Never empty — empty transcripts are
    /// dropped before an `Utterance` is built.
    pub text: String,
    /// Start of speech, ms from call start.
    pub started_ms: u64,
    /// End of speech, ms from call start.
    pub ended_ms: u64,
}

/// Per-listener outcome of routing one utterance.
///
/// Listeners sharing a target language always receive byte-equal `text`
/// (translation is memoized per target). `audio` is absent on passthrough
/// and after a synthesis failure.
#[derive(Debug, Clone)]
pub struct ListenerResult {
    pub listener: UserId,
    pub target_lang: Language,
    pub text: String,
    /// Set when translation was unavailable and `text` carries the
    /// original transcript instead.
    pub degraded: bool,
    /// Synthesized 16 kHz mono s16le PCM, when dubbing succeeded.
    pub audio: Option<Bytes>,
}

/// A non-final transcription fragment for one speaker.
///
/// At most one interim caption is active per (session, speaker); each new
/// one supersedes the previous, as does finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterimCaption {
    pub speaker: UserId,
    pub text: String,
    pub language: Language,
}
