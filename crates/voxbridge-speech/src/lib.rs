//! Speech pipeline for voxbridge — the adapter seam over external STT/MT/
//! TTS providers, the bounded TTS cache, per-speaker utterance
//! segmentation, and per-session translation routing.
//!
//! The WebSocket orchestrator (`voxbridge-axum`) owns the channels; this
//! crate owns everything between "PCM frames in" and "routed translation
//! events out".

#![deny(unused_crate_dependencies)]

pub mod adapter;
pub mod cache;
pub mod error;
pub mod mock;
pub mod router;
pub mod segmenter;
pub mod vad;

// Re-export key types for convenience
pub use adapter::{RecognitionBackend, RecognitionStream, RecognitionUpdate, SpeechAdapter};
pub use cache::TtsCache;
pub use error::SpeechError;
pub use mock::MockSpeechAdapter;
pub use router::TranslationRouter;
pub use segmenter::Segmenter;
pub use vad::VoiceClassifier;
