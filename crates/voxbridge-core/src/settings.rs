//! Enumerated process-wide tunables.
//!
//! Every knob the core honors is a named field here — no open-ended config
//! dictionaries cross any boundary. All durations are milliseconds.

use serde::{Deserialize, Serialize};

/// Tunables for segmentation, pipeline timeouts, queues, and session bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    /// RMS energy threshold for the voice classifier (int16 sample scale).
    pub rms_threshold: f32,

    /// Trailing silence that finalizes an utterance.
    pub silence_threshold_ms: u64,

    /// Hard cap on utterance length; reaching it forces finalization and a
    /// new utterance starts immediately.
    pub max_utterance_ms: u64,

    /// Minimum accumulated voice before `idle → speaking`.
    pub min_speech_ms: u64,

    /// Sliding-window length the classifier computes energy over.
    pub vad_window_ms: u64,

    /// Wall-clock bound on STT finalization.
    pub stt_final_timeout_ms: u64,

    /// Wall-clock bound on one translation call.
    pub translate_timeout_ms: u64,

    /// Wall-clock bound on one synthesis call.
    pub synthesize_timeout_ms: u64,

    /// Per-speaker inbound queue bound, in frames (~100 ms each).
    pub inbound_queue_frames: usize,

    /// Per-listener outbound queue bound, in messages.
    pub outbound_queue_messages: usize,

    /// TTS cache capacity, in entries.
    pub tts_cache_capacity: usize,

    /// Maximum participants per session (hard-capped at 4).
    pub max_participants: usize,

    /// Maximum concurrent sessions this process will host.
    pub max_sessions: usize,

    /// How long delivered (speaker, seq) pairs are remembered to suppress
    /// duplicate deliveries.
    pub dedup_ttl_ms: u64,

    /// Rolling finalized-utterance window kept per speaker as optional
    /// translation context.
    pub context_utterances: usize,

    /// Grace period for best-effort `call_ended` delivery during teardown.
    pub teardown_grace_ms: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            rms_threshold: 300.0,
            silence_threshold_ms: 400,
            max_utterance_ms: 5000,
            min_speech_ms: 100,
            vad_window_ms: 400,
            stt_final_timeout_ms: 10_000,
            translate_timeout_ms: 3000,
            synthesize_timeout_ms: 5000,
            inbound_queue_frames: 32,
            outbound_queue_messages: 64,
            tts_cache_capacity: 256,
            max_participants: 4,
            max_sessions: 256,
            dedup_ttl_ms: 30_000,
            context_utterances: 10,
            teardown_grace_ms: 1000,
        }
    }
}

impl CallSettings {
    /// Classifier window length in samples at the wire sample rate.
    #[must_use]
    pub const fn vad_window_samples(&self) -> usize {
        (self.vad_window_ms as usize) * (crate::protocol::SAMPLE_RATE_HZ as usize) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = CallSettings::default();
        assert!((s.rms_threshold - 300.0).abs() < f32::EPSILON);
        assert_eq!(s.silence_threshold_ms, 400);
        assert_eq!(s.max_utterance_ms, 5000);
        assert_eq!(s.tts_cache_capacity, 256);
        assert_eq!(s.max_participants, 4);
    }

    #[test]
    fn window_samples_at_16khz() {
        let s = CallSettings::default();
        // 400 ms at 16 kHz
        assert_eq!(s.vad_window_samples(), 6400);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let s: CallSettings = serde_json::from_str(r#"{"silence_threshold_ms": 250}"#).unwrap();
        assert_eq!(s.silence_threshold_ms, 250);
        assert_eq!(s.max_utterance_ms, 5000);
    }
}
