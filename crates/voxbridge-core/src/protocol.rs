//! Wire protocol for the per-participant message channel.
//!
//! One bidirectional WebSocket per participant carries two message modes:
//!
//! * **Binary** — raw PCM frames, 16 kHz mono signed 16-bit little-endian.
//!   Client → server only for capture; server → client binary frames carry
//!   synthesized audio addressed to that listener.
//! * **Text** — JSON objects with a mandatory `type` field, modeled by
//!   [`ClientMessage`] and [`ServerMessage`].
//!
//! Wire format example:
//!
//! ```json
//! { "type": "mute_status_changed", "user_id": "alice", "is_muted": true }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::language::Language;

/// Canonical frame duration the clients send (100 ms at 16 kHz s16le).
pub const CANONICAL_FRAME_BYTES: usize = 3200;

/// Upper bound on a single inbound binary frame.
pub const MAX_FRAME_BYTES: usize = 16_000;

/// PCM sample rate of every audio frame on the wire.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Control verbs a client may send. Anything else on the text channel is a
/// protocol error answered with [`ServerMessage::Error`] and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe; answered with `pong` on the same channel.
    Ping,

    /// Stop contributing audio. Broadcast as `mute_status_changed`.
    Mute,

    /// Resume contributing audio. Broadcast as `mute_status_changed`.
    Unmute,

    /// Graceful departure.
    Leave,
}

/// Messages the server sends on a participant's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `ping`. Never broadcast.
    Pong,

    /// A peer's mute flag changed.
    MuteStatusChanged { user_id: UserId, is_muted: bool },

    /// A peer's channel was admitted.
    ParticipantJoined {
        user_id: UserId,
        joined_at: DateTime<Utc>,
    },

    /// A peer departed (gracefully or not).
    ParticipantLeft {
        user_id: UserId,
        left_at: DateTime<Utc>,
    },

    /// The call reached its terminal state. Last message on the channel.
    CallEnded { reason: String },

    /// Live caption while a peer is still speaking. Superseded by the next
    /// interim or by the final `translation`.
    InterimTranscript {
        speaker_id: UserId,
        text: String,
        language: Language,
        /// Always `false`; kept on the wire so clients switch on one flag.
        is_final: bool,
    },

    /// Final per-listener translation of one utterance. When dubbed audio
    /// exists it follows as a binary frame on the same channel.
    Translation {
        speaker_id: UserId,
        source_text: String,
        translated_text: String,
        source_lang: Language,
        target_lang: Language,
        /// End-of-speech offset, ms from call start.
        timestamp_ms: u64,
        /// Always `true`.
        is_final: bool,
        /// Set when translation was unavailable and `translated_text`
        /// carries the original transcript.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        degraded: bool,
    },

    /// A recoverable failure the client should surface.
    Error { error: String },
}

/// Close reasons used when the server terminates a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Token did not authenticate.
    Unauthenticated,

    /// Authenticated user is not admitted to this session.
    Unauthorized,

    /// No session with that id.
    UnknownSession,

    /// A newer connection for the same (session, user) replaced this one.
    Superseded,

    /// Outbound queue stayed saturated after degradation; listener dropped.
    SlowConsumer,

    /// The call ended.
    CallEnded,
}

impl CloseReason {
    /// Reason string carried in the WebSocket close frame.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::UnknownSession => "unknown_session",
            Self::Superseded => "superseded",
            Self::SlowConsumer => "slow_consumer",
            Self::CallEnded => "call_ended",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
