//! Core domain types and port definitions for voxbridge.
//!
//! This crate holds everything the speech pipeline and the WebSocket adapter
//! share: identifiers, the language set, the call-session aggregate, the
//! wire protocol, cross-crate event types, enumerated settings, metric names,
//! and the collaborator ports (session repository, call authorizer).
//!
//! No adapter-specific crates appear here — transport and speech-engine
//! concerns live in `voxbridge-axum` and `voxbridge-speech`.

#![deny(unused_crate_dependencies)]

pub mod call;
pub mod events;
pub mod ids;
pub mod language;
pub mod metrics;
pub mod ports;
pub mod protocol;
pub mod settings;
pub mod utterance;

// Re-export commonly used types for convenience
pub use call::{CallError, CallSession, CallState, ConnectionState, ListenerInfo, Participant};
pub use events::{PipelineStage, RouterEvent, SegmenterEvent, SpeakerOutput};
pub use ids::{SessionId, UserId, VoiceId};
pub use language::Language;
pub use ports::{
    CallAuthorizer, InMemorySessionRepository, RepositoryError, SessionRepository,
    StaticTokenAuthorizer,
};
pub use protocol::{ClientMessage, CloseReason, ServerMessage};
pub use settings::CallSettings;
pub use utterance::{InterimCaption, ListenerResult, Utterance};
