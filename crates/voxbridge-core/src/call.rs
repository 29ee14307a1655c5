//! Call-session aggregate — participants, lifecycle, and its invariants.
//!
//! The aggregate is mutated only by the orchestrator's control path (one
//! writer per session); everything else sees immutable snapshots. Lifecycle:
//!
//! ```text
//!   Initiating → Ringing → Ongoing → Ended
//!                  │                   ▲
//!                  └───────────────────┘  (callee never picks up)
//! ```
//!
//! `Ended` is absorbing: no transition leaves it, and `ended_at` is written
//! exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId, VoiceId};
use crate::language::Language;

/// Hard participant bounds. The configurable per-deployment maximum
/// (`CallSettings::max_participants`) may only tighten these.
pub const MIN_PARTICIPANTS: usize = 2;
pub const MAX_PARTICIPANTS: usize = 4;

/// Call lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Call created, callees not yet notified.
    Initiating,

    /// Callees notified, nobody connected yet.
    Ringing,

    /// At least one participant has connected.
    Ongoing,

    /// Terminal. Absorbing.
    Ended,
}

/// Per-participant connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// In the participant set, no active channel yet.
    Connecting,

    /// Active channel attached.
    Connected,

    /// Graceful departure in progress.
    Leaving,

    /// Departed; will not return on this call.
    Gone,
}

/// One call participant.
///
/// Spoken language is immutable for the call's duration; listening language
/// equals spoken language (single-language-per-user rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque user identity.
    pub user_id: UserId,

    /// Spoken (and listening) language.
    pub language: Language,

    /// Cloned-voice handle, if the user has one. `None` means the
    /// per-language default voice is used for dubbing.
    pub voice: Option<VoiceId>,

    /// Participant-controlled mute flag.
    pub muted: bool,

    /// Connection lifecycle state.
    pub connection: ConnectionState,
}

impl Participant {
    /// Create a participant in the `Connecting` state.
    pub fn new(user_id: impl Into<UserId>, language: Language, voice: Option<VoiceId>) -> Self {
        Self {
            user_id: user_id.into(),
            language,
            voice,
            muted: false,
            connection: ConnectionState::Connecting,
        }
    }

    /// Voice used when dubbing for this participant.
    #[must_use]
    pub fn effective_voice(&self) -> VoiceId {
        self.voice
            .clone()
            .unwrap_or_else(|| self.language.default_voice())
    }
}

/// Immutable per-listener view handed to the translation router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub user_id: UserId,
    pub language: Language,
    pub voice: VoiceId,
}

/// Errors raised by aggregate mutations.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Participant set outside the 2–4 bound.
    #[error("call must have {MIN_PARTICIPANTS}–{MAX_PARTICIPANTS} participants, got {0}")]
    ParticipantCount(usize),

    /// The user is not in this call's participant set.
    #[error("user {0} is not a participant of this call")]
    UnknownParticipant(UserId),

    /// The call is terminal; no further mutation is accepted.
    #[error("call has ended")]
    SessionEnded,
}

/// The per-call aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    id: SessionId,
    /// The caller's spoken language at start time. Immutable.
    call_language: Language,
    participants: Vec<Participant>,
    state: CallState,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Create a new call in `Initiating` with the given participant set.
    ///
    /// The first participant is the caller; `call_language` is fixed to
    /// their spoken language for the lifetime of the call.
    pub fn new(id: SessionId, participants: Vec<Participant>) -> Result<Self, CallError> {
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&participants.len()) {
            return Err(CallError::ParticipantCount(participants.len()));
        }
        let call_language = participants[0].language;
        Ok(Self {
            id,
            call_language,
            participants,
            state: CallState::Initiating,
            started_at: Utc::now(),
            ended_at: None,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub const fn call_language(&self) -> Language {
        self.call_language
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.state, CallState::Ended)
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.connection == ConnectionState::Connected)
            .count()
    }

    /// Callees have been notified.
    pub fn mark_ringing(&mut self) -> Result<(), CallError> {
        if self.is_terminal() {
            return Err(CallError::SessionEnded);
        }
        if self.state == CallState::Initiating {
            self.state = CallState::Ringing;
        }
        Ok(())
    }

    /// A channel for `user` was admitted. The first admission flips the
    /// call to `Ongoing`.
    pub fn mark_connected(&mut self, user: &UserId) -> Result<(), CallError> {
        if self.is_terminal() {
            return Err(CallError::SessionEnded);
        }
        let p = self.participant_mut(user)?;
        p.connection = ConnectionState::Connected;
        if matches!(self.state, CallState::Initiating | CallState::Ringing) {
            self.state = CallState::Ongoing;
        }
        Ok(())
    }

    /// Update a participant's mute flag. Returns `true` when the flag
    /// actually changed (callers broadcast only on change).
    pub fn set_muted(&mut self, user: &UserId, muted: bool) -> Result<bool, CallError> {
        if self.is_terminal() {
            return Err(CallError::SessionEnded);
        }
        let p = self.participant_mut(user)?;
        let changed = p.muted != muted;
        p.muted = muted;
        Ok(changed)
    }

    /// Graceful departure initiated (`leave` received).
    pub fn mark_leaving(&mut self, user: &UserId) -> Result<(), CallError> {
        if self.is_terminal() {
            return Err(CallError::SessionEnded);
        }
        self.participant_mut(user)?.connection = ConnectionState::Leaving;
        Ok(())
    }

    /// Participant departed for good (graceful or abrupt).
    pub fn mark_gone(&mut self, user: &UserId) -> Result<(), CallError> {
        // Permitted on a terminal session: teardown marks stragglers gone.
        self.participant_mut(user)?.connection = ConnectionState::Gone;
        Ok(())
    }

    /// Transition to `Ended`, stamping `ended_at` exactly once.
    ///
    /// Returns the end timestamp; `Err(SessionEnded)` if already terminal.
    pub fn end(&mut self) -> Result<DateTime<Utc>, CallError> {
        if self.is_terminal() {
            return Err(CallError::SessionEnded);
        }
        let ts = Utc::now();
        self.state = CallState::Ended;
        self.ended_at = Some(ts);
        Ok(ts)
    }

    /// Wall-clock duration, available once the call has ended.
    #[must_use]
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }

    /// Connected participants other than `speaker` — the fan-out set for
    /// one utterance.
    pub fn listeners_of<'a>(
        &'a self,
        speaker: &'a UserId,
    ) -> impl Iterator<Item = &'a Participant> {
        self.participants
            .iter()
            .filter(move |p| p.connection == ConnectionState::Connected && &p.user_id != speaker)
    }

    /// Snapshot of all connected participants for the router's watch channel.
    #[must_use]
    pub fn listener_snapshot(&self) -> Vec<ListenerInfo> {
        self.participants
            .iter()
            .filter(|p| p.connection == ConnectionState::Connected)
            .map(|p| ListenerInfo {
                user_id: p.user_id.clone(),
                language: p.language,
                voice: p.effective_voice(),
            })
            .collect()
    }

    fn participant_mut(&mut self, user: &UserId) -> Result<&mut Participant, CallError> {
        self.participants
            .iter_mut()
            .find(|p| &p.user_id == user)
            .ok_or_else(|| CallError::UnknownParticipant(user.clone()))
    }
}
