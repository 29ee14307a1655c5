//! REST handlers: health and call setup.
//!
//! The WebSocket channel itself lives in [`crate::call_ws`].

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use voxbridge_core::call::{MAX_PARTICIPANTS, MIN_PARTICIPANTS};
use voxbridge_core::{CallSession, Language, Participant, SessionId, UserId, VoiceId};

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/health` response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Live call hubs right now.
    pub active_sessions: usize,
}

/// `GET /api/health` — liveness plus a cheap capacity signal.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.hub.active_sessions(),
    })
}

/// One invited participant in a call-creation request.
#[derive(Debug, Deserialize)]
pub struct CreateParticipant {
    pub user_id: String,
    pub language: Language,
    /// Cloned-voice handle; omitted means the language default voice.
    pub voice: Option<String>,
}

/// `POST /api/calls` request body. The first participant is the caller;
/// their language becomes the call language.
#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub participants: Vec<CreateParticipant>,
}

/// Issued connection credential for one participant.
#[derive(Debug, Serialize)]
pub struct IssuedCredential {
    pub user_id: UserId,
    pub token: String,
}

/// `POST /api/calls` response body.
#[derive(Debug, Serialize)]
pub struct CreateCallResponse {
    pub session_id: SessionId,
    pub participants: Vec<IssuedCredential>,
}

/// `POST /api/calls` — create a session and issue per-participant tokens.
///
/// Call setup proper (contact checks, push notifications) belongs to the
/// external collaborators; this endpoint drives the in-memory directory so
/// the server is usable end to end.
pub async fn create_call(
    State(state): State<AppState>,
    Json(request): Json<CreateCallRequest>,
) -> Result<Json<CreateCallResponse>, HttpError> {
    let count = request.participants.len();
    let max = state.settings.max_participants.min(MAX_PARTICIPANTS);
    if !(MIN_PARTICIPANTS..=max).contains(&count) {
        return Err(HttpError::BadRequest(format!(
            "a call takes {MIN_PARTICIPANTS}-{max} participants, got {count}"
        )));
    }

    if state.hub.active_sessions() >= state.settings.max_sessions {
        return Err(HttpError::ServiceUnavailable(
            "maximum concurrent sessions reached".to_string(),
        ));
    }

    let participants: Vec<Participant> = request
        .participants
        .iter()
        .map(|p| {
            Participant::new(
                p.user_id.as_str(),
                p.language,
                p.voice.clone().map(VoiceId::new),
            )
        })
        .collect();

    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    let mut session = CallSession::new(session_id.clone(), participants)
        .map_err(|e| HttpError::BadRequest(e.to_string()))?;
    // Creation implies the callees are being notified.
    session
        .mark_ringing()
        .map_err(|e| HttpError::Internal(e.to_string()))?;

    let credentials = state.directory.register(session).await;

    Ok(Json(CreateCallResponse {
        session_id,
        participants: credentials
            .into_iter()
            .map(|(user_id, token)| IssuedCredential { user_id, token })
            .collect(),
    }))
}
