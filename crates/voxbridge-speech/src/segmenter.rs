//! Per-speaker utterance segmentation.
//!
//! One segmenter task runs per (session, speaker). It consumes the
//! speaker's inbound PCM frame queue, classifies frames with the
//! [`VoiceClassifier`], cuts utterances on trailing silence (or the hard
//! length cap), and drives one streaming recognition exchange per
//! utterance:
//!
//! ```text
//!   idle ──voice ≥ min_speech──► speaking ──silence──► trailing_silence
//!    ▲                              ▲                        │
//!    │                              └──────voice─────────────┤
//!    └────────── finalize (silence ≥ threshold │ length cap) ┘
//! ```
//!
//! Finalization closes the recognition stream, awaits the final transcript
//! under the STT timeout, and emits one `Finalized` event — or a
//! `RecognitionFailed` event when the provider gives up. Empty transcripts
//! are dropped without downstream publication.
//!
//! Mute discards inbound frames, abandons any in-progress utterance, and
//! resets the classifier. A closed frame queue (disconnect) behaves like a
//! permanent mute: the active utterance is discarded and the task exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use voxbridge_core::{
    CallSettings, Language, SegmenterEvent, SessionId, SpeakerOutput, UserId,
    metrics as metric_names,
};

use crate::adapter::{RecognitionStream, SpeechAdapter};
use crate::vad::VoiceClassifier;

/// Segmentation state for one speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    /// Awaiting voice.
    Idle,

    /// Accumulating an utterance; voice frames keep arriving.
    Speaking,

    /// Voice energy dropped; the silence timer is running. Any voice frame
    /// returns to `Speaking`.
    TrailingSilence,
}

struct ActiveUtterance {
    stream: RecognitionStream,
    /// Start of speech, ms from call start.
    started_ms: u64,
    /// Audio fed into this utterance so far, ms.
    audio_ms: u64,
    /// Current run of trailing silence, ms.
    silence_ms: u64,
}

/// One speaker's segmentation task.
pub struct Segmenter {
    session: SessionId,
    speaker: UserId,
    language: Language,
    settings: CallSettings,
    adapter: Arc<dyn SpeechAdapter>,
    frames: mpsc::Receiver<Bytes>,
    muted: watch::Receiver<bool>,
    out: mpsc::Sender<SpeakerOutput>,
}

impl Segmenter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SessionId,
        speaker: UserId,
        language: Language,
        settings: CallSettings,
        adapter: Arc<dyn SpeechAdapter>,
        frames: mpsc::Receiver<Bytes>,
        muted: watch::Receiver<bool>,
        out: mpsc::Sender<SpeakerOutput>,
    ) -> Self {
        Self {
            session,
            speaker,
            language,
            settings,
            adapter,
            frames,
            muted,
            out,
        }
    }

    /// Spawn the segmentation task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the segmentation loop until the frame queue closes.
    pub async fn run(self) {
        let Self {
            session,
            speaker,
            language,
            settings,
            adapter,
            mut frames,
            muted,
            out,
        } = self;

        let mut classifier = VoiceClassifier::new(settings.vad_window_ms, settings.rms_threshold);
        let mut state = SegmenterState::Idle;
        let mut active: Option<ActiveUtterance> = None;
        // Voiced frames buffered in `idle` until min_speech_ms is reached,
        // so speech onsets are never clipped off the utterance.
        let mut pending: Vec<Bytes> = Vec::new();
        let mut pending_ms: u64 = 0;
        // Audio-time clock: ms of capture received since the task started.
        let mut clock_ms: u64 = 0;

        debug!(session = %session, speaker = %speaker, "segmenter started");

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        // Disconnect: behave like a permanent mute — the
                        // active utterance is discarded, nothing published.
                        debug!(session = %session, speaker = %speaker, "frame queue closed");
                        break;
                    };

                    let frame_ms = (frame.len() / 32) as u64; // s16le @ 16 kHz

                    let is_muted = *muted.borrow();
                    if is_muted {
                        counter!(metric_names::FRAMES_DROPPED, "cause" => "muted").increment(1);
                        if active.take().is_some() {
                            debug!(session = %session, speaker = %speaker, "mute cancelled active utterance");
                        }
                        pending.clear();
                        pending_ms = 0;
                        classifier.reset();
                        state = SegmenterState::Idle;
                        clock_ms += frame_ms;
                        continue;
                    }

                    counter!(metric_names::FRAMES_IN).increment(1);

                    let samples: Vec<i16> = frame
                        .chunks_exact(2)
                        .map(|c| i16::from_le_bytes([c[0], c[1]]))
                        .collect();
                    let is_voice = classifier.push_frame(&samples);
                    clock_ms += frame_ms;

                    match state {
                        SegmenterState::Idle => {
                            if is_voice {
                                pending.push(frame);
                                pending_ms += frame_ms;
                                if pending_ms >= settings.min_speech_ms {
                                    match adapter.start_recognition(language) {
                                        Ok(stream) => {
                                            let mut utt = ActiveUtterance {
                                                stream,
                                                started_ms: clock_ms - pending_ms,
                                                audio_ms: pending_ms,
                                                silence_ms: 0,
                                            };
                                            let mut ok = true;
                                            for f in pending.drain(..) {
                                                if utt.stream.push(f).await.is_err() {
                                                    ok = false;
                                                    break;
                                                }
                                            }
                                            pending_ms = 0;
                                            if ok {
                                                active = Some(utt);
                                                state = SegmenterState::Speaking;
                                            } else if !emit_recognition_failed(
                                                &out, &speaker, "recognition stream rejected audio",
                                            ).await {
                                                return;
                                            }
                                        }
                                        Err(e) => {
                                            warn!(session = %session, speaker = %speaker, error = %e,
                                                  "failed to open recognition stream");
                                            pending.clear();
                                            pending_ms = 0;
                                            if !emit_recognition_failed(&out, &speaker, &e.to_string()).await {
                                                return;
                                            }
                                        }
                                    }
                                }
                            } else {
                                // Silence before min_speech: not an onset after all.
                                pending.clear();
                                pending_ms = 0;
                            }
                        }

                        SegmenterState::Speaking | SegmenterState::TrailingSilence => {
                            let Some(utt) = active.as_mut() else {
                                state = SegmenterState::Idle;
                                continue;
                            };

                            if utt.stream.push(frame).await.is_err() {
                                active = None;
                                state = SegmenterState::Idle;
                                if !emit_recognition_failed(
                                    &out, &speaker, "recognition stream closed mid-utterance",
                                ).await {
                                    return;
                                }
                                continue;
                            }
                            utt.audio_ms += frame_ms;

                            if is_voice {
                                utt.silence_ms = 0;
                                state = SegmenterState::Speaking;
                            } else {
                                utt.silence_ms += frame_ms;
                                if state == SegmenterState::Speaking {
                                    state = SegmenterState::TrailingSilence;
                                }
                            }

                            let length_capped = utt.audio_ms >= settings.max_utterance_ms;
                            let silence_done = state == SegmenterState::TrailingSilence
                                && utt.silence_ms >= settings.silence_threshold_ms;

                            if length_capped || silence_done {
                                let utt = active.take().expect("checked above");
                                state = SegmenterState::Idle;
                                if !finalize(utt, &settings, language, &session, &speaker, &out).await {
                                    return;
                                }
                                // A new utterance starts immediately: the
                                // classifier window is retained, so voice in
                                // the very next frame re-opens in one step.
                            }
                        }
                    }
                }

                update = next_update(&mut active) => {
                    match update {
                        Some(u) if !u.text.trim().is_empty() => {
                            // Interim partial (a stray early final is treated
                            // the same way — display text either way).
                            if out
                                .send(SpeakerOutput {
                                    speaker: speaker.clone(),
                                    event: SegmenterEvent::Interim { text: u.text },
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => {
                            // Provider abandoned the stream mid-utterance.
                            active = None;
                            state = SegmenterState::Idle;
                            if !emit_recognition_failed(
                                &out, &speaker, "recognition stream closed mid-utterance",
                            ).await {
                                return;
                            }
                        }
                    }
                }
            }
        }

        debug!(session = %session, speaker = %speaker, "segmenter stopped");
    }
}

/// Await the next recognition update, or park forever when no utterance is
/// active (the frame arm of the select wakes us up).
async fn next_update(
    active: &mut Option<ActiveUtterance>,
) -> Option<crate::adapter::RecognitionUpdate> {
    match active {
        Some(utt) => utt.stream.next_update().await,
        None => std::future::pending().await,
    }
}

/// Close the stream, await the final transcript, publish the outcome.
///
/// Returns `false` when the event channel is gone and the task should exit.
async fn finalize(
    mut utt: ActiveUtterance,
    settings: &CallSettings,
    language: Language,
    session: &SessionId,
    speaker: &UserId,
    out: &mpsc::Sender<SpeakerOutput>,
) -> bool {
    utt.stream.finish();

    enum Drain {
        Final(String),
        Closed,
        ChannelGone,
    }

    let started = Instant::now();
    let timeout = Duration::from_millis(settings.stt_final_timeout_ms);
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match utt.stream.next_update().await {
                Some(u) if u.is_final => return Drain::Final(u.text),
                Some(u) => {
                    // Partials still surface while the provider finalizes;
                    // forward them so listeners never miss a caption.
                    if u.text.trim().is_empty() {
                        continue;
                    }
                    let sent = out
                        .send(SpeakerOutput {
                            speaker: speaker.clone(),
                            event: SegmenterEvent::Interim { text: u.text },
                        })
                        .await;
                    if sent.is_err() {
                        return Drain::ChannelGone;
                    }
                }
                None => return Drain::Closed,
            }
        }
    })
    .await;
    histogram!(metric_names::ADAPTER_LATENCY_SECONDS, "stage" => "recognition")
        .record(started.elapsed().as_secs_f64());

    let ended_ms = utt.started_ms + utt.audio_ms.saturating_sub(utt.silence_ms);
    let event = match outcome {
        Ok(Drain::ChannelGone) => return false,
        Ok(Drain::Final(text)) if !text.trim().is_empty() => {
            counter!(metric_names::UTTERANCES_FINALIZED).increment(1);
            debug!(session = %session, speaker = %speaker,
                   span_ms = utt.audio_ms, "utterance finalized");
            SegmenterEvent::Finalized {
                text,
                language,
                started_ms: utt.started_ms,
                ended_ms,
            }
        }
        Ok(Drain::Final(_)) => {
            // Whitespace-only transcript: no downstream publication.
            debug!(session = %session, speaker = %speaker, "empty transcript dropped");
            return true;
        }
        Ok(Drain::Closed) => {
            warn!(session = %session, speaker = %speaker, "recognition closed without a final result");
            SegmenterEvent::RecognitionFailed {
                reason: "recognition stream closed without a final result".to_string(),
            }
        }
        Err(_) => {
            warn!(session = %session, speaker = %speaker, "recognition finalization timed out");
            SegmenterEvent::RecognitionFailed {
                reason: "recognition finalization timed out".to_string(),
            }
        }
    };

    out.send(SpeakerOutput {
        speaker: speaker.clone(),
        event,
    })
    .await
    .is_ok()
}

async fn emit_recognition_failed(
    out: &mpsc::Sender<SpeakerOutput>,
    speaker: &UserId,
    reason: &str,
) -> bool {
    out.send(SpeakerOutput {
        speaker: speaker.clone(),
        event: SegmenterEvent::RecognitionFailed {
            reason: reason.to_string(),
        },
    })
    .await
    .is_ok()
}
