//! Speech engine adapter seam — engine-agnostic interface over STT/MT/TTS.
//!
//! The pipeline operates on a `dyn SpeechAdapter` so providers can be
//! swapped (or mocked) without touching segmentation or routing logic.
//! Recognition is streaming: the caller opens a [`RecognitionStream`],
//! pushes PCM frames as they arrive, and reads interim
//! [`RecognitionUpdate`]s until the final one terminates the utterance.
//!
//! ## Channel failure handling
//!
//! Both halves of a recognition stream signal shutdown by dropping their
//! channel end. The provider side sees the frame receiver close when the
//! caller calls [`RecognitionStream::finish`] (or drops the stream); the
//! caller sees `next_update() == None` when the provider gives up without
//! producing a final result, which maps to
//! [`SpeechError::RecognitionUnavailable`] upstream.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use voxbridge_core::{Language, VoiceId};

use crate::error::SpeechError;

/// One partial or final recognition result.
#[derive(Debug, Clone)]
pub struct RecognitionUpdate {
    /// Transcript so far (interim) or the finalized transcript.
    pub text: String,

    /// `true` terminates the stream for this utterance.
    pub is_final: bool,

    /// Provider confidence, 0.0–1.0.
    pub confidence: f32,
}

/// Caller half of one streaming recognition exchange.
pub struct RecognitionStream {
    frame_tx: Option<mpsc::Sender<Bytes>>,
    update_rx: mpsc::Receiver<RecognitionUpdate>,
}

/// Provider half of one streaming recognition exchange.
///
/// Adapter implementations consume `frames` and publish into `updates`;
/// dropping `updates` without a final result tells the caller recognition
/// is unavailable for this utterance.
pub struct RecognitionBackend {
    pub frames: mpsc::Receiver<Bytes>,
    pub updates: mpsc::Sender<RecognitionUpdate>,
}

impl RecognitionStream {
    /// Create a connected stream/backend pair.
    ///
    /// `capacity` bounds the in-flight frame buffer; pushes past it apply
    /// back-pressure to the segmenter rather than growing without bound.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, RecognitionBackend) {
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (update_tx, update_rx) = mpsc::channel(capacity);
        (
            Self {
                frame_tx: Some(frame_tx),
                update_rx,
            },
            RecognitionBackend {
                frames: frame_rx,
                updates: update_tx,
            },
        )
    }

    /// Feed one PCM frame (16 kHz mono s16le) to the recognizer.
    pub async fn push(&self, pcm: Bytes) -> Result<(), SpeechError> {
        let tx = self.frame_tx.as_ref().ok_or(SpeechError::ChannelClosed)?;
        tx.send(pcm).await.map_err(|_| SpeechError::ChannelClosed)
    }

    /// Close the audio side. The provider finalizes and emits the last
    /// update; subsequent `push` calls fail.
    pub fn finish(&mut self) {
        self.frame_tx.take();
    }

    /// Await the next interim or final update. `None` means the provider
    /// gave up without finalizing.
    pub async fn next_update(&mut self) -> Option<RecognitionUpdate> {
        self.update_rx.recv().await
    }
}

/// Uniform interface over the external STT/MT/TTS providers.
///
/// Implementations must be cheap to share (`Arc<dyn SpeechAdapter>`) and
/// may not assume calls arrive from a single task.
#[async_trait]
pub trait SpeechAdapter: Send + Sync {
    /// Open a streaming recognition exchange for one utterance.
    ///
    /// Interim updates arrive at whatever cadence the provider supports
    /// (finals-only providers simply emit no interims).
    fn start_recognition(&self, language: Language) -> Result<RecognitionStream, SpeechError>;

    /// Translate `text` between two supported languages.
    ///
    /// Deterministic for identical inputs within a process run — the
    /// router's memoization and the TTS cache both rely on this.
    /// `context` carries the speaker's recent utterances, oldest first;
    /// providers without context support ignore it.
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
        context: &[String],
    ) -> Result<String, SpeechError>;

    /// Synthesize `text` to 16 kHz mono s16le PCM using `voice`.
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceId,
    ) -> Result<Bytes, SpeechError>;
}
