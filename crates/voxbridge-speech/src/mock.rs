//! Deterministic mock speech adapter for tests and the demo server.
//!
//! Every operation is a pure function of its inputs plus the scripted
//! transcript queue, so tests can assert exact outputs and the cache laws
//! (one MT per target, one TTS per voice) hold under replay.
//!
//! * **Recognition** — each opened stream pops the next scripted transcript
//!   (or derives `"speech N"` when the script is empty). Interims stream
//!   word-by-word every `interim_every_frames` frames; the final update is
//!   emitted once the frame side closes.
//! * **Translation** — tags the text with the target code:
//!   `"[en] <text>"`.
//! * **Synthesis** — PCM derived from a stable hash of
//!   (text, language, voice); identical keys yield identical bytes.
//!
//! Per-operation failure switches simulate provider outages; call counters
//! let tests count provider traffic through the cache.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use voxbridge_core::{Language, VoiceId};

use crate::adapter::{RecognitionStream, RecognitionUpdate, SpeechAdapter};
use crate::error::SpeechError;

/// Deterministic mock implementation of [`SpeechAdapter`].
pub struct MockSpeechAdapter {
    /// Scripted transcripts, popped per recognition stream.
    scripts: Mutex<VecDeque<String>>,

    /// Emit one interim per this many frames (default 2).
    interim_every_frames: usize,

    fail_recognition: AtomicBool,
    fail_translation: AtomicBool,
    fail_synthesis: AtomicBool,

    recognition_calls: AtomicUsize,
    translate_calls: AtomicUsize,
    synthesize_calls: AtomicUsize,
}

impl Default for MockSpeechAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpeechAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            interim_every_frames: 2,
            fail_recognition: AtomicBool::new(false),
            fail_translation: AtomicBool::new(false),
            fail_synthesis: AtomicBool::new(false),
            recognition_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
            synthesize_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the transcript the next recognition stream will produce.
    pub fn push_transcript(&self, text: impl Into<String>) {
        self.scripts.lock().unwrap().push_back(text.into());
    }

    /// Toggle STT outage: streams opened while set never finalize.
    pub fn set_fail_recognition(&self, fail: bool) {
        self.fail_recognition.store(fail, Ordering::SeqCst);
    }

    /// Toggle MT outage.
    pub fn set_fail_translation(&self, fail: bool) {
        self.fail_translation.store(fail, Ordering::SeqCst);
    }

    /// Toggle TTS outage.
    pub fn set_fail_synthesis(&self, fail: bool) {
        self.fail_synthesis.store(fail, Ordering::SeqCst);
    }

    /// Recognition streams opened so far.
    pub fn recognition_calls(&self) -> usize {
        self.recognition_calls.load(Ordering::SeqCst)
    }

    /// Translate calls issued so far.
    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    /// Synthesize calls issued so far.
    pub fn synthesize_calls(&self) -> usize {
        self.synthesize_calls.load(Ordering::SeqCst)
    }

    /// The deterministic translation this mock produces.
    #[must_use]
    pub fn translation_of(text: &str, target: Language) -> String {
        format!("[{}] {text}", target.code())
    }

    /// The deterministic PCM this mock synthesizes for a cache key.
    #[must_use]
    pub fn pcm_of(text: &str, language: Language, voice: &VoiceId) -> Bytes {
        // 100 ms of samples whose values walk a stable hash of the key.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text
            .bytes()
            .chain(language.code().bytes())
            .chain(voice.as_str().bytes())
        {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        let mut pcm = Vec::with_capacity(3200);
        let mut state = h;
        for _ in 0..1600 {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            #[allow(clippy::cast_possible_truncation)]
            let sample = (state >> 48) as i16;
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Bytes::from(pcm)
    }
}

#[async_trait]
impl SpeechAdapter for MockSpeechAdapter {
    fn start_recognition(&self, _language: Language) -> Result<RecognitionStream, SpeechError> {
        let n = self.recognition_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let transcript = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("speech {n}"));
        let failing = self.fail_recognition.load(Ordering::SeqCst);
        let interim_every = self.interim_every_frames;

        let (stream, mut backend) = RecognitionStream::channel(64);

        tokio::spawn(async move {
            let words: Vec<&str> = transcript.split_whitespace().collect();
            let mut frames_seen = 0usize;
            let mut emitted_words = 0usize;

            while let Some(_frame) = backend.frames.recv().await {
                if failing {
                    // Outage: swallow audio, never produce a result.
                    continue;
                }
                frames_seen += 1;
                if frames_seen % interim_every == 0 && emitted_words < words.len() {
                    emitted_words += 1;
                    let update = RecognitionUpdate {
                        text: words[..emitted_words].join(" "),
                        is_final: false,
                        confidence: 0.5,
                    };
                    if backend.updates.send(update).await.is_err() {
                        return;
                    }
                }
            }

            // Frame side closed: finalize unless the provider is down.
            if !failing {
                let _ = backend
                    .updates
                    .send(RecognitionUpdate {
                        text: transcript,
                        is_final: true,
                        confidence: 0.92,
                    })
                    .await;
            }
            // Dropping `updates` here closes the stream for the caller.
        });

        Ok(stream)
    }

    async fn translate(
        &self,
        text: &str,
        _source: Language,
        target: Language,
        _context: &[String],
    ) -> Result<String, SpeechError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_translation.load(Ordering::SeqCst) {
            return Err(SpeechError::TranslationUnavailable(
                "mock translation outage".to_string(),
            ));
        }
        Ok(Self::translation_of(text, target))
    }

    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceId,
    ) -> Result<Bytes, SpeechError> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesis.load(Ordering::SeqCst) {
            return Err(SpeechError::SynthesisUnavailable(
                "mock synthesis outage".to_string(),
            ));
        }
        Ok(Self::pcm_of(text, language, voice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_transcript_finalizes_on_finish() {
        let mock = MockSpeechAdapter::new();
        mock.push_transcript("hello world");

        let mut stream = mock.start_recognition(Language::En).unwrap();
        for _ in 0..4 {
            stream.push(Bytes::from(vec![0u8; 3200])).await.unwrap();
        }
        stream.finish();

        let mut last = None;
        while let Some(update) = stream.next_update().await {
            let done = update.is_final;
            last = Some(update);
            if done {
                break;
            }
        }
        let last = last.expect("expected a final update");
        assert!(last.is_final);
        assert_eq!(last.text, "hello world");
    }

    #[tokio::test]
    async fn interims_stream_word_by_word() {
        let mock = MockSpeechAdapter::new();
        mock.push_transcript("one two three");

        let mut stream = mock.start_recognition(Language::En).unwrap();
        for _ in 0..6 {
            stream.push(Bytes::from(vec![0u8; 3200])).await.unwrap();
        }
        stream.finish();

        let mut interims = Vec::new();
        while let Some(update) = stream.next_update().await {
            if update.is_final {
                break;
            }
            interims.push(update.text);
        }
        assert_eq!(interims, vec!["one", "one two", "one two three"]);
    }

    #[tokio::test]
    async fn failing_recognition_never_finalizes() {
        let mock = MockSpeechAdapter::new();
        mock.set_fail_recognition(true);

        let mut stream = mock.start_recognition(Language::He).unwrap();
        stream.push(Bytes::from(vec![0u8; 3200])).await.unwrap();
        stream.finish();
        assert!(stream.next_update().await.is_none());
    }

    #[tokio::test]
    async fn synthesis_is_deterministic_per_key() {
        let mock = MockSpeechAdapter::new();
        let voice = VoiceId::new("en_default");
        let a = mock
            .synthesize("hello", Language::En, &voice)
            .await
            .unwrap();
        let b = mock
            .synthesize("hello", Language::En, &voice)
            .await
            .unwrap();
        assert_eq!(a, b);

        let other = mock
            .synthesize("hello", Language::Ru, &VoiceId::new("ru_default"))
            .await
            .unwrap();
        assert_ne!(a, other);
    }
}
