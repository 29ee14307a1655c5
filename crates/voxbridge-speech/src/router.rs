//! Per-session translation routing.
//!
//! One router task runs per call session, consuming the merged event
//! stream of all that session's segmenters. For every finalized utterance
//! it:
//!
//! 1. stamps a monotonic per-(session, speaker) sequence number;
//! 2. suppresses duplicate deliveries within a TTL window;
//! 3. translates once per target language (memoized across listeners that
//!    share one), passing the speaker's recent utterances as context;
//! 4. synthesizes dubbed audio per (text, language, voice) through the
//!    TTS cache;
//! 5. publishes a single ordered `FinalTranslation` event.
//!
//! Listener membership arrives through a `watch` channel published by the
//! orchestrator — the router never touches the session aggregate. Failure
//! policy: translation outage degrades to the original text (no TTS
//! attempted), synthesis outage degrades to text-only, and recognition
//! failures become speaker-only error events. Nothing here ever tears a
//! session down.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use metrics::{counter, histogram};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use voxbridge_core::{
    CallSettings, InterimCaption, Language, ListenerInfo, ListenerResult, PipelineStage,
    RouterEvent, SegmenterEvent, SessionId, SpeakerOutput, UserId, Utterance,
    metrics as metric_names,
};

use crate::cache::TtsCache;
use crate::adapter::SpeechAdapter;

struct LastFinal {
    seq: u64,
    started_ms: u64,
    ended_ms: u64,
    text: String,
}

/// One session's routing task.
pub struct TranslationRouter {
    session: SessionId,
    settings: CallSettings,
    adapter: Arc<dyn SpeechAdapter>,
    cache: Arc<TtsCache>,
    inputs: mpsc::Receiver<SpeakerOutput>,
    listeners: watch::Receiver<Vec<ListenerInfo>>,
    out: mpsc::Sender<RouterEvent>,
}

impl TranslationRouter {
    pub fn new(
        session: SessionId,
        settings: CallSettings,
        adapter: Arc<dyn SpeechAdapter>,
        cache: Arc<TtsCache>,
        inputs: mpsc::Receiver<SpeakerOutput>,
        listeners: watch::Receiver<Vec<ListenerInfo>>,
        out: mpsc::Sender<RouterEvent>,
    ) -> Self {
        Self {
            session,
            settings,
            adapter,
            cache,
            inputs,
            listeners,
            out,
        }
    }

    /// Spawn the routing task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every segmenter sender is dropped (session teardown).
    pub async fn run(mut self) {
        // Sequence counters, replay fingerprints, delivery dedup, and the
        // rolling translation context — all private to this task.
        let mut seqs: HashMap<UserId, u64> = HashMap::new();
        let mut last_final: HashMap<UserId, LastFinal> = HashMap::new();
        let mut delivered: HashMap<(UserId, u64), Instant> = HashMap::new();
        let mut context: HashMap<UserId, VecDeque<String>> = HashMap::new();
        let dedup_ttl = Duration::from_millis(self.settings.dedup_ttl_ms);

        debug!(session = %self.session, "translation router started");

        while let Some(SpeakerOutput { speaker, event }) = self.inputs.recv().await {
            match event {
                SegmenterEvent::Interim { text } => {
                    let snapshot = self.listeners.borrow().clone();
                    let Some(language) = snapshot
                        .iter()
                        .find(|l| l.user_id == speaker)
                        .map(|l| l.language)
                    else {
                        // Speaker no longer connected; interim is moot.
                        continue;
                    };
                    counter!(metric_names::INTERIMS_EMITTED).increment(1);
                    let event = RouterEvent::InterimCaption(InterimCaption {
                        speaker,
                        text,
                        language,
                    });
                    if self.out.send(event).await.is_err() {
                        return;
                    }
                }

                SegmenterEvent::RecognitionFailed { reason } => {
                    let event = RouterEvent::SpeakerError {
                        speaker,
                        stage: PipelineStage::Recognition,
                        message: reason,
                    };
                    if self.out.send(event).await.is_err() {
                        return;
                    }
                }

                SegmenterEvent::Finalized {
                    text,
                    language,
                    started_ms,
                    ended_ms,
                } => {
                    // Idempotent sequence assignment: a replayed delivery of
                    // the same utterance (same span, same text) keeps its
                    // original number so the dedup map can suppress it.
                    let seq = match last_final.get(&speaker) {
                        Some(last)
                            if last.started_ms == started_ms
                                && last.ended_ms == ended_ms
                                && last.text == text =>
                        {
                            last.seq
                        }
                        _ => {
                            let next = seqs.entry(speaker.clone()).or_insert(0);
                            *next += 1;
                            *next
                        }
                    };
                    last_final.insert(
                        speaker.clone(),
                        LastFinal {
                            seq,
                            started_ms,
                            ended_ms,
                            text: text.clone(),
                        },
                    );

                    delivered.retain(|_, at| at.elapsed() < dedup_ttl);
                    if delivered.contains_key(&(speaker.clone(), seq)) {
                        counter!(metric_names::DEDUP_SUPPRESSED).increment(1);
                        debug!(session = %self.session, speaker = %speaker, seq,
                               "duplicate delivery suppressed");
                        continue;
                    }

                    let snapshot = self.listeners.borrow().clone();
                    let ctx: Vec<String> = context
                        .get(&speaker)
                        .map(|c| c.iter().cloned().collect())
                        .unwrap_or_default();

                    let utterance = Utterance {
                        session: self.session.clone(),
                        speaker: speaker.clone(),
                        seq,
                        language,
                        text: text.clone(),
                        started_ms,
                        ended_ms,
                    };
                    let results = self
                        .route_utterance(&utterance, &snapshot, &ctx)
                        .await;

                    delivered.insert((speaker.clone(), seq), Instant::now());

                    let window = context.entry(speaker.clone()).or_default();
                    window.push_back(text);
                    while window.len() > self.settings.context_utterances {
                        window.pop_front();
                    }

                    if self
                        .out
                        .send(RouterEvent::FinalTranslation { utterance, results })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }

        debug!(session = %self.session, "translation router stopped");
    }

    /// Translate + synthesize one utterance for every current listener.
    async fn route_utterance(
        &self,
        utterance: &Utterance,
        snapshot: &[ListenerInfo],
        ctx: &[String],
    ) -> Vec<ListenerResult> {
        let speaker = &utterance.speaker;
        let source = utterance.language;

        // Translate once per distinct target language, all targets
        // concurrently; listeners sharing a target therefore receive
        // byte-equal text.
        let targets: BTreeSet<Language> = snapshot
            .iter()
            .filter(|l| &l.user_id != speaker && l.language != source)
            .map(|l| l.language)
            .collect();

        let translations: HashMap<Language, (String, bool)> = join_all(
            targets
                .into_iter()
                .map(|target| self.translate_target(utterance, target, ctx)),
        )
        .await
        .into_iter()
        .collect();

        let mut results = Vec::new();
        for listener in snapshot.iter().filter(|l| &l.user_id != speaker) {
            if listener.language == source {
                // Passthrough: no translation, no synthesis.
                results.push(ListenerResult {
                    listener: listener.user_id.clone(),
                    target_lang: listener.language,
                    text: utterance.text.clone(),
                    degraded: false,
                    audio: None,
                });
                continue;
            }

            let (translated, degraded) = translations
                .get(&listener.language)
                .cloned()
                .unwrap_or_else(|| (utterance.text.clone(), true));

            // No synthesis for degraded text: dubbing the untranslated
            // transcript in the listener's voice would only mislead.
            let audio = if degraded {
                None
            } else {
                match self
                    .cache
                    .synthesize(&translated, listener.language, &listener.voice)
                    .await
                {
                    Ok(pcm) => Some(pcm),
                    Err(e) => {
                        warn!(session = %self.session, listener = %listener.user_id,
                              error = %e, "synthesis failed, delivering text only");
                        None
                    }
                }
            };

            results.push(ListenerResult {
                listener: listener.user_id.clone(),
                target_lang: listener.language,
                text: translated,
                degraded,
                audio,
            });
        }
        results
    }

    /// One timeout-bounded translation; failures degrade to the source
    /// text with the degraded flag set.
    async fn translate_target(
        &self,
        utterance: &Utterance,
        target: Language,
        ctx: &[String],
    ) -> (Language, (String, bool)) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.settings.translate_timeout_ms),
            self.adapter
                .translate(&utterance.text, utterance.language, target, ctx),
        )
        .await;
        histogram!(metric_names::ADAPTER_LATENCY_SECONDS, "stage" => "translation")
            .record(started.elapsed().as_secs_f64());

        let entry = match outcome {
            Ok(Ok(translated)) => (translated, false),
            Ok(Err(e)) => {
                warn!(session = %self.session, speaker = %utterance.speaker, target = %target,
                      error = %e, "translation failed, degrading to source text");
                (utterance.text.clone(), true)
            }
            Err(_) => {
                warn!(session = %self.session, speaker = %utterance.speaker, target = %target,
                      "translation timed out, degrading to source text");
                (utterance.text.clone(), true)
            }
        };
        (target, entry)
    }
}
