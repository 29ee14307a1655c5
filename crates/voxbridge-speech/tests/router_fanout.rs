//! Integration tests for the per-session translation router.
//!
//! These drive a `TranslationRouter` task with hand-built segmenter events
//! and a listener snapshot watch channel — exactly the seams the
//! orchestrator uses. The deterministic mock adapter lets every expected
//! translation and PCM payload be computed independently.
//!
//! # What is tested
//!
//! - Trilingual fan-out: each listener gets their language, with audio
//! - Passthrough: same-language listeners get the source text, no MT/TTS
//! - Translation is memoized per target language (byte-equal texts)
//! - Sequence numbers increase per speaker; replays are deduplicated
//! - TTS outage degrades to text-only and recovers on the next utterance
//! - MT outage degrades to the source text with the degraded flag
//! - Interim events become captions in the speaker's language
//! - Recognition failures surface as speaker-only error events

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use voxbridge_core::{
    CallSettings, Language, ListenerInfo, RouterEvent, SegmenterEvent, SessionId, SpeakerOutput,
    UserId,
};
use voxbridge_speech::{MockSpeechAdapter, TranslationRouter, TtsCache};

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    inputs: mpsc::Sender<SpeakerOutput>,
    listeners: watch::Sender<Vec<ListenerInfo>>,
    events: mpsc::Receiver<RouterEvent>,
    adapter: Arc<MockSpeechAdapter>,
}

fn listener(user: &str, language: Language) -> ListenerInfo {
    ListenerInfo {
        user_id: UserId::new(user),
        language,
        voice: language.default_voice(),
    }
}

fn start_router(snapshot: Vec<ListenerInfo>) -> Harness {
    let adapter = Arc::new(MockSpeechAdapter::new());
    let cache = Arc::new(TtsCache::new(
        adapter.clone(),
        64,
        Duration::from_secs(5),
    ));
    let (input_tx, input_rx) = mpsc::channel(64);
    let (watch_tx, watch_rx) = watch::channel(snapshot);
    let (out_tx, out_rx) = mpsc::channel(64);

    TranslationRouter::new(
        SessionId::new("s1"),
        CallSettings::default(),
        adapter.clone(),
        cache,
        input_rx,
        watch_rx,
        out_tx,
    )
    .spawn();

    Harness {
        inputs: input_tx,
        listeners: watch_tx,
        events: out_rx,
        adapter,
    }
}

fn finalized(speaker: &str, text: &str, started_ms: u64, ended_ms: u64) -> SpeakerOutput {
    SpeakerOutput {
        speaker: UserId::new(speaker),
        event: SegmenterEvent::Finalized {
            text: text.to_string(),
            language: Language::He,
            started_ms,
            ended_ms,
        },
    }
}

async fn next_event(h: &mut Harness) -> RouterEvent {
    tokio::time::timeout(Duration::from_secs(2), h.events.recv())
        .await
        .expect("router event within 2s")
        .expect("router channel open")
}

async fn assert_no_event(h: &mut Harness) {
    let res = tokio::time::timeout(Duration::from_millis(200), h.events.recv()).await;
    assert!(res.is_err(), "expected no further event, got {res:?}");
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn trilingual_fanout_translates_and_dubs_per_listener() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
        listener("carol", Language::Ru),
    ]);

    h.inputs
        .send(finalized("alice", "shalom lekulam", 0, 900))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { utterance, results } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(utterance.seq, 1);
    assert_eq!(utterance.speaker, UserId::new("alice"));
    assert_eq!(results.len(), 2, "speaker receives nothing: {results:?}");

    let bob = results
        .iter()
        .find(|r| r.listener == UserId::new("bob"))
        .unwrap();
    assert_eq!(bob.text, MockSpeechAdapter::translation_of("shalom lekulam", Language::En));
    assert!(!bob.degraded);
    assert_eq!(
        bob.audio.as_ref().expect("dubbed audio for bob"),
        &MockSpeechAdapter::pcm_of(&bob.text, Language::En, &Language::En.default_voice())
    );

    let carol = results
        .iter()
        .find(|r| r.listener == UserId::new("carol"))
        .unwrap();
    assert_eq!(carol.text, MockSpeechAdapter::translation_of("shalom lekulam", Language::Ru));
    assert!(carol.audio.is_some());

    // One MT call per target language, one TTS per (target, voice).
    assert_eq!(h.adapter.translate_calls(), 2);
    assert_eq!(h.adapter.synthesize_calls(), 2);
}

#[tokio::test]
async fn passthrough_skips_translation_and_synthesis() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::He),
    ]);

    h.inputs
        .send(finalized("alice", "ma nishma", 0, 800))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "ma nishma");
    assert!(!results[0].degraded);
    assert!(results[0].audio.is_none(), "passthrough carries no audio");

    assert_eq!(h.adapter.translate_calls(), 0);
    assert_eq!(h.adapter.synthesize_calls(), 0);
}

#[tokio::test]
async fn same_target_listeners_share_one_translation() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
        listener("dave", Language::En),
    ]);

    h.inputs
        .send(finalized("alice", "yom tov", 0, 700))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], texts[1], "shared target must be byte-equal");

    assert_eq!(h.adapter.translate_calls(), 1, "one MT call for the shared target");
    // Same (text, language, voice) key: single-flight/caching leaves one call.
    assert_eq!(h.adapter.synthesize_calls(), 1);
}

#[tokio::test]
async fn sequence_numbers_increase_and_replays_are_suppressed() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
    ]);

    h.inputs
        .send(finalized("alice", "first", 0, 500))
        .await
        .unwrap();
    let RouterEvent::FinalTranslation { utterance, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(utterance.seq, 1);

    // Replay of the same utterance (same span, same text): suppressed.
    h.inputs
        .send(finalized("alice", "first", 0, 500))
        .await
        .unwrap();
    assert_no_event(&mut h).await;

    let mt_after_replay = h.adapter.translate_calls();
    assert_eq!(mt_after_replay, 1, "replay must not reach the providers");

    h.inputs
        .send(finalized("alice", "second", 600, 1200))
        .await
        .unwrap();
    let RouterEvent::FinalTranslation { utterance, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(utterance.seq, 2);
}

#[tokio::test]
async fn synthesis_outage_degrades_to_text_only_and_recovers() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
    ]);

    h.adapter.set_fail_synthesis(true);
    h.inputs
        .send(finalized("alice", "no audio this time", 0, 900))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(results.len(), 1);
    assert!(!results[0].degraded, "text is still translated");
    assert_eq!(
        results[0].text,
        MockSpeechAdapter::translation_of("no audio this time", Language::En)
    );
    assert!(results[0].audio.is_none(), "audio omitted on TTS outage");

    // Subsequent utterances recover normally.
    h.adapter.set_fail_synthesis(false);
    h.inputs
        .send(finalized("alice", "audio is back", 1000, 1900))
        .await
        .unwrap();
    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert!(results[0].audio.is_some());
}

#[tokio::test]
async fn translation_outage_degrades_to_source_text() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
    ]);

    h.adapter.set_fail_translation(true);
    h.inputs
        .send(finalized("alice", "lo metargem", 0, 800))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(results.len(), 1);
    assert!(results[0].degraded);
    assert_eq!(results[0].text, "lo metargem", "original text surfaces");
    assert!(
        results[0].audio.is_none(),
        "no TTS is attempted for degraded text"
    );
    assert_eq!(h.adapter.synthesize_calls(), 0);
}

#[tokio::test]
async fn interim_becomes_caption_in_speaker_language() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
    ]);

    h.inputs
        .send(SpeakerOutput {
            speaker: UserId::new("alice"),
            event: SegmenterEvent::Interim {
                text: "shal".to_string(),
            },
        })
        .await
        .unwrap();

    let RouterEvent::InterimCaption(caption) = next_event(&mut h).await else {
        panic!("expected InterimCaption");
    };
    assert_eq!(caption.speaker, UserId::new("alice"));
    assert_eq!(caption.text, "shal");
    assert_eq!(caption.language, Language::He);
}

#[tokio::test]
async fn recognition_failure_is_reported_to_the_speaker_only() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
    ]);

    h.inputs
        .send(SpeakerOutput {
            speaker: UserId::new("alice"),
            event: SegmenterEvent::RecognitionFailed {
                reason: "provider outage".to_string(),
            },
        })
        .await
        .unwrap();

    let RouterEvent::SpeakerError {
        speaker, message, ..
    } = next_event(&mut h).await
    else {
        panic!("expected SpeakerError");
    };
    assert_eq!(speaker, UserId::new("alice"));
    assert_eq!(message, "provider outage");
}

#[tokio::test]
async fn snapshot_update_changes_the_fanout_set() {
    let mut h = start_router(vec![
        listener("alice", Language::He),
        listener("bob", Language::En),
        listener("carol", Language::Ru),
    ]);

    // Carol leaves the call.
    h.listeners
        .send(vec![
            listener("alice", Language::He),
            listener("bob", Language::En),
        ])
        .unwrap();

    h.inputs
        .send(finalized("alice", "who is left", 0, 600))
        .await
        .unwrap();

    let RouterEvent::FinalTranslation { results, .. } = next_event(&mut h).await else {
        panic!("expected FinalTranslation");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].listener, UserId::new("bob"));
}
