//! End-to-end call flow: PCM frames in, captions and translations out.
//!
//! Drives the full pipeline — hub, segmenter, router, cache — through the
//! hub's channel seams with synthetic audio and the deterministic mock
//! adapter. Mirrors the product scenarios: a bilingual passthrough call
//! and a trilingual dubbed call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use voxbridge_axum::hub::{CallHub, JoinAccepted};
use voxbridge_axum::outbound::{Outbound, OutboundQueue, OutboundReceiver};
use voxbridge_core::{
    CallSession, CallSettings, InMemorySessionRepository, Language, Participant, ServerMessage,
    SessionId, SessionRepository, UserId,
};
use voxbridge_speech::{MockSpeechAdapter, SpeechAdapter, TtsCache};

// ── Harness ────────────────────────────────────────────────────────

fn test_hub(settings: CallSettings) -> (CallHub, Arc<MockSpeechAdapter>, Arc<InMemorySessionRepository>) {
    let adapter = Arc::new(MockSpeechAdapter::new());
    let repository = Arc::new(InMemorySessionRepository::new());
    let cache = Arc::new(TtsCache::new(
        Arc::clone(&adapter) as Arc<dyn SpeechAdapter>,
        settings.tts_cache_capacity,
        Duration::from_secs(5),
    ));
    let hub = CallHub::new(
        Arc::clone(&repository) as Arc<dyn SessionRepository>,
        Arc::clone(&adapter) as Arc<dyn SpeechAdapter>,
        cache,
        settings,
    );
    (hub, adapter, repository)
}

async fn seed_session(
    repository: &InMemorySessionRepository,
    id: &str,
    users: &[(&str, Language)],
) {
    let participants: Vec<Participant> = users
        .iter()
        .map(|(user, language)| Participant::new(*user, *language, None))
        .collect();
    repository
        .insert(CallSession::new(SessionId::new(id), participants).unwrap())
        .await;
}

async fn join(hub: &CallHub, session: &str, user: &str) -> (JoinAccepted, OutboundReceiver) {
    let (queue, rx) = OutboundQueue::new(64);
    let accepted = hub
        .join(&SessionId::new(session), UserId::new(user), queue)
        .await
        .expect("admission should succeed");
    (accepted, rx)
}

fn voice_frame() -> Bytes {
    let mut pcm = Vec::with_capacity(3200);
    for i in 0..1600 {
        let t = i as f32 / 16_000.0;
        let s = (3000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
        pcm.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(pcm)
}

fn silence_frame() -> Bytes {
    Bytes::from(vec![0u8; 3200])
}

/// Feed one spoken utterance: 800 ms of voice plus enough trailing
/// silence for the segmenter's sliding window to settle.
async fn speak_one_utterance(accepted: &JoinAccepted) {
    for _ in 0..8 {
        accepted.frames.send(voice_frame()).await.unwrap();
    }
    for _ in 0..10 {
        accepted.frames.send(silence_frame()).await.unwrap();
    }
}

/// Collect outbound items until a final translation shows up.
async fn collect_until_final(rx: &mut OutboundReceiver) -> Vec<Outbound> {
    let mut items = Vec::new();
    loop {
        let item = tokio::time::timeout(Duration::from_secs(5), rx.pop())
            .await
            .expect("expected a final translation in time")
            .expect("queue open");
        let done = matches!(item, Outbound::Final { .. });
        items.push(item);
        if done {
            return items;
        }
    }
}

fn the_final(items: &[Outbound]) -> (&ServerMessage, Option<&Bytes>) {
    match items.last() {
        Some(Outbound::Final { msg, audio }) => (msg, audio.as_ref()),
        other => panic!("expected a final translation, got {other:?}"),
    }
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn bilingual_passthrough_delivers_source_text_without_audio() {
    let (hub, adapter, repo) = test_hub(CallSettings::default());
    seed_session(&repo, "s1", &[("alice", Language::He), ("bob", Language::He)]).await;
    adapter.push_transcript("shalom haver");

    let (alice, _rx_alice) = join(&hub, "s1", "alice").await;
    let (_bob, mut rx_bob) = join(&hub, "s1", "bob").await;

    speak_one_utterance(&alice).await;

    let items = collect_until_final(&mut rx_bob).await;
    let (msg, audio) = the_final(&items);
    let ServerMessage::Translation {
        speaker_id,
        source_text,
        translated_text,
        source_lang,
        target_lang,
        is_final,
        degraded,
        ..
    } = msg
    else {
        panic!("expected translation, got {msg:?}");
    };

    assert_eq!(speaker_id, &UserId::new("alice"));
    assert_eq!(source_text, "shalom haver");
    assert_eq!(translated_text, source_text, "passthrough keeps the text");
    assert_eq!((*source_lang, *target_lang), (Language::He, Language::He));
    assert!(*is_final);
    assert!(!degraded);
    assert!(audio.is_none(), "no dubbing when languages match");

    // Interim captions reached the listener while alice was talking.
    assert!(
        items.iter().any(|i| matches!(
            i,
            Outbound::Interim {
                msg: ServerMessage::InterimTranscript { is_final: false, .. },
                ..
            }
        )),
        "expected at least one interim caption: {items:?}"
    );

    // The monolingual call never touched MT or TTS.
    assert_eq!(adapter.translate_calls(), 0);
    assert_eq!(adapter.synthesize_calls(), 0);
}

#[tokio::test]
async fn trilingual_call_dubs_for_each_listener() {
    let (hub, adapter, repo) = test_hub(CallSettings::default());
    seed_session(
        &repo,
        "s1",
        &[
            ("alice", Language::He),
            ("bob", Language::En),
            ("carol", Language::Ru),
        ],
    )
    .await;
    adapter.push_transcript("shalom lekulam");

    let (alice, mut rx_alice) = join(&hub, "s1", "alice").await;
    let (_bob, mut rx_bob) = join(&hub, "s1", "bob").await;
    let (_carol, mut rx_carol) = join(&hub, "s1", "carol").await;

    speak_one_utterance(&alice).await;

    // Bob hears English text and synthesized English audio.
    let items = collect_until_final(&mut rx_bob).await;
    let (msg, audio) = the_final(&items);
    let ServerMessage::Translation {
        translated_text,
        target_lang,
        ..
    } = msg
    else {
        panic!("expected translation");
    };
    assert_eq!(
        translated_text,
        &MockSpeechAdapter::translation_of("shalom lekulam", Language::En)
    );
    assert_eq!(*target_lang, Language::En);
    assert_eq!(
        audio.expect("dubbed audio for bob"),
        &MockSpeechAdapter::pcm_of(translated_text, Language::En, &Language::En.default_voice())
    );

    // Carol hears Russian.
    let items = collect_until_final(&mut rx_carol).await;
    let (msg, audio) = the_final(&items);
    let ServerMessage::Translation { target_lang, .. } = msg else {
        panic!("expected translation");
    };
    assert_eq!(*target_lang, Language::Ru);
    assert!(audio.is_some());

    // The speaker receives neither their own translation nor audio.
    loop {
        match tokio::time::timeout(Duration::from_millis(300), rx_alice.pop()).await {
            Ok(Some(Outbound::Final { msg, .. })) => {
                panic!("speaker must not receive their own utterance: {msg:?}")
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }

    // One MT call per target language, one TTS per (language, voice).
    assert_eq!(adapter.translate_calls(), 2);
    assert_eq!(adapter.synthesize_calls(), 2);
}

#[tokio::test]
async fn synthesis_outage_still_delivers_text_finals() {
    let (hub, adapter, repo) = test_hub(CallSettings::default());
    seed_session(&repo, "s1", &[("alice", Language::He), ("bob", Language::En)]).await;
    adapter.push_transcript("ein kol");
    adapter.set_fail_synthesis(true);

    let (alice, _rx_alice) = join(&hub, "s1", "alice").await;
    let (_bob, mut rx_bob) = join(&hub, "s1", "bob").await;

    speak_one_utterance(&alice).await;

    let items = collect_until_final(&mut rx_bob).await;
    let (msg, audio) = the_final(&items);
    let ServerMessage::Translation {
        translated_text,
        degraded,
        ..
    } = msg
    else {
        panic!("expected translation");
    };
    assert_eq!(
        translated_text,
        &MockSpeechAdapter::translation_of("ein kol", Language::En)
    );
    assert!(!degraded, "translation itself succeeded");
    assert!(audio.is_none(), "audio omitted during the TTS outage");

    // The next utterance recovers.
    adapter.set_fail_synthesis(false);
    adapter.push_transcript("hakol hazar");
    speak_one_utterance(&alice).await;

    let items = collect_until_final(&mut rx_bob).await;
    let (_msg, audio) = the_final(&items);
    assert!(audio.is_some(), "synthesis recovers on the next utterance");
}

#[tokio::test]
async fn muted_speaker_produces_no_downstream_output() {
    let (hub, adapter, repo) = test_hub(CallSettings::default());
    seed_session(&repo, "s1", &[("alice", Language::He), ("bob", Language::En)]).await;
    adapter.push_transcript("must stay private");

    let (alice, _rx_alice) = join(&hub, "s1", "alice").await;
    let (_bob, mut rx_bob) = join(&hub, "s1", "bob").await;

    // Mute through the hub (flips the segmenter's watch flag), then speak.
    alice
        .commands
        .send(voxbridge_axum::hub::HubCommand::Verb {
            user: alice.user.clone(),
            conn_id: alice.conn_id,
            msg: voxbridge_core::ClientMessage::Mute,
        })
        .await
        .unwrap();
    // Give the mute a moment to propagate before speaking.
    tokio::time::sleep(Duration::from_millis(50)).await;

    speak_one_utterance(&alice).await;

    // Bob sees the mute notice but never a caption or translation.
    let mut saw_translation_or_interim = false;
    loop {
        match tokio::time::timeout(Duration::from_millis(500), rx_bob.pop()).await {
            Ok(Some(Outbound::Final { .. }) | Some(Outbound::Interim { .. })) => {
                saw_translation_or_interim = true;
                break;
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    assert!(
        !saw_translation_or_interim,
        "muted frames must not contribute to any downstream utterance"
    );
    assert_eq!(adapter.recognition_calls(), 0);
}
