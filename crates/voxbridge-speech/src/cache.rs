//! Bounded TTS cache with per-key single-flight.
//!
//! Synthesis is the most expensive adapter call, and dubbed phrases repeat
//! (several listeners sharing a language and voice, replayed utterances).
//! The cache maps (text, language, voice) to synthesized PCM with:
//!
//! * **LRU eviction** at a configurable capacity;
//! * **single-flight**: concurrent requests for the same key await the
//!   first synthesis instead of duplicating provider calls;
//! * **no negative caching**: failures are handed to current waiters but
//!   never stored, so the next request retries the provider.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use metrics::{counter, histogram};
use tokio::sync::broadcast;

use voxbridge_core::{Language, VoiceId, metrics as metric_names};

use crate::adapter::SpeechAdapter;
use crate::error::SpeechError;

type CacheKey = (String, Language, VoiceId);
type FlightResult = Result<Bytes, SpeechError>;

struct CacheState {
    entries: LruCache<CacheKey, Bytes>,
    inflight: HashMap<CacheKey, broadcast::Sender<FlightResult>>,
}

/// Process-wide synthesized-audio cache.
///
/// A value passed explicitly to the components that need it, not a global.
pub struct TtsCache {
    adapter: Arc<dyn SpeechAdapter>,
    timeout: Duration,
    state: Mutex<CacheState>,
}

impl TtsCache {
    /// Create a cache over `adapter` holding up to `capacity` entries.
    ///
    /// `timeout` bounds each provider call; a timed-out call surfaces as
    /// [`SpeechError::SynthesisUnavailable`].
    #[must_use]
    pub fn new(adapter: Arc<dyn SpeechAdapter>, capacity: usize, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            adapter,
            timeout,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                inflight: HashMap::new(),
            }),
        }
    }

    /// Cached entry count, for observability and tests.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synthesize through the cache.
    pub async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceId,
    ) -> Result<Bytes, SpeechError> {
        let key: CacheKey = (text.to_string(), language, voice.clone());

        enum Role {
            Hit(Bytes),
            Waiter(broadcast::Receiver<FlightResult>),
            Leader(broadcast::Sender<FlightResult>),
        }

        let role = {
            let mut state = self.state.lock().unwrap();
            if let Some(pcm) = state.entries.get(&key) {
                counter!(metric_names::TTS_CACHE_HITS).increment(1);
                Role::Hit(pcm.clone())
            } else if let Some(tx) = state.inflight.get(&key) {
                Role::Waiter(tx.subscribe())
            } else {
                counter!(metric_names::TTS_CACHE_MISSES).increment(1);
                let (tx, _) = broadcast::channel(1);
                state.inflight.insert(key.clone(), tx.clone());
                Role::Leader(tx)
            }
        };

        match role {
            Role::Hit(pcm) => Ok(pcm),

            Role::Waiter(mut rx) => {
                // The leader always resolves within its own timeout; give
                // waiters the same bound so a cancelled leader cannot hang us.
                match tokio::time::timeout(self.timeout, rx.recv()).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) | Err(_) => Err(SpeechError::SynthesisUnavailable(
                        "in-flight synthesis abandoned".to_string(),
                    )),
                }
            }

            Role::Leader(tx) => {
                let started = Instant::now();
                let result = match tokio::time::timeout(
                    self.timeout,
                    self.adapter.synthesize(text, language, voice),
                )
                .await
                {
                    Ok(Ok(pcm)) => Ok(pcm),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SpeechError::SynthesisUnavailable(
                        "synthesis timed out".to_string(),
                    )),
                };
                histogram!(metric_names::ADAPTER_LATENCY_SECONDS, "stage" => "synthesis")
                    .record(started.elapsed().as_secs_f64());

                {
                    let mut state = self.state.lock().unwrap();
                    state.inflight.remove(&key);
                    if let Ok(ref pcm) = result {
                        state.entries.put(key, pcm.clone());
                    }
                }

                // Waiters may all be gone; that is fine.
                let _ = tx.send(result.clone());
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSpeechAdapter;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::adapter::RecognitionStream;

    fn voice() -> VoiceId {
        VoiceId::new("en_default")
    }

    #[tokio::test]
    async fn second_request_is_a_hit() {
        let mock = Arc::new(MockSpeechAdapter::new());
        let cache = TtsCache::new(mock.clone(), 16, Duration::from_secs(5));

        let a = cache
            .synthesize("hello", Language::En, &voice())
            .await
            .unwrap();
        let b = cache
            .synthesize("hello", Language::En, &voice())
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(mock.synthesize_calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_voices_are_distinct_keys() {
        let mock = Arc::new(MockSpeechAdapter::new());
        let cache = TtsCache::new(mock.clone(), 16, Duration::from_secs(5));

        cache
            .synthesize("hello", Language::En, &voice())
            .await
            .unwrap();
        cache
            .synthesize("hello", Language::En, &VoiceId::new("bob-clone"))
            .await
            .unwrap();

        assert_eq!(mock.synthesize_calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let mock = Arc::new(MockSpeechAdapter::new());
        let cache = TtsCache::new(mock.clone(), 16, Duration::from_secs(5));

        mock.set_fail_synthesis(true);
        let err = cache.synthesize("hello", Language::En, &voice()).await;
        assert!(matches!(err, Err(SpeechError::SynthesisUnavailable(_))));
        assert_eq!(cache.len(), 0);

        mock.set_fail_synthesis(false);
        cache
            .synthesize("hello", Language::En, &voice())
            .await
            .unwrap();
        assert_eq!(mock.synthesize_calls(), 2, "retry must reach the provider");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recent() {
        let mock = Arc::new(MockSpeechAdapter::new());
        let cache = TtsCache::new(mock.clone(), 2, Duration::from_secs(5));

        cache.synthesize("a", Language::En, &voice()).await.unwrap();
        cache.synthesize("b", Language::En, &voice()).await.unwrap();
        cache.synthesize("c", Language::En, &voice()).await.unwrap();
        assert_eq!(cache.len(), 2);

        // "a" was evicted: synthesizing it again hits the provider.
        cache.synthesize("a", Language::En, &voice()).await.unwrap();
        assert_eq!(mock.synthesize_calls(), 4);
    }

    /// Adapter whose synthesis blocks until released, counting entries.
    struct GatedAdapter {
        gate: Notify,
        entered: AtomicUsize,
    }

    #[async_trait]
    impl SpeechAdapter for GatedAdapter {
        fn start_recognition(
            &self,
            _language: Language,
        ) -> Result<RecognitionStream, SpeechError> {
            let (stream, _backend) = RecognitionStream::channel(1);
            Ok(stream)
        }

        async fn translate(
            &self,
            text: &str,
            _source: Language,
            _target: Language,
            _context: &[String],
        ) -> Result<String, SpeechError> {
            Ok(text.to_string())
        }

        async fn synthesize(
            &self,
            _text: &str,
            _language: Language,
            _voice: &VoiceId,
        ) -> Result<Bytes, SpeechError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(Bytes::from_static(&[1, 2, 3, 4]))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_share_one_flight() {
        let adapter = Arc::new(GatedAdapter {
            gate: Notify::new(),
            entered: AtomicUsize::new(0),
        });
        let cache = Arc::new(TtsCache::new(
            adapter.clone(),
            16,
            Duration::from_secs(5),
        ));

        let c1 = cache.clone();
        let first = tokio::spawn(async move {
            c1.synthesize("shared", Language::Ru, &VoiceId::new("v")).await
        });
        // Let the leader reach the adapter before the second request.
        while adapter.entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let c2 = cache.clone();
        let second = tokio::spawn(async move {
            c2.synthesize("shared", Language::Ru, &VoiceId::new("v")).await
        });
        tokio::task::yield_now().await;

        adapter.gate.notify_waiters();
        adapter.gate.notify_one();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(
            adapter.entered.load(Ordering::SeqCst),
            1,
            "exactly one provider call per key"
        );
    }
}
