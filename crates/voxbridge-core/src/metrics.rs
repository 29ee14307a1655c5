//! Metric names and registration.
//!
//! All components record through the `metrics` facade using the names
//! defined here; whichever exporter the embedding process installs picks
//! them up. Counters/histograms carry `session` and, where it applies, a
//! `cause` or `stage` label.

use metrics::{describe_counter, describe_histogram};

/// Inbound PCM frames accepted into a per-speaker queue.
pub const FRAMES_IN: &str = "voxbridge_frames_in_total";

/// Outbound binary audio frames written to listener channels.
pub const FRAMES_OUT: &str = "voxbridge_frames_out_total";

/// Frames dropped, labeled by `cause`:
/// `inbound_overflow`, `outbound_overflow`, `muted`, `oversized`.
pub const FRAMES_DROPPED: &str = "voxbridge_frames_dropped_total";

/// Utterances finalized by segmenters.
pub const UTTERANCES_FINALIZED: &str = "voxbridge_utterances_finalized_total";

/// Interim caption events emitted by the router.
pub const INTERIMS_EMITTED: &str = "voxbridge_interims_emitted_total";

/// Interim captions coalesced away in outbound queues.
pub const INTERIMS_COALESCED: &str = "voxbridge_interims_coalesced_total";

/// TTS cache hits.
pub const TTS_CACHE_HITS: &str = "voxbridge_tts_cache_hits_total";

/// TTS cache misses (a synthesis call was issued).
pub const TTS_CACHE_MISSES: &str = "voxbridge_tts_cache_misses_total";

/// Duplicate (speaker, seq) deliveries suppressed within the dedup TTL.
pub const DEDUP_SUPPRESSED: &str = "voxbridge_dedup_suppressed_total";

/// Adapter call latency in seconds, labeled by `stage`:
/// `recognition`, `translation`, `synthesis`.
pub const ADAPTER_LATENCY_SECONDS: &str = "voxbridge_adapter_latency_seconds";

/// Outbound queue depth sampled at enqueue time.
pub const OUTBOUND_QUEUE_DEPTH: &str = "voxbridge_outbound_queue_depth";

/// Register descriptions with the installed recorder. Call once at startup.
pub fn describe_all() {
    describe_counter!(FRAMES_IN, "Inbound PCM frames accepted");
    describe_counter!(FRAMES_OUT, "Outbound audio frames delivered");
    describe_counter!(FRAMES_DROPPED, "Frames dropped, by cause");
    describe_counter!(UTTERANCES_FINALIZED, "Utterances finalized");
    describe_counter!(INTERIMS_EMITTED, "Interim captions emitted");
    describe_counter!(INTERIMS_COALESCED, "Interim captions coalesced in outbound queues");
    describe_counter!(TTS_CACHE_HITS, "TTS cache hits");
    describe_counter!(TTS_CACHE_MISSES, "TTS cache misses");
    describe_counter!(DEDUP_SUPPRESSED, "Duplicate deliveries suppressed");
    describe_histogram!(ADAPTER_LATENCY_SECONDS, "Adapter call latency by stage");
    describe_histogram!(OUTBOUND_QUEUE_DEPTH, "Outbound queue depth at enqueue");
}
