//! Bounded per-listener outbound queue.
//!
//! One queue sits between the orchestrator (many producers: router fan-out
//! plus the control path) and the listener's WebSocket writer task (single
//! consumer). Delivery classes:
//!
//! * **Control** — pong, join/leave notices, errors, `call_ended`. FIFO,
//!   never silently dropped.
//! * **Interim** — captions coalesce in place per speaker: a queued,
//!   not-yet-sent interim is replaced by the newer one, so a listener only
//!   ever observes the latest caption per speaker.
//! * **Final** — `translation` messages with optional dubbed audio. FIFO
//!   in (speaker, seq) order as produced by the router.
//!
//! **Overflow ladder** (queue at capacity): drop the oldest interim first;
//! failing that, strip the oldest final's audio payload down to text-only;
//! if the queue is still saturated the push reports `SlowConsumer` and the
//! orchestrator disconnects the listener — finals are never silently
//! skipped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::sync::Notify;

use voxbridge_core::{CloseReason, ServerMessage, UserId, metrics as metric_names};

/// One queued outbound item.
#[derive(Debug)]
pub enum Outbound {
    /// Control-plane message. Never dropped by the overflow ladder.
    Control(ServerMessage),

    /// Interim caption, coalescing key = speaker.
    Interim {
        speaker: UserId,
        msg: ServerMessage,
    },

    /// Final translation; `audio` follows the JSON as a binary frame.
    Final {
        msg: ServerMessage,
        audio: Option<Bytes>,
    },

    /// Terminal marker: the writer sends a close frame and exits.
    Close(CloseReason),
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item queued (possibly after degrading older items).
    Queued,

    /// The queue stayed saturated after the full degradation ladder; the
    /// listener must be disconnected.
    SlowConsumer,

    /// The queue is closed; the item was discarded.
    Closed,
}

struct Inner {
    queue: VecDeque<Outbound>,
    closed: bool,
}

/// Producer handle. Clone freely; all clones feed the same queue.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    capacity: usize,
}

/// Consumer handle held by the WebSocket writer task.
pub struct OutboundReceiver {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl OutboundQueue {
    /// Create a queue bounded at `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, OutboundReceiver) {
        let inner = Arc::new(Mutex::new(Inner {
            queue: VecDeque::new(),
            closed: false,
        }));
        let notify = Arc::new(Notify::new());
        (
            Self {
                inner: Arc::clone(&inner),
                notify: Arc::clone(&notify),
                capacity: capacity.max(1),
            },
            OutboundReceiver { inner, notify },
        )
    }

    /// Queue a control message.
    pub fn push_control(&self, msg: ServerMessage) -> PushOutcome {
        self.push(Outbound::Control(msg))
    }

    /// Queue an interim caption, replacing any queued caption from the
    /// same speaker.
    pub fn push_interim(&self, speaker: UserId, msg: ServerMessage) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return PushOutcome::Closed;
        }

        // Coalesce in place: same position, newer text.
        if let Some(slot) = inner.queue.iter_mut().find(
            |item| matches!(item, Outbound::Interim { speaker: s, .. } if s == &speaker),
        ) {
            counter!(metric_names::INTERIMS_COALESCED).increment(1);
            *slot = Outbound::Interim { speaker, msg };
            drop(inner);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        if inner.queue.len() >= self.capacity {
            counter!(metric_names::FRAMES_DROPPED, "cause" => "outbound_overflow").increment(1);
            // Evict the oldest queued interim to make room for the fresher
            // caption. A queue holding only finals and control messages
            // never yields a slot to an interim.
            let Some(idx) = inner
                .queue
                .iter()
                .position(|item| matches!(item, Outbound::Interim { .. }))
            else {
                return PushOutcome::Queued;
            };
            inner.queue.remove(idx);
        }

        inner.queue.push_back(Outbound::Interim { speaker, msg });
        histogram!(metric_names::OUTBOUND_QUEUE_DEPTH).record(inner.queue.len() as f64);
        drop(inner);
        self.notify.notify_one();
        PushOutcome::Queued
    }

    /// Queue a final translation (optionally with dubbed audio).
    pub fn push_final(&self, msg: ServerMessage, audio: Option<Bytes>) -> PushOutcome {
        self.push(Outbound::Final { msg, audio })
    }

    /// Queue the terminal close marker and refuse everything after it.
    pub fn push_close(&self, reason: CloseReason) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.queue.push_back(Outbound::Close(reason));
        drop(inner);
        self.notify.notify_one();
    }

    /// Close without a close frame (the peer is already gone).
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.notify.notify_one();
    }

    /// Queue depth right now (tests and observability).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, item: Outbound) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return PushOutcome::Closed;
        }

        if inner.queue.len() >= self.capacity && !Self::degrade(&mut inner.queue) {
            // The ladder stripped what it could without freeing a slot;
            // a still-full queue means this consumer cannot keep up.
            return PushOutcome::SlowConsumer;
        }

        inner.queue.push_back(item);
        histogram!(metric_names::OUTBOUND_QUEUE_DEPTH).record(inner.queue.len() as f64);
        drop(inner);
        self.notify.notify_one();
        PushOutcome::Queued
    }

    /// Overflow ladder: oldest interim first, then the oldest final's
    /// audio. Returns whether a queue slot was actually freed.
    fn degrade(queue: &mut VecDeque<Outbound>) -> bool {
        if let Some(idx) = queue
            .iter()
            .position(|item| matches!(item, Outbound::Interim { .. }))
        {
            queue.remove(idx);
            counter!(metric_names::FRAMES_DROPPED, "cause" => "outbound_overflow").increment(1);
            return true;
        }

        if let Some(slot) = queue
            .iter_mut()
            .find(|item| matches!(item, Outbound::Final { audio: Some(_), .. }))
        {
            if let Outbound::Final { audio, .. } = slot {
                *audio = None;
                counter!(metric_names::FRAMES_DROPPED, "cause" => "outbound_overflow")
                    .increment(1);
            }
        }
        false
    }
}

impl OutboundReceiver {
    /// Await the next item; `None` once the queue is closed and drained.
    pub async fn pop(&mut self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = inner.queue.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}
