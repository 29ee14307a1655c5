//! Per-call session orchestration.
//!
//! [`CallHub`] is the process-wide registry of live calls. Each call gets
//! one hub task that owns the session aggregate and everything attached to
//! it: per-speaker segmenters, the translation router, and every
//! listener's outbound queue. All control actions (admission, verbs,
//! disconnects) are serialized through the task's command channel — the
//! aggregate has exactly one writer.
//!
//! Audio does not pass through the command channel: the WebSocket reader
//! pushes PCM frames straight into the speaker's bounded segmenter queue
//! (single producer, single consumer), and the router publishes results
//! back to the hub task for fan-out.
//!
//! ```text
//!   reader ── frames ──► segmenter ──► router ──► hub task ──► outbound
//!   reader ── verbs  ──────────────────────────►      │            │
//!                                                 aggregate      writer
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use voxbridge_core::{
    CallSession, CallSettings, ClientMessage, CloseReason, ConnectionState, ListenerInfo,
    RouterEvent, ServerMessage, SessionId, SessionRepository, SpeakerOutput, UserId,
    metrics as metric_names,
};
use voxbridge_speech::{Segmenter, SpeechAdapter, TranslationRouter, TtsCache};

use crate::outbound::{OutboundQueue, PushOutcome};

/// Control actions serialized through a hub task's command channel.
pub enum HubCommand {
    /// Admit (or supersede) a connection for `user`.
    Join {
        user: UserId,
        outbound: OutboundQueue,
        reply: oneshot::Sender<Result<(u64, mpsc::Sender<Bytes>), CloseReason>>,
    },

    /// A client verb received on connection `conn_id`.
    Verb {
        user: UserId,
        conn_id: u64,
        msg: ClientMessage,
    },

    /// Connection `conn_id` dropped without a `leave`.
    Disconnected { user: UserId, conn_id: u64 },
}

/// Everything a WebSocket handler needs after admission.
#[derive(Debug)]
pub struct JoinAccepted {
    pub user: UserId,
    /// Distinguishes this connection from one that supersedes it.
    pub conn_id: u64,
    /// The speaker's inbound frame queue (bounded; overflow drops newest).
    pub frames: mpsc::Sender<Bytes>,
    /// Command channel for verbs and the disconnect notice.
    pub commands: mpsc::Sender<HubCommand>,
}

/// Registry of live call sessions.
#[derive(Clone)]
pub struct CallHub {
    sessions: Arc<Mutex<HashMap<SessionId, mpsc::Sender<HubCommand>>>>,
    repository: Arc<dyn SessionRepository>,
    adapter: Arc<dyn SpeechAdapter>,
    cache: Arc<TtsCache>,
    settings: CallSettings,
}

impl CallHub {
    #[must_use]
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        adapter: Arc<dyn SpeechAdapter>,
        cache: Arc<TtsCache>,
        settings: CallSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            repository,
            adapter,
            cache,
            settings,
        }
    }

    /// Admit `user` to `session_id`, spawning the hub task on first use.
    ///
    /// `outbound` is the caller's freshly created queue; on success the
    /// returned handles carry everything the reader needs.
    pub async fn join(
        &self,
        session_id: &SessionId,
        user: UserId,
        outbound: OutboundQueue,
    ) -> Result<JoinAccepted, CloseReason> {
        let commands = self.runtime_for(session_id).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(HubCommand::Join {
                user: user.clone(),
                outbound,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CloseReason::CallEnded)?;

        let (conn_id, frames) = reply_rx.await.map_err(|_| CloseReason::CallEnded)??;
        Ok(JoinAccepted {
            user,
            conn_id,
            frames,
            commands,
        })
    }

    /// Live hub-task count (sessions whose task is still running).
    pub fn active_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, tx| !tx.is_closed());
        sessions.len()
    }

    /// Look up the session's command channel, spawning the hub task from
    /// the repository snapshot when this is the first connection.
    async fn runtime_for(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Sender<HubCommand>, CloseReason> {
        if let Some(tx) = self.sessions.lock().unwrap().get(session_id) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let session = self
            .repository
            .load_session(session_id)
            .await
            .map_err(|_| CloseReason::UnknownSession)?;
        if session.is_terminal() {
            return Err(CloseReason::CallEnded);
        }

        let mut sessions = self.sessions.lock().unwrap();
        // Another connection may have spawned the task while we loaded.
        if let Some(tx) = sessions.get(session_id) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }
        sessions.retain(|_, tx| !tx.is_closed());

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        sessions.insert(session_id.clone(), cmd_tx.clone());
        drop(sessions);

        let task = HubTask::new(
            session,
            self.settings.clone(),
            Arc::clone(&self.repository),
            Arc::clone(&self.adapter),
            Arc::clone(&self.cache),
            cmd_rx,
        );
        let registry = Arc::clone(&self.sessions);
        let sid = session_id.clone();
        tokio::spawn(async move {
            task.run().await;
            registry.lock().unwrap().remove(&sid);
        });

        Ok(cmd_tx)
    }
}

// ── Hub task ───────────────────────────────────────────────────────

struct Peer {
    conn_id: u64,
    outbound: OutboundQueue,
    frames: mpsc::Sender<Bytes>,
    mute_tx: watch::Sender<bool>,
    segmenter: tokio::task::JoinHandle<()>,
}

struct HubTask {
    session: CallSession,
    settings: CallSettings,
    repository: Arc<dyn SessionRepository>,
    adapter: Arc<dyn SpeechAdapter>,
    peers: HashMap<UserId, Peer>,
    commands: mpsc::Receiver<HubCommand>,
    /// Cloned into each segmenter; dropping the original on teardown lets
    /// the router drain and exit once the segmenters are gone.
    router_in: Option<mpsc::Sender<SpeakerOutput>>,
    router_events: mpsc::Receiver<RouterEvent>,
    listeners_tx: watch::Sender<Vec<ListenerInfo>>,
    next_conn_id: u64,
}

impl HubTask {
    fn new(
        session: CallSession,
        settings: CallSettings,
        repository: Arc<dyn SessionRepository>,
        adapter: Arc<dyn SpeechAdapter>,
        cache: Arc<TtsCache>,
        commands: mpsc::Receiver<HubCommand>,
    ) -> Self {
        let (router_in_tx, router_in_rx) = mpsc::channel(64);
        let (router_out_tx, router_out_rx) = mpsc::channel(64);
        let (listeners_tx, listeners_rx) = watch::channel(Vec::new());

        TranslationRouter::new(
            session.id().clone(),
            settings.clone(),
            Arc::clone(&adapter),
            cache,
            router_in_rx,
            listeners_rx,
            router_out_tx,
        )
        .spawn();

        Self {
            session,
            settings,
            repository,
            adapter,
            peers: HashMap::new(),
            commands,
            router_in: Some(router_in_tx),
            router_events: router_out_rx,
            listeners_tx,
            next_conn_id: 0,
        }
    }

    async fn run(mut self) {
        info!(session = %self.session.id(), "call hub started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                ev = self.router_events.recv() => {
                    // The router only exits after teardown drops its input
                    // side; a closed event stream means we are done here.
                    let Some(ev) = ev else { break };
                    if self.fan_out(ev).await {
                        break;
                    }
                }
            }
        }

        // The loop only breaks once the session is terminal (or every
        // command sender vanished, which cannot happen while the registry
        // holds one). Make teardown idempotent either way.
        if !self.session.is_terminal() {
            self.end_session("call_ended").await;
        }
        info!(session = %self.session.id(), "call hub stopped");
    }

    /// Returns `true` once the session reached its terminal state.
    async fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Join {
                user,
                outbound,
                reply,
            } => {
                let result = self.admit(user, outbound).await;
                let _ = reply.send(result);
                false
            }

            HubCommand::Verb { user, conn_id, msg } => self.handle_verb(user, conn_id, msg).await,

            HubCommand::Disconnected { user, conn_id } => {
                // Ignore stale notices from superseded connections.
                let current = self
                    .peers
                    .get(&user)
                    .is_some_and(|p| p.conn_id == conn_id);
                if current {
                    self.depart(&user, None).await
                } else {
                    false
                }
            }
        }
    }

    async fn admit(
        &mut self,
        user: UserId,
        outbound: OutboundQueue,
    ) -> Result<(u64, mpsc::Sender<Bytes>), CloseReason> {
        if self.session.is_terminal() {
            return Err(CloseReason::CallEnded);
        }

        // Admission requires membership in the participant set; a departed
        // participant does not come back on this call.
        let participant = self
            .session
            .participant(&user)
            .ok_or(CloseReason::Unauthorized)?;
        if matches!(
            participant.connection,
            ConnectionState::Leaving | ConnectionState::Gone
        ) {
            return Err(CloseReason::Unauthorized);
        }
        let language = participant.language;
        let initially_muted = participant.muted;

        self.next_conn_id += 1;
        let conn_id = self.next_conn_id;

        let frames = if let Some(existing) = self.peers.get_mut(&user) {
            // Supersede: the new channel replaces the old one, which is
            // closed with an explicit reason. The segmenter (keyed by
            // user, not connection) keeps any in-flight utterance.
            debug!(session = %self.session.id(), user = %user, "connection superseded");
            existing.outbound.push_close(CloseReason::Superseded);
            existing.outbound = outbound;
            existing.conn_id = conn_id;
            existing.frames.clone()
        } else {
            let (frame_tx, frame_rx) = mpsc::channel(self.settings.inbound_queue_frames);
            let (mute_tx, mute_rx) = watch::channel(initially_muted);
            let router_in = self
                .router_in
                .as_ref()
                .expect("router alive while session is live")
                .clone();

            let segmenter = Segmenter::new(
                self.session.id().clone(),
                user.clone(),
                language,
                self.settings.clone(),
                Arc::clone(&self.adapter),
                frame_rx,
                mute_rx,
                router_in,
            )
            .spawn();

            self.peers.insert(
                user.clone(),
                Peer {
                    conn_id,
                    outbound,
                    frames: frame_tx.clone(),
                    mute_tx,
                    segmenter,
                },
            );
            frame_tx
        };

        if self.session.mark_connected(&user).is_err() {
            return Err(CloseReason::CallEnded);
        }
        let joined_at = Utc::now();
        if let Err(e) = self
            .repository
            .mark_participant_joined(self.session.id(), &user, joined_at)
            .await
        {
            warn!(session = %self.session.id(), user = %user, error = %e,
                  "failed to record join");
        }

        self.broadcast_except(
            &user,
            &ServerMessage::ParticipantJoined {
                user_id: user.clone(),
                joined_at,
            },
        );
        self.publish_snapshot();

        info!(session = %self.session.id(), user = %user, conn_id, "participant joined");
        Ok((conn_id, frames))
    }

    async fn handle_verb(&mut self, user: UserId, conn_id: u64, msg: ClientMessage) -> bool {
        // Ignore verbs from superseded connections.
        match self.peers.get(&user) {
            Some(peer) if peer.conn_id == conn_id => {}
            _ => return false,
        }

        match msg {
            ClientMessage::Ping => {
                let outcome = self
                    .peers
                    .get(&user)
                    .map(|p| p.outbound.push_control(ServerMessage::Pong));
                if outcome == Some(PushOutcome::SlowConsumer) {
                    return self.depart(&user, Some(CloseReason::SlowConsumer)).await;
                }
                false
            }

            ClientMessage::Mute | ClientMessage::Unmute => {
                let muted = matches!(msg, ClientMessage::Mute);
                match self.session.set_muted(&user, muted) {
                    Ok(true) => {
                        if let Some(peer) = self.peers.get(&user) {
                            let _ = peer.mute_tx.send(muted);
                        }
                        self.broadcast(&ServerMessage::MuteStatusChanged {
                            user_id: user,
                            is_muted: muted,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(session = %self.session.id(), user = %user, error = %e,
                               "mute rejected");
                    }
                }
                false
            }

            ClientMessage::Leave => {
                let _ = self.session.mark_leaving(&user);
                self.depart(&user, None).await
            }
        }
    }

    /// Remove a participant. `close_reason` is used for server-initiated
    /// disconnects (supersede is handled at admission, so this is
    /// `slow_consumer`); `None` closes the channel without a reason frame.
    ///
    /// Returns `true` when the departure terminated the session.
    async fn depart(&mut self, user: &UserId, close_reason: Option<CloseReason>) -> bool {
        let Some(peer) = self.peers.remove(user) else {
            return false;
        };

        // Cancel only this participant's I/O and segmentation; router work
        // already in flight for other listeners completes normally.
        peer.segmenter.abort();
        match close_reason {
            Some(reason) => peer.outbound.push_close(reason),
            None => peer.outbound.close(),
        }

        let _ = self.session.mark_gone(user);
        let left_at = Utc::now();
        if let Err(e) = self
            .repository
            .mark_participant_left(self.session.id(), user, left_at)
            .await
        {
            warn!(session = %self.session.id(), user = %user, error = %e,
                  "failed to record departure");
        }

        self.broadcast(&ServerMessage::ParticipantLeft {
            user_id: user.clone(),
            left_at,
        });
        self.publish_snapshot();
        info!(session = %self.session.id(), user = %user, "participant left");

        if self.session.connected_count() < 2 && !self.session.is_terminal() {
            self.end_session("participant_left").await;
            return true;
        }
        false
    }

    /// Terminal transition: stamp ended-at once, notify and close every
    /// remaining channel, cancel segmenters, and let the router drain.
    async fn end_session(&mut self, reason: &str) {
        let Ok(ended_at) = self.session.end() else {
            return;
        };

        if let Err(e) = self
            .repository
            .mark_session_ended(
                self.session.id(),
                ended_at,
                self.session.duration().unwrap_or_default(),
            )
            .await
        {
            warn!(session = %self.session.id(), error = %e, "failed to record session end");
        }

        for (_, peer) in self.peers.drain() {
            peer.segmenter.abort();
            peer.outbound.push_control(ServerMessage::CallEnded {
                reason: reason.to_string(),
            });
            peer.outbound.push_close(CloseReason::CallEnded);
        }
        let _ = self.listeners_tx.send(Vec::new());

        // Dropping the segmenter-facing sender ends the router once its
        // queue drains.
        self.router_in.take();

        info!(session = %self.session.id(), reason, "session ended");
    }

    /// Fan one router event out to the affected listeners.
    ///
    /// Returns `true` when a slow-consumer disconnect terminated the
    /// session.
    async fn fan_out(&mut self, event: RouterEvent) -> bool {
        let mut slow: Vec<UserId> = Vec::new();

        match event {
            RouterEvent::InterimCaption(caption) => {
                for (user, peer) in &self.peers {
                    if user == &caption.speaker {
                        continue;
                    }
                    peer.outbound.push_interim(
                        caption.speaker.clone(),
                        ServerMessage::InterimTranscript {
                            speaker_id: caption.speaker.clone(),
                            text: caption.text.clone(),
                            language: caption.language,
                            is_final: false,
                        },
                    );
                }
            }

            RouterEvent::FinalTranslation { utterance, results } => {
                for result in results {
                    let Some(peer) = self.peers.get(&result.listener) else {
                        continue;
                    };
                    let msg = ServerMessage::Translation {
                        speaker_id: utterance.speaker.clone(),
                        source_text: utterance.text.clone(),
                        translated_text: result.text.clone(),
                        source_lang: utterance.language,
                        target_lang: result.target_lang,
                        timestamp_ms: utterance.ended_ms,
                        is_final: true,
                        degraded: result.degraded,
                    };
                    let had_audio = result.audio.is_some();
                    match peer.outbound.push_final(msg, result.audio) {
                        PushOutcome::SlowConsumer => slow.push(result.listener),
                        PushOutcome::Queued if had_audio => {
                            counter!(metric_names::FRAMES_OUT).increment(1);
                        }
                        _ => {}
                    }
                }
            }

            RouterEvent::SpeakerError {
                speaker,
                stage,
                message,
            } => {
                if let Some(peer) = self.peers.get(&speaker) {
                    peer.outbound.push_control(ServerMessage::Error {
                        error: format!("{}: {message}", stage.as_str()),
                    });
                }
            }
        }

        for user in slow {
            warn!(session = %self.session.id(), user = %user, "disconnecting slow consumer");
            if self.depart(&user, Some(CloseReason::SlowConsumer)).await {
                return true;
            }
        }
        false
    }

    fn broadcast(&self, msg: &ServerMessage) {
        for peer in self.peers.values() {
            peer.outbound.push_control(msg.clone());
        }
    }

    fn broadcast_except(&self, skip: &UserId, msg: &ServerMessage) {
        for (user, peer) in &self.peers {
            if user != skip {
                peer.outbound.push_control(msg.clone());
            }
        }
    }

    fn publish_snapshot(&self) {
        let _ = self.listeners_tx.send(self.session.listener_snapshot());
    }
}
