//! Progressive speech synchronizer
//!
//! Streaming assistant text arrives in chunks. The synchronizer decides when
//! enough text exists to start speaking, starts each logical message at most
//! once, and feeds text that arrives afterwards to the same playback as
//! continuation segments.

use crate::arbiter::{AudioArbiter, AudioProducer, Revocations};
use crate::backend::SpeechBackend;
use crate::config::SpeechConfig;
use crate::error::SpeechError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_BUFFER_SIZE: usize = 256;
const ACCESS_ATTEMPTS: u32 = 5;

/// Stable identifier of one logical message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random id for text that arrived without an announced message
    pub fn generate() -> Self {
        Self(mentora_core::new_id())
    }

    /// Id for manual "speak this now" requests
    pub fn synthetic() -> Self {
        Self(format!("manual-{}", mentora_core::new_id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Observations published by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// The message has enough text to be voiced
    Eligible { id: MessageId },
    /// Playback began (emitted once per message)
    Started { id: MessageId, text: String },
    /// Text that arrived after the start was queued for the same playback
    SegmentQueued { id: MessageId, text: String },
    /// Playback finished, was stopped, or was preempted
    Ended { id: MessageId },
    /// The backend or the audio arbiter failed
    Failed { id: MessageId, error: String },
}

struct Playback {
    id: MessageId,
    segments: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SyncState {
    current: Option<MessageId>,
    text: String,
    // chars in `text`
    text_chars: usize,
    // a snapshot replaced text that was already voiced
    diverged: bool,
    done: bool,
    has_started: bool,
    eligible: bool,
    // prefix of `text` already handed to playback
    voiced: String,
    // spoken-message ledger
    last_spoken: Option<MessageId>,
    grace_timer: Option<JoinHandle<()>>,
    playback: Option<Playback>,
}

impl SyncState {
    fn cancel_grace_timer(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }

    fn reset_for(&mut self, id: MessageId) {
        self.cancel_grace_timer();
        // the previous message keeps playing what it already has
        if let Some(playback) = self.playback.as_mut() {
            playback.segments = None;
        }
        self.current = Some(id);
        self.text.clear();
        self.text_chars = 0;
        self.diverged = false;
        self.voiced.clear();
        self.done = false;
        self.has_started = false;
        self.eligible = false;
    }

    /// Append up to the remaining room; returns false when the chunk was cut
    fn append(&mut self, chunk: &str, max_chars: usize) -> bool {
        let room = max_chars.saturating_sub(self.text_chars);
        let mut taken = 0;
        for c in chunk.chars().take(room) {
            self.text.push(c);
            taken += 1;
        }
        self.text_chars += taken;
        // a short snapshot can grow back into the voiced prefix
        if self.diverged && self.text.len() <= self.voiced.len() + chunk.len() {
            self.diverged = !self.text.starts_with(self.voiced.as_str());
        }
        taken == chunk.chars().count()
    }

    fn replace_text(&mut self, text: &str, max_chars: usize) -> bool {
        self.text.clear();
        self.text_chars = 0;
        let complete = self.append(text, max_chars);
        self.diverged = !self.text.starts_with(self.voiced.as_str());
        complete
    }
}

/// How a playback task stopped without error
enum PlaybackEnd {
    Finished,
    Revoked,
}

struct Inner {
    config: SpeechConfig,
    backend: Arc<dyn SpeechBackend>,
    arbiter: Arc<AudioArbiter>,
    state: Mutex<SyncState>,
    events: broadcast::Sender<SpeechEvent>,
}

/// Decides when streamed text is spoken and guarantees at-most-once playback
pub struct ProgressiveSpeechSynchronizer {
    inner: Arc<Inner>,
}

impl ProgressiveSpeechSynchronizer {
    pub fn new(
        config: SpeechConfig,
        backend: Arc<dyn SpeechBackend>,
        arbiter: Arc<AudioArbiter>,
    ) -> Result<Self, SpeechError> {
        config.validate().map_err(SpeechError::Config)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backend,
                arbiter,
                state: Mutex::new(SyncState::default()),
                events,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.inner.events.subscribe()
    }

    /// Start tracking a new logical message (new conversation turn)
    pub fn begin_message(&self, id: MessageId) {
        debug!("Speech synchronizer tracking message {}", id);
        self.inner.state.lock().reset_for(id);
    }

    /// Append a streamed chunk to the current message
    pub fn on_text_delta(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        self.inner.ensure_message(&mut state);
        if !state.append(chunk, self.inner.config.max_text_chars) {
            warn!("Message text exceeds {} chars, truncating", self.inner.config.max_text_chars);
        }
        self.inner.evaluate(&mut state);
    }

    /// Replace the current message text with a full snapshot
    pub fn on_text_snapshot(&self, text: &str) {
        let mut state = self.inner.state.lock();
        self.inner.ensure_message(&mut state);
        if !state.replace_text(text, self.inner.config.max_text_chars) {
            warn!("Message text exceeds {} chars, truncating", self.inner.config.max_text_chars);
        }
        self.inner.evaluate(&mut state);
    }

    /// Terminal "done" signal for the current message
    pub fn on_text_complete(&self) {
        let mut state = self.inner.state.lock();
        if state.current.is_none() {
            debug!("Text completion without an active message, ignoring");
            return;
        }
        state.done = true;
        state.cancel_grace_timer();
        self.inner.evaluate(&mut state);
    }

    /// Speak `text` immediately, bypassing streaming eligibility.
    ///
    /// Preempts any current playback. Returns the synthetic id recorded in the
    /// ledger.
    pub fn speak_now(&self, text: &str) -> Result<MessageId, SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::Synchronizer("Cannot speak empty text".to_string()));
        }
        if text.chars().count() > self.inner.config.max_text_chars {
            return Err(SpeechError::Synchronizer(format!(
                "Text too long (max {} chars)",
                self.inner.config.max_text_chars
            )));
        }

        let id = MessageId::synthetic();
        let mut state = self.inner.state.lock();
        state.cancel_grace_timer();
        state.last_spoken = Some(id.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(text.to_string());
        info!("Manual speech request {} ({} chars)", id, text.chars().count());
        self.inner.launch(&mut state, id.clone(), text.to_string(), rx, None);
        Ok(id)
    }

    /// Stop playback and suppress automatic speech for the current message
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.inner.state.lock();
            state.cancel_grace_timer();
            if state.current.is_some() {
                state.has_started = true;
            }
            state.playback.take()
        };

        if let Some(playback) = previous {
            playback.task.abort();
            info!("Speech for {} stopped", playback.id);
            self.inner.emit(SpeechEvent::Ended { id: playback.id });
        }
        if let Err(e) = self.inner.backend.stop().await {
            warn!("Speech backend stop failed: {}", e);
        }
        self.inner.arbiter.release_access(AudioProducer::SpeechSynthesis).await;
    }

    pub fn last_spoken(&self) -> Option<MessageId> {
        self.inner.state.lock().last_spoken.clone()
    }

    pub fn current_message(&self) -> Option<MessageId> {
        self.inner.state.lock().current.clone()
    }

    pub fn accumulated_text(&self) -> String {
        self.inner.state.lock().text.clone()
    }

    /// Whether the current message has started speaking
    pub fn has_started(&self) -> bool {
        self.inner.state.lock().has_started
    }

    /// Whether a playback task is running
    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playback.is_some()
    }
}

impl Inner {
    fn emit(&self, event: SpeechEvent) {
        debug!(?event, "speech event");
        let _ = self.events.send(event);
    }

    fn ensure_message(&self, state: &mut SyncState) {
        if state.current.is_none() {
            let id = MessageId::generate();
            warn!("Text arrived before a message was announced; tracking as {}", id);
            state.reset_for(id);
        }
    }

    fn evaluate(self: &Arc<Self>, state: &mut SyncState) {
        let Some(id) = state.current.clone() else {
            return;
        };

        if state.has_started {
            self.queue_continuation(state, &id);
            return;
        }
        if !self.config.auto_speak {
            return;
        }
        if state.last_spoken.as_ref() == Some(&id) {
            debug!("Message {} already spoken, ignoring update", id);
            return;
        }

        // only the comparison with the threshold matters
        let len = state
            .text
            .trim()
            .chars()
            .take(self.config.progressive_start_chars + 1)
            .count();
        if len == 0 {
            return;
        }
        if len <= self.config.progressive_start_chars && !state.done {
            return;
        }

        if !state.eligible {
            state.eligible = true;
            self.emit(SpeechEvent::Eligible { id: id.clone() });
        }

        if state.done || self.config.start_grace_ms == 0 {
            state.cancel_grace_timer();
            self.start(state, id);
        } else if state.grace_timer.is_none() {
            let inner = Arc::clone(self);
            let grace = Duration::from_millis(self.config.start_grace_ms);
            state.grace_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let mut state = inner.state.lock();
                state.grace_timer = None;
                if state.current.as_ref() == Some(&id) && !state.has_started {
                    inner.start(&mut state, id);
                }
            }));
        }
    }

    fn start(self: &Arc<Self>, state: &mut SyncState, id: MessageId) {
        if state.has_started || state.last_spoken.as_ref() == Some(&id) {
            return;
        }
        state.has_started = true;
        state.last_spoken = Some(id.clone());

        let first = state.text.clone();
        state.voiced = first.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(first.clone());
        let segments = if state.done { None } else { Some(tx) };

        info!("Starting speech for message {} ({} chars)", id, first.chars().count());
        self.launch(state, id, first, rx, segments);
    }

    fn launch(
        self: &Arc<Self>,
        state: &mut SyncState,
        id: MessageId,
        first: String,
        rx: mpsc::UnboundedReceiver<String>,
        segments: Option<mpsc::UnboundedSender<String>>,
    ) {
        let preempted = match state.playback.take() {
            Some(previous) => {
                previous.task.abort();
                info!("Message {} preempts playback of {}", id, previous.id);
                self.emit(SpeechEvent::Ended { id: previous.id });
                true
            }
            None => false,
        };

        let inner = Arc::clone(self);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            inner.run_playback(task_id, first, rx, preempted).await;
        });
        state.playback = Some(Playback { id, segments, task });
    }

    fn queue_continuation(&self, state: &mut SyncState, id: &MessageId) {
        let Some(playback) = state.playback.as_mut() else {
            return;
        };
        if &playback.id != id {
            return;
        }
        let Some(sender) = playback.segments.as_ref() else {
            return;
        };

        if state.diverged {
            debug!("Text for {} was rewritten after speech started, skipping continuation", id);
            if state.done {
                playback.segments = None;
            }
            return;
        }

        let pending = &state.text[state.voiced.len()..];
        let cut = if state.done {
            pending.len()
        } else {
            last_sentence_boundary(pending).unwrap_or(0)
        };

        if cut > 0 {
            let segment = pending[..cut].to_string();
            state.voiced.push_str(&segment);
            if sender.send(segment.clone()).is_ok() {
                self.emit(SpeechEvent::SegmentQueued {
                    id: id.clone(),
                    text: segment,
                });
            }
        }

        if state.done {
            playback.segments = None;
        }
    }

    async fn run_playback(
        self: Arc<Self>,
        id: MessageId,
        first: String,
        mut segments: mpsc::UnboundedReceiver<String>,
        preempted: bool,
    ) {
        if preempted {
            if let Err(e) = self.backend.stop().await {
                warn!("Failed to stop preempted speech: {}", e);
            }
        }

        let outcome = self.play_segments(&id, first, &mut segments).await;
        if !matches!(outcome, Ok(PlaybackEnd::Revoked)) {
            self.arbiter.release_access(AudioProducer::SpeechSynthesis).await;
        }

        match outcome {
            Ok(PlaybackEnd::Finished) => self.emit(SpeechEvent::Ended { id: id.clone() }),
            Ok(PlaybackEnd::Revoked) => {
                info!("Audio for message {} was revoked, ending playback", id);
                self.emit(SpeechEvent::Ended { id: id.clone() });
            }
            Err(e) => {
                error!("Speech for message {} failed: {}", id, e);
                self.emit(SpeechEvent::Failed {
                    id: id.clone(),
                    error: e.to_string(),
                });
            }
        }

        // drops the segment sender; `has_started` stays set so the message is not restarted
        let mut state = self.state.lock();
        if state.playback.as_ref().map(|p| &p.id) == Some(&id) {
            state.playback = None;
        }
    }

    async fn play_segments(
        &self,
        id: &MessageId,
        first: String,
        segments: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<PlaybackEnd, SpeechError> {
        let grant = self.acquire_audio().await?;
        let mut revocations = self.arbiter.subscribe_revocations();
        self.emit(SpeechEvent::Started {
            id: id.clone(),
            text: first,
        });

        loop {
            let segment = tokio::select! {
                segment = segments.recv() => match segment {
                    Some(segment) => segment,
                    None => return Ok(PlaybackEnd::Finished),
                },
                _ = revoked(&mut revocations, grant) => return Ok(PlaybackEnd::Revoked),
            };
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            if self.arbiter.revocation_count(AudioProducer::SpeechSynthesis) != grant {
                return Ok(PlaybackEnd::Revoked);
            }

            let utterance = self.backend.speak(segment, &self.config.voice).await?;
            tokio::select! {
                result = utterance.wait() => result?,
                _ = revoked(&mut revocations, grant) => {
                    // the utterance may have started after the arbiter's cancel passes
                    if let Err(e) = self.backend.stop().await {
                        warn!("Failed to stop revoked speech: {}", e);
                    }
                    return Ok(PlaybackEnd::Revoked);
                }
            }
        }
    }

    // retries while the arbiter is settling from a previous teardown
    async fn acquire_audio(&self) -> Result<u64, SpeechError> {
        let backoff = Duration::from_millis(self.config.arbiter.settle_delay_ms.max(10));
        for attempt in 1..=ACCESS_ATTEMPTS {
            if let Some(grant) = self.arbiter.request_grant(AudioProducer::SpeechSynthesis).await {
                return Ok(grant);
            }
            debug!("Audio busy, retrying ({}/{})", attempt, ACCESS_ATTEMPTS);
            tokio::time::sleep(backoff).await;
        }
        Err(SpeechError::AudioAccessDenied(AudioProducer::SpeechSynthesis))
    }
}

/// Resolves once speech synthesis has lost the grant numbered `grant`
async fn revoked(revocations: &mut watch::Receiver<Revocations>, grant: u64) {
    loop {
        let current = revocations.borrow_and_update().count(AudioProducer::SpeechSynthesis);
        if current != grant {
            return;
        }
        if revocations.changed().await.is_err() {
            // arbiter dropped; nothing can revoke any more
            std::future::pending::<()>().await;
        }
    }
}

fn last_sentence_boundary(text: &str) -> Option<usize> {
    text.rfind(|c| matches!(c, '.' | '!' | '?' | '\n')).map(|i| i + 1)
}
