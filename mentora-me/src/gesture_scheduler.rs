//! Priority gesture scheduler
//!
//! Owns the renderer handle and plays at most one gesture at a time. Pending
//! requests are held in a bounded queue ordered by priority, FIFO within a
//! priority. When the queue is full the oldest `Low` entry is evicted to make
//! room; if there is none the new request is dropped.

use crate::config::GestureConfig;
use crate::error::AvatarError;
use crate::renderer::CharacterRenderer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_DURATION_SECS: f64 = 2.5;
const DEFAULT_TRANSITION_MS: u64 = 800;
const MAX_GESTURE_DURATION_SECS: f64 = 300.0;
const MAX_TRANSITION_MS: u64 = 10_000;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GesturePriority {
    Low,
    Normal,
    High,
}

/// A single gesture cue waiting for (or holding) the renderer
#[derive(Debug, Clone)]
pub struct GestureRequest {
    pub id: String,
    pub gesture_name: String,
    pub duration_secs: f64,
    pub mirror: bool,
    pub transition_ms: u64,
    pub priority: GesturePriority,
    pub enqueued_at: Instant,
    sequence: u64,
}

impl GestureRequest {
    pub fn new(gesture_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            gesture_name: gesture_name.into(),
            duration_secs: DEFAULT_DURATION_SECS,
            mirror: false,
            transition_ms: DEFAULT_TRANSITION_MS,
            priority: GesturePriority::Normal,
            enqueued_at: Instant::now(),
            sequence: 0,
        }
    }

    /// Request with duration and transition taken from `config`
    pub fn from_config(gesture_name: impl Into<String>, config: &GestureConfig) -> Self {
        Self::new(gesture_name)
            .with_duration(config.default_duration_secs)
            .with_transition(config.default_transition_ms)
    }

    pub fn with_priority(mut self, priority: GesturePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_transition(mut self, transition_ms: u64) -> Self {
        self.transition_ms = transition_ms;
        self
    }

    pub fn mirrored(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }
}

/// Scheduler lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GestureEvent {
    /// Admitted to the queue
    Accepted { id: String, gesture: String },
    /// Admitted, but held until the renderer reports ready
    Deferred { id: String, gesture: String },
    Started { id: String, gesture: String },
    Completed { id: String, gesture: String },
    Failed { id: String, gesture: String, error: String },
    /// Removed from a full queue to make room
    Evicted { id: String, gesture: String },
    /// Rejected because the queue was full and held no `Low` entry
    Dropped { id: String, gesture: String },
    Cleared { removed: usize },
}

struct SchedulerState {
    queue: Vec<GestureRequest>,
    current: Option<GestureRequest>,
    task: Option<JoinHandle<()>>,
    renderer_ready: bool,
    next_sequence: u64,
}

struct Inner {
    config: GestureConfig,
    renderer: Arc<dyn CharacterRenderer>,
    state: Mutex<SchedulerState>,
    events: broadcast::Sender<GestureEvent>,
}

/// Cloneable handle to the gesture scheduler
#[derive(Clone)]
pub struct GestureScheduler {
    inner: Arc<Inner>,
}

impl GestureScheduler {
    pub fn new(config: GestureConfig, renderer: Arc<dyn CharacterRenderer>) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                renderer,
                state: Mutex::new(SchedulerState {
                    queue: Vec::new(),
                    current: None,
                    task: None,
                    renderer_ready: false,
                    next_sequence: 0,
                }),
                events,
            }),
        })
    }

    pub fn config(&self) -> &GestureConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GestureEvent> {
        self.inner.events.subscribe()
    }

    /// Request for `gesture_name` with configured defaults
    pub fn request(&self, gesture_name: impl Into<String>) -> GestureRequest {
        GestureRequest::from_config(gesture_name, &self.inner.config)
    }

    /// Admit a request; returns `false` if it was dropped because the queue is full
    pub fn enqueue(&self, request: GestureRequest) -> bool {
        let request = self.normalize(request);
        let accepted = {
            let mut state = self.inner.state.lock();
            let mut request = request;
            request.sequence = state.next_sequence;
            request.enqueued_at = Instant::now();
            state.next_sequence += 1;

            if state.queue.len() >= self.inner.config.max_queue_size {
                let oldest_low = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.priority == GesturePriority::Low)
                    .min_by_key(|(_, r)| r.sequence)
                    .map(|(index, _)| index);
                match oldest_low {
                    Some(index) => {
                        let evicted = state.queue.remove(index);
                        debug!("Evicted gesture '{}' to admit '{}'", evicted.gesture_name, request.gesture_name);
                        self.emit(GestureEvent::Evicted {
                            id: evicted.id,
                            gesture: evicted.gesture_name,
                        });
                    }
                    None => {
                        debug!("Gesture queue full, dropping '{}'", request.gesture_name);
                        self.emit(GestureEvent::Dropped {
                            id: request.id,
                            gesture: request.gesture_name,
                        });
                        return false;
                    }
                }
            }

            let event = if state.renderer_ready {
                GestureEvent::Accepted {
                    id: request.id.clone(),
                    gesture: request.gesture_name.clone(),
                }
            } else {
                GestureEvent::Deferred {
                    id: request.id.clone(),
                    gesture: request.gesture_name.clone(),
                }
            };
            state.queue.push(request);
            state
                .queue
                .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
            event
        };
        self.emit(accepted);
        process_next(&self.inner);
        true
    }

    /// Drop every queued gesture and abort the one playing
    pub fn clear(&self) {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.task.take() {
                task.abort();
            }
            let playing = state.current.take().map_or(0, |_| 1);
            let queued = state.queue.len();
            state.queue.clear();
            playing + queued
        };
        debug!("Cleared {} gesture(s)", removed);
        self.emit(GestureEvent::Cleared { removed });
    }

    /// Release deferred requests once the renderer can play them
    pub fn mark_renderer_ready(&self) {
        let first = {
            let mut state = self.inner.state.lock();
            let first = !state.renderer_ready;
            state.renderer_ready = true;
            first
        };
        if first {
            info!("Renderer '{}' ready", self.inner.renderer.renderer_name());
        }
        process_next(&self.inner);
    }

    pub fn is_renderer_ready(&self) -> bool {
        self.inner.state.lock().renderer_ready
    }

    /// Fails with `RendererNotReady` until `mark_renderer_ready` was called
    pub fn ensure_ready(&self) -> Result<(), AvatarError> {
        if self.is_renderer_ready() {
            Ok(())
        } else {
            Err(AvatarError::RendererNotReady)
        }
    }

    /// Queued requests in execution order (excludes the playing gesture)
    pub fn peek_all(&self) -> Vec<GestureRequest> {
        self.inner.state.lock().queue.clone()
    }

    /// The gesture currently holding the renderer
    pub fn current(&self) -> Option<GestureRequest> {
        self.inner.state.lock().current.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_empty() && state.current.is_none()
    }

    pub async fn set_mood(&self, mood: &str) {
        if let Err(e) = self.ensure_ready() {
            debug!("{}, skipping mood '{}'", e, mood);
            return;
        }
        let timeout = Duration::from_millis(self.inner.config.play_timeout_ms);
        match tokio::time::timeout(timeout, self.inner.renderer.set_mood(mood)).await {
            Ok(Ok(())) => debug!("Mood set to '{}'", mood),
            Ok(Err(e)) => warn!("Failed to set mood '{}': {}", mood, e),
            Err(_) => warn!("Setting mood '{}' timed out", mood),
        }
    }

    pub async fn look_at(&self, x: f64, y: f64, duration_ms: u64) {
        if let Err(e) = self.ensure_ready() {
            debug!("{}, skipping look-at", e);
            return;
        }
        let timeout = Duration::from_millis(self.inner.config.play_timeout_ms);
        match tokio::time::timeout(timeout, self.inner.renderer.look_at(x, y, duration_ms)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Look-at failed: {}", e),
            Err(_) => warn!("Look-at timed out"),
        }
    }

    fn normalize(&self, mut request: GestureRequest) -> GestureRequest {
        let config = &self.inner.config;
        if !config.catalog.is_empty() && !config.catalog.iter().any(|g| g == &request.gesture_name) {
            warn!(
                "{}; playing '{}' instead",
                AvatarError::UnknownGesture(request.gesture_name.clone()),
                config.fallback_gesture
            );
            request.gesture_name = config.fallback_gesture.clone();
        }
        if !request.duration_secs.is_finite() || request.duration_secs <= 0.0 {
            request.duration_secs = config.default_duration_secs;
        }
        request.duration_secs = request.duration_secs.min(MAX_GESTURE_DURATION_SECS);
        request.transition_ms = request.transition_ms.min(MAX_TRANSITION_MS);
        request
    }

    fn emit(&self, event: GestureEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

/// Start the head of the queue if the renderer is free
fn process_next(inner: &Arc<Inner>) {
    let mut state = inner.state.lock();
    if state.current.is_some() || !state.renderer_ready || state.queue.is_empty() {
        return;
    }
    let request = state.queue.remove(0);
    state.current = Some(request.clone());
    let task_inner = Arc::clone(inner);
    state.task = Some(tokio::spawn(async move {
        play(&task_inner, &request).await;
        finish(&task_inner, &request.id);
    }));
}

async fn play(inner: &Inner, request: &GestureRequest) {
    let timeout = Duration::from_millis(inner.config.play_timeout_ms);
    let call = inner.renderer.play_gesture(
        &request.gesture_name,
        request.duration_secs,
        request.mirror,
        request.transition_ms,
    );
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AvatarError::GestureExecution(format!(
            "play_gesture timed out after {} ms",
            inner.config.play_timeout_ms
        ))),
    };

    match result {
        Ok(()) => {
            debug!("Playing gesture '{}' for {:.2}s", request.gesture_name, request.duration_secs);
            let _ = inner.events.send(GestureEvent::Started {
                id: request.id.clone(),
                gesture: request.gesture_name.clone(),
            });
            tokio::time::sleep(Duration::from_secs_f64(request.duration_secs)).await;
            let _ = inner.events.send(GestureEvent::Completed {
                id: request.id.clone(),
                gesture: request.gesture_name.clone(),
            });
        }
        Err(e) => {
            warn!("Gesture '{}' failed: {}", request.gesture_name, e);
            let _ = inner.events.send(GestureEvent::Failed {
                id: request.id.clone(),
                gesture: request.gesture_name.clone(),
                error: e.to_string(),
            });
        }
    }
}

fn finish(inner: &Arc<Inner>, id: &str) {
    {
        let mut state = inner.state.lock();
        match &state.current {
            Some(current) if current.id == id => {
                state.current = None;
                state.task = None;
            }
            // cleared or superseded while playing
            _ => return,
        }
    }
    process_next(inner);
}
