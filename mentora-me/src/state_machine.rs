//! Interaction state machine
//!
//! The avatar state is never stored as independent truth: it is derived from
//! the signal record every time a signal changes. Side effects (mood and the
//! periodic micro-gesture loop) run only when the derived value changes, and
//! the outgoing state's loop is always aborted before the incoming one starts.

use crate::config::InteractionConfig;
use crate::error::AvatarError;
use crate::gesture_scheduler::{GesturePriority, GestureScheduler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvatarState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    UserWriting,
}

impl AvatarState {
    pub const ALL: [AvatarState; 5] = [
        AvatarState::Idle,
        AvatarState::Listening,
        AvatarState::Thinking,
        AvatarState::Speaking,
        AvatarState::UserWriting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarState::Idle => "idle",
            AvatarState::Listening => "listening",
            AvatarState::Thinking => "thinking",
            AvatarState::Speaking => "speaking",
            AvatarState::UserWriting => "user_writing",
        }
    }
}

/// Raw inputs the avatar state is derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSignals {
    pub thinking: bool,
    pub listening: bool,
    pub speech_requested: bool,
    pub message_ready: bool,
    pub user_writing: bool,
}

/// Precedence: thinking, listening, speaking, user writing, idle
pub fn derive_state(signals: &InteractionSignals) -> AvatarState {
    if signals.thinking {
        AvatarState::Thinking
    } else if signals.listening {
        AvatarState::Listening
    } else if signals.speech_requested && signals.message_ready {
        AvatarState::Speaking
    } else if signals.user_writing {
        AvatarState::UserWriting
    } else {
        AvatarState::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AvatarState,
    pub to: AvatarState,
    pub timestamp_ms: i64,
}

struct MachineState {
    signals: InteractionSignals,
    current: AvatarState,
    started: bool,
    ambient: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
    typing_generation: u64,
}

struct Inner {
    config: InteractionConfig,
    scheduler: GestureScheduler,
    state: Mutex<MachineState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(task) = state.ambient.take() {
            task.abort();
        }
        if let Some(task) = state.debounce.take() {
            task.abort();
        }
    }
}

/// Cloneable handle to the interaction state machine
#[derive(Clone)]
pub struct InteractionStateMachine {
    inner: Arc<Inner>,
}

impl InteractionStateMachine {
    pub fn new(config: InteractionConfig, scheduler: GestureScheduler) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        let (transitions, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                state: Mutex::new(MachineState {
                    signals: InteractionSignals::default(),
                    current: AvatarState::Idle,
                    started: false,
                    ambient: None,
                    debounce: None,
                    typing_generation: 0,
                }),
                transitions,
            }),
        })
    }

    /// Run the enter action of the current state; later changes run their own
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.started {
            return;
        }
        state.started = true;
        let current = state.current;
        state.ambient = enter(&self.inner, current);
        info!("Interaction state machine started in {}", current.as_str());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.inner.transitions.subscribe()
    }

    pub fn current_state(&self) -> AvatarState {
        self.inner.state.lock().current
    }

    pub fn signals(&self) -> InteractionSignals {
        self.inner.state.lock().signals
    }

    pub fn set_thinking(&self, thinking: bool) {
        self.update(|s| s.thinking = thinking);
    }

    pub fn set_listening(&self, listening: bool) {
        self.update(|s| s.listening = listening);
    }

    pub fn set_speech_requested(&self, requested: bool) {
        self.update(|s| s.speech_requested = requested);
    }

    pub fn set_message_ready(&self, ready: bool) {
        self.update(|s| s.message_ready = ready);
    }

    /// Clear both speech signals after playback ends or fails
    pub fn force_idle_speech(&self) {
        self.update(|s| {
            s.speech_requested = false;
            s.message_ready = false;
        });
    }

    /// Assert `user_writing` and restart the debounce window
    pub fn on_typing_activity(&self) {
        let mut state = self.inner.state.lock();
        state.typing_generation += 1;
        let generation = state.typing_generation;
        if let Some(task) = state.debounce.take() {
            task.abort();
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let window = Duration::from_millis(self.inner.config.typing_debounce_ms);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                if state.typing_generation == generation {
                    state.debounce = None;
                    state.signals.user_writing = false;
                    debug!("Typing debounce expired");
                    recompute(&inner, &mut state);
                }
            }
        }));

        state.signals.user_writing = true;
        recompute(&self.inner, &mut state);
    }

    fn update(&self, mutate: impl FnOnce(&mut InteractionSignals)) {
        let mut state = self.inner.state.lock();
        mutate(&mut state.signals);
        recompute(&self.inner, &mut state);
    }
}

fn recompute(inner: &Inner, state: &mut MachineState) {
    let next = derive_state(&state.signals);
    if next == state.current {
        return;
    }
    let from = state.current;

    // exit before enter
    if let Some(task) = state.ambient.take() {
        task.abort();
    }
    state.current = next;
    if state.started {
        state.ambient = enter(inner, next);
    }

    debug!("Avatar state {} -> {}", from.as_str(), next.as_str());
    let _ = inner.transitions.send(StateTransition {
        from,
        to: next,
        timestamp_ms: mentora_core::now_millis(),
    });
}

fn enter(inner: &Inner, state: AvatarState) -> Option<JoinHandle<()>> {
    let behavior = inner.config.behavior_for(state).clone();
    let cycles = !behavior.micro_gestures.is_empty() && behavior.interval_ms > 0;
    if behavior.mood.is_none() && !cycles {
        return None;
    }

    let scheduler = inner.scheduler.clone();
    Some(tokio::spawn(async move {
        if let Some(mood) = &behavior.mood {
            scheduler.set_mood(mood).await;
        }
        if !cycles {
            return;
        }
        let period = Duration::from_millis(behavior.interval_ms);
        for gesture in behavior.micro_gestures.iter().cycle() {
            tokio::time::sleep(period).await;
            let request = scheduler.request(gesture.as_str()).with_priority(GesturePriority::Low);
            scheduler.enqueue(request);
        }
    }))
}
