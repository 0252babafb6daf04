//! Avatar engine facade
//!
//! Wires the text stream and UI events to the gesture scheduler, the
//! interaction state machine, progressive speech and interaction analytics.

use crate::analytics::{InteractionEvent, InteractionKind, InteractionTracker};
use crate::config::EngineConfig;
use crate::content_analyzer::{ContentAnalysis, ContentAnalyzer};
use crate::error::AvatarError;
use crate::gesture_scheduler::{GestureEvent, GesturePriority, GestureScheduler};
use crate::renderer::{CharacterRenderer, HoverPhase, Position, RendererAudioChannel};
use crate::state_machine::{AvatarState, InteractionStateMachine, StateTransition};
use mentora_spk::{
    AudioArbiter, AudioProducer, BackendAudioChannel, MessageId, ProgressiveSpeechSynchronizer, SpeechBackend,
    SpeechEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct AvatarEngine {
    config: EngineConfig,
    scheduler: GestureScheduler,
    machine: InteractionStateMachine,
    arbiter: Arc<AudioArbiter>,
    synchronizer: ProgressiveSpeechSynchronizer,
    analyzer: ContentAnalyzer,
    tracker: InteractionTracker,
    session_id: String,
    user_id: Mutex<Option<String>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AvatarEngine {
    pub fn new(
        config: EngineConfig,
        renderer: Arc<dyn CharacterRenderer>,
        backend: Arc<dyn SpeechBackend>,
    ) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;

        let scheduler = GestureScheduler::new(config.avatar.gestures.clone(), Arc::clone(&renderer))?;
        let machine = InteractionStateMachine::new(config.avatar.interaction.clone(), scheduler.clone())?;
        let arbiter = Arc::new(AudioArbiter::new(
            config.speech.arbiter.clone(),
            Arc::new(RendererAudioChannel::new(renderer)),
            Arc::new(BackendAudioChannel::new(Arc::clone(&backend))),
        )?);
        let synchronizer = ProgressiveSpeechSynchronizer::new(config.speech.clone(), backend, Arc::clone(&arbiter))?;
        let analyzer = ContentAnalyzer::new(config.avatar.analyzer.clone())?;
        let tracker = InteractionTracker::new(config.avatar.analytics.clone())?
            .with_confidence_cap(config.avatar.analyzer.confidence_cap);

        Ok(Self {
            config,
            scheduler,
            machine,
            arbiter,
            synchronizer,
            analyzer,
            tracker,
            session_id: mentora_core::new_id(),
            user_id: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    /// Start the state machine and follow speech lifecycle events
    pub fn start(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            warn!("Avatar engine already started");
            return;
        }

        let mut events = self.synchronizer.subscribe();
        let machine = self.machine.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => apply_speech_event(&machine, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Speech event listener lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        self.machine.start();
        info!("Avatar engine started (session {})", self.session_id);
    }

    /// Renderer finished loading; deferred gestures start playing
    pub fn renderer_ready(&self) {
        self.scheduler.mark_renderer_ready();
    }

    /// Attribute subsequent interaction events to `user_id`
    pub fn set_user(&self, user_id: impl Into<String>) {
        *self.user_id.lock() = Some(user_id.into());
    }

    // text stream

    pub fn on_new_logical_message(&self, id: impl Into<MessageId>) {
        self.synchronizer.begin_message(id.into());
    }

    pub fn on_text_delta(&self, chunk: &str) {
        self.synchronizer.on_text_delta(chunk);
    }

    pub fn on_text_snapshot(&self, text: &str) {
        self.synchronizer.on_text_snapshot(text);
    }

    /// Finish the current message and gesture to its content
    pub fn on_text_complete(&self) -> ContentAnalysis {
        self.synchronizer.on_text_complete();
        let analysis = self.analyze_for_user(&self.synchronizer.accumulated_text());
        self.enqueue_recommendation(&analysis);
        analysis
    }

    // UI events

    /// React to a message the user sent
    pub fn on_user_message(&self, text: &str) -> ContentAnalysis {
        let analysis = self.analyze_for_user(text);
        if !analysis.tags.domain_terms.is_empty() {
            let event = self.event(InteractionKind::SqlQuery).with_keywords(analysis.tags.domain_terms.clone());
            self.tracker.record(event);
        }
        self.enqueue_recommendation(&analysis);
        analysis
    }

    pub async fn on_click(&self, position: Position) -> bool {
        let interaction = &self.config.avatar.interaction;
        let gesture = interaction.click_gesture.clone();
        self.tracker.record(self.event(InteractionKind::Click).with_gesture(gesture.clone()));

        let request = self
            .scheduler
            .request(gesture)
            .with_priority(GesturePriority::High)
            .mirrored(position.x < 0.5);
        let accepted = self.scheduler.enqueue(request);
        let (x, y) = position.to_look_target();
        self.scheduler.look_at(x, y, interaction.look_at_ms).await;
        accepted
    }

    pub async fn on_touch_start(&self, position: Position) {
        let (x, y) = position.to_look_target();
        self.scheduler.look_at(x, y, self.config.avatar.interaction.look_at_ms).await;
    }

    /// A touch ended after `held`; long presses play the long-press gesture
    pub fn on_touch_end(&self, position: Position, held: Duration) -> bool {
        let interaction = &self.config.avatar.interaction;
        let gesture = if held >= Duration::from_millis(interaction.long_press_ms) {
            interaction.long_press_gesture.clone()
        } else {
            interaction.touch_gesture.clone()
        };
        self.tracker.record(self.event(InteractionKind::Touch).with_gesture(gesture.clone()));

        let request = self
            .scheduler
            .request(gesture)
            .with_priority(GesturePriority::High)
            .mirrored(position.x < 0.5);
        self.scheduler.enqueue(request)
    }

    pub async fn on_hover(&self, phase: HoverPhase) {
        match phase {
            HoverPhase::Enter => {
                self.tracker.record(self.event(InteractionKind::Hover));
                self.scheduler
                    .look_at(0.0, 0.0, self.config.avatar.interaction.look_at_ms)
                    .await;
            }
            HoverPhase::Leave => debug!("Pointer left the character"),
        }
    }

    pub fn on_typing_activity(&self) {
        self.machine.on_typing_activity();
    }

    /// Microphone capture on/off; starting to record silences the avatar
    pub async fn set_recording(&self, recording: bool) {
        self.machine.set_listening(recording);
        if recording {
            self.tracker.record(self.event(InteractionKind::VoiceCommand));
            if self.synchronizer.is_playing() {
                self.synchronizer.stop().await;
            }
        }
    }

    pub fn set_thinking(&self, thinking: bool) {
        self.machine.set_thinking(thinking);
    }

    pub fn speak_now(&self, text: &str) -> Result<MessageId, AvatarError> {
        Ok(self.synchronizer.speak_now(text)?)
    }

    pub async fn stop_speech(&self) {
        self.synchronizer.stop().await;
    }

    /// Enqueue a named gesture from an external caller
    pub fn play_gesture(&self, name: &str, priority: GesturePriority) -> bool {
        let accepted = self.scheduler.enqueue(self.scheduler.request(name).with_priority(priority));
        if accepted {
            self.tracker.record(self.event(InteractionKind::Gesture).with_gesture(name));
        }
        accepted
    }

    /// Character audio goes through the arbiter like speech does
    pub async fn request_character_audio(&self) -> bool {
        self.arbiter.request_access(AudioProducer::CharacterAudio).await
    }

    pub async fn release_character_audio(&self) {
        self.arbiter.release_access(AudioProducer::CharacterAudio).await;
    }

    // accessors

    pub fn state(&self) -> AvatarState {
        self.machine.current_state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &GestureScheduler {
        &self.scheduler
    }

    pub fn state_machine(&self) -> &InteractionStateMachine {
        &self.machine
    }

    pub fn synchronizer(&self) -> &ProgressiveSpeechSynchronizer {
        &self.synchronizer
    }

    pub fn arbiter(&self) -> &AudioArbiter {
        &self.arbiter
    }

    pub fn analyzer(&self) -> &ContentAnalyzer {
        &self.analyzer
    }

    pub fn tracker(&self) -> &InteractionTracker {
        &self.tracker
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe_gestures(&self) -> broadcast::Receiver<GestureEvent> {
        self.scheduler.subscribe()
    }

    pub fn subscribe_states(&self) -> broadcast::Receiver<StateTransition> {
        self.machine.subscribe()
    }

    pub fn subscribe_speech(&self) -> broadcast::Receiver<SpeechEvent> {
        self.synchronizer.subscribe()
    }

    fn analyze_for_user(&self, text: &str) -> ContentAnalysis {
        let analysis = self.analyzer.analyze(text);
        match self.user_id.lock().as_deref() {
            Some(user_id) => self.tracker.recommend(user_id, analysis),
            None => analysis,
        }
    }

    fn enqueue_recommendation(&self, analysis: &ContentAnalysis) {
        if let Some(gesture) = &analysis.recommended_gesture {
            debug!(
                "Content suggests '{}' ({:?}, confidence {:.2})",
                gesture, analysis.source, analysis.confidence
            );
            let request = self
                .scheduler
                .request(gesture.as_str())
                .with_priority(analysis.suggested_priority());
            self.scheduler.enqueue(request);
        }
    }

    fn event(&self, kind: InteractionKind) -> InteractionEvent {
        let event = InteractionEvent::new(kind, self.session_id.clone());
        match self.user_id.lock().clone() {
            Some(user_id) => event.for_user(user_id),
            None => event,
        }
    }
}

impl Drop for AvatarEngine {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

fn apply_speech_event(machine: &InteractionStateMachine, event: &SpeechEvent) {
    match event {
        SpeechEvent::Eligible { .. } => machine.set_message_ready(true),
        SpeechEvent::Started { .. } => {
            machine.set_speech_requested(true);
            machine.set_message_ready(true);
        }
        SpeechEvent::SegmentQueued { .. } => {}
        SpeechEvent::Ended { .. } => machine.force_idle_speech(),
        SpeechEvent::Failed { id, error } => {
            warn!("Speech for {} failed: {}", id, error);
            machine.force_idle_speech();
        }
    }
}
