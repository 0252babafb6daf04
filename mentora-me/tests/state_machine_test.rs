//! Interaction state machine tests: precedence, debounce and ambient loops

mod common;

use common::MockRenderer;
use mentora_me::{
    AvatarState, GestureConfig, GestureEvent, GestureScheduler, InteractionConfig, InteractionStateMachine,
};
use std::sync::Arc;
use std::time::Duration;

fn machine(config: InteractionConfig) -> (InteractionStateMachine, GestureScheduler, Arc<MockRenderer>) {
    let renderer = MockRenderer::new();
    let scheduler = GestureScheduler::new(GestureConfig::default(), renderer.clone()).unwrap();
    let machine = InteractionStateMachine::new(config, scheduler.clone()).unwrap();
    (machine, scheduler, renderer)
}

#[tokio::test(start_paused = true)]
async fn test_thinking_overrides_listening() {
    let (machine, _, _) = machine(InteractionConfig::default());
    machine.start();
    machine.set_listening(true);
    assert_eq!(machine.current_state(), AvatarState::Listening);
    machine.set_thinking(true);
    assert_eq!(machine.current_state(), AvatarState::Thinking);
    machine.set_thinking(false);
    assert_eq!(machine.current_state(), AvatarState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_speaking_requires_ready_message() {
    let (machine, _, _) = machine(InteractionConfig::default());
    machine.set_speech_requested(true);
    assert_eq!(machine.current_state(), AvatarState::Idle);
    machine.set_message_ready(true);
    assert_eq!(machine.current_state(), AvatarState::Speaking);
    machine.force_idle_speech();
    assert_eq!(machine.current_state(), AvatarState::Idle);
    assert!(!machine.signals().speech_requested);
}

#[tokio::test(start_paused = true)]
async fn test_transitions_fire_only_on_change() {
    let (machine, _, _) = machine(InteractionConfig::default());
    let mut transitions = machine.subscribe();
    machine.set_thinking(true);
    machine.set_thinking(true);
    machine.set_listening(true);

    let first = transitions.try_recv().unwrap();
    assert_eq!((first.from, first.to), (AvatarState::Idle, AvatarState::Thinking));
    assert!(transitions.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_typing_debounce_clears_after_quiet_period() {
    let (machine, _, _) = machine(InteractionConfig::default());
    machine.start();

    machine.on_typing_activity();
    assert_eq!(machine.current_state(), AvatarState::UserWriting);
    tokio::time::sleep(Duration::from_millis(500)).await;
    machine.on_typing_activity();
    tokio::time::sleep(Duration::from_millis(500)).await;
    machine.on_typing_activity();

    tokio::time::sleep(Duration::from_millis(1_999)).await;
    assert_eq!(machine.current_state(), AvatarState::UserWriting);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(machine.current_state(), AvatarState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_typing_hidden_behind_thinking() {
    let (machine, _, _) = machine(InteractionConfig::default());
    machine.set_thinking(true);
    machine.on_typing_activity();
    assert_eq!(machine.current_state(), AvatarState::Thinking);
    assert!(machine.signals().user_writing);
    machine.set_thinking(false);
    assert_eq!(machine.current_state(), AvatarState::UserWriting);
}

#[tokio::test(start_paused = true)]
async fn test_micro_gestures_stop_on_exit() {
    let (machine, scheduler, _) = machine(InteractionConfig::default());
    let mut events = scheduler.subscribe();
    machine.start();
    machine.set_thinking(true);

    tokio::time::sleep(Duration::from_millis(9_500)).await;
    let count_thinking = |events: &mut tokio::sync::broadcast::Receiver<GestureEvent>| {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, GestureEvent::Deferred { ref gesture, .. } if gesture == "thinking") {
                count += 1;
            }
        }
        count
    };
    assert_eq!(count_thinking(&mut events), 3);

    machine.set_thinking(false);
    tokio::time::sleep(Duration::from_millis(6_000)).await;
    assert_eq!(count_thinking(&mut events), 0);
}

#[tokio::test(start_paused = true)]
async fn test_enter_sets_configured_mood() {
    let (machine, scheduler, renderer) = machine(InteractionConfig::default());
    scheduler.mark_renderer_ready();
    machine.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    machine.set_thinking(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(renderer.moods(), vec!["neutral", "focused"]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_disables_loop() {
    let mut config = InteractionConfig::default();
    config.thinking.interval_ms = 0;
    let (machine, scheduler, _) = machine(config);
    machine.start();
    machine.set_thinking(true);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(scheduler.peek_all().iter().all(|r| r.gesture_name != "thinking"));
}
