//! End-to-end tests for the avatar engine facade

mod common;

use common::{MockBackend, MockRenderer};
use mentora_me::{
    AvatarEngine, AvatarState, EngineConfig, GestureEvent, GesturePriority, HoverPhase, InteractionKind, Position,
    RecommendationSource,
};
use mentora_spk::{AudioProducer, SpeechEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    engine: AvatarEngine,
    renderer: Arc<MockRenderer>,
    backend: Arc<MockBackend>,
}

fn fixture() -> Fixture {
    let renderer = MockRenderer::new();
    let backend = MockBackend::new(500);
    let engine = AvatarEngine::new(EngineConfig::default(), renderer.clone(), backend.clone()).unwrap();
    engine.start();
    engine.renderer_ready();
    Fixture {
        engine,
        renderer,
        backend,
    }
}

#[tokio::test(start_paused = true)]
async fn test_streamed_message_is_spoken_once_and_returns_to_idle() {
    let f = fixture();
    f.engine.on_new_logical_message("m1");
    f.engine.on_text_delta("Hello there, ");
    f.engine.on_text_delta("nice to see you.");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.engine.state(), AvatarState::Speaking);

    f.engine.on_text_snapshot("Hello there, nice to see you.");
    let analysis = f.engine.on_text_complete();
    assert!(analysis.has_gesture());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.engine.state(), AvatarState::Idle);
    assert_eq!(f.backend.spoken(), vec!["Hello there, nice to see you."]);
}

#[tokio::test(start_paused = true)]
async fn test_short_message_waits_for_completion() {
    let f = fixture();
    let mut speech = f.engine.subscribe_speech();
    f.engine.on_new_logical_message("m2");
    f.engine.on_text_delta("Hi!");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(f.backend.spoken().is_empty());

    f.engine.on_text_complete();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), speech.recv()).await.unwrap().unwrap();
        if let SpeechEvent::Started { text, .. } = event {
            assert_eq!(text, "Hi!");
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_recording_interrupts_speech() {
    let f = fixture();
    f.engine.on_new_logical_message("m3");
    f.engine.on_text_delta("This answer is long enough to start speaking.");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.engine.state(), AvatarState::Speaking);

    f.engine.set_recording(true).await;
    assert_eq!(f.engine.state(), AvatarState::Listening);
    assert!(!f.engine.synchronizer().is_playing());
    assert!(f.backend.stops.load(Ordering::SeqCst) >= 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    f.engine.set_recording(false).await;
    assert_eq!(f.engine.state(), AvatarState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_click_plays_high_priority_mirrored_gesture() {
    let f = fixture();
    f.engine.set_user("student-1");
    let mut gestures = f.engine.subscribe_gestures();

    assert!(f.engine.on_click(Position::new(0.2, 0.5)).await);
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), gestures.recv()).await.unwrap().unwrap();
        if let GestureEvent::Started { gesture, .. } = event {
            assert_eq!(gesture, "wave");
            break;
        }
    }
    assert_eq!(f.renderer.played_mirrored(), vec![("wave".to_string(), true)]);
    assert_eq!(f.renderer.looks().len(), 1);

    let profile = f.engine.tracker().profile("student-1").unwrap();
    assert_eq!(profile.count(InteractionKind::Click), 1);
    assert_eq!(profile.gesture_counts.get("wave"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_long_press_selects_long_press_gesture() {
    let f = fixture();
    f.engine.on_touch_start(Position::new(0.8, 0.4)).await;
    assert!(f.engine.on_touch_end(Position::new(0.8, 0.4), Duration::from_millis(900)));
    assert!(f.engine.on_touch_end(Position::new(0.8, 0.4), Duration::from_millis(100)));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        f.renderer.played_mirrored(),
        vec![("celebrate".to_string(), false), ("nod".to_string(), false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_user_sql_question_records_query_and_gestures() {
    let f = fixture();
    f.engine.set_user("student-2");
    let analysis = f.engine.on_user_message("How does a LEFT JOIN differ from an INNER JOIN with GROUP BY?");
    assert_eq!(analysis.source, RecommendationSource::Domain);
    assert_eq!(analysis.recommended_gesture.as_deref(), Some("explain"));

    let events = f.engine.tracker().recent_events(10);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, InteractionKind::SqlQuery);
    assert!(events[0].keywords.contains(&"left join".to_string()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(f.renderer.played(), vec!["explain"]);
}

#[tokio::test(start_paused = true)]
async fn test_speak_now_uses_fresh_id() {
    let f = fixture();
    let id = f.engine.speak_now("Replay this answer").unwrap();
    assert!(id.as_str().starts_with("manual-"));
    assert!(f.engine.speak_now("   ").is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.backend.spoken(), vec!["Replay this answer"]);
    assert_eq!(f.engine.synchronizer().last_spoken(), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_character_audio_preempts_speech() {
    let f = fixture();
    f.engine.speak_now("A long answer being spoken aloud").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.engine.arbiter().holder(), Some(AudioProducer::SpeechSynthesis));

    assert!(f.engine.request_character_audio().await);
    assert_eq!(f.engine.arbiter().holder(), Some(AudioProducer::CharacterAudio));
    assert!(f.backend.stops.load(Ordering::SeqCst) >= 2);

    f.engine.release_character_audio().await;
    assert!(f.renderer.audio_stops.load(Ordering::SeqCst) >= 2);
    assert_eq!(f.engine.arbiter().holder(), None);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_speech_does_not_resume_for_later_text() {
    let f = fixture();
    let mut speech = f.engine.subscribe_speech();
    f.engine.on_new_logical_message("m1");
    f.engine.on_text_delta("Hello there, this is the first sentence.");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(f.engine.arbiter().holder(), Some(AudioProducer::SpeechSynthesis));

    assert!(f.engine.request_character_audio().await);
    f.engine.on_text_delta(" And here is a second sentence.");
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(f.backend.spoken(), vec!["Hello there, this is the first sentence."]);
    assert_eq!(f.engine.arbiter().holder(), Some(AudioProducer::CharacterAudio));
    assert_eq!(f.engine.state(), AvatarState::Idle);
    assert!(f.engine.synchronizer().has_started());

    let mut ended = false;
    while let Ok(event) = speech.try_recv() {
        if let SpeechEvent::Ended { id } = event {
            assert_eq!(id.as_str(), "m1");
            ended = true;
        }
    }
    assert!(ended);
}

#[tokio::test(start_paused = true)]
async fn test_external_gesture_and_hover_are_tracked() {
    let f = fixture();
    f.engine.set_user("student-3");
    assert!(f.engine.play_gesture("bow", GesturePriority::Normal));
    f.engine.on_hover(HoverPhase::Enter).await;
    f.engine.on_hover(HoverPhase::Leave).await;

    let profile = f.engine.tracker().profile("student-3").unwrap();
    assert_eq!(profile.count(InteractionKind::Gesture), 1);
    assert_eq!(profile.count(InteractionKind::Hover), 1);
    assert_eq!(f.engine.tracker().event_count(), 2);
}
