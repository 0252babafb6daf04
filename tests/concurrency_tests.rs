//! Multi-threaded stress tests for the shared primitives

mod support;

use async_trait::async_trait;
use mentora_me::{
    AnalyticsConfig, GestureConfig, GesturePriority, GestureScheduler, InteractionEvent, InteractionKind,
    InteractionTracker,
};
use mentora_spk::{ArbiterConfig, AudioArbiter, AudioChannel, AudioProducer, SpeechError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::TestRenderer;

#[derive(Default)]
struct CountingChannel {
    teardowns: AtomicUsize,
}

#[async_trait]
impl AudioChannel for CountingChannel {
    async fn cancel_pending(&self) -> Result<(), SpeechError> {
        Ok(())
    }

    async fn teardown(&self) -> Result<(), SpeechError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_arbiter_settles_under_contention() {
    let character = Arc::new(CountingChannel::default());
    let speech = Arc::new(CountingChannel::default());
    let arbiter = Arc::new(
        AudioArbiter::new(
            ArbiterConfig {
                cancel_passes: 2,
                settle_delay_ms: 1,
            },
            character.clone(),
            speech.clone(),
        )
        .unwrap(),
    );

    let grants = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..32 {
        let arbiter = arbiter.clone();
        let grants = grants.clone();
        handles.push(tokio::spawn(async move {
            let producer = if i % 2 == 0 {
                AudioProducer::CharacterAudio
            } else {
                AudioProducer::SpeechSynthesis
            };
            for _ in 0..10 {
                if arbiter.request_access(producer).await {
                    grants.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    let all = futures_all(handles);
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("arbiter deadlocked");

    assert!(grants.load(Ordering::SeqCst) > 0);
    assert!(!arbiter.is_transitioning());
    assert!(arbiter.holder().is_some());

    // both producers competed, so the device changed hands through teardowns
    let revocations = character.teardowns.load(Ordering::SeqCst) + speech.teardowns.load(Ordering::SeqCst);
    assert!(revocations > 0);
}

async fn futures_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_never_overlaps_renderer_calls() {
    let renderer = Arc::new(TestRenderer::default());
    let scheduler = GestureScheduler::new(
        GestureConfig {
            max_queue_size: 8,
            ..GestureConfig::default()
        },
        renderer.clone(),
    )
    .unwrap();
    scheduler.mark_renderer_ready();

    let accepted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for producer in 0..8 {
        let scheduler = scheduler.clone();
        let accepted = accepted.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..5 {
                let priority = match (producer + i) % 3 {
                    0 => GesturePriority::Low,
                    1 => GesturePriority::Normal,
                    _ => GesturePriority::High,
                };
                let request = scheduler.request("nod").with_priority(priority).with_duration(0.01);
                if scheduler.enqueue(request) {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
                assert!(scheduler.len() <= 8);
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !scheduler.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.is_empty());
    assert_eq!(renderer.max_in_flight.load(Ordering::SeqCst), 1);
    // evicted lows never reach the renderer
    assert!(renderer.played.lock().len() <= accepted.load(Ordering::SeqCst));
}

#[test]
fn test_tracker_concurrent_records() {
    let tracker = Arc::new(InteractionTracker::new(AnalyticsConfig::default()).unwrap());
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let kind = if i % 2 == 0 {
                        InteractionKind::SqlQuery
                    } else {
                        InteractionKind::Click
                    };
                    tracker.record(InteractionEvent::new(kind, "stress").for_user(format!("user-{}", t % 4)));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(tracker.event_count(), 800);
    assert_eq!(tracker.user_count(), 4);
    let profile = tracker.profile("user-0").unwrap();
    assert_eq!(profile.total_events, 200);
    assert_eq!(profile.count(InteractionKind::SqlQuery), 100);
}
