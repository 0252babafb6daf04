//! Shared fixtures for avatar engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use mentora_me::{AvatarError, CharacterRenderer, GestureEvent};
use mentora_spk::{SpeechBackend, SpeechError, Utterance, VoiceOptions};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
pub struct MockRenderer {
    played: Mutex<Vec<(String, bool)>>,
    moods: Mutex<Vec<String>>,
    looks: Mutex<Vec<(f64, f64)>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    pub audio_stops: AtomicUsize,
}

impl MockRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, gesture: &str) {
        self.failing.lock().insert(gesture.to_string());
    }

    pub fn hang_on(&self, gesture: &str) {
        self.hanging.lock().insert(gesture.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn played_mirrored(&self) -> Vec<(String, bool)> {
        self.played.lock().clone()
    }

    pub fn moods(&self) -> Vec<String> {
        self.moods.lock().clone()
    }

    pub fn looks(&self) -> Vec<(f64, f64)> {
        self.looks.lock().clone()
    }
}

#[async_trait]
impl CharacterRenderer for MockRenderer {
    async fn play_gesture(&self, name: &str, _duration_secs: f64, mirror: bool, _transition_ms: u64) -> Result<(), AvatarError> {
        let hang = self.hanging.lock().contains(name);
        if hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.played.lock().push((name.to_string(), mirror));
        if self.failing.lock().contains(name) {
            return Err(AvatarError::Renderer(format!("animation '{}' is missing", name)));
        }
        Ok(())
    }

    async fn set_mood(&self, mood: &str) -> Result<(), AvatarError> {
        self.moods.lock().push(mood.to_string());
        Ok(())
    }

    async fn look_at(&self, x: f64, y: f64, _duration_ms: u64) -> Result<(), AvatarError> {
        self.looks.lock().push((x, y));
        Ok(())
    }

    async fn stop_audio(&self) -> Result<(), AvatarError> {
        self.audio_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn renderer_name(&self) -> &str {
        "mock"
    }
}

pub struct MockBackend {
    spoken: Mutex<Vec<String>>,
    speaking: Arc<AtomicBool>,
    pub stops: AtomicUsize,
    utterance_ms: u64,
}

impl MockBackend {
    pub fn new(utterance_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            speaking: Arc::new(AtomicBool::new(false)),
            stops: AtomicUsize::new(0),
            utterance_ms,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechBackend for MockBackend {
    async fn speak(&self, text: &str, _voice: &VoiceOptions) -> Result<Utterance, SpeechError> {
        self.spoken.lock().push(text.to_string());
        let (handle, utterance) = Utterance::channel();
        let speaking = Arc::clone(&self.speaking);
        let duration = Duration::from_millis(self.utterance_ms);
        tokio::spawn(async move {
            speaking.store(true, Ordering::SeqCst);
            handle.started();
            tokio::time::sleep(duration).await;
            speaking.store(false, Ordering::SeqCst);
            handle.ended();
        });
        Ok(utterance)
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<GestureEvent>) -> GestureEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("timed out waiting for gesture event")
        .expect("gesture channel closed")
}

/// "started:x" / "completed:x" / "failed:x" entries until `completions` gestures finished
pub async fn lifecycle(events: &mut broadcast::Receiver<GestureEvent>, completions: usize) -> Vec<String> {
    let mut seen = Vec::new();
    let mut finished = 0;
    while finished < completions {
        match next_event(events).await {
            GestureEvent::Started { gesture, .. } => seen.push(format!("started:{}", gesture)),
            GestureEvent::Completed { gesture, .. } => {
                finished += 1;
                seen.push(format!("completed:{}", gesture));
            }
            GestureEvent::Failed { gesture, .. } => {
                finished += 1;
                seen.push(format!("failed:{}", gesture));
            }
            _ => {}
        }
    }
    seen
}
