#![allow(dead_code)]

use async_trait::async_trait;
use mentora_me::{AvatarError, CharacterRenderer};
use mentora_spk::{SpeechBackend, SpeechError, Utterance, VoiceOptions};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct TestRenderer {
    pub played: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

#[async_trait]
impl CharacterRenderer for TestRenderer {
    async fn play_gesture(&self, name: &str, _: f64, _: bool, _: u64) -> Result<(), AvatarError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.played.lock().push(name.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_mood(&self, _: &str) -> Result<(), AvatarError> {
        Ok(())
    }

    async fn look_at(&self, _: f64, _: f64, _: u64) -> Result<(), AvatarError> {
        Ok(())
    }

    fn renderer_name(&self) -> &str {
        "test"
    }
}

pub struct TestBackend {
    pub spoken: Mutex<Vec<String>>,
    speaking: Arc<AtomicBool>,
    utterance_ms: u64,
}

impl TestBackend {
    pub fn new(utterance_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            speaking: Arc::new(AtomicBool::new(false)),
            utterance_ms,
        })
    }
}

#[async_trait]
impl SpeechBackend for TestBackend {
    async fn speak(&self, text: &str, _: &VoiceOptions) -> Result<Utterance, SpeechError> {
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
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "test"
    }
}
