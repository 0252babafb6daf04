//! Exclusivity tests for the audio arbiter

use async_trait::async_trait;
use mentora_spk::{
    ArbiterConfig, AudioArbiter, AudioChannel, AudioProducer, BackendAudioChannel, SpeechBackend, SpeechError,
    Utterance, VoiceOptions,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records the order of operations across both producers
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

struct CharacterChannel {
    journal: Arc<Journal>,
    playing: AtomicBool,
}

#[async_trait]
impl AudioChannel for CharacterChannel {
    async fn cancel_pending(&self) -> Result<(), SpeechError> {
        self.journal.push("character:cancel");
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self) -> Result<(), SpeechError> {
        self.journal.push("character:teardown");
        Ok(())
    }
}

struct JournalBackend {
    journal: Arc<Journal>,
    speaking: AtomicBool,
}

#[async_trait]
impl SpeechBackend for JournalBackend {
    async fn speak(&self, text: &str, _voice: &VoiceOptions) -> Result<Utterance, SpeechError> {
        self.journal.push(format!("speech:speak:{}", text));
        self.speaking.store(true, Ordering::SeqCst);
        let (handle, utterance) = Utterance::channel();
        handle.started();
        Ok(utterance)
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        self.journal.push("speech:stop");
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "journal"
    }
}

struct Fixture {
    arbiter: Arc<AudioArbiter>,
    journal: Arc<Journal>,
    character: Arc<CharacterChannel>,
    backend: Arc<JournalBackend>,
}

fn fixture(settle_delay_ms: u64) -> Fixture {
    let journal = Arc::new(Journal::default());
    let character = Arc::new(CharacterChannel {
        journal: journal.clone(),
        playing: AtomicBool::new(false),
    });
    let backend = Arc::new(JournalBackend {
        journal: journal.clone(),
        speaking: AtomicBool::new(false),
    });
    let config = ArbiterConfig {
        cancel_passes: 2,
        settle_delay_ms,
    };
    let speech_channel = Arc::new(BackendAudioChannel::new(backend.clone()));
    let arbiter = Arc::new(AudioArbiter::new(config, character.clone(), speech_channel).unwrap());
    Fixture {
        arbiter,
        journal,
        character,
        backend,
    }
}

#[tokio::test(start_paused = true)]
async fn test_speech_access_stops_character_audio_first() {
    let f = fixture(150);
    assert!(f.arbiter.request_access(AudioProducer::CharacterAudio).await);
    f.character.playing.store(true, Ordering::SeqCst);

    assert!(f.arbiter.request_access(AudioProducer::SpeechSynthesis).await);
    assert!(!f.character.playing.load(Ordering::SeqCst));
    f.backend.speak("hello", &VoiceOptions::default()).await.unwrap();

    assert_eq!(
        f.journal.entries(),
        vec![
            "character:cancel".to_string(),
            "character:cancel".to_string(),
            "character:teardown".to_string(),
            "speech:speak:hello".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_character_access_stops_speech_first() {
    let f = fixture(150);
    assert!(f.arbiter.request_access(AudioProducer::SpeechSynthesis).await);
    f.backend.speak("busy", &VoiceOptions::default()).await.unwrap();
    assert!(f.backend.is_speaking());

    assert!(f.arbiter.request_access(AudioProducer::CharacterAudio).await);
    assert!(!f.backend.is_speaking());
    assert_eq!(f.arbiter.holder(), Some(AudioProducer::CharacterAudio));
    assert_eq!(
        f.journal.entries().iter().filter(|e| e.as_str() == "speech:stop").count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_requests_during_teardown_are_denied() {
    let f = fixture(500);
    assert!(f.arbiter.request_access(AudioProducer::CharacterAudio).await);

    let arbiter = f.arbiter.clone();
    let preempt = tokio::spawn(async move { arbiter.request_access(AudioProducer::SpeechSynthesis).await });

    // let the preempting request reach its settle delay
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(f.arbiter.is_transitioning());
    assert!(!f.arbiter.request_access(AudioProducer::CharacterAudio).await);
    assert!(matches!(
        f.arbiter.require_access(AudioProducer::CharacterAudio).await,
        Err(SpeechError::AudioAccessDenied(AudioProducer::CharacterAudio))
    ));

    assert!(preempt.await.unwrap());
    assert_eq!(f.arbiter.holder(), Some(AudioProducer::SpeechSynthesis));
}

#[tokio::test(start_paused = true)]
async fn test_release_waits_for_settle_delay() {
    let f = fixture(200);
    assert!(f.arbiter.request_access(AudioProducer::SpeechSynthesis).await);

    let started = tokio::time::Instant::now();
    f.arbiter.release_access(AudioProducer::SpeechSynthesis).await;
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(f.arbiter.holder(), None);

    assert!(f.arbiter.request_access(AudioProducer::CharacterAudio).await);
}

#[tokio::test(start_paused = true)]
async fn test_never_two_holders() {
    let f = fixture(20);
    let mut handles = Vec::new();
    for i in 0..20 {
        let arbiter = f.arbiter.clone();
        let producer = if i % 2 == 0 {
            AudioProducer::CharacterAudio
        } else {
            AudioProducer::SpeechSynthesis
        };
        handles.push(tokio::spawn(async move {
            if arbiter.request_access(producer).await {
                assert_eq!(arbiter.holder(), Some(producer));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(f.arbiter.holder().is_some());
}
