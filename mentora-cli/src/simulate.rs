// Scripted avatar sessions against console collaborators

use async_trait::async_trait;
use mentora_me::{
    AvatarEngine, AvatarError, AvatarState, CharacterRenderer, EngineConfig, GestureEvent, GesturePriority, Position,
};
use mentora_spk::{SpeechBackend, SpeechError, SpeechEvent, Utterance, VoiceOptions};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

const MS_PER_CHAR: u64 = 55;
const KEYSTROKE_MS: u64 = 150;
const SETTLE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub user: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Keystrokes for `ms`
    Type { ms: u64 },
    User { text: String },
    Think { ms: u64 },
    /// Stream an assistant message in chunks
    Assistant {
        text: String,
        #[serde(default = "default_chunk_chars")]
        chunk_chars: usize,
        #[serde(default = "default_chunk_ms")]
        chunk_ms: u64,
    },
    Click { x: f64, y: f64 },
    Touch { x: f64, y: f64, held_ms: u64 },
    Gesture { name: String },
    Record { ms: u64 },
    Say { text: String },
    Wait { ms: u64 },
}

fn default_chunk_chars() -> usize {
    8
}

fn default_chunk_ms() -> u64 {
    60
}

impl Script {
    fn builtin() -> Self {
        Self {
            user: Some("demo-student".to_string()),
            steps: vec![
                Step::Type { ms: 1_200 },
                Step::User {
                    text: "Hi! I'm confused about how a LEFT JOIN works with GROUP BY".to_string(),
                },
                Step::Think { ms: 900 },
                Step::Assistant {
                    text: "Great question. A LEFT JOIN keeps every row from the left table. \
                           GROUP BY then folds those rows into one row per group."
                        .to_string(),
                    chunk_chars: default_chunk_chars(),
                    chunk_ms: default_chunk_ms(),
                },
                Step::Wait { ms: 1_500 },
                Step::Click { x: 0.3, y: 0.4 },
                Step::User {
                    text: "Awesome, that makes sense, thanks!".to_string(),
                },
                Step::Wait { ms: 3_000 },
            ],
        }
    }
}

/// Renderer that reports every call on stdout
struct ConsoleRenderer {
    epoch: Instant,
}

impl ConsoleRenderer {
    fn log(&self, line: String) {
        println!("[{:>7.2}s] renderer  {}", self.epoch.elapsed().as_secs_f64(), line);
    }
}

#[async_trait]
impl CharacterRenderer for ConsoleRenderer {
    async fn play_gesture(
        &self,
        name: &str,
        duration_secs: f64,
        mirror: bool,
        transition_ms: u64,
    ) -> Result<(), AvatarError> {
        let side = if mirror { " (mirrored)" } else { "" };
        self.log(format!("play {}{} for {:.1}s, blend {}ms", name, side, duration_secs, transition_ms));
        Ok(())
    }

    async fn set_mood(&self, mood: &str) -> Result<(), AvatarError> {
        self.log(format!("mood {}", mood));
        Ok(())
    }

    async fn look_at(&self, x: f64, y: f64, duration_ms: u64) -> Result<(), AvatarError> {
        self.log(format!("look at ({:.2}, {:.2}) over {}ms", x, y, duration_ms));
        Ok(())
    }

    fn renderer_name(&self) -> &str {
        "console"
    }
}

/// Speech backend that "speaks" for a time proportional to the text length
struct ConsoleBackend {
    epoch: Instant,
    speed: f64,
    speaking: Arc<AtomicBool>,
    current: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl SpeechBackend for ConsoleBackend {
    async fn speak(&self, text: &str, voice: &VoiceOptions) -> Result<Utterance, SpeechError> {
        println!(
            "[{:>7.2}s] speech    \"{}\" ({}, rate {:.1})",
            self.epoch.elapsed().as_secs_f64(),
            text,
            voice.language,
            voice.rate
        );
        let millis = (text.chars().count() as u64 * MS_PER_CHAR) as f64 / (f64::from(voice.rate) * self.speed);
        let duration = Duration::from_millis(millis.max(1.0) as u64);

        let (handle, utterance) = Utterance::channel();
        let speaking = Arc::clone(&self.speaking);
        let task = tokio::spawn(async move {
            speaking.store(true, Ordering::SeqCst);
            handle.started();
            tokio::time::sleep(duration).await;
            speaking.store(false, Ordering::SeqCst);
            handle.ended();
        });
        if let Some(previous) = self.current.lock().replace(task) {
            previous.abort();
        }
        Ok(utterance)
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        if let Some(task) = self.current.lock().take() {
            task.abort();
        }
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "console"
    }
}

pub async fn run(config: EngineConfig, script: Option<&Path>, speed: f64) -> anyhow::Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        anyhow::bail!("speed must be a positive number");
    }
    let script = match script {
        Some(path) => mentora_core::load_settings::<Script>(path)?,
        None => Script::builtin(),
    };

    let epoch = Instant::now();
    let renderer = Arc::new(ConsoleRenderer { epoch });
    let backend = Arc::new(ConsoleBackend {
        epoch,
        speed,
        speaking: Arc::new(AtomicBool::new(false)),
        current: Mutex::new(None),
    });
    let engine = AvatarEngine::new(config, renderer, backend)?;
    if let Some(user) = &script.user {
        engine.set_user(user.clone());
    }

    let watchers = spawn_watchers(&engine, epoch);
    engine.start();
    engine.renderer_ready();

    let pause = |ms: u64| tokio::time::sleep(Duration::from_millis((ms as f64 / speed) as u64));
    for (index, step) in script.steps.into_iter().enumerate() {
        info!("Step {}: {:?}", index + 1, step);
        match step {
            Step::Type { ms } => {
                let mut typed = 0;
                while typed < ms {
                    engine.on_typing_activity();
                    pause(KEYSTROKE_MS).await;
                    typed += KEYSTROKE_MS;
                }
            }
            Step::User { text } => {
                engine.on_user_message(&text);
            }
            Step::Think { ms } => {
                engine.set_thinking(true);
                pause(ms).await;
                engine.set_thinking(false);
            }
            Step::Assistant {
                text,
                chunk_chars,
                chunk_ms,
            } => {
                engine.on_new_logical_message(mentora_core::new_id());
                let chars: Vec<char> = text.chars().collect();
                for chunk in chars.chunks(chunk_chars.max(1)) {
                    engine.on_text_delta(&chunk.iter().collect::<String>());
                    pause(chunk_ms).await;
                }
                engine.on_text_complete();
            }
            Step::Click { x, y } => {
                engine.on_click(Position::new(x, y)).await;
            }
            Step::Touch { x, y, held_ms } => {
                let position = Position::new(x, y);
                engine.on_touch_start(position).await;
                pause(held_ms).await;
                engine.on_touch_end(position, Duration::from_millis(held_ms));
            }
            Step::Gesture { name } => {
                if !engine.play_gesture(&name, GesturePriority::Normal) {
                    warn!("Gesture '{}' dropped: queue full", name);
                }
            }
            Step::Record { ms } => {
                engine.set_recording(true).await;
                pause(ms).await;
                engine.set_recording(false).await;
            }
            Step::Say { text } => {
                engine.speak_now(&text)?;
            }
            Step::Wait { ms } => pause(ms).await,
        }
    }

    settle(&engine).await;
    for watcher in watchers {
        watcher.abort();
    }

    if let Some(user) = &script.user {
        if let Some(profile) = engine.tracker().profile(user) {
            println!();
            println!("profile for {}: {:?} ({} events)", user, profile.style, profile.total_events);
            for (keyword, count) in profile.top_keywords(5) {
                println!("  {:<12} {}", keyword, count);
            }
        }
    }
    Ok(())
}

// wait for speech and gestures to drain
async fn settle(engine: &AvatarEngine) {
    let deadline = Instant::now() + Duration::from_secs(SETTLE_TIMEOUT_SECS);
    while Instant::now() < deadline {
        let busy = engine.synchronizer().is_playing()
            || engine.state() == AvatarState::Speaking
            || !engine.scheduler().is_empty();
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    warn!("Session did not settle within {}s", SETTLE_TIMEOUT_SECS);
}

fn spawn_watchers(engine: &AvatarEngine, epoch: Instant) -> Vec<JoinHandle<()>> {
    let mut states = engine.subscribe_states();
    let mut speech = engine.subscribe_speech();
    let mut gestures = engine.subscribe_gestures();

    vec![
        tokio::spawn(async move {
            while let Ok(transition) = states.recv().await {
                println!(
                    "[{:>7.2}s] state     {} -> {}",
                    epoch.elapsed().as_secs_f64(),
                    transition.from.as_str(),
                    transition.to.as_str()
                );
            }
        }),
        tokio::spawn(async move {
            while let Ok(event) = speech.recv().await {
                let line = match event {
                    SpeechEvent::Eligible { id } => format!("eligible {}", id),
                    SpeechEvent::Started { id, .. } => format!("started {}", id),
                    SpeechEvent::SegmentQueued { id, text } => format!("queued for {}: \"{}\"", id, text.trim()),
                    SpeechEvent::Ended { id } => format!("ended {}", id),
                    SpeechEvent::Failed { id, error } => format!("failed {}: {}", id, error),
                };
                println!("[{:>7.2}s] sync      {}", epoch.elapsed().as_secs_f64(), line);
            }
        }),
        tokio::spawn(async move {
            while let Ok(event) = gestures.recv().await {
                let line = match event {
                    GestureEvent::Dropped { gesture, .. } => format!("dropped {}", gesture),
                    GestureEvent::Evicted { gesture, .. } => format!("evicted {}", gesture),
                    GestureEvent::Failed { gesture, error, .. } => format!("failed {}: {}", gesture, error),
                    _ => continue,
                };
                println!("[{:>7.2}s] queue     {}", epoch.elapsed().as_secs_f64(), line);
            }
        }),
    ]
}
