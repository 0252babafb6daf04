//! Interaction analytics
//!
//! Keeps a bounded ring of recent interaction events and one incrementally
//! updated profile per user. Profiles bias gesture recommendations toward how
//! a user actually interacts with the tutor.

use crate::config::AnalyticsConfig;
use crate::content_analyzer::{ContentAnalysis, RecommendationSource};
use crate::error::AvatarError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub const DEFAULT_FAVORITE_MIN_USES: u64 = 3;
const MIN_EVENTS_FOR_STYLE: u64 = 5;
const TECHNICAL_SHARE: f64 = 0.4;
const EXPRESSIVE_SHARE: f64 = 0.5;
const EXPRESSIVE_BOOST: f64 = 1.15;
const TECHNICAL_DAMPING: f64 = 0.85;
const FAVORITE_CONFIDENCE: f64 = 0.35;
const DEFAULT_CONFIDENCE_CAP: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Click,
    Touch,
    Hover,
    Gesture,
    SqlQuery,
    VoiceCommand,
}

impl InteractionKind {
    fn is_technical(self) -> bool {
        matches!(self, InteractionKind::SqlQuery | InteractionKind::VoiceCommand)
    }

    fn is_expressive(self) -> bool {
        matches!(
            self,
            InteractionKind::Click | InteractionKind::Touch | InteractionKind::Gesture | InteractionKind::Hover
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: String,
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    pub gesture: Option<String>,
    pub keywords: Vec<String>,
    pub user_id: Option<String>,
    pub session_id: String,
}

impl InteractionEvent {
    pub fn new(kind: InteractionKind, session_id: impl Into<String>) -> Self {
        Self {
            id: mentora_core::new_id(),
            kind,
            timestamp: Utc::now(),
            gesture: None,
            keywords: Vec::new(),
            user_id: None,
            session_id: session_id.into(),
        }
    }

    pub fn with_gesture(mut self, gesture: impl Into<String>) -> Self {
        self.gesture = Some(gesture.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionStyle {
    Technical,
    Expressive,
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInteractionProfile {
    pub user_id: String,
    pub total_events: u64,
    pub kind_counts: HashMap<InteractionKind, u64>,
    pub gesture_counts: HashMap<String, u64>,
    pub keyword_counts: HashMap<String, u64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub style: InteractionStyle,
}

impl UserInteractionProfile {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            total_events: 0,
            kind_counts: HashMap::new(),
            gesture_counts: HashMap::new(),
            keyword_counts: HashMap::new(),
            first_seen: now,
            last_seen: now,
            style: InteractionStyle::Balanced,
        }
    }

    pub fn observe(&mut self, event: &InteractionEvent) {
        self.total_events += 1;
        *self.kind_counts.entry(event.kind).or_default() += 1;
        if let Some(gesture) = &event.gesture {
            *self.gesture_counts.entry(gesture.clone()).or_default() += 1;
        }
        for keyword in &event.keywords {
            *self.keyword_counts.entry(keyword.to_lowercase()).or_default() += 1;
        }
        if event.timestamp < self.first_seen {
            self.first_seen = event.timestamp;
        }
        if event.timestamp > self.last_seen {
            self.last_seen = event.timestamp;
        }
        self.style = self.classify();
    }

    pub fn count(&self, kind: InteractionKind) -> u64 {
        self.kind_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Technical is checked first, so a profile meeting both shares is technical
    pub fn classify(&self) -> InteractionStyle {
        if self.total_events < MIN_EVENTS_FOR_STYLE {
            return InteractionStyle::Balanced;
        }
        let total = self.total_events as f64;
        let share = |pred: fn(InteractionKind) -> bool| {
            self.kind_counts
                .iter()
                .filter(|(kind, _)| pred(**kind))
                .map(|(_, count)| *count)
                .sum::<u64>() as f64
                / total
        };
        if share(InteractionKind::is_technical) >= TECHNICAL_SHARE {
            InteractionStyle::Technical
        } else if share(InteractionKind::is_expressive) >= EXPRESSIVE_SHARE {
            InteractionStyle::Expressive
        } else {
            InteractionStyle::Balanced
        }
    }

    /// Most used gesture with at least `min_uses` uses; ties go to the smaller name
    pub fn favorite_gesture(&self, min_uses: u64) -> Option<(&str, u64)> {
        self.gesture_counts
            .iter()
            .filter(|(_, count)| **count >= min_uses)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, count)| (name.as_str(), *count))
    }

    /// Most frequent keywords, highest count first
    pub fn top_keywords(&self, n: usize) -> Vec<(String, u64)> {
        let mut keywords: Vec<(String, u64)> = self.keyword_counts.iter().map(|(k, c)| (k.clone(), *c)).collect();
        keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        keywords.truncate(n);
        keywords
    }
}

/// Bias an analysis toward a user's interaction style
pub fn adapt_to_profile(
    mut analysis: ContentAnalysis,
    profile: &UserInteractionProfile,
    favorite_min_uses: u64,
    confidence_cap: f64,
) -> ContentAnalysis {
    if analysis.recommended_gesture.is_none() {
        if let Some((gesture, _)) = profile.favorite_gesture(favorite_min_uses) {
            analysis.recommended_gesture = Some(gesture.to_string());
            analysis.confidence = FAVORITE_CONFIDENCE;
            analysis.source = RecommendationSource::Profile;
        }
        return analysis;
    }

    match profile.style {
        InteractionStyle::Expressive => {
            analysis.confidence = (analysis.confidence * EXPRESSIVE_BOOST).min(confidence_cap);
        }
        InteractionStyle::Technical => {
            if matches!(
                analysis.source,
                RecommendationSource::Sentiment | RecommendationSource::Intent
            ) {
                analysis.confidence *= TECHNICAL_DAMPING;
            }
        }
        InteractionStyle::Balanced => {}
    }
    analysis
}

/// Records interaction events and maintains per-user profiles
pub struct InteractionTracker {
    config: AnalyticsConfig,
    confidence_cap: f64,
    events: Mutex<VecDeque<InteractionEvent>>,
    profiles: DashMap<String, UserInteractionProfile>,
}

impl InteractionTracker {
    pub fn new(config: AnalyticsConfig) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        Ok(Self {
            events: Mutex::new(VecDeque::with_capacity(config.max_events.min(1_024))),
            profiles: DashMap::new(),
            confidence_cap: DEFAULT_CONFIDENCE_CAP,
            config,
        })
    }

    /// Ceiling for boosted confidences (the analyzer's cap)
    pub fn with_confidence_cap(mut self, cap: f64) -> Self {
        self.confidence_cap = cap.clamp(0.0, 1.0);
        self
    }

    pub fn record(&self, event: InteractionEvent) {
        if let Some(user_id) = &event.user_id {
            self.profiles
                .entry(user_id.clone())
                .or_insert_with(|| UserInteractionProfile::new(user_id.clone(), event.timestamp))
                .observe(&event);
        }

        debug!("Recorded {:?} interaction", event.kind);
        let mut events = self.events.lock();
        while events.len() >= self.config.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn profile(&self, user_id: &str) -> Option<UserInteractionProfile> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }

    pub fn style(&self, user_id: &str) -> InteractionStyle {
        self.profiles
            .get(user_id)
            .map_or(InteractionStyle::Balanced, |p| p.style)
    }

    /// Up to `n` most recent events, oldest first
    pub fn recent_events(&self, n: usize) -> Vec<InteractionEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    /// Events currently retained in the ring
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn user_count(&self) -> usize {
        self.profiles.len()
    }

    /// Apply the user's adaptive bias; unknown users get the analysis unchanged
    pub fn recommend(&self, user_id: &str, analysis: ContentAnalysis) -> ContentAnalysis {
        match self.profiles.get(user_id) {
            Some(profile) => adapt_to_profile(analysis, &profile, self.config.favorite_min_uses, self.confidence_cap),
            None => analysis,
        }
    }
}
