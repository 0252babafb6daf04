//! Content analysis: text to gesture recommendation
//!
//! Two lexicons are consulted independently: SQL/database vocabulary mapped to
//! explanatory gestures, and affect/intent patterns mapped to expressive ones.
//! Each side's confidence grows with its number of distinct matches.

use crate::analytics::{adapt_to_profile, UserInteractionProfile, DEFAULT_FAVORITE_MIN_USES};
use crate::config::AnalyzerConfig;
use crate::error::AvatarError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const BASE_CONFIDENCE: f64 = 0.3;
const CONFIDENCE_PER_MATCH: f64 = 0.2;

const DOMAIN_KEYWORDS: &[(&str, &str)] = &[
    ("select", "point"),
    ("from", "point"),
    ("where", "point"),
    ("table", "point"),
    ("column", "point"),
    ("row", "point"),
    ("index", "point"),
    ("primary key", "point"),
    ("foreign key", "explain"),
    ("join", "explain"),
    ("inner join", "explain"),
    ("left join", "explain"),
    ("group by", "explain"),
    ("order by", "explain"),
    ("having", "explain"),
    ("subquery", "explain"),
    ("query", "explain"),
    ("database", "explain"),
    ("schema", "explain"),
    ("normalization", "explain"),
    ("transaction", "explain"),
    ("aggregate", "explain"),
    ("insert", "hand_up"),
    ("update", "hand_up"),
    ("delete", "hand_up"),
    ("sql", "explain"),
];

// stop-words that only count as domain vocabulary next to a second term
const WEAK_DOMAIN_KEYWORDS: &[&str] = &["from", "where", "row", "update", "delete"];

const CONFUSED_PATTERNS: &[&str] = &[
    "confused",
    "confusing",
    "don't understand",
    "dont understand",
    "do not understand",
    "not sure",
    "unclear",
    "lost",
    "stuck",
    "what do you mean",
    "huh",
];
const EXCITED_PATTERNS: &[&str] = &["awesome", "amazing", "wow", "excited", "fantastic", "incredible", "yay"];
const POSITIVE_PATTERNS: &[&str] = &[
    "good",
    "great",
    "nice",
    "correct",
    "perfect",
    "works",
    "got it",
    "makes sense",
    "cool",
    "right",
];
const NEGATIVE_PATTERNS: &[&str] = &[
    "wrong",
    "bad",
    "error",
    "fail",
    "failed",
    "broken",
    "hate",
    "annoying",
    "doesn't work",
    "not working",
    "frustrated",
];

const GREETING_PATTERNS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon", "good evening"];
const FAREWELL_PATTERNS: &[&str] = &["bye", "goodbye", "see you", "good night"];
const GRATITUDE_PATTERNS: &[&str] = &["thanks", "thank you", "thx", "appreciate"];
const QUESTION_OPENERS: &[&str] = &[
    "what", "why", "how", "when", "where", "which", "who", "can", "could", "should", "would", "is", "are", "does",
    "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Confused,
    Excited,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Greeting,
    Farewell,
    Gratitude,
    Question,
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Which rule produced the recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecommendationSource {
    Domain,
    Sentiment,
    Intent,
    /// Confusion about domain vocabulary
    Uncertain,
    /// A user's favorite gesture filled an empty recommendation
    Profile,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTags {
    pub sentiment: Sentiment,
    pub intent: Intent,
    pub is_question: bool,
    pub complexity: Complexity,
    pub domain_terms: Vec<String>,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub recommended_gesture: Option<String>,
    pub confidence: f64,
    pub source: RecommendationSource,
    pub tags: AnalysisTags,
}

impl ContentAnalysis {
    /// Scheduler priority for the recommendation; weak guesses never displace others
    pub fn suggested_priority(&self) -> crate::GesturePriority {
        if self.confidence >= 0.5 {
            crate::GesturePriority::Normal
        } else {
            crate::GesturePriority::Low
        }
    }

    pub fn has_gesture(&self) -> bool {
        self.recommended_gesture.is_some()
    }
}

pub struct ContentAnalyzer {
    config: AnalyzerConfig,
    domain: Vec<(String, String)>,
}

impl ContentAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        let mut domain: Vec<(String, String)> = DOMAIN_KEYWORDS
            .iter()
            .map(|(k, g)| (k.to_string(), g.to_string()))
            .collect();
        for (keyword, gesture) in &config.extra_domain_keywords {
            let keyword = normalize(keyword).trim().to_string();
            match domain.iter_mut().find(|(k, _)| *k == keyword) {
                Some(entry) => entry.1 = gesture.clone(),
                None => domain.push((keyword, gesture.clone())),
            }
        }
        Ok(Self { config, domain })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, text: &str) -> ContentAnalysis {
        let normalized = normalize(text);
        let words: Vec<&str> = normalized.split_whitespace().collect();

        let domain_hits = self.domain_matches(&normalized);
        let (sentiment, sentiment_matches) = classify_sentiment(&normalized);
        let is_question = text.trim_end().ends_with('?')
            || words.first().map_or(false, |w| QUESTION_OPENERS.contains(w));
        let (intent, intent_matches) = classify_intent(&normalized, is_question);

        let tags = AnalysisTags {
            sentiment,
            intent,
            is_question,
            complexity: complexity(&words),
            domain_terms: domain_hits.iter().map(|(term, _)| term.clone()).collect(),
            word_count: words.len(),
        };

        let domain_confidence = self.confidence_for(domain_hits.len());
        let affect_count = sentiment_matches + intent_matches;
        let affect_confidence = self.confidence_for(affect_count);

        let (gesture, confidence, source) = if sentiment == Sentiment::Confused && !domain_hits.is_empty() {
            (
                Some(self.config.uncertain_gesture.clone()),
                self.confidence_for(domain_hits.len() + sentiment_matches),
                RecommendationSource::Uncertain,
            )
        } else if !domain_hits.is_empty() && domain_confidence > self.config.acceptance_threshold {
            (dominant_gesture(&domain_hits), domain_confidence, RecommendationSource::Domain)
        } else if let Some(gesture) = sentiment_gesture(sentiment) {
            (Some(gesture.to_string()), affect_confidence, RecommendationSource::Sentiment)
        } else if let Some(gesture) = intent_gesture(intent) {
            (Some(gesture.to_string()), affect_confidence, RecommendationSource::Intent)
        } else if !domain_hits.is_empty() {
            (dominant_gesture(&domain_hits), domain_confidence, RecommendationSource::Domain)
        } else {
            (None, 0.0, RecommendationSource::None)
        };

        ContentAnalysis {
            recommended_gesture: gesture,
            confidence,
            source,
            tags,
        }
    }

    /// `analyze` followed by the profile's adaptive bias
    pub fn analyze_with_profile(&self, text: &str, profile: &UserInteractionProfile) -> ContentAnalysis {
        adapt_to_profile(
            self.analyze(text),
            profile,
            DEFAULT_FAVORITE_MIN_USES,
            self.config.confidence_cap,
        )
    }

    fn confidence_for(&self, matches: usize) -> f64 {
        if matches == 0 {
            return 0.0;
        }
        (BASE_CONFIDENCE + CONFIDENCE_PER_MATCH * matches as f64).min(self.config.confidence_cap)
    }

    // distinct terms in order of first appearance; a multi-word term hides the words it contains
    fn domain_matches(&self, normalized: &str) -> Vec<(String, String)> {
        let mut hits: Vec<(usize, &str, &str)> = self
            .domain
            .iter()
            .filter_map(|(term, gesture)| {
                find_phrase(normalized, term).map(|pos| (pos, term.as_str(), gesture.as_str()))
            })
            .collect();

        let phrases: Vec<&str> = hits.iter().map(|(_, t, _)| *t).filter(|t| t.contains(' ')).collect();
        hits.retain(|(_, term, _)| term.contains(' ') || !phrases.iter().any(|p| p.split(' ').any(|w| w == *term)));
        hits.sort_by_key(|(pos, _, _)| *pos);

        let strong = hits.iter().filter(|(_, t, _)| !WEAK_DOMAIN_KEYWORDS.contains(t)).count();
        if strong == 0 {
            return Vec::new();
        }
        hits.into_iter()
            .map(|(_, term, gesture)| (term.to_string(), gesture.to_string()))
            .collect()
    }
}

/// Lowercase words separated by single spaces, padded for phrase matching
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    let mut out = String::with_capacity(cleaned.len() + 2);
    out.push(' ');
    for word in cleaned.split_whitespace() {
        out.push_str(word);
        out.push(' ');
    }
    out
}

fn find_phrase(normalized: &str, phrase: &str) -> Option<usize> {
    normalized.find(&format!(" {} ", phrase))
}

fn count_patterns(normalized: &str, patterns: &[&str]) -> usize {
    patterns.iter().filter(|p| find_phrase(normalized, p).is_some()).count()
}

fn classify_sentiment(normalized: &str) -> (Sentiment, usize) {
    // tie order: confused, excited, negative, positive
    let scored = [
        (Sentiment::Confused, count_patterns(normalized, CONFUSED_PATTERNS)),
        (Sentiment::Excited, count_patterns(normalized, EXCITED_PATTERNS)),
        (Sentiment::Negative, count_patterns(normalized, NEGATIVE_PATTERNS)),
        (Sentiment::Positive, count_patterns(normalized, POSITIVE_PATTERNS)),
    ];
    let mut best = (Sentiment::Neutral, 0);
    for (sentiment, count) in scored {
        if count > best.1 {
            best = (sentiment, count);
        }
    }
    best
}

fn classify_intent(normalized: &str, is_question: bool) -> (Intent, usize) {
    let greeting = count_patterns(normalized, GREETING_PATTERNS);
    let farewell = count_patterns(normalized, FAREWELL_PATTERNS);
    let gratitude = count_patterns(normalized, GRATITUDE_PATTERNS);
    if greeting > 0 {
        (Intent::Greeting, greeting)
    } else if farewell > 0 {
        (Intent::Farewell, farewell)
    } else if gratitude > 0 {
        (Intent::Gratitude, gratitude)
    } else if is_question {
        (Intent::Question, 1)
    } else {
        (Intent::Statement, 0)
    }
}

fn sentiment_gesture(sentiment: Sentiment) -> Option<&'static str> {
    match sentiment {
        Sentiment::Confused => Some("shrug"),
        Sentiment::Excited => Some("celebrate"),
        Sentiment::Positive => Some("thumbs_up"),
        Sentiment::Negative => Some("shake_head"),
        Sentiment::Neutral => None,
    }
}

fn intent_gesture(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Greeting | Intent::Farewell => Some("wave"),
        Intent::Gratitude => Some("bow"),
        Intent::Question => Some("thinking"),
        Intent::Statement => None,
    }
}

// most voted gesture, earliest match on ties
fn dominant_gesture(hits: &[(String, String)]) -> Option<String> {
    let mut votes: HashMap<&str, usize> = HashMap::new();
    for (_, gesture) in hits {
        *votes.entry(gesture.as_str()).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (_, gesture) in hits {
        let count = votes[gesture.as_str()];
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((gesture.as_str(), count));
        }
    }
    best.map(|(g, _)| g.to_string())
}

fn complexity(words: &[&str]) -> Complexity {
    if words.is_empty() {
        return Complexity::Simple;
    }
    let mean = words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
    if words.len() > 40 || (words.len() > 15 && mean > 6.0) {
        Complexity::Complex
    } else if words.len() < 10 && mean < 6.0 {
        Complexity::Simple
    } else {
        Complexity::Moderate
    }
}
