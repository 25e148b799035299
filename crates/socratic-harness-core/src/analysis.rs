//! Conversation analysis: themes, understanding progression, misconceptions.
//!
//! # Progression
//!
//! Each learner message gets a `complexity` and a `depth` score, both
//! capped at 1.0, and their mean as its `combined` score:
//!
//! ```text
//! complexity = unique_words / words + (words / sentences) / 10
//! depth      = 0.10 × connectives present
//!            + 0.15 × technical patterns present
//!            + 0.05 × (chars / 100)
//! ```
//!
//! Messages are split into a first half (`n / 2` messages) and a second
//! half (the rest); the progression score is the mean of the second half
//! minus the mean of the first, and maps to a [`Trend`].
//!
//! # Misconceptions
//!
//! Evaluator questions are grouped by a coarse theme key (the two longest
//! words over four characters) and themes asked more than once are flagged.
//! Known [`MisconceptionPattern`]s are matched against learner messages by
//! case-insensitive substring.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::LanguageModel;
use crate::dialogue::round_to;
use crate::error::{PipelineError, Result};
use crate::models::{Message, MisconceptionPattern};
use crate::prompts;
use crate::store::Store;
use crate::structured::decode_object;
use crate::text::{char_len, truncate_chars, words};

const CONNECTIVES: [&str; 8] = [
    "because",
    "therefore",
    "however",
    "although",
    "since",
    "thus",
    "hence",
    "consequently",
];

static TECHNICAL_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\w{8,}").unwrap(),
        Regex::new(r"[A-Z]{2,}").unwrap(),
        Regex::new(r"\d+\.\d+").unwrap(),
    ]
});

/// Excerpts of matched learner messages are capped at this many characters.
pub const EXCERPT_CHARS: usize = 100;

/// Themes reported by the model for the learner's messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeSummary {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// Direction of understanding across a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    StrongImprovement,
    ModerateImprovement,
    Stable,
    SlightDecline,
    ConcerningDecline,
    InsufficientData,
}

impl Trend {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.3 {
            Trend::StrongImprovement
        } else if score >= 0.1 {
            Trend::ModerateImprovement
        } else if score > -0.1 {
            Trend::Stable
        } else if score > -0.3 {
            Trend::SlightDecline
        } else {
            Trend::ConcerningDecline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::StrongImprovement => "strong_improvement",
            Trend::ModerateImprovement => "moderate_improvement",
            Trend::Stable => "stable",
            Trend::SlightDecline => "slight_decline",
            Trend::ConcerningDecline => "concerning_decline",
            Trend::InsufficientData => "insufficient_data",
        }
    }

    /// Sentence added to report feedback for this trend, if any.
    pub fn remark(&self) -> Option<&'static str> {
        match self {
            Trend::StrongImprovement => Some("Great progress shown throughout the conversation!"),
            Trend::ModerateImprovement => {
                Some("Understanding grew steadily over the course of the conversation.")
            }
            Trend::SlightDecline => {
                Some("Later answers were less developed than earlier ones; revisit the later topics.")
            }
            Trend::ConcerningDecline => {
                Some("Consider taking a break and reviewing earlier concepts.")
            }
            Trend::Stable | Trend::InsufficientData => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageScore {
    pub index: usize,
    pub complexity: f64,
    pub depth: f64,
    pub combined: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progression {
    /// Second-half mean minus first-half mean, rounded to 2 decimals.
    pub score: f64,
    pub trend: Trend,
    pub message_scores: Vec<MessageScore>,
    pub early_average: f64,
    pub late_average: f64,
}

impl Progression {
    pub fn insufficient() -> Self {
        Self {
            score: 0.0,
            trend: Trend::InsufficientData,
            message_scores: Vec::new(),
            early_average: 0.0,
            late_average: 0.0,
        }
    }
}

/// A known misconception pattern triggered by a learner message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MisconceptionMatch {
    pub pattern_id: String,
    pub name: String,
    pub concept: String,
    pub phrase: String,
    pub excerpt: String,
    pub recommended_followups: Vec<String>,
    /// One of the recommended follow-ups, picked at random.
    pub suggested_followup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MisconceptionReport {
    /// Evaluator question themes asked more than once.
    pub repeated_themes: Vec<String>,
    pub matched: Vec<MisconceptionMatch>,
}

impl MisconceptionReport {
    pub fn count(&self) -> usize {
        self.repeated_themes.len() + self.matched.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationAnalysis {
    pub learner_messages: usize,
    pub evaluator_messages: usize,
    /// Total characters across learner messages.
    pub learner_chars: usize,
    pub themes: ThemeSummary,
    pub progression: Progression,
    pub misconceptions: MisconceptionReport,
}

pub struct ConversationAnalyzer {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
}

impl ConversationAnalyzer {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    /// Load a conversation's transcript and patterns, then analyze them.
    pub async fn analyze(&self, conversation_id: &str) -> Result<ConversationAnalysis> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                PipelineError::input(format!("conversation {} not found", conversation_id))
            })?;
        let transcript = self.store.list_messages(conversation_id).await?;
        let patterns = self
            .store
            .list_misconceptions(&conversation.document_id)
            .await?;
        Ok(self.analyze_transcript(&transcript, &patterns).await)
    }

    /// Analyze a transcript already in order. Never fails: model problems
    /// degrade to empty themes.
    pub async fn analyze_transcript(
        &self,
        transcript: &[Message],
        patterns: &[MisconceptionPattern],
    ) -> ConversationAnalysis {
        let learner: Vec<&str> = transcript
            .iter()
            .filter(|m| m.is_learner())
            .map(|m| m.content.as_str())
            .collect();
        let evaluator: Vec<&str> = transcript
            .iter()
            .filter(|m| m.is_evaluator())
            .map(|m| m.content.as_str())
            .collect();

        if learner.is_empty() {
            return ConversationAnalysis {
                learner_messages: 0,
                evaluator_messages: evaluator.len(),
                learner_chars: 0,
                themes: ThemeSummary::default(),
                progression: Progression::insufficient(),
                misconceptions: MisconceptionReport::default(),
            };
        }

        let themes = self.extract_themes(&learner).await;
        let progression = progression(&learner);
        let misconceptions = MisconceptionReport {
            repeated_themes: repeated_question_themes(&evaluator),
            matched: match_patterns(&learner, patterns),
        };
        debug!(
            learner = learner.len(),
            trend = progression.trend.as_str(),
            misconceptions = misconceptions.count(),
            "conversation analyzed"
        );

        ConversationAnalysis {
            learner_messages: learner.len(),
            evaluator_messages: evaluator.len(),
            learner_chars: learner.iter().map(|m| char_len(m)).sum(),
            themes,
            progression,
            misconceptions,
        }
    }

    async fn extract_themes(&self, learner: &[&str]) -> ThemeSummary {
        let request = prompts::theme_extraction(&learner.join(" "));
        match self.model.complete(&request).await {
            Ok(raw) => {
                let decoded = decode_object::<ThemeSummary>(&raw);
                if !decoded.ok {
                    warn!("theme extraction returned unparsable output");
                }
                let mut themes = decoded.value;
                themes.confidence = themes.confidence.clamp(0.0, 1.0);
                themes
            }
            Err(e) => {
                warn!(error = %e, "theme extraction failed");
                ThemeSummary::default()
            }
        }
    }
}

/// Lexical complexity of one message, capped at 1.0.
pub fn complexity(content: &str) -> f64 {
    let word_count = content.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }
    let mut unique = words(content);
    unique.sort();
    unique.dedup();
    let sentences = content
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);

    let score = unique.len() as f64 / word_count as f64
        + (word_count as f64 / sentences as f64) / 10.0;
    score.min(1.0)
}

/// Conceptual depth of one message, capped at 1.0.
pub fn depth(content: &str) -> f64 {
    let lower = content.to_lowercase();
    let connectives = CONNECTIVES.iter().filter(|w| lower.contains(*w)).count();
    let technical = TECHNICAL_PATTERNS
        .iter()
        .filter(|re| re.is_match(content))
        .count();

    let score = connectives as f64 * 0.1
        + technical as f64 * 0.15
        + (char_len(content) as f64 / 100.0) * 0.05;
    score.min(1.0)
}

/// Progression across learner messages in transcript order.
pub fn progression(learner: &[&str]) -> Progression {
    if learner.len() < 2 {
        return Progression::insufficient();
    }

    let message_scores: Vec<MessageScore> = learner
        .iter()
        .enumerate()
        .map(|(index, content)| {
            let complexity = complexity(content);
            let depth = depth(content);
            MessageScore {
                index,
                complexity,
                depth,
                combined: (complexity + depth) / 2.0,
            }
        })
        .collect();

    let split = message_scores.len() / 2;
    let mean = |scores: &[MessageScore]| {
        scores.iter().map(|s| s.combined).sum::<f64>() / scores.len() as f64
    };
    let early = mean(&message_scores[..split]);
    let late = mean(&message_scores[split..]);
    let score = late - early;

    Progression {
        score: round_to(score, 2),
        trend: Trend::from_score(score),
        message_scores,
        early_average: round_to(early, 2),
        late_average: round_to(late, 2),
    }
}

/// Coarse theme of a question: its two longest words over four characters,
/// longest first, joined by `_`. Empty when no word qualifies.
pub fn theme_key(question: &str) -> String {
    let mut candidates: Vec<(usize, String)> = words(question)
        .into_iter()
        .filter(|w| char_len(w) > 4)
        .enumerate()
        .collect();
    candidates.sort_by(|(ia, a), (ib, b)| char_len(b).cmp(&char_len(a)).then(ia.cmp(ib)));
    candidates
        .into_iter()
        .take(2)
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join("_")
}

/// Themes of evaluator questions that occur more than once, in order of
/// first appearance.
pub fn repeated_question_themes(evaluator: &[&str]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for question in evaluator.iter().filter(|m| m.contains('?')) {
        let key = theme_key(question);
        if key.is_empty() {
            continue;
        }
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    order.retain(|k| counts.get(k).copied().unwrap_or(0) > 1);
    order
}

/// One match per pattern, from the first learner message that triggers it.
pub fn match_patterns(learner: &[&str], patterns: &[MisconceptionPattern]) -> Vec<MisconceptionMatch> {
    let mut rng = rand::thread_rng();
    patterns
        .iter()
        .filter_map(|pattern| {
            learner.iter().find_map(|message| {
                pattern.detected_in(message).map(|phrase| MisconceptionMatch {
                    pattern_id: pattern.id.clone(),
                    name: pattern.name.clone(),
                    concept: pattern.concept.clone(),
                    phrase: phrase.to_string(),
                    excerpt: truncate_chars(message, EXCERPT_CHARS),
                    recommended_followups: pattern.recommended_followups.clone(),
                    suggested_followup: pattern.random_followup(&mut rng).map(str::to_string),
                })
            })
        })
        .collect()
}
