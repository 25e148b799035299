//! Core data types shared by every stage of the pipeline.
//!
//! Ownership follows the persisted hierarchy: a [`Document`] owns its
//! [`Chunk`]s, [`Summary`], [`Rubric`]s and [`MisconceptionPattern`]s; a
//! [`Conversation`] owns its [`Message`]s and [`GradeReport`]s. Embeddings
//! live inside their chunk by value.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing state of an uploaded document.
///
/// The only transition is `Uploaded → Processed`, performed by the
/// indexer once at least one chunk was embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processed" => Some(DocumentStatus::Processed),
            _ => None,
        }
    }
}

/// A unit of instructional material, made of one or more source files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == DocumentStatus::Processed
    }
}

/// A raw file attached to a document, before text extraction.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Convenience constructor for `text/plain` content.
    pub fn text(filename: impl Into<String>, text: &str) -> Self {
        Self::new(filename, "text/plain", text.as_bytes().to_vec())
    }
}

/// A bounded segment of document text paired with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Name of the source file this chunk was cut from.
    pub source: String,
    /// Position of the chunk within its source file.
    pub ordinal: i64,
    /// Position of the chunk across the whole document.
    pub sequence: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// A stored chunk together with its cosine distance to a query vector.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: Chunk,
    /// `1 - cosine_similarity`, so `0.0` is an exact match.
    pub distance: f64,
}

/// The four proficiency levels of a rubric, all required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricLevels {
    pub beginner: String,
    pub developing: String,
    pub proficient: String,
    pub mastery: String,
}

impl RubricLevels {
    pub const KEYS: [&'static str; 4] = ["beginner", "developing", "proficient", "mastery"];

    /// Build levels from a JSON object, requiring every key to hold a
    /// non-blank string. Returns the missing keys otherwise.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Vec<&'static str>> {
        let pick = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let missing: Vec<&'static str> = Self::KEYS
            .iter()
            .copied()
            .filter(|k| pick(k).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(Self {
            beginner: pick("beginner").unwrap_or_default(),
            developing: pick("developing").unwrap_or_default(),
            proficient: pick("proficient").unwrap_or_default(),
            mastery: pick("mastery").unwrap_or_default(),
        })
    }

    /// Names of levels whose description is blank.
    pub fn blank_levels(&self) -> Vec<&'static str> {
        self.iter()
            .filter(|(_, desc)| desc.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.blank_levels().is_empty()
    }

    /// Levels in ascending order of proficiency.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("beginner", self.beginner.as_str()),
            ("developing", self.developing.as_str()),
            ("proficient", self.proficient.as_str()),
            ("mastery", self.mastery.as_str()),
        ]
        .into_iter()
    }

    pub fn get(&self, level: &str) -> Option<&str> {
        let level = level.to_lowercase();
        self.iter().find(|(name, _)| *name == level).map(|(_, d)| d)
    }
}

/// Assessment criteria for one concept of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub id: String,
    pub document_id: String,
    pub concept: String,
    pub levels: RubricLevels,
    pub created_at: DateTime<Utc>,
}

impl Rubric {
    pub fn new(document_id: &str, concept: impl Into<String>, levels: RubricLevels) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            concept: concept.into(),
            levels,
            created_at: Utc::now(),
        }
    }

    pub fn level_description(&self, level: &str) -> Option<&str> {
        self.levels.get(level)
    }
}

/// Structured summary of a document. At most one exists per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(document_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A known incorrect understanding and the phrases that signal it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisconceptionPattern {
    pub id: String,
    pub document_id: String,
    pub concept: String,
    pub name: String,
    pub signal_phrases: Vec<String>,
    pub recommended_followups: Vec<String>,
}

impl MisconceptionPattern {
    pub fn new(
        document_id: &str,
        concept: impl Into<String>,
        name: impl Into<String>,
        signal_phrases: Vec<String>,
        recommended_followups: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            concept: concept.into(),
            name: name.into(),
            signal_phrases,
            recommended_followups,
        }
    }

    /// First signal phrase found in `text`, compared case-insensitively.
    pub fn detected_in(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.signal_phrases
            .iter()
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
            .find(|p| haystack.contains(&p.to_lowercase()))
    }

    pub fn random_followup<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.recommended_followups
            .choose(rng)
            .map(String::as_str)
    }
}

/// A dialogue session between a learner and the evaluator about one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub document_id: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(document_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Learner,
    Evaluator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Learner => "learner",
            Role::Evaluator => "evaluator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learner" => Some(Role::Learner),
            "evaluator" => Some(Role::Evaluator),
            _ => None,
        }
    }
}

/// One append-only turn of a conversation.
///
/// Ordering is `(created_at, seq)`; `seq` is assigned by the store and
/// breaks ties between messages created in the same instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

impl Message {
    pub fn is_learner(&self) -> bool {
        self.role == Role::Learner
    }

    pub fn is_evaluator(&self) -> bool {
        self.role == Role::Evaluator
    }
}

/// Sort messages into transcript order.
pub fn sort_transcript(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
}

/// Proficiency level assigned to a concept evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProficiencyLevel {
    Novice,
    Developing,
    Proficient,
    Advanced,
}

impl ProficiencyLevel {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "novice" => Some(ProficiencyLevel::Novice),
            "developing" => Some(ProficiencyLevel::Developing),
            "proficient" => Some(ProficiencyLevel::Proficient),
            "advanced" => Some(ProficiencyLevel::Advanced),
            _ => None,
        }
    }

    /// Canonical score used when only a level is known.
    pub fn canonical_score(&self) -> f64 {
        match self {
            ProficiencyLevel::Advanced => 0.95,
            ProficiencyLevel::Proficient => 0.75,
            ProficiencyLevel::Developing => 0.55,
            ProficiencyLevel::Novice => 0.25,
        }
    }

    /// Canonical score for a raw label; unrecognised labels score `0.0`.
    pub fn score_for_label(label: Option<&str>) -> f64 {
        label
            .and_then(Self::parse)
            .map(|l| l.canonical_score())
            .unwrap_or(0.0)
    }

    /// Nearest level for a score on the 0–1 scale.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ProficiencyLevel::Advanced
        } else if score >= 0.65 {
            ProficiencyLevel::Proficient
        } else if score >= 0.4 {
            ProficiencyLevel::Developing
        } else {
            ProficiencyLevel::Novice
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProficiencyLevel::Novice => "novice",
            ProficiencyLevel::Developing => "developing",
            ProficiencyLevel::Proficient => "proficient",
            ProficiencyLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored assessment of one rubric against transcript evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEvaluation {
    pub concept: String,
    pub level: ProficiencyLevel,
    /// Always within `[0, 1]`.
    pub score: f64,
    pub evidence: String,
    pub feedback: String,
    pub confidence: f64,
}

impl ConceptEvaluation {
    /// Worst-case result used when the model output cannot be used.
    pub fn fallback(concept: &str) -> Self {
        Self {
            concept: concept.to_string(),
            level: ProficiencyLevel::Novice,
            score: 0.25,
            evidence: "unable to parse".to_string(),
            feedback: "Evaluation parsing failed".to_string(),
            confidence: 0.0,
        }
    }
}

/// Per-concept entry of a grade report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptScore {
    pub level: ProficiencyLevel,
    pub score: f64,
    pub evidence: String,
    pub feedback: String,
}

/// Aggregated outcome of one evaluation run. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub id: String,
    pub conversation_id: String,
    pub overall_score: f64,
    pub detailed_scores: IndexMap<String, ConceptScore>,
    pub feedback: String,
    pub recommendations: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl GradeReport {
    /// Performance band for the overall score.
    pub fn performance_level(&self) -> &'static str {
        performance_band(self.overall_score)
    }

    pub fn needs_attention(&self) -> bool {
        self.overall_score < 0.5 || self.weaknesses.len() * 2 > self.detailed_scores.len()
    }
}

/// Map a 0–1 score onto the report's performance band.
pub fn performance_band(score: f64) -> &'static str {
    if score >= 0.8 {
        "excellent"
    } else if score >= 0.6 {
        "good"
    } else if score >= 0.4 {
        "fair"
    } else {
        "needs improvement"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn levels() -> RubricLevels {
        RubricLevels {
            beginner: "b".into(),
            developing: "d".into(),
            proficient: "p".into(),
            mastery: "m".into(),
        }
    }

    #[test]
    fn test_rubric_levels_from_json_requires_all_keys() {
        let v = serde_json::json!({"beginner": "a", "developing": "b", "proficient": "c"});
        assert_eq!(RubricLevels::from_json(&v).unwrap_err(), vec!["mastery"]);

        let v = serde_json::json!({
            "beginner": "a", "developing": "  ", "proficient": "c", "mastery": "d"
        });
        assert_eq!(RubricLevels::from_json(&v).unwrap_err(), vec!["developing"]);

        let v = serde_json::json!({
            "beginner": "a", "developing": "b", "proficient": "c", "mastery": "d"
        });
        let levels = RubricLevels::from_json(&v).unwrap();
        assert_eq!(levels.mastery, "d");
        assert!(levels.is_complete());
    }

    #[test]
    fn test_level_lookup_is_case_insensitive() {
        let rubric = Rubric::new("doc", "Limits", levels());
        assert_eq!(rubric.level_description("Proficient"), Some("p"));
        assert_eq!(rubric.level_description("expert"), None);
    }

    #[test]
    fn test_canonical_scores() {
        assert_eq!(ProficiencyLevel::score_for_label(Some("advanced")), 0.95);
        assert_eq!(ProficiencyLevel::score_for_label(Some("Proficient")), 0.75);
        assert_eq!(ProficiencyLevel::score_for_label(Some("developing")), 0.55);
        assert_eq!(ProficiencyLevel::score_for_label(Some("novice")), 0.25);
        assert_eq!(ProficiencyLevel::score_for_label(Some("guru")), 0.0);
        assert_eq!(ProficiencyLevel::score_for_label(None), 0.0);
    }

    #[test]
    fn test_misconception_detection() {
        let pattern = MisconceptionPattern::new(
            "doc",
            "Derivatives",
            "slope is constant",
            vec!["Slope Never Changes".into()],
            vec!["What happens to the slope of x^2?".into()],
        );
        assert_eq!(
            pattern.detected_in("I think the slope never changes anywhere"),
            Some("Slope Never Changes")
        );
        assert!(pattern.detected_in("the slope varies").is_none());

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            pattern.random_followup(&mut rng),
            Some("What happens to the slope of x^2?")
        );
    }

    #[test]
    fn test_transcript_order_breaks_ties_by_seq() {
        let t = Utc::now();
        let msg = |seq: i64, at: DateTime<Utc>| Message {
            id: format!("m{}", seq),
            conversation_id: "c".into(),
            role: Role::Learner,
            content: String::new(),
            created_at: at,
            seq,
        };
        let mut msgs = vec![msg(3, t), msg(1, t + Duration::seconds(1)), msg(2, t)];
        sort_transcript(&mut msgs);
        let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);
    }

    #[test]
    fn test_performance_band_edges() {
        assert_eq!(performance_band(0.8), "excellent");
        assert_eq!(performance_band(0.79), "good");
        assert_eq!(performance_band(0.6), "good");
        assert_eq!(performance_band(0.4), "fair");
        assert_eq!(performance_band(0.39), "needs improvement");
    }
}
