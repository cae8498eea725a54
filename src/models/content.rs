use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading difficulty of generated content. Chinese output is not a
/// difficulty tier, it is a language variant of the hard tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Mid, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Mid => "mid",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "mid" => Some(Difficulty::Mid),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "en" => Some(Language::En),
            "zh" => Some(Language::Zh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attitude {
    Positive,
    Neutral,
    Negative,
}

impl Attitude {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attitude::Positive => "positive",
            Attitude::Neutral => "neutral",
            Attitude::Negative => "negative",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Attitude::Positive),
            "neutral" => Some(Attitude::Neutral),
            "negative" => Some(Attitude::Negative),
            _ => None,
        }
    }
}

/// Glossary entry for one difficulty tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    #[serde(alias = "word")]
    pub term: String,
    #[serde(alias = "meaning")]
    pub explanation: String,
}

/// A quiz question as it appears in a validated payload. `correct_answer`
/// always equals one of `options` exactly; the validator enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(alias = "correct")]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perspective {
    pub author: String,
    pub attitude: Attitude,
    #[serde(alias = "text")]
    pub comment: String,
}

/// Content generated for one difficulty tier of one article.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelContent {
    pub title: String,
    pub summary: String,
    pub keywords: Vec<Keyword>,
    pub questions: Vec<QuizQuestion>,
    pub background_reading: Vec<String>,
    pub perspectives: Vec<Perspective>,
}

/// Chinese rendering of the hard tier. Title and summary only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChineseSummary {
    pub title: String,
    pub summary: String,
}

/// A fully validated enrichment payload, ready for the normalizer.
/// Only the validator constructs this from external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedPayload {
    pub easy: LevelContent,
    pub mid: LevelContent,
    pub hard: LevelContent,
    pub chinese: ChineseSummary,
    /// Soft findings (dropped questions, language-purity flags). Logged by
    /// the caller, never a reason to reject the payload.
    pub warnings: Vec<String>,
}

impl EnrichedPayload {
    pub fn levels(&self) -> [(Difficulty, &LevelContent); 3] {
        [
            (Difficulty::Easy, &self.easy),
            (Difficulty::Mid, &self.mid),
            (Difficulty::Hard, &self.hard),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub id: i64,
    pub article_id: i64,
    pub difficulty: Difficulty,
    pub language: Language,
    pub title: String,
    pub body: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredQuestion {
    pub id: i64,
    pub ordinal: i64,
    pub question: String,
    pub choices: Vec<StoredChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredChoice {
    pub id: i64,
    pub option_text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredComment {
    pub author: String,
    pub attitude: Attitude,
    pub body: String,
}

/// Deprecated wide-table row. Summaries are plain text, everything else is
/// a JSON blob. Read only by the one-time migration.
#[derive(Debug, Clone)]
pub struct LegacyFeedback {
    pub id: i64,
    pub article_id: i64,
    pub summary_en: Option<String>,
    pub summary_zh: Option<String>,
    pub keywords_json: Option<String>,
    pub questions_json: Option<String>,
    pub discussion_json: Option<String>,
}
