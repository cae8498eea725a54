//! Transaction-scoped writers for the normalized content tables.
//!
//! Every function here runs against an open [`rusqlite::Transaction`] so a
//! failure part-way through an article rolls back all of that article's
//! rows. Replacement is delete-then-insert per (article, difficulty);
//! summaries upsert on their composite key. Re-applying the same payload
//! converges instead of duplicating rows.

use rusqlite::{params, Transaction};
use serde::Deserialize;
use tracing::warn;

use crate::models::{
    Attitude, Difficulty, EnrichedPayload, Keyword, Language, LegacyFeedback, Perspective,
    QuizQuestion,
};

/// Write every normalized row for one article from a validated payload.
pub fn apply_payload(
    tx: &Transaction,
    article_id: i64,
    payload: &EnrichedPayload,
) -> rusqlite::Result<()> {
    for (difficulty, level) in payload.levels() {
        upsert_summary(
            tx,
            article_id,
            difficulty,
            Language::En,
            &level.title,
            &level.summary,
        )?;
        replace_keywords(tx, article_id, difficulty, &level.keywords)?;
        replace_questions(tx, article_id, difficulty, &level.questions)?;
        replace_background(tx, article_id, difficulty, &level.background_reading)?;
        replace_perspectives(tx, article_id, difficulty, &level.perspectives)?;
    }

    // The Chinese rendering is a language variant of the hard tier.
    upsert_summary(
        tx,
        article_id,
        Difficulty::Hard,
        Language::Zh,
        &payload.chinese.title,
        &payload.chinese.summary,
    )?;

    Ok(())
}

pub fn upsert_summary(
    tx: &Transaction,
    article_id: i64,
    difficulty: Difficulty,
    language: Language,
    title: &str,
    body: &str,
) -> rusqlite::Result<()> {
    tx.execute(
        r#"INSERT INTO summaries (article_id, difficulty, language, title, body, generated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
           ON CONFLICT(article_id, difficulty, language) DO UPDATE SET
               title = excluded.title,
               body = excluded.body,
               generated_at = datetime('now')"#,
        params![article_id, difficulty.as_str(), language.as_str(), title, body],
    )?;
    Ok(())
}

pub fn replace_keywords(
    tx: &Transaction,
    article_id: i64,
    difficulty: Difficulty,
    keywords: &[Keyword],
) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM keywords WHERE article_id = ?1 AND difficulty = ?2",
        params![article_id, difficulty.as_str()],
    )?;
    for keyword in keywords {
        tx.execute(
            "INSERT INTO keywords (article_id, difficulty, term, explanation) VALUES (?1, ?2, ?3, ?4)",
            params![article_id, difficulty.as_str(), keyword.term, keyword.explanation],
        )?;
    }
    Ok(())
}

/// Choices live and die with their parent question, so both tables are
/// cleared before re-inserting. The ordinal column preserves payload order.
pub fn replace_questions(
    tx: &Transaction,
    article_id: i64,
    difficulty: Difficulty,
    questions: &[QuizQuestion],
) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM choices WHERE question_id IN
             (SELECT id FROM questions WHERE article_id = ?1 AND difficulty = ?2)",
        params![article_id, difficulty.as_str()],
    )?;
    tx.execute(
        "DELETE FROM questions WHERE article_id = ?1 AND difficulty = ?2",
        params![article_id, difficulty.as_str()],
    )?;

    for (ordinal, question) in questions.iter().enumerate() {
        tx.execute(
            "INSERT INTO questions (article_id, difficulty, ordinal, question) VALUES (?1, ?2, ?3, ?4)",
            params![article_id, difficulty.as_str(), ordinal as i64, question.question],
        )?;
        let question_id = tx.last_insert_rowid();

        for option in &question.options {
            let is_correct = option == &question.correct_answer;
            let explanation = if is_correct && !question.explanation.is_empty() {
                Some(question.explanation.as_str())
            } else {
                None
            };
            tx.execute(
                "INSERT INTO choices (question_id, option_text, is_correct, explanation) VALUES (?1, ?2, ?3, ?4)",
                params![question_id, option, is_correct, explanation],
            )?;
        }
    }
    Ok(())
}

pub fn replace_background(
    tx: &Transaction,
    article_id: i64,
    difficulty: Difficulty,
    paragraphs: &[String],
) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM background_read WHERE article_id = ?1 AND difficulty = ?2",
        params![article_id, difficulty.as_str()],
    )?;
    for (ordinal, paragraph) in paragraphs.iter().enumerate() {
        tx.execute(
            "INSERT INTO background_read (article_id, difficulty, ordinal, paragraph) VALUES (?1, ?2, ?3, ?4)",
            params![article_id, difficulty.as_str(), ordinal as i64, paragraph],
        )?;
    }
    Ok(())
}

pub fn replace_perspectives(
    tx: &Transaction,
    article_id: i64,
    difficulty: Difficulty,
    perspectives: &[Perspective],
) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM comments WHERE article_id = ?1 AND difficulty = ?2",
        params![article_id, difficulty.as_str()],
    )?;
    for perspective in perspectives {
        tx.execute(
            "INSERT INTO comments (article_id, difficulty, attitude, author, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                article_id,
                difficulty.as_str(),
                perspective.attitude.as_str(),
                perspective.author,
                perspective.comment
            ],
        )?;
    }
    Ok(())
}

// Legacy migration -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LegacyQuestion {
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(alias = "correct_answer")]
    correct: String,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct LegacyComment {
    #[serde(default = "unknown_author")]
    author: String,
    attitude: String,
    #[serde(alias = "text")]
    comment: String,
}

fn unknown_author() -> String {
    "unknown".to_string()
}

/// The discussion blob appeared both as a bare list and wrapped in an
/// object, depending on the writer's vintage.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyDiscussion {
    List(Vec<LegacyComment>),
    Wrapped { comments: Vec<LegacyComment> },
}

impl LegacyDiscussion {
    fn into_comments(self) -> Vec<LegacyComment> {
        match self {
            LegacyDiscussion::List(comments) => comments,
            LegacyDiscussion::Wrapped { comments } => comments,
        }
    }
}

/// Explode one legacy wide row into normalized rows.
///
/// The legacy schema had no per-difficulty granularity, so the same summary
/// text is reused across all three tiers (a documented lossy upconversion).
/// Keyword, question and discussion blobs land at the mid tier. Everything
/// is an upsert or a replace, so repeated runs converge.
pub fn migrate_row(
    tx: &Transaction,
    legacy: &LegacyFeedback,
    title_en: &str,
    title_local: Option<&str>,
) -> rusqlite::Result<()> {
    let title_zh = title_local.unwrap_or(title_en);

    for difficulty in Difficulty::ALL {
        if let Some(summary) = non_empty(legacy.summary_en.as_deref()) {
            upsert_summary(tx, legacy.article_id, difficulty, Language::En, title_en, summary)?;
        }
        if let Some(summary) = non_empty(legacy.summary_zh.as_deref()) {
            upsert_summary(tx, legacy.article_id, difficulty, Language::Zh, title_zh, summary)?;
        }
    }

    let keywords: Vec<Keyword> =
        parse_blob(legacy.article_id, "keywords", legacy.keywords_json.as_deref());
    if !keywords.is_empty() {
        replace_keywords(tx, legacy.article_id, Difficulty::Mid, &keywords)?;
    }

    let legacy_questions: Vec<LegacyQuestion> =
        parse_blob(legacy.article_id, "questions", legacy.questions_json.as_deref());
    let questions = convert_legacy_questions(legacy.article_id, legacy_questions);
    if !questions.is_empty() {
        replace_questions(tx, legacy.article_id, Difficulty::Mid, &questions)?;
    }

    let discussion: Option<LegacyDiscussion> =
        parse_optional_blob(legacy.article_id, "discussion", legacy.discussion_json.as_deref());
    if let Some(discussion) = discussion {
        let perspectives: Vec<Perspective> = discussion
            .into_comments()
            .into_iter()
            .map(|comment| Perspective {
                attitude: Attitude::from_str(&comment.attitude).unwrap_or_else(|| {
                    warn!(
                        "article {}: unknown legacy attitude {:?}, using neutral",
                        legacy.article_id, comment.attitude
                    );
                    Attitude::Neutral
                }),
                author: comment.author,
                comment: comment.comment,
            })
            .collect();
        if !perspectives.is_empty() {
            replace_perspectives(tx, legacy.article_id, Difficulty::Mid, &perspectives)?;
        }
    }

    Ok(())
}

fn convert_legacy_questions(
    article_id: i64,
    legacy_questions: Vec<LegacyQuestion>,
) -> Vec<QuizQuestion> {
    legacy_questions
        .into_iter()
        .filter_map(|q| match resolve_correct(&q.options, &q.correct) {
            Some(index) => Some(QuizQuestion {
                correct_answer: q.options[index].clone(),
                question: q.question,
                options: q.options,
                explanation: q.explanation,
            }),
            None => {
                warn!(
                    "article {}: legacy question {:?} has unresolvable correct answer {:?}, skipped",
                    article_id, q.question, q.correct
                );
                None
            }
        })
        .collect()
}

/// Exact option-text match first. Old rows stored a bare letter instead,
/// which the writer matched by prefix; resolve those by index and log it.
fn resolve_correct(options: &[String], correct: &str) -> Option<usize> {
    if let Some(index) = options.iter().position(|option| option == correct) {
        return Some(index);
    }

    let trimmed = correct.trim().trim_end_matches('.');
    let mut chars = trimmed.chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        let letter = letter.to_ascii_uppercase();
        if letter.is_ascii_uppercase() {
            let index = (letter as usize) - ('A' as usize);
            if index < options.len() {
                warn!(
                    "legacy correct answer {:?} resolved to option {} by letter index",
                    correct, index
                );
                return Some(index);
            }
        }
    }
    None
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|s| !s.trim().is_empty())
}

/// Legacy blobs contain occasional hand-edited garbage. A blob that does
/// not parse is skipped with a warning rather than failing the migration.
fn parse_blob<T: Default + serde::de::DeserializeOwned>(
    article_id: i64,
    what: &str,
    blob: Option<&str>,
) -> T {
    parse_optional_blob(article_id, what, blob).unwrap_or_default()
}

fn parse_optional_blob<T: serde::de::DeserializeOwned>(
    article_id: i64,
    what: &str,
    blob: Option<&str>,
) -> Option<T> {
    let text = non_empty(blob)?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("article {}: unreadable legacy {} blob: {}", article_id, what, e);
            None
        }
    }
}
