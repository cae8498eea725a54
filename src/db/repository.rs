use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Article, Attitude, Difficulty, EnrichedPayload, Keyword, Language, LegacyFeedback, NewArticle,
    StoredChoice, StoredComment, StoredQuestion, Summary,
};

use super::normalize;
use super::schema::{apply_additive_migrations, SCHEMA};

/// `last_error` is bounded so repeated failures cannot grow the row
/// without limit.
const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub processed: i64,
    /// Articles at or past the failure cap, excluded until `reset`.
    pub exhausted: i64,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path.to_string()).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            apply_additive_migrations(conn)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Article store

    /// Ingestion contract point. Returns None when the URL is already
    /// present; new rows start unprocessed with a zero failure count.
    pub async fn insert_article(&self, article: NewArticle) -> Result<Option<i64>> {
        Url::parse(&article.url)?;

        let id = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO articles (url, title, title_local, description, content, category_id, published_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(url) DO NOTHING"#,
                    params![
                        article.url,
                        article.title,
                        article.title_local,
                        article.description,
                        article.content,
                        article.category_id,
                        article.published_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(if changed > 0 {
                    Some(conn.last_insert_rowid())
                } else {
                    None
                })
            })
            .await?;
        Ok(id)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, url, title, title_local, description, content, category_id,
                              published_at, fetched_at, processed, in_progress, failure_count,
                              last_error, processed_at, claimed_at
                       FROM articles WHERE id = ?1"#,
                )?;
                let article = stmt
                    .query_row(params![id], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn ensure_category(&self, name: &str) -> Result<i64> {
        let name = name.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
                    params![name],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM categories WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    // Status tracker

    /// Read-only view of which articles a batch run would pick up, in
    /// stable ascending id order.
    pub async fn select_eligible(&self, limit: usize, max_failures: u32) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM articles
                     WHERE processed = 0 AND in_progress = 0 AND failure_count < ?1
                     ORDER BY id ASC LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![max_failures, limit as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Select and claim in a single statement. Two overlapping process
    /// invocations can never both claim the same article because the flag
    /// flip happens inside the same UPDATE that filters on it.
    pub async fn claim_next(&self, limit: usize, max_failures: u32) -> Result<Vec<i64>> {
        let claimed_at = Utc::now().to_rfc3339();
        let mut ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "UPDATE articles SET in_progress = 1, claimed_at = ?1
                     WHERE id IN (
                         SELECT id FROM articles
                         WHERE processed = 0 AND in_progress = 0 AND failure_count < ?2
                         ORDER BY id ASC LIMIT ?3
                     )
                     RETURNING id",
                )?;
                let ids = stmt
                    .query_map(params![claimed_at, max_failures, limit as i64], |row| {
                        row.get(0)
                    })?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        // RETURNING emits rows in arbitrary order
        ids.sort_unstable();
        debug!("claimed {} articles", ids.len());
        Ok(ids)
    }

    /// Idempotent: claiming an already claimed article only refreshes the
    /// claim timestamp. Callers doing their own dispatch use this with
    /// `select_eligible`; the batch pipeline claims atomically instead.
    #[allow(dead_code)]
    pub async fn mark_in_progress(&self, id: i64) -> Result<()> {
        let claimed_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET in_progress = 1, claimed_at = ?1 WHERE id = ?2",
                    params![claimed_at, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The only operation that flips `processed` on. The failure count is
    /// left as a lifetime audit counter.
    pub async fn record_success(&self, id: i64, processed_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET processed = 1, in_progress = 0, last_error = NULL, processed_at = ?1
                     WHERE id = ?2",
                    params![processed_at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn record_failure(&self, id: i64, error_message: &str) -> Result<()> {
        let message = truncate_error(error_message);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET in_progress = 0, failure_count = failure_count + 1, last_error = ?1
                     WHERE id = ?2",
                    params![message, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Operator action. Puts an exhausted article back in front of
    /// `select_eligible`.
    pub async fn reset(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET processed = 0, in_progress = 0, failure_count = 0,
                                         last_error = NULL, processed_at = NULL, claimed_at = NULL
                     WHERE id = ?1",
                    params![id],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::ArticleNotFound(id));
        }
        Ok(())
    }

    /// A worker that dies mid-run leaves its claim set forever; nothing
    /// else clears it. Returns how many claims were released.
    pub async fn reap_stale_in_progress(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let reaped = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET in_progress = 0, claimed_at = NULL
                     WHERE in_progress = 1 AND (claimed_at IS NULL OR claimed_at < ?1)",
                    params![cutoff],
                )?;
                Ok(changed as u64)
            })
            .await?;
        debug!("reaped {} stale claims", reaped);
        Ok(reaped)
    }

    pub async fn counts(&self, max_failures: u32) -> Result<StoreCounts> {
        let counts = self
            .conn
            .call(move |conn| {
                let counts = conn.query_row(
                    r#"SELECT COUNT(*),
                              COALESCE(SUM(processed), 0),
                              COALESCE(SUM(in_progress), 0),
                              COALESCE(SUM(CASE WHEN processed = 0 AND failure_count >= ?1 THEN 1 ELSE 0 END), 0),
                              COALESCE(SUM(CASE WHEN processed = 0 AND in_progress = 0 AND failure_count < ?1 THEN 1 ELSE 0 END), 0)
                       FROM articles"#,
                    params![max_failures],
                    |row| {
                        Ok(StoreCounts {
                            total: row.get(0)?,
                            processed: row.get(1)?,
                            in_progress: row.get(2)?,
                            exhausted: row.get(3)?,
                            pending: row.get(4)?,
                        })
                    },
                )?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    // Normalizer / migrator

    /// Replace all normalized rows for one article atomically. On any
    /// failure the transaction rolls back and prior rows stay intact.
    pub async fn apply_response(&self, article_id: i64, payload: EnrichedPayload) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                normalize::apply_payload(&tx, article_id, &payload)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// One-time administrative fan-out of the deprecated wide table.
    /// Never part of the normal processing flow. Returns the number of
    /// legacy rows migrated.
    pub async fn migrate_legacy_rows(&self) -> Result<usize> {
        let migrated = self
            .conn
            .call(|conn| {
                let rows: Vec<(LegacyFeedback, String, Option<String>)> = {
                    let mut stmt = conn.prepare(
                        r#"SELECT lf.id, lf.article_id, lf.summary_en, lf.summary_zh,
                                  lf.keywords_json, lf.questions_json, lf.discussion_json,
                                  a.title, a.title_local
                           FROM legacy_feedback lf
                           JOIN articles a ON a.id = lf.article_id
                           ORDER BY lf.article_id ASC"#,
                    )?;
                    let rows = stmt
                        .query_map([], |row| {
                            Ok((
                                LegacyFeedback {
                                    id: row.get(0)?,
                                    article_id: row.get(1)?,
                                    summary_en: row.get(2)?,
                                    summary_zh: row.get(3)?,
                                    keywords_json: row.get(4)?,
                                    questions_json: row.get(5)?,
                                    discussion_json: row.get(6)?,
                                },
                                row.get(7)?,
                                row.get(8)?,
                            ))
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                };

                let mut migrated = 0;
                for (legacy, title, title_local) in rows {
                    let tx = conn.transaction()?;
                    normalize::migrate_row(&tx, &legacy, &title, title_local.as_deref())?;
                    tx.commit()?;
                    migrated += 1;
                }
                Ok(migrated)
            })
            .await?;
        Ok(migrated)
    }

    // Read side for downstream consumers

    pub async fn get_summaries(&self, article_id: i64) -> Result<Vec<Summary>> {
        let summaries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, article_id, difficulty, language, title, body, generated_at
                       FROM summaries WHERE article_id = ?1
                       ORDER BY CASE difficulty WHEN 'easy' THEN 0 WHEN 'mid' THEN 1 ELSE 2 END, language"#,
                )?;
                let summaries = stmt
                    .query_map(params![article_id], |row| Ok(summary_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(summaries)
            })
            .await?;
        Ok(summaries)
    }

    pub async fn get_keywords(&self, article_id: i64, difficulty: Difficulty) -> Result<Vec<Keyword>> {
        let keywords = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT term, explanation FROM keywords
                     WHERE article_id = ?1 AND difficulty = ?2 ORDER BY id",
                )?;
                let keywords = stmt
                    .query_map(params![article_id, difficulty.as_str()], |row| {
                        Ok(Keyword {
                            term: row.get(0)?,
                            explanation: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keywords)
            })
            .await?;
        Ok(keywords)
    }

    pub async fn get_questions(
        &self,
        article_id: i64,
        difficulty: Difficulty,
    ) -> Result<Vec<StoredQuestion>> {
        let questions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, ordinal, question FROM questions
                     WHERE article_id = ?1 AND difficulty = ?2 ORDER BY ordinal",
                )?;
                let mut questions = stmt
                    .query_map(params![article_id, difficulty.as_str()], |row| {
                        Ok(StoredQuestion {
                            id: row.get(0)?,
                            ordinal: row.get(1)?,
                            question: row.get(2)?,
                            choices: Vec::new(),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut choice_stmt = conn.prepare(
                    "SELECT id, option_text, is_correct, explanation FROM choices
                     WHERE question_id = ?1 ORDER BY id",
                )?;
                for question in &mut questions {
                    question.choices = choice_stmt
                        .query_map(params![question.id], |row| {
                            Ok(StoredChoice {
                                id: row.get(0)?,
                                option_text: row.get(1)?,
                                is_correct: row.get::<_, i64>(2)? != 0,
                                explanation: row.get(3)?,
                            })
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                }
                Ok(questions)
            })
            .await?;
        Ok(questions)
    }

    pub async fn get_background(
        &self,
        article_id: i64,
        difficulty: Difficulty,
    ) -> Result<Vec<String>> {
        let paragraphs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT paragraph FROM background_read
                     WHERE article_id = ?1 AND difficulty = ?2 ORDER BY ordinal",
                )?;
                let paragraphs = stmt
                    .query_map(params![article_id, difficulty.as_str()], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(paragraphs)
            })
            .await?;
        Ok(paragraphs)
    }

    pub async fn get_comments(
        &self,
        article_id: i64,
        difficulty: Difficulty,
    ) -> Result<Vec<StoredComment>> {
        let comments = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT author, attitude, body FROM comments
                     WHERE article_id = ?1 AND difficulty = ?2 ORDER BY id",
                )?;
                let comments = stmt
                    .query_map(params![article_id, difficulty.as_str()], |row| {
                        let attitude: String = row.get(1)?;
                        Ok(StoredComment {
                            author: row.get(0)?,
                            attitude: Attitude::from_str(&attitude).unwrap_or(Attitude::Neutral),
                            body: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(comments)
            })
            .await?;
        Ok(comments)
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: String) -> Result<usize> {
        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, [])?))
            .await?;
        Ok(changed)
    }

    #[cfg(test)]
    pub(crate) async fn insert_legacy_feedback(
        &self,
        article_id: i64,
        summary_en: Option<String>,
        summary_zh: Option<String>,
        keywords_json: Option<String>,
        questions_json: Option<String>,
        discussion_json: Option<String>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO legacy_feedback
                           (article_id, summary_en, summary_zh, keywords_json, questions_json, discussion_json)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(article_id) DO UPDATE SET
                           summary_en = excluded.summary_en,
                           summary_zh = excluded.summary_zh,
                           keywords_json = excluded.keywords_json,
                           questions_json = excluded.questions_json,
                           discussion_json = excluded.discussion_json"#,
                    params![
                        article_id,
                        summary_en,
                        summary_zh,
                        keywords_json,
                        questions_json,
                        discussion_json
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LEN).collect()
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> Article {
    Article {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        title_local: row.get(3).unwrap(),
        description: row.get(4).unwrap(),
        content: row.get(5).unwrap(),
        category_id: row.get(6).unwrap(),
        published_at: row
            .get::<_, Option<String>>(7)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        fetched_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        processed: row.get::<_, i64>(9).unwrap() != 0,
        in_progress: row.get::<_, i64>(10).unwrap() != 0,
        failure_count: row.get(11).unwrap(),
        last_error: row.get(12).unwrap(),
        processed_at: row
            .get::<_, Option<String>>(13)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        claimed_at: row
            .get::<_, Option<String>>(14)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
    }
}

fn summary_from_row(row: &Row) -> Summary {
    let difficulty: String = row.get(2).unwrap();
    let language: String = row.get(3).unwrap();
    Summary {
        id: row.get(0).unwrap(),
        article_id: row.get(1).unwrap(),
        difficulty: Difficulty::from_str(&difficulty).unwrap_or_default(),
        language: Language::from_str(&language).unwrap_or(Language::En),
        title: row.get(4).unwrap(),
        body: row.get(5).unwrap(),
        generated_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attitude, ChineseSummary, LevelContent, Perspective, QuizQuestion};
    use tempfile::TempDir;

    async fn open_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    fn sample_article(url: &str) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            title: "Markets rally on rate cut hopes".to_string(),
            ..Default::default()
        }
    }

    fn sample_level(tag: &str) -> LevelContent {
        LevelContent {
            title: format!("{tag} title"),
            summary: format!("{tag} summary text"),
            keywords: vec![Keyword {
                term: format!("{tag}-rally"),
                explanation: "a rapid rise in prices".to_string(),
            }],
            questions: vec![QuizQuestion {
                question: "Why did markets rise?".to_string(),
                options: vec![
                    "Rate cut hopes".to_string(),
                    "Strong earnings".to_string(),
                    "A new tax".to_string(),
                ],
                correct_answer: "Rate cut hopes".to_string(),
                explanation: "Traders priced in lower rates.".to_string(),
            }],
            background_reading: vec![
                format!("{tag} central banks set short-term rates."),
                format!("{tag} lower rates tend to lift equities."),
            ],
            perspectives: vec![Perspective {
                author: "Market analyst".to_string(),
                attitude: Attitude::Positive,
                comment: "The rally has room to run.".to_string(),
            }],
        }
    }

    fn sample_payload() -> EnrichedPayload {
        EnrichedPayload {
            easy: sample_level("easy"),
            mid: sample_level("mid"),
            hard: sample_level("hard"),
            chinese: ChineseSummary {
                title: "市场因降息预期上涨".to_string(),
                summary: "市场在降息预期下全线上涨。".to_string(),
            },
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn insert_article_dedups_by_url() {
        let (_dir, repo) = open_repo().await;
        let first = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn insert_article_rejects_invalid_url() {
        let (_dir, repo) = open_repo().await;
        let result = repo.insert_article(sample_article("not a url")).await;
        assert!(matches!(result, Err(AppError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn failure_bookkeeping_round_trip() {
        // Scenario: fresh article is selected, claimed, then fails once.
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        let eligible = repo.select_eligible(10, 3).await.unwrap();
        assert_eq!(eligible, vec![id]);

        repo.mark_in_progress(id).await.unwrap();
        repo.record_failure(id, "timeout").await.unwrap();

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.failure_count, 1);
        assert!(!article.in_progress);
        assert!(!article.processed);
        assert_eq!(article.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn in_progress_articles_are_not_selected_again() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(repo.select_eligible(10, 3).await.unwrap(), vec![id]);
        repo.mark_in_progress(id).await.unwrap();
        assert!(repo.select_eligible(10, 3).await.unwrap().is_empty());

        // Idempotent: a second claim does not double count anything.
        repo.mark_in_progress(id).await.unwrap();
        assert!(repo.select_eligible(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_next_is_exclusive_and_ordered() {
        let (_dir, repo) = open_repo().await;
        for i in 0..5 {
            repo.insert_article(sample_article(&format!("https://example.com/{i}")))
                .await
                .unwrap();
        }

        let first = repo.claim_next(3, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.windows(2).all(|w| w[0] < w[1]));

        // Claimed rows are invisible to the next invocation.
        let second = repo.claim_next(10, 3).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|id| !second.contains(id)));
    }

    #[tokio::test]
    async fn failure_cap_excludes_until_reset() {
        // Scenario: three consecutive failures exhaust the article.
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        for _ in 0..3 {
            repo.mark_in_progress(id).await.unwrap();
            repo.record_failure(id, "timeout").await.unwrap();
        }

        assert!(repo.select_eligible(10, 3).await.unwrap().is_empty());
        assert!(repo.claim_next(10, 3).await.unwrap().is_empty());
        assert_eq!(repo.counts(3).await.unwrap().exhausted, 1);

        repo.reset(id).await.unwrap();
        assert_eq!(repo.select_eligible(10, 3).await.unwrap(), vec![id]);
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.failure_count, 0);
        assert!(article.last_error.is_none());
    }

    #[tokio::test]
    async fn reset_unknown_article_errors() {
        let (_dir, repo) = open_repo().await;
        assert!(matches!(
            repo.reset(999).await,
            Err(AppError::ArticleNotFound(999))
        ));
    }

    #[tokio::test]
    async fn record_success_preserves_failure_count() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        repo.mark_in_progress(id).await.unwrap();
        repo.record_failure(id, "timeout").await.unwrap();
        repo.mark_in_progress(id).await.unwrap();
        repo.record_success(id, Utc::now()).await.unwrap();

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert!(article.processed);
        assert!(!article.in_progress);
        assert_eq!(article.failure_count, 1);
        assert!(article.last_error.is_none());
        assert!(article.processed_at.is_some());

        // Processed articles are never selected again.
        assert!(repo.select_eligible(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_failure_truncates_long_errors() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        let long_error = "x".repeat(800);
        repo.record_failure(id, &long_error).await.unwrap();

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.last_error.unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn reap_clears_only_stale_claims() {
        let (_dir, repo) = open_repo().await;
        let stale = repo
            .insert_article(sample_article("https://example.com/stale"))
            .await
            .unwrap()
            .unwrap();
        let fresh = repo
            .insert_article(sample_article("https://example.com/fresh"))
            .await
            .unwrap()
            .unwrap();

        repo.mark_in_progress(stale).await.unwrap();
        repo.mark_in_progress(fresh).await.unwrap();

        // Backdate one claim past the threshold.
        let old = (Utc::now() - chrono::Duration::hours(3)).to_rfc3339();
        repo.execute_raw(format!(
            "UPDATE articles SET claimed_at = '{old}' WHERE id = {stale}"
        ))
        .await
        .unwrap();

        let reaped = repo
            .reap_stale_in_progress(chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        assert_eq!(repo.select_eligible(10, 3).await.unwrap(), vec![stale]);
        let fresh_article = repo.get_article(fresh).await.unwrap().unwrap();
        assert!(fresh_article.in_progress);
    }

    #[tokio::test]
    async fn migration_adds_status_columns_to_old_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");

        // A database from before the status flags existed.
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE articles (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     url TEXT NOT NULL UNIQUE,
                     title TEXT NOT NULL,
                     title_local TEXT,
                     description TEXT,
                     content TEXT,
                     category_id INTEGER,
                     published_at TEXT,
                     fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
                 );
                 INSERT INTO articles (url, title) VALUES ('https://example.com/old', 'Old row');",
            )
            .unwrap();
        }

        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        let eligible = repo.select_eligible(10, 3).await.unwrap();
        assert_eq!(eligible.len(), 1);

        let article = repo.get_article(eligible[0]).await.unwrap().unwrap();
        assert_eq!(article.url, "https://example.com/old");
        assert!(!article.processed);
        assert_eq!(article.failure_count, 0);
    }

    #[tokio::test]
    async fn apply_response_writes_all_tiers() {
        // Scenario: one payload produces 3 English summaries plus the
        // Chinese variant of the hard tier.
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        repo.apply_response(id, sample_payload()).await.unwrap();

        let summaries = repo.get_summaries(id).await.unwrap();
        assert_eq!(summaries.len(), 4);
        let zh: Vec<_> = summaries
            .iter()
            .filter(|s| s.language == Language::Zh)
            .collect();
        assert_eq!(zh.len(), 1);
        assert_eq!(zh[0].difficulty, Difficulty::Hard);
        assert_eq!(zh[0].title, "市场因降息预期上涨");

        for difficulty in Difficulty::ALL {
            assert_eq!(repo.get_keywords(id, difficulty).await.unwrap().len(), 1);
            assert_eq!(repo.get_background(id, difficulty).await.unwrap().len(), 2);
            assert_eq!(repo.get_comments(id, difficulty).await.unwrap().len(), 1);

            let questions = repo.get_questions(id, difficulty).await.unwrap();
            assert_eq!(questions.len(), 1);
            let choices = &questions[0].choices;
            assert_eq!(choices.len(), 3);
            assert_eq!(choices.iter().filter(|c| c.is_correct).count(), 1);

            // Explanation rides on the correct choice only.
            for choice in choices {
                if choice.is_correct {
                    assert_eq!(
                        choice.explanation.as_deref(),
                        Some("Traders priced in lower rates.")
                    );
                } else {
                    assert!(choice.explanation.is_none());
                }
            }
        }
    }

    #[tokio::test]
    async fn apply_response_twice_is_idempotent() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        repo.apply_response(id, sample_payload()).await.unwrap();
        let first_questions = repo.get_questions(id, Difficulty::Mid).await.unwrap();

        repo.apply_response(id, sample_payload()).await.unwrap();

        let summaries = repo.get_summaries(id).await.unwrap();
        assert_eq!(summaries.len(), 4);
        for difficulty in Difficulty::ALL {
            assert_eq!(repo.get_keywords(id, difficulty).await.unwrap().len(), 1);
            assert_eq!(repo.get_background(id, difficulty).await.unwrap().len(), 2);
            assert_eq!(repo.get_comments(id, difficulty).await.unwrap().len(), 1);
        }

        let second_questions = repo.get_questions(id, Difficulty::Mid).await.unwrap();
        assert_eq!(second_questions.len(), first_questions.len());
        for (first, second) in first_questions.iter().zip(&second_questions) {
            assert_eq!(first.ordinal, second.ordinal);
            assert_eq!(first.question, second.question);
            let first_choices: Vec<_> = first
                .choices
                .iter()
                .map(|c| (&c.option_text, c.is_correct, &c.explanation))
                .collect();
            let second_choices: Vec<_> = second
                .choices
                .iter()
                .map(|c| (&c.option_text, c.is_correct, &c.explanation))
                .collect();
            assert_eq!(first_choices, second_choices);
        }
    }

    #[tokio::test]
    async fn apply_response_rolls_back_on_failure() {
        // A write failure mid-apply must leave the previous complete state
        // untouched, never a mix of old and new rows.
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        repo.apply_response(id, sample_payload()).await.unwrap();

        // Sabotage a table written late in the apply sequence.
        repo.execute_raw("ALTER TABLE comments RENAME TO comments_gone".to_string())
            .await
            .unwrap();

        let mut updated = sample_payload();
        updated.easy.title = "updated easy title".to_string();
        updated.easy.keywords.push(Keyword {
            term: "slump".to_string(),
            explanation: "a sharp fall".to_string(),
        });
        let result = repo.apply_response(id, updated).await;
        assert!(result.is_err());

        repo.execute_raw("ALTER TABLE comments_gone RENAME TO comments".to_string())
            .await
            .unwrap();

        // Prior state is fully intact.
        let summaries = repo.get_summaries(id).await.unwrap();
        let easy_en: Vec<_> = summaries
            .iter()
            .filter(|s| s.difficulty == Difficulty::Easy && s.language == Language::En)
            .collect();
        assert_eq!(easy_en[0].title, "easy title");
        assert_eq!(repo.get_keywords(id, Difficulty::Easy).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn migrate_legacy_rows_fans_out_summaries() {
        // Scenario: one legacy row becomes 6 summary rows, 3 tiers x 2
        // languages, text reused across tiers.
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();
        repo.insert_legacy_feedback(
            id,
            Some("X".to_string()),
            Some("Y".to_string()),
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let migrated = repo.migrate_legacy_rows().await.unwrap();
        assert_eq!(migrated, 1);

        let summaries = repo.get_summaries(id).await.unwrap();
        assert_eq!(summaries.len(), 6);
        for summary in &summaries {
            match summary.language {
                Language::En => assert_eq!(summary.body, "X"),
                Language::Zh => assert_eq!(summary.body, "Y"),
            }
        }
        let difficulties: Vec<_> = summaries
            .iter()
            .filter(|s| s.language == Language::En)
            .map(|s| s.difficulty)
            .collect();
        assert_eq!(
            difficulties,
            vec![Difficulty::Easy, Difficulty::Mid, Difficulty::Hard]
        );
    }

    #[tokio::test]
    async fn migrate_legacy_rows_is_idempotent() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();
        repo.insert_legacy_feedback(
            id,
            Some("X".to_string()),
            Some("Y".to_string()),
            Some(r#"[{"term": "rally", "explanation": "a rise"}]"#.to_string()),
            None,
            None,
        )
        .await
        .unwrap();

        repo.migrate_legacy_rows().await.unwrap();
        repo.migrate_legacy_rows().await.unwrap();

        assert_eq!(repo.get_summaries(id).await.unwrap().len(), 6);
        assert_eq!(repo.get_keywords(id, Difficulty::Mid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn migrate_legacy_rows_explodes_json_blobs() {
        let (_dir, repo) = open_repo().await;
        let id = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();

        let questions = r#"[
            {"question": "What rose?", "options": ["Stocks", "Bonds", "Oil"], "correct": "A"},
            {"question": "Broken", "options": ["One", "Two"], "correct": "Z"}
        ]"#;
        let discussion = r#"{"comments": [
            {"author": "Economist", "attitude": "negative", "comment": "Overheated."}
        ]}"#;
        repo.insert_legacy_feedback(
            id,
            Some("X".to_string()),
            None,
            Some(r#"[{"word": "rally", "meaning": "a rise"}]"#.to_string()),
            Some(questions.to_string()),
            Some(discussion.to_string()),
        )
        .await
        .unwrap();

        repo.migrate_legacy_rows().await.unwrap();

        let keywords = repo.get_keywords(id, Difficulty::Mid).await.unwrap();
        assert_eq!(keywords[0].term, "rally");

        // Letter answer resolves by index; the unresolvable question is
        // skipped instead of failing the migration.
        let migrated_questions = repo.get_questions(id, Difficulty::Mid).await.unwrap();
        assert_eq!(migrated_questions.len(), 1);
        let correct: Vec<_> = migrated_questions[0]
            .choices
            .iter()
            .filter(|c| c.is_correct)
            .collect();
        assert_eq!(correct[0].option_text, "Stocks");

        let comments = repo.get_comments(id, Difficulty::Mid).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].attitude, Attitude::Negative);

        // Only English summaries exist, one per tier.
        assert_eq!(repo.get_summaries(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn counts_reflect_store_state() {
        let (_dir, repo) = open_repo().await;
        let a = repo
            .insert_article(sample_article("https://example.com/a"))
            .await
            .unwrap()
            .unwrap();
        let b = repo
            .insert_article(sample_article("https://example.com/b"))
            .await
            .unwrap()
            .unwrap();
        repo.insert_article(sample_article("https://example.com/c"))
            .await
            .unwrap()
            .unwrap();

        repo.record_success(a, Utc::now()).await.unwrap();
        for _ in 0..3 {
            repo.record_failure(b, "boom").await.unwrap();
        }

        let counts = repo.counts(3).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.processed, 1);
        assert_eq!(counts.exhausted, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 0);
    }
}
