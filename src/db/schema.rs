use std::collections::HashSet;

pub const SCHEMA: &str = r#"
-- categories table
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    title_local TEXT,
    description TEXT,
    content TEXT,
    category_id INTEGER REFERENCES categories(id),
    published_at TEXT,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    processed INTEGER NOT NULL DEFAULT 0,
    in_progress INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    processed_at TEXT,
    claimed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(processed, in_progress, failure_count);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);

-- summaries table: one row per (article, difficulty, language)
CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    difficulty TEXT NOT NULL,
    language TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    generated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(article_id, difficulty, language)
);

CREATE INDEX IF NOT EXISTS idx_summaries_article_id ON summaries(article_id);

-- keywords table: glossary entries per (article, difficulty)
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    difficulty TEXT NOT NULL,
    term TEXT NOT NULL,
    explanation TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_keywords_article ON keywords(article_id, difficulty);

-- questions table: quiz questions ordered by explicit ordinal
CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    difficulty TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    question TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_questions_article ON questions(article_id, difficulty);

-- choices table: 2-4 rows per question, exactly one correct
CREATE TABLE IF NOT EXISTS choices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    option_text TEXT NOT NULL,
    is_correct INTEGER NOT NULL DEFAULT 0,
    explanation TEXT
);

CREATE INDEX IF NOT EXISTS idx_choices_question ON choices(question_id);

-- background_read table: ordered context paragraphs
CREATE TABLE IF NOT EXISTS background_read (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    difficulty TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    paragraph TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_background_article ON background_read(article_id, difficulty);

-- comments table: opinionated perspectives with an attitude tag
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    difficulty TEXT NOT NULL,
    attitude TEXT NOT NULL CHECK (attitude IN ('positive', 'neutral', 'negative')),
    author TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_article ON comments(article_id, difficulty);

-- legacy_feedback table: deprecated wide rows, kept as a migration source
CREATE TABLE IF NOT EXISTS legacy_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL UNIQUE REFERENCES articles(id) ON DELETE CASCADE,
    summary_en TEXT,
    summary_zh TEXT,
    keywords_json TEXT,
    questions_json TEXT,
    discussion_json TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// The status-flag columns were added after the articles table first
/// shipped. Databases created before then lack them, so add whichever are
/// missing without touching existing data.
pub fn apply_additive_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const ARTICLE_COLUMNS: &[(&str, &str)] = &[
        ("processed", "INTEGER NOT NULL DEFAULT 0"),
        ("in_progress", "INTEGER NOT NULL DEFAULT 0"),
        ("failure_count", "INTEGER NOT NULL DEFAULT 0"),
        ("last_error", "TEXT"),
        ("processed_at", "TEXT"),
        ("claimed_at", "TEXT"),
    ];

    let existing: HashSet<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(articles)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        names
    };

    for (name, column_type) in ARTICLE_COLUMNS {
        if !existing.contains(*name) {
            conn.execute(
                &format!("ALTER TABLE articles ADD COLUMN {} {}", name, column_type),
                [],
            )?;
        }
    }

    Ok(())
}
