mod article;
mod content;

pub use article::{Article, NewArticle};
pub use content::{
    Attitude, ChineseSummary, Difficulty, EnrichedPayload, Keyword, Language, LegacyFeedback,
    LevelContent, Perspective, QuizQuestion, StoredChoice, StoredComment, StoredQuestion, Summary,
};
