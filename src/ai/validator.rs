//! Structural validation of enrichment payloads.
//!
//! Nothing reaches the normalizer without passing through [`validate`].
//! All violations are collected before reporting so one response round-trip
//! surfaces every problem at once.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{
    Attitude, ChineseSummary, Difficulty, EnrichedPayload, Keyword, LevelContent, Perspective,
    QuizQuestion,
};

/// How to treat a question whose shape is wrong (most commonly a
/// `correct_answer` that matches no option). Lenient drops the question
/// and keeps the payload; strict rejects the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    Strict,
    #[default]
    Lenient,
}

const ENGLISH_TIERS: [Difficulty; 3] = Difficulty::ALL;
const CN_KEY: &str = "CN";

pub fn validate(
    value: &Value,
    mode: ValidationMode,
) -> std::result::Result<EnrichedPayload, Vec<String>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let root = match value.as_object() {
        Some(root) => root,
        None => return Err(vec!["payload is not a JSON object".to_string()]),
    };

    let mut tiers = Vec::with_capacity(ENGLISH_TIERS.len());
    for difficulty in ENGLISH_TIERS {
        let key = difficulty.as_str();
        let level = match root.get(key) {
            Some(section) => validate_level(key, section, mode, &mut errors, &mut warnings),
            None => {
                errors.push(format!("missing section: {key}"));
                LevelContent::default()
            }
        };
        tiers.push(level);
    }

    let chinese = match root.get(CN_KEY) {
        Some(section) => validate_chinese(section, &mut errors),
        None => {
            errors.push(format!("missing section: {CN_KEY}"));
            ChineseSummary::default()
        }
    };

    // Language purity is a soft signal only; structure alone cannot prove
    // which language a string is in.
    if !chinese.summary.is_empty() && cjk_ratio(&chinese.summary) < 0.3 {
        warnings.push("CN: summary is mostly non-Chinese text".to_string());
    }
    for (difficulty, level) in ENGLISH_TIERS.iter().zip(&tiers) {
        if !level.summary.is_empty() && cjk_ratio(&level.summary) > 0.5 {
            warnings.push(format!(
                "{}: summary is mostly Chinese text",
                difficulty.as_str()
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    debug!(
        "payload validated with {} warnings",
        warnings.len()
    );
    let mut tiers = tiers.into_iter();
    Ok(EnrichedPayload {
        easy: tiers.next().unwrap_or_default(),
        mid: tiers.next().unwrap_or_default(),
        hard: tiers.next().unwrap_or_default(),
        chinese,
        warnings,
    })
}

fn validate_level(
    key: &str,
    value: &Value,
    mode: ValidationMode,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> LevelContent {
    let Some(section) = value.as_object() else {
        errors.push(format!("{key}: section is not an object"));
        return LevelContent::default();
    };

    LevelContent {
        title: require_text(key, "title", section, errors),
        summary: require_text(key, "summary", section, errors),
        keywords: validate_keywords(key, section, errors),
        questions: validate_questions(key, section, mode, errors, warnings),
        background_reading: validate_background(key, section, errors),
        perspectives: validate_perspectives(key, section, errors),
    }
}

fn validate_chinese(value: &Value, errors: &mut Vec<String>) -> ChineseSummary {
    let Some(section) = value.as_object() else {
        errors.push(format!("{CN_KEY}: section is not an object"));
        return ChineseSummary::default();
    };
    ChineseSummary {
        title: require_text(CN_KEY, "title", section, errors),
        summary: require_text(CN_KEY, "summary", section, errors),
    }
}

/// An empty string is an error, not a missing key, so both cases get their
/// own message.
fn require_text(
    section: &str,
    field: &str,
    object: &Map<String, Value>,
    errors: &mut Vec<String>,
) -> String {
    match object.get(field).and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        Some(_) => {
            errors.push(format!("{section}: {field} is empty"));
            String::new()
        }
        None => {
            errors.push(format!("{section}: missing {field}"));
            String::new()
        }
    }
}

fn validate_keywords(
    section: &str,
    object: &Map<String, Value>,
    errors: &mut Vec<String>,
) -> Vec<Keyword> {
    let Some(entries) = object.get("keywords").and_then(Value::as_array) else {
        errors.push(format!("{section}: missing keywords list"));
        return Vec::new();
    };

    let mut keywords = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let keyword = entry.as_object().and_then(|obj| {
            let term = obj.get("term").or_else(|| obj.get("word"))?.as_str()?;
            let explanation = obj
                .get("explanation")
                .or_else(|| obj.get("meaning"))?
                .as_str()?;
            if term.trim().is_empty() || explanation.trim().is_empty() {
                return None;
            }
            Some(Keyword {
                term: term.to_string(),
                explanation: explanation.to_string(),
            })
        });
        match keyword {
            Some(keyword) => keywords.push(keyword),
            None => errors.push(format!(
                "{section}: keyword {} needs a non-empty term and explanation",
                index + 1
            )),
        }
    }
    keywords
}

fn validate_questions(
    section: &str,
    object: &Map<String, Value>,
    mode: ValidationMode,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Vec<QuizQuestion> {
    let Some(entries) = object.get("questions").and_then(Value::as_array) else {
        errors.push(format!("{section}: missing questions list"));
        return Vec::new();
    };

    let mut questions = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match validate_question(section, index, entry) {
            Ok(question) => questions.push(question),
            // One bad question does not poison its siblings. In lenient
            // mode it is dropped with a recorded reason.
            Err(reason) => match mode {
                ValidationMode::Strict => errors.push(reason),
                ValidationMode::Lenient => warnings.push(format!("dropped: {reason}")),
            },
        }
    }
    questions
}

fn validate_question(
    section: &str,
    index: usize,
    value: &Value,
) -> std::result::Result<QuizQuestion, String> {
    let number = index + 1;
    let object = value
        .as_object()
        .ok_or_else(|| format!("{section}: question {number} is not an object"))?;

    let question = object
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| format!("{section}: question {number} has no question text"))?
        .to_string();

    let options: Vec<String> = object
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| format!("{section}: question {number} has no options list"))?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    if !(3..=4).contains(&options.len()) {
        return Err(format!(
            "{section}: question {number} has {} options, expected 3-4",
            options.len()
        ));
    }
    for (a, option) in options.iter().enumerate() {
        if options[a + 1..].contains(option) {
            return Err(format!(
                "{section}: question {number} has duplicate option {option:?}"
            ));
        }
    }

    let correct_answer = object
        .get("correct_answer")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{section}: question {number} has no correct_answer"))?
        .to_string();

    // Exact text match, case sensitive. Letter and prefix matching were
    // legacy behavior and are deliberately not accepted here.
    if !options.iter().any(|option| option == &correct_answer) {
        return Err(format!(
            "{section}: question {number}: correct_answer {correct_answer:?} does not match any option"
        ));
    }

    let explanation = object
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Ok(QuizQuestion {
        question,
        options,
        correct_answer,
        explanation,
    })
}

fn validate_background(
    section: &str,
    object: &Map<String, Value>,
    errors: &mut Vec<String>,
) -> Vec<String> {
    let Some(entries) = object.get("background_reading").and_then(Value::as_array) else {
        errors.push(format!("{section}: missing background_reading list"));
        return Vec::new();
    };

    let mut paragraphs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry.as_str().map(str::trim).filter(|text| !text.is_empty()) {
            Some(text) => paragraphs.push(text.to_string()),
            None => errors.push(format!(
                "{section}: background paragraph {} is not a non-empty string",
                index + 1
            )),
        }
    }
    paragraphs
}

fn validate_perspectives(
    section: &str,
    object: &Map<String, Value>,
    errors: &mut Vec<String>,
) -> Vec<Perspective> {
    let Some(entries) = object.get("perspectives").and_then(Value::as_array) else {
        errors.push(format!("{section}: missing perspectives list"));
        return Vec::new();
    };

    let mut perspectives = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let number = index + 1;
        let Some(object) = entry.as_object() else {
            errors.push(format!("{section}: perspective {number} is not an object"));
            continue;
        };

        let author = object
            .get("author")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty());
        let comment = object
            .get("comment")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty());
        let attitude = object
            .get("attitude")
            .and_then(Value::as_str)
            .and_then(Attitude::from_str);

        match (author, comment, attitude) {
            (Some(author), Some(comment), Some(attitude)) => perspectives.push(Perspective {
                author: author.to_string(),
                attitude,
                comment: comment.to_string(),
            }),
            (_, _, None) => errors.push(format!(
                "{section}: perspective {number} has an unknown attitude, expected positive, neutral or negative"
            )),
            _ => errors.push(format!(
                "{section}: perspective {number} needs a non-empty author and comment"
            )),
        }
    }
    perspectives
}

/// Share of CJK ideographs among the non-whitespace characters of `text`.
fn cjk_ratio(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let han = Regex::new(r"\p{Han}")
        .expect("static pattern")
        .find_iter(text)
        .count();
    han as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn level_json(tag: &str) -> Value {
        json!({
            "title": format!("{tag} title"),
            "summary": format!("{tag} summary text"),
            "keywords": [{"term": "rally", "explanation": "a rapid rise"}],
            "questions": [{
                "question": "Why did markets rise?",
                "options": ["Rate cut hopes", "Strong earnings", "A new tax"],
                "correct_answer": "Rate cut hopes",
                "explanation": "Traders priced in lower rates."
            }],
            "background_reading": ["Central banks set short-term rates."],
            "perspectives": [{
                "author": "Market analyst",
                "attitude": "positive",
                "comment": "The rally has room to run."
            }]
        })
    }

    fn full_payload() -> Value {
        json!({
            "easy": level_json("easy"),
            "mid": level_json("mid"),
            "hard": level_json("hard"),
            "CN": {"title": "市场上涨", "summary": "市场在降息预期下全线上涨。"}
        })
    }

    #[test]
    fn full_payload_passes() {
        let payload = validate(&full_payload(), ValidationMode::Strict).unwrap();
        assert_eq!(payload.easy.title, "easy title");
        assert_eq!(payload.hard.questions.len(), 1);
        assert_eq!(payload.chinese.title, "市场上涨");
        assert!(payload.warnings.is_empty());
    }

    #[test]
    fn missing_sections_are_all_reported() {
        let errors = validate(&json!({"easy": level_json("easy")}), ValidationMode::Strict)
            .unwrap_err();
        assert!(errors.contains(&"missing section: mid".to_string()));
        assert!(errors.contains(&"missing section: hard".to_string()));
        assert!(errors.contains(&"missing section: CN".to_string()));
    }

    #[test]
    fn empty_summary_is_an_error_not_a_missing_key() {
        let mut payload = full_payload();
        payload["mid"]["summary"] = json!("   ");
        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert!(errors.contains(&"mid: summary is empty".to_string()));

        payload["mid"].as_object_mut().unwrap().remove("summary");
        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert!(errors.contains(&"mid: missing summary".to_string()));
    }

    #[test]
    fn cn_section_needs_only_title_and_summary() {
        let mut payload = full_payload();
        // No keywords or questions required on the CN side.
        payload["CN"] = json!({"title": "标题", "summary": "摘要内容在此。"});
        assert!(validate(&payload, ValidationMode::Strict).is_ok());
    }

    #[test]
    fn mismatched_correct_answer_is_rejected_with_specific_reason() {
        let mut payload = full_payload();
        payload["hard"]["questions"] = json!([
            {
                "question": "Fine question?",
                "options": ["Yes", "No", "Maybe"],
                "correct_answer": "Yes",
                "explanation": "ok"
            },
            {
                "question": "Broken question?",
                "options": ["A", "B", "C"],
                "correct_answer": "D",
                "explanation": "nope"
            }
        ]);

        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("hard: question 2"));
        assert!(errors[0].contains("\"D\""));
    }

    #[test]
    fn each_bad_question_gets_its_own_reason() {
        let mut payload = full_payload();
        payload["easy"]["questions"] = json!([
            {"question": "One?", "options": ["a", "b", "c"], "correct_answer": "z"},
            {"question": "Two?", "options": ["a", "b"], "correct_answer": "a"}
        ]);

        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("easy: question 1"));
        assert!(errors[1].contains("easy: question 2"));
    }

    #[test]
    fn lenient_mode_drops_bad_questions_but_keeps_payload() {
        let mut payload = full_payload();
        payload["hard"]["questions"] = json!([
            {
                "question": "Fine question?",
                "options": ["Yes", "No", "Maybe"],
                "correct_answer": "Yes"
            },
            {
                "question": "Broken question?",
                "options": ["A", "B", "C"],
                "correct_answer": "D"
            }
        ]);

        let validated = validate(&payload, ValidationMode::Lenient).unwrap();
        assert_eq!(validated.hard.questions.len(), 1);
        assert_eq!(validated.hard.questions[0].question, "Fine question?");
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.contains("hard: question 2")));
    }

    #[test]
    fn correct_answer_match_is_case_sensitive() {
        let mut payload = full_payload();
        payload["mid"]["questions"] = json!([{
            "question": "Case?",
            "options": ["Yes", "No", "Maybe"],
            "correct_answer": "yes"
        }]);
        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert!(errors[0].contains("does not match any option"));
    }

    #[test]
    fn duplicate_options_are_rejected() {
        let mut payload = full_payload();
        payload["easy"]["questions"] = json!([{
            "question": "Dup?",
            "options": ["Same", "Same", "Other"],
            "correct_answer": "Same"
        }]);
        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert!(errors[0].contains("duplicate option"));
    }

    #[test]
    fn language_purity_is_a_warning_not_a_failure() {
        let mut payload = full_payload();
        payload["CN"] = json!({
            "title": "Market report",
            "summary": "This is English text where Chinese was expected."
        });

        let validated = validate(&payload, ValidationMode::Strict).unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.contains("CN: summary is mostly non-Chinese")));
    }

    #[test]
    fn cjk_heavy_english_tier_is_flagged() {
        let mut payload = full_payload();
        payload["easy"]["summary"] = json!("市场在降息预期下全线上涨,投资者情绪高涨。");

        let validated = validate(&payload, ValidationMode::Strict).unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.contains("easy: summary is mostly Chinese")));
    }

    #[test]
    fn unknown_attitude_is_an_error() {
        let mut payload = full_payload();
        payload["mid"]["perspectives"] = json!([{
            "author": "Pundit",
            "attitude": "angry",
            "comment": "This is bad."
        }]);
        let errors = validate(&payload, ValidationMode::Strict).unwrap_err();
        assert!(errors[0].contains("mid: perspective 1"));
        assert!(errors[0].contains("unknown attitude"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let errors = validate(&json!([1, 2, 3]), ValidationMode::Strict).unwrap_err();
        assert_eq!(errors, vec!["payload is not a JSON object".to_string()]);
    }
}
