use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Article;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";
const MAX_CONTENT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

pub struct EnrichmentClient {
    client: Client,
    api_key: String,
}

impl EnrichmentClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, api_key }
    }

    /// Request the full leveled-content payload for one article. The
    /// returned JSON is unvalidated; callers must run it through the
    /// validator before it can touch storage.
    pub async fn generate(&self, article: &Article) -> Result<Value> {
        let system_prompt = r#"You are an editor for a graded news reader aimed at English learners.
Given a news article, respond with ONLY a JSON object, no prose, of this shape:
{
  "easy": {
    "title": string,
    "summary": string,
    "keywords": [{"term": string, "explanation": string}, ...],
    "questions": [{"question": string, "options": [3-4 strings], "correct_answer": string, "explanation": string}, ...],
    "background_reading": [string, ...],
    "perspectives": [{"author": string, "attitude": "positive"|"neutral"|"negative", "comment": string}, ...]
  },
  "mid": { same shape as easy },
  "hard": { same shape as easy },
  "CN": {"title": string, "summary": string}
}
"easy" uses simple vocabulary and short sentences, "mid" intermediate, "hard" native-level.
"CN" is a Chinese rendering of the hard summary. Every correct_answer must repeat one
of its options exactly, character for character."#;

        let body = article_body(article);
        let user_message = format!(
            "Generate leveled content for this article:\n\nTitle: {}\n\nContent:\n{}",
            article.title, body
        );

        let request = MessageRequest {
            model: CLAUDE_MODEL.to_string(),
            max_tokens: 8192,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(system_prompt.to_string()),
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::LlmApi(format!("API error: {}", error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        let text = message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        let json_text = extract_json(&text)
            .ok_or_else(|| AppError::LlmApi("response contained no JSON object".to_string()))?;
        Ok(serde_json::from_str(json_text)?)
    }
}

/// Plain text body for the prompt. Stored content may be HTML from the
/// collector; markup is stripped and the result bounded in length.
fn article_body(article: &Article) -> String {
    let raw = article
        .content
        .as_deref()
        .or(article.description.as_deref())
        .unwrap_or("");

    let text = if looks_like_html(raw) {
        html2text::from_read(raw.as_bytes(), 80).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    };

    if text.chars().count() > MAX_CONTENT_CHARS {
        text.chars().take(MAX_CONTENT_CHARS).collect()
    } else {
        text
    }
}

fn looks_like_html(text: &str) -> bool {
    text.trim_start().starts_with('<') || text.contains("</")
}

/// Models often wrap JSON in markdown fences or lead with a sentence.
/// Take the outermost brace-delimited span.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
