use crate::models::{validate_questions, Question, ValidationIssue};
use futures::future::BoxFuture;
use jsonschema::Validator;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure of the AI-response validation pipeline. All variants mean the
/// same thing to the caller: no quiz was produced, surface "failed to parse
/// AI response, try again". There is no automatic retry loop here.
#[derive(Debug, Error)]
pub enum MalformedAiResponse {
    #[error("ai response is not valid json: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("ai response does not match the question schema")]
    SchemaViolation(Vec<ValidationIssue>),
}

impl MalformedAiResponse {
    pub fn issues(&self) -> Vec<ValidationIssue> {
        match self {
            MalformedAiResponse::NotJson(_) => Vec::new(),
            MalformedAiResponse::SchemaViolation(issues) => issues.clone(),
        }
    }
}

/// Finds the first `[` and its matching `]` with a bracket-balanced scan.
/// String literals and escapes are honoured, so a `]` inside an option
/// string cannot end the match the way a naive regex would.
fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in raw.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turns a raw model response into a validated question list.
///
/// The model may wrap its JSON in prose or code fences; only the balanced
/// `[...]` substring is parsed (the whole text as a fallback when no such
/// substring exists). Validation is all-or-nothing: one malformed element
/// fails the parse. A count differing from `expected_count` is not fatal,
/// the model is allowed to return more or fewer questions.
pub fn parse_questions(
    raw: &str,
    expected_count: usize,
    schema: &Validator,
) -> Result<Vec<Question>, MalformedAiResponse> {
    let candidate = extract_json_array(raw).unwrap_or(raw.trim());
    let value: serde_json::Value = serde_json::from_str(candidate)?;

    if schema.validate(&value).is_err() {
        let issues = schema
            .iter_errors(&value)
            .map(|e| ValidationIssue {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(MalformedAiResponse::SchemaViolation(issues));
    }

    let questions: Vec<Question> = serde_json::from_value(value)?;
    validate_questions(&questions).map_err(MalformedAiResponse::SchemaViolation)?;

    if questions.len() != expected_count {
        warn!(
            expected = expected_count,
            actual = questions.len(),
            "ai returned a different question count than requested"
        );
    }
    Ok(questions)
}

/// Seam to the language-model provider. The caller gets raw text back;
/// parsing and validation stay on our side of the boundary.
pub trait AiQuizClient: Send + Sync {
    fn generate_questions(
        &self,
        topic: &str,
        difficulty: &str,
        question_count: usize,
    ) -> BoxFuture<'static, anyhow::Result<String>>;
}

/// Deterministic stand-in used when no API key is configured and by the
/// integration tests. Wraps its JSON in a code fence so the extraction path
/// is exercised end to end.
#[derive(Clone)]
pub struct MockAiClient;

impl AiQuizClient for MockAiClient {
    fn generate_questions(
        &self,
        topic: &str,
        difficulty: &str,
        question_count: usize,
    ) -> BoxFuture<'static, anyhow::Result<String>> {
        let topic = topic.to_string();
        let difficulty = difficulty.to_string();
        Box::pin(async move {
            let questions: Vec<_> = (0..question_count.max(1))
                .map(|idx| {
                    json!({
                        "question": format!("{} ({}) question {}", topic, difficulty, idx + 1),
                        "options": ["option A", "option B", "option C", "option D"],
                        "correctAnswer": idx % 4
                    })
                })
                .collect();
            Ok(format!(
                "Here are your questions:\n```json\n{}\n```",
                serde_json::Value::Array(questions)
            ))
        })
    }
}

/// Chat-completions client for OpenRouter.
#[derive(Clone)]
pub struct OpenRouterAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterAiClient {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let model =
            std::env::var("OPENROUTER_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let timeout_secs = std::env::var("AI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            http,
            api_key,
            base_url,
            model,
        })
    }

    fn build_prompt(topic: &str, difficulty: &str, question_count: usize) -> String {
        let difficulty_hint = match difficulty {
            "easy" => "straightforward and basic",
            "medium" => "moderately challenging",
            _ => "advanced and detailed",
        };
        format!(
            "You are a quiz generator. Create {question_count} multiple choice questions \
             about \"{topic}\" at {difficulty} difficulty level.\n\n\
             IMPORTANT RULES:\n\
             - Questions should be factually accurate and up-to-date\n\
             - Each question must have exactly 4 options\n\
             - Only ONE option should be correct\n\
             - Make incorrect options plausible but clearly wrong\n\
             - Difficulty: {difficulty} means questions should be {difficulty_hint}\n\n\
             Return ONLY valid JSON in this exact format (no markdown, no extra text):\n\
             [{{\"question\": \"question text here\", \
             \"options\": [\"option A\", \"option B\", \"option C\", \"option D\"], \
             \"correctAnswer\": 0}}]\n\n\
             The correctAnswer is the index (0-3) of the correct option."
        )
    }
}

impl AiQuizClient for OpenRouterAiClient {
    fn generate_questions(
        &self,
        topic: &str,
        difficulty: &str,
        question_count: usize,
    ) -> BoxFuture<'static, anyhow::Result<String>> {
        let http = self.http.clone();
        let api_key = self.api_key.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": Self::build_prompt(topic, difficulty, question_count.max(1)),
            }],
            "temperature": 0.7,
        });

        Box::pin(async move {
            let response = http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let payload: serde_json::Value = response.json().await?;
            let content = payload["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("ai response has no message content"))?;
            Ok(content.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Validator {
        let raw = include_str!("../contracts/ai_questions.schema.json");
        let value: serde_json::Value = serde_json::from_str(raw).unwrap();
        jsonschema::draft202012::new(&value).unwrap()
    }

    const BARE: &str = r#"[{"question":"2+2?","options":["3","4","5","6"],"correctAnswer":1}]"#;

    #[test]
    fn fenced_and_bare_json_parse_identically() {
        let schema = schema();
        let wrapped = format!("Here you go:\n```json\n{BARE}\n```");
        let from_wrapped = parse_questions(&wrapped, 1, &schema).unwrap();
        let from_bare = parse_questions(BARE, 1, &schema).unwrap();
        assert_eq!(from_wrapped.len(), 1);
        assert_eq!(from_wrapped[0].question, from_bare[0].question);
        assert_eq!(from_wrapped[0].correct_answer, 1);
    }

    #[test]
    fn plain_prose_fails() {
        let err = parse_questions("not json at all", 1, &schema()).unwrap_err();
        assert!(matches!(err, MalformedAiResponse::NotJson(_)));
    }

    #[test]
    fn brackets_inside_option_strings_do_not_break_extraction() {
        let raw = concat!(
            "Here: ",
            r#"[{"question":"Which array is empty?","options":["[]","[1]","[1,2]","[\"]\"]"],"correctAnswer":0}]"#
        );
        let questions = parse_questions(raw, 1, &schema()).unwrap();
        assert_eq!(questions[0].options[0], "[]");
        assert_eq!(questions[0].options[3], "[\"]\"]");
    }

    #[test]
    fn one_malformed_element_fails_the_whole_parse() {
        let raw = r#"[
            {"question":"ok","options":["a","b","c","d"],"correctAnswer":0},
            {"question":"bad","options":["a","b","c"],"correctAnswer":0}
        ]"#;
        let err = parse_questions(raw, 2, &schema()).unwrap_err();
        assert!(matches!(err, MalformedAiResponse::SchemaViolation(_)));
    }

    #[test]
    fn out_of_range_correct_answer_fails() {
        let raw = r#"[{"question":"q","options":["a","b","c","d"],"correctAnswer":4}]"#;
        assert!(parse_questions(raw, 1, &schema()).is_err());
    }

    #[test]
    fn count_mismatch_is_not_fatal() {
        let questions = parse_questions(BARE, 5, &schema()).unwrap();
        assert_eq!(questions.len(), 1);
    }
}
