use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel stored for a question the user never answered. Never equal to
/// any valid option index, so it always scores as incorrect.
pub const UNANSWERED: i64 = -1;

/// Every question carries exactly this many options.
pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: i64,
}

/// A stored quiz. Content (title, questions, time limit) is immutable after
/// creation; only `is_public` and `is_deleted` ever change. Scoring and the
/// review view both rely on question order staying fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
    pub questions: Vec<Question>,
    pub time_limit_minutes: i64,
    pub is_public: bool,
    pub is_deleted: bool,
    pub is_ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptAnswer {
    pub question_index: usize,
    pub selected_answer: i64,
    pub correct_answer: i64,
    pub is_correct: bool,
}

/// One completed taking of a quiz by a user. At most one exists per
/// (user_id, quiz_id); a retake overwrites the previous row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub user_id: i64,
    pub quiz_id: i64,
    pub score: i64,
    pub total_questions: i64,
    #[serde(rename = "timeTaken")]
    pub time_taken_seconds: i64,
    pub answers: Vec<AttemptAnswer>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

/// Checks the structural invariants of a question list: at least one
/// question, non-empty text, exactly 4 options, correct index in range.
/// Used both for manual quiz creation and for AI-generated payloads.
pub fn validate_questions(questions: &[Question]) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if questions.is_empty() {
        issues.push(ValidationIssue {
            field: "questions".into(),
            issue: "must contain at least one question".into(),
        });
    }
    for (i, q) in questions.iter().enumerate() {
        if q.question.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].question"),
                issue: "must not be empty".into(),
            });
        }
        if q.options.len() != OPTIONS_PER_QUESTION {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].options"),
                issue: format!("must contain exactly {OPTIONS_PER_QUESTION} options"),
            });
        }
        for (j, opt) in q.options.iter().enumerate() {
            if opt.trim().is_empty() {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].options[{j}]"),
                    issue: "must not be empty".into(),
                });
            }
        }
        if q.correct_answer < 0 || q.correct_answer >= OPTIONS_PER_QUESTION as i64 {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].correctAnswer"),
                issue: format!("must be an index in 0..{OPTIONS_PER_QUESTION}"),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Scores one attempt. An answer vector shorter than the question list is
/// legal (the timer can force submission mid-quiz): missing entries score as
/// unanswered rather than raising. Extra trailing entries are ignored.
/// The returned answers keep question order.
pub fn score_attempt(
    user_id: i64,
    quiz: &Quiz,
    answers: &[i64],
    time_taken_seconds: i64,
) -> AttemptResult {
    let detailed: Vec<AttemptAnswer> = quiz
        .questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let selected = answers.get(index).copied().unwrap_or(UNANSWERED);
            AttemptAnswer {
                question_index: index,
                selected_answer: selected,
                correct_answer: question.correct_answer,
                is_correct: selected == question.correct_answer,
            }
        })
        .collect();
    let score = detailed.iter().filter(|a| a.is_correct).count() as i64;

    AttemptResult {
        user_id,
        quiz_id: quiz.id,
        score,
        total_questions: quiz.questions.len() as i64,
        time_taken_seconds,
        answers: detailed,
        attempted_at: Utc::now(),
    }
}
