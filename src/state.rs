use crate::ai::AiQuizClient;
use crate::models::{AttemptResult, Question, Quiz};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::{fs, path::Path};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub show_stats_publicly: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: i64,
    pub csrf_token: String,
}

/// In-memory store with optional JSON snapshot persistence. The `results`
/// map is keyed on (user_id, quiz_id), which is what enforces the
/// one-result-per-user-per-quiz invariant: an upsert is a single insert
/// under the write lock, so two racing submissions can never produce two
/// rows and the later writer wins.
#[derive(Debug)]
pub struct InMemoryDb {
    pub users: RwLock<HashMap<i64, User>>,
    pub users_by_email: RwLock<HashMap<String, i64>>,
    pub sessions: RwLock<HashMap<String, AuthSession>>,
    pub quizzes: RwLock<HashMap<i64, Quiz>>,
    pub results: RwLock<HashMap<(i64, i64), AttemptResult>>,
    next_user_id: AtomicI64,
    next_quiz_id: AtomicI64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentSnapshot {
    users: HashMap<i64, User>,
    users_by_email: HashMap<String, i64>,
    quizzes: HashMap<i64, Quiz>,
    // Stored as a list because JSON maps cannot key on a tuple.
    results: Vec<AttemptResult>,
    next_user_id: i64,
    next_quiz_id: i64,
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| {
            let raw = fs::read_to_string(path).ok()?;
            match serde_json::from_str::<PersistentSnapshot>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!("failed to read local snapshot {}: {}", path, err);
                    None
                }
            }
        });

        let users = snapshot.as_ref().map(|s| s.users.clone()).unwrap_or_default();
        let users_by_email = snapshot
            .as_ref()
            .map(|s| s.users_by_email.clone())
            .unwrap_or_default();
        let quizzes = snapshot
            .as_ref()
            .map(|s| s.quizzes.clone())
            .unwrap_or_default();
        let results: HashMap<(i64, i64), AttemptResult> = snapshot
            .as_ref()
            .map(|s| {
                s.results
                    .iter()
                    .map(|r| ((r.user_id, r.quiz_id), r.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let next_user_id = snapshot
            .as_ref()
            .map(|s| s.next_user_id)
            .unwrap_or(1)
            .max(users.keys().max().copied().unwrap_or(0) + 1);
        let next_quiz_id = snapshot
            .as_ref()
            .map(|s| s.next_quiz_id)
            .unwrap_or(1)
            .max(quizzes.keys().max().copied().unwrap_or(0) + 1);

        Self {
            users: RwLock::new(users),
            users_by_email: RwLock::new(users_by_email),
            sessions: RwLock::new(HashMap::new()),
            quizzes: RwLock::new(quizzes),
            results: RwLock::new(results),
            next_user_id: AtomicI64::new(next_user_id),
            next_quiz_id: AtomicI64::new(next_quiz_id),
        }
    }

    pub fn next_user_id(&self) -> i64 {
        self.next_user_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_quiz_id(&self) -> i64 {
        self.next_quiz_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Update-or-insert keyed on (user_id, quiz_id). Last write wins; a
    /// retake overwrites the previous attempt instead of adding a row.
    pub async fn upsert_result(&self, result: AttemptResult) -> AttemptResult {
        let mut results = self.results.write().await;
        results.insert((result.user_id, result.quiz_id), result.clone());
        result
    }

    pub async fn get_result(&self, user_id: i64, quiz_id: i64) -> Option<AttemptResult> {
        self.results.read().await.get(&(user_id, quiz_id)).cloned()
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            users: self.users.read().await.clone(),
            users_by_email: self.users_by_email.read().await.clone(),
            quizzes: self.quizzes.read().await.clone(),
            results: self.results.read().await.values().cloned().collect(),
            next_user_id: self.next_user_id.load(Ordering::SeqCst),
            next_quiz_id: self.next_quiz_id.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub ai_client: Arc<dyn AiQuizClient>,
    pub questions_schema: Arc<serde_json::Value>,
    pub local_state_path: Option<String>,
}

impl AppState {
    pub fn new(ai_client: Arc<dyn AiQuizClient>, questions_schema: serde_json::Value) -> Self {
        let local_state_path = std::env::var("LOCAL_STATE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            db: Arc::new(InMemoryDb::new(local_state_path.as_deref())),
            ai_client,
            questions_schema: Arc::new(questions_schema),
            local_state_path,
        }
    }

    /// Creates a quiz. Quizzes start private and their content is never
    /// edited afterwards; callers must have validated the questions.
    pub async fn create_quiz(
        &self,
        owner_id: i64,
        title: String,
        questions: Vec<Question>,
        time_limit_minutes: i64,
        is_ai_generated: bool,
    ) -> Quiz {
        let quiz = Quiz {
            id: self.db.next_quiz_id(),
            title,
            owner_id,
            questions,
            time_limit_minutes,
            is_public: false,
            is_deleted: false,
            is_ai_generated,
            created_at: Utc::now(),
        };
        self.db.quizzes.write().await.insert(quiz.id, quiz.clone());
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after create_quiz: {}", err);
        }
        quiz
    }

    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let Some(path) = self.local_state_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.db.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{score_attempt, Question};

    fn quiz_with_one_question() -> Quiz {
        Quiz {
            id: 1,
            title: "T".into(),
            owner_id: 1,
            questions: vec![Question {
                question: "2+2?".into(),
                options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
                correct_answer: 1,
            }],
            time_limit_minutes: 1,
            is_public: true,
            is_deleted: false,
            is_ai_generated: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_and_last_write_wins() {
        let db = InMemoryDb::new(None);
        let quiz = quiz_with_one_question();

        db.upsert_result(score_attempt(7, &quiz, &[0], 30)).await;
        db.upsert_result(score_attempt(7, &quiz, &[1], 45)).await;

        assert_eq!(db.results.read().await.len(), 1);
        let stored = db.get_result(7, 1).await.unwrap();
        assert_eq!(stored.score, 1);
        assert_eq!(stored.time_taken_seconds, 45);
    }

    #[tokio::test]
    async fn racing_submissions_never_produce_two_rows() {
        let db = Arc::new(InMemoryDb::new(None));
        let quiz = quiz_with_one_question();

        let first = score_attempt(7, &quiz, &[0], 10);
        let second = score_attempt(7, &quiz, &[1], 11);
        let (a, b) = (Arc::clone(&db), Arc::clone(&db));
        let _ = tokio::join!(
            tokio::spawn(async move { a.upsert_result(first).await }),
            tokio::spawn(async move { b.upsert_result(second).await }),
        );

        assert_eq!(db.results.read().await.len(), 1);
    }

    #[tokio::test]
    async fn results_for_different_users_are_distinct() {
        let db = InMemoryDb::new(None);
        let quiz = quiz_with_one_question();

        db.upsert_result(score_attempt(7, &quiz, &[1], 5)).await;
        db.upsert_result(score_attempt(8, &quiz, &[0], 6)).await;

        assert_eq!(db.results.read().await.len(), 2);
        assert_eq!(db.get_result(7, 1).await.unwrap().score, 1);
        assert_eq!(db.get_result(8, 1).await.unwrap().score, 0);
    }
}
