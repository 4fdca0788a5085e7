use crate::models::{score_attempt, AttemptResult, UNANSWERED};
use crate::state::InMemoryDb;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("quiz not found")]
    NotFound,
    #[error("this quiz is private")]
    Forbidden,
    #[error("quiz is no longer available")]
    QuizUnavailable,
    #[error("session is no longer active")]
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    InProgress,
    Submitting,
    Completed,
    Failed,
}

/// One taking of one quiz by one user.
///
/// Orchestrates the countdown, the answer vector, the cursor and the final
/// score-and-upsert. The countdown is a cooperative tick: the driver calls
/// [`QuizSession::tick`] once per second, and a tick outside `InProgress` is
/// a no-op. That is the timer-teardown rule — once a manual submit has run,
/// a stray tick can never fire a second submission, and the store's upsert
/// closes whatever race is left.
#[derive(Debug)]
pub struct QuizSession {
    db: Arc<InMemoryDb>,
    user_id: i64,
    quiz_id: i64,
    answers: Vec<i64>,
    cursor: usize,
    remaining_secs: u64,
    time_limit_secs: u64,
    started_at: Instant,
    phase: SessionPhase,
    result: Option<AttemptResult>,
}

impl QuizSession {
    /// Fetches the quiz and moves straight from `Loading` to `InProgress`:
    /// the answer vector starts fully unanswered and the countdown starts at
    /// the quiz's full time limit.
    pub async fn load(
        db: Arc<InMemoryDb>,
        user_id: i64,
        quiz_id: i64,
    ) -> Result<Self, SessionError> {
        let quiz = {
            let quizzes = db.quizzes.read().await;
            quizzes.get(&quiz_id).cloned()
        };
        let quiz = match quiz {
            Some(q) if !q.is_deleted => q,
            _ => return Err(SessionError::NotFound),
        };
        if !quiz.is_public && quiz.owner_id != user_id {
            return Err(SessionError::Forbidden);
        }

        let time_limit_secs = quiz.time_limit_minutes as u64 * 60;
        Ok(Self {
            db,
            user_id,
            quiz_id,
            answers: vec![UNANSWERED; quiz.questions.len()],
            cursor: 0,
            remaining_secs: time_limit_secs,
            time_limit_secs,
            started_at: Instant::now(),
            phase: SessionPhase::InProgress,
            result: None,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn answers(&self) -> &[i64] {
        &self.answers
    }

    pub fn result(&self) -> Option<&AttemptResult> {
        self.result.as_ref()
    }

    /// Records the selected option for a question. Re-selection overwrites.
    /// Ignored outside `InProgress` or for an out-of-range question index.
    pub fn select_answer(&mut self, question_index: usize, option_index: i64) {
        if self.phase != SessionPhase::InProgress {
            return;
        }
        if let Some(slot) = self.answers.get_mut(question_index) {
            *slot = option_index;
        }
    }

    /// Cursor moves are clamped to the question range and never require the
    /// current question to be answered.
    pub fn go_next(&mut self) {
        if self.phase == SessionPhase::InProgress && self.cursor + 1 < self.answers.len() {
            self.cursor += 1;
        }
    }

    pub fn go_previous(&mut self) {
        if self.phase == SessionPhase::InProgress && self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    /// Advances the countdown by one second. At zero the session
    /// auto-submits whatever answers exist, recording the full time limit as
    /// time taken. Returns the result when this tick fired the submission.
    pub async fn tick(&mut self) -> Result<Option<AttemptResult>, SessionError> {
        if self.phase != SessionPhase::InProgress {
            return Ok(None);
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return Ok(None);
        }
        info!(
            quiz_id = self.quiz_id,
            user_id = self.user_id,
            "time limit reached, auto-submitting"
        );
        let result = self.submit_with_time(self.time_limit_secs as i64).await?;
        Ok(Some(result))
    }

    /// Explicit submission. Records true wall-clock elapsed time, unlike the
    /// timeout path which records the full limit.
    pub async fn submit(&mut self) -> Result<AttemptResult, SessionError> {
        let elapsed = self.started_at.elapsed().as_secs() as i64;
        self.submit_with_time(elapsed).await
    }

    async fn submit_with_time(&mut self, time_taken_seconds: i64) -> Result<AttemptResult, SessionError> {
        // Double-submit guard: a repeated timer tick or duplicate click gets
        // the already-stored result back, no second upsert.
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        if self.phase != SessionPhase::InProgress {
            return Err(SessionError::Inactive);
        }
        self.phase = SessionPhase::Submitting;

        // Re-read the quiz: it may have been soft-deleted since load. In
        // that case nothing is persisted and the session is dead.
        let quiz = {
            let quizzes = self.db.quizzes.read().await;
            quizzes.get(&self.quiz_id).cloned()
        };
        let quiz = match quiz {
            Some(q) if !q.is_deleted => q,
            _ => {
                self.phase = SessionPhase::Failed;
                return Err(SessionError::QuizUnavailable);
            }
        };

        let result = score_attempt(self.user_id, &quiz, &self.answers, time_taken_seconds);
        let stored = self.db.upsert_result(result).await;
        self.phase = SessionPhase::Completed;
        self.result = Some(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, Quiz};
    use chrono::Utc;

    async fn db_with_quiz(time_limit_minutes: i64) -> Arc<InMemoryDb> {
        let db = Arc::new(InMemoryDb::new(None));
        let quiz = Quiz {
            id: 1,
            title: "Timed".into(),
            owner_id: 1,
            questions: vec![
                Question {
                    question: "2+2?".into(),
                    options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
                    correct_answer: 1,
                },
                Question {
                    question: "3+3?".into(),
                    options: vec!["5".into(), "6".into(), "7".into(), "8".into()],
                    correct_answer: 1,
                },
            ],
            time_limit_minutes,
            is_public: true,
            is_deleted: false,
            is_ai_generated: false,
            created_at: Utc::now(),
        };
        db.quizzes.write().await.insert(1, quiz);
        db
    }

    #[tokio::test]
    async fn sixty_ticks_auto_submit_unanswered_quiz() {
        let db = db_with_quiz(1).await;
        let mut session = QuizSession::load(Arc::clone(&db), 7, 1).await.unwrap();
        assert_eq!(session.remaining_secs(), 60);

        let mut fired = None;
        for _ in 0..60 {
            if let Some(result) = session.tick().await.unwrap() {
                fired = Some(result);
            }
        }
        let result = fired.expect("timer should have auto-submitted");
        assert_eq!(result.score, 0);
        assert_eq!(result.time_taken_seconds, 60);
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert!(db.get_result(7, 1).await.is_some());
    }

    #[tokio::test]
    async fn tick_after_manual_submit_is_a_no_op() {
        let db = db_with_quiz(1).await;
        let mut session = QuizSession::load(Arc::clone(&db), 7, 1).await.unwrap();
        session.select_answer(0, 1);
        let first = session.submit().await.unwrap();
        assert_eq!(first.score, 1);

        for _ in 0..120 {
            assert!(session.tick().await.unwrap().is_none());
        }
        let stored = db.get_result(7, 1).await.unwrap();
        assert_eq!(stored.score, first.score);
        assert_eq!(stored.attempted_at, first.attempted_at);
    }

    #[tokio::test]
    async fn double_submit_returns_the_stored_result() {
        let db = db_with_quiz(1).await;
        let mut session = QuizSession::load(Arc::clone(&db), 7, 1).await.unwrap();
        session.select_answer(0, 1);
        let first = session.submit().await.unwrap();
        let second = session.submit().await.unwrap();
        assert_eq!(first.attempted_at, second.attempted_at);
        assert_eq!(db.results.read().await.len(), 1);
    }

    #[tokio::test]
    async fn reselection_overwrites_and_navigation_clamps() {
        let db = db_with_quiz(1).await;
        let mut session = QuizSession::load(db, 7, 1).await.unwrap();

        session.select_answer(0, 2);
        session.select_answer(0, 1);
        assert_eq!(session.answers()[0], 1);

        session.go_previous();
        assert_eq!(session.cursor(), 0);
        session.go_next();
        assert_eq!(session.cursor(), 1);
        session.go_next();
        assert_eq!(session.cursor(), 1);

        // Unanswered navigation is legal; question 1 stays unanswered.
        let result = session.submit().await.unwrap();
        assert_eq!(result.score, 1);
        assert_eq!(result.answers[1].selected_answer, UNANSWERED);
    }

    #[tokio::test]
    async fn quiz_deleted_mid_session_fails_without_persisting() {
        let db = db_with_quiz(1).await;
        let mut session = QuizSession::load(Arc::clone(&db), 7, 1).await.unwrap();
        session.select_answer(0, 1);

        db.quizzes.write().await.get_mut(&1).unwrap().is_deleted = true;

        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::QuizUnavailable));
        assert_eq!(session.phase(), SessionPhase::Failed);
        assert!(db.get_result(7, 1).await.is_none());
    }

    #[tokio::test]
    async fn private_quiz_forbidden_for_non_owner() {
        let db = db_with_quiz(1).await;
        db.quizzes.write().await.get_mut(&1).unwrap().is_public = false;

        let err = QuizSession::load(Arc::clone(&db), 7, 1).await.unwrap_err();
        assert!(matches!(err, SessionError::Forbidden));
        assert!(QuizSession::load(db, 1, 1).await.is_ok());
    }
}
