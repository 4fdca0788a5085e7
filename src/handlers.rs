use crate::ai::parse_questions;
use crate::error::AppError;
use crate::models::{score_attempt, validate_questions, Question, Quiz};
use crate::state::{AppState, AuthSession, User};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::warn;

const SESSION_COOKIE: &str = "quiz_session";
static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
}

/// Resolves the cookie session to an explicit user id. Every core operation
/// below receives this id as a parameter; identity is never ambient.
async fn auth_user_id(jar: &CookieJar, state: &AppState) -> Option<i64> {
    let sid = jar.get(SESSION_COOKIE)?.value().to_string();
    let sessions = state.db.sessions.read().await;
    sessions.get(&sid).map(|s| s.user_id)
}

async fn ensure_csrf(headers: &HeaderMap, jar: &CookieJar, state: &AppState) -> bool {
    let sid = match jar.get(SESSION_COOKIE) {
        Some(v) => v.value().to_string(),
        None => return false,
    };
    let header = match headers.get("x-csrf-token").and_then(|h| h.to_str().ok()) {
        Some(v) => v,
        None => return false,
    };
    let sessions = state.db.sessions.read().await;
    sessions
        .get(&sid)
        .map(|s| s.csrf_token == header)
        .unwrap_or(false)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOut {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub show_stats_publicly: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            show_stats_publicly: user.show_stats_publicly,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<UserOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("auth_register", client_ip(&headers), 20) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    if username.len() < 3 || !email.contains('@') || payload.password.len() < 6 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "invalid username/email/password",
            req_id,
        ));
    }

    {
        let by_email = state.db.users_by_email.read().await;
        if by_email.contains_key(&email) {
            return Err(AppError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "user already exists",
                req_id,
            ));
        }
        let users = state.db.users.read().await;
        if users.values().any(|u| u.username == username) {
            return Err(AppError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "user already exists",
                req_id,
            ));
        }
    }

    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|_| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "password hash failed",
                req_id.clone(),
            )
        })?
        .to_string();

    let user = User {
        id: state.db.next_user_id(),
        username,
        email: email.clone(),
        password_hash: hash,
        show_stats_publicly: true,
        created_at: Utc::now(),
    };
    let out = UserOut::from(&user);
    state.db.users.write().await.insert(user.id, user.clone());
    state.db.users_by_email.write().await.insert(email, user.id);
    if let Err(err) = state.persist_core_data().await {
        warn!("failed to persist local state after register: {}", err);
    }

    Ok((StatusCode::CREATED, Json(out)))
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<(CookieJar, Json<UserOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("auth_login", client_ip(&headers), 30) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    let email = payload.email.trim().to_lowercase();
    let user_id = {
        let by_email = state.db.users_by_email.read().await;
        by_email.get(&email).copied()
    }
    .ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "invalid credentials",
            req_id.clone(),
        )
    })?;

    let user = state
        .db
        .users
        .read()
        .await
        .get(&user_id)
        .cloned()
        .ok_or_else(|| {
            AppError::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "invalid credentials",
                req_id.clone(),
            )
        })?;

    let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|_| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "bad hash",
            req_id.clone(),
        )
    })?;
    let is_valid = Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_ok();
    if !is_valid {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "invalid credentials",
            req_id,
        ));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let csrf_token = uuid::Uuid::new_v4().to_string();
    state.db.sessions.write().await.insert(
        session_id.clone(),
        AuthSession {
            user_id,
            csrf_token: csrf_token.clone(),
        },
    );

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    let csrf_cookie = Cookie::build(("csrf_token", csrf_token))
        .http_only(false)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    Ok((jar.add(cookie).add(csrf_cookie), Json(UserOut::from(&user))))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let req_id = request_id_from_headers(&headers);
    let sid = jar
        .get(SESSION_COOKIE)
        .map(|v| v.value().to_string())
        .ok_or_else(|| {
            AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "no session", req_id)
        })?;
    state.db.sessions.write().await.remove(&sid);
    Ok((jar.remove(Cookie::from(SESSION_COOKIE)), StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<UserOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let user = state
        .db
        .users
        .read()
        .await
        .get(&user_id)
        .cloned()
        .ok_or_else(|| {
            AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id)
        })?;
    Ok(Json(UserOut::from(&user)))
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersQuery {
    pub query: Option<String>,
}

pub async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<SearchUsersQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let term = params.query.unwrap_or_default().trim().to_lowercase();
    if term.len() < 2 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "search query must be at least 2 characters",
            req_id,
        ));
    }

    let users = state.db.users.read().await;
    let items: Vec<_> = users
        .values()
        .filter(|u| u.username.to_lowercase().contains(&term))
        .take(10)
        .map(|u| json!({ "id": u.id, "username": u.username, "createdAt": u.created_at }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let user = state
        .db
        .users
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "user not found", req_id)
        })?;
    // Public profile: no email.
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "showStatsPublicly": user.show_stats_publicly,
        "createdAt": user.created_at
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsVisibilityPayload {
    pub show_stats_publicly: bool,
}

pub async fn update_stats_visibility(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<StatsVisibilityPayload>,
) -> Result<Json<UserOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    let out = {
        let mut users = state.db.users.write().await;
        let user = users.get_mut(&user_id).ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "user not found",
                request_id_from_headers(&headers),
            )
        })?;
        user.show_stats_publicly = payload.show_stats_publicly;
        UserOut::from(&*user)
    };
    if let Err(err) = state.persist_core_data().await {
        warn!("failed to persist local state after stats visibility change: {}", err);
    }
    Ok(Json(out))
}

pub async fn user_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let caller_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let target = state
        .db
        .users
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "user not found", req_id.clone())
        })?;
    if id != caller_id && !target.show_stats_publicly {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "this user's stats are private",
            req_id,
        ));
    }

    let quizzes = state.db.quizzes.read().await;
    let results = state.db.results.read().await;
    let mut attempts: Vec<_> = results
        .values()
        .filter(|r| r.user_id == id)
        .cloned()
        .collect();
    attempts.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
    let items: Vec<_> = attempts
        .into_iter()
        .map(|r| {
            let quiz_title = quizzes.get(&r.quiz_id).map(|q| q.title.clone());
            json!({ "result": r, "quizTitle": quiz_title })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn user_created_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let caller_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id)
    })?;

    let quizzes = state.db.quizzes.read().await;
    let mut items: Vec<Quiz> = quizzes
        .values()
        .filter(|q| q.owner_id == id && !q.is_deleted)
        .filter(|q| q.is_public || caller_id == id)
        .cloned()
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizPayload {
    pub title: String,
    pub questions: Vec<Question>,
    pub time_limit: i64,
}

pub async fn create_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<CreateQuizPayload>,
) -> Result<(StatusCode, Json<Quiz>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    if payload.title.trim().is_empty() || payload.time_limit < 1 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "title and a positive time limit are required",
            request_id_from_headers(&headers),
        ));
    }
    // Zero-question quizzes are rejected here, never at scoring time.
    if let Err(issues) = validate_questions(&payload.questions) {
        return Err(AppError::validation(issues, request_id_from_headers(&headers)));
    }

    let quiz = state
        .create_quiz(user_id, payload.title, payload.questions, payload.time_limit, false)
        .await;
    Ok((StatusCode::CREATED, Json(quiz)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAiPayload {
    pub topic: String,
    pub difficulty: String,
    pub question_count: usize,
    pub time_limit: i64,
    #[serde(default)]
    pub save_quiz: bool,
}

/// AI generation endpoint. `saveQuiz=true` persists immediately; `false`
/// hands the parsed questions back for client-side review before a separate
/// create call. A malformed model response is surfaced to the caller, there
/// is no automatic re-prompt.
pub async fn generate_ai_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<GenerateAiPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("ai_generate", client_ip(&headers), 15) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    if payload.topic.trim().is_empty()
        || payload.difficulty.trim().is_empty()
        || payload.question_count < 1
        || payload.time_limit < 1
    {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "topic, difficulty, question count and time limit are required",
            request_id_from_headers(&headers),
        ));
    }

    let raw = state
        .ai_client
        .generate_questions(&payload.topic, &payload.difficulty, payload.question_count)
        .await
        .map_err(|e| {
            AppError::new(
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                format!("ai provider failed: {}", e),
                request_id_from_headers(&headers),
            )
        })?;

    let schema = jsonschema::draft202012::new(&state.questions_schema).map_err(|_| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "schema build failed",
            request_id_from_headers(&headers),
        )
    })?;
    let questions = parse_questions(&raw, payload.question_count, &schema)
        .map_err(|e| AppError::from_ai_parse(e, request_id_from_headers(&headers)))?;

    if payload.save_quiz {
        let title = format!("{} - {}", payload.topic.trim(), payload.difficulty.trim());
        let quiz = state
            .create_quiz(user_id, title, questions, payload.time_limit, true)
            .await;
        return Ok((StatusCode::CREATED, Json(json!({ "quiz": quiz, "saved": true }))));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "questions": questions,
            "timeLimit": payload.time_limit,
            "saved": false
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PublicQuizQuery {
    pub search: Option<String>,
}

pub async fn list_public_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<PublicQuizQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id)
    })?;
    let term = params.search.unwrap_or_default().trim().to_lowercase();

    let users = state.db.users.read().await;
    let quizzes = state.db.quizzes.read().await;
    let mut visible: Vec<&Quiz> = quizzes
        .values()
        .filter(|q| q.is_public && !q.is_deleted)
        .filter(|q| term.is_empty() || q.title.to_lowercase().contains(&term))
        .collect();
    visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let items: Vec<_> = visible
        .into_iter()
        .map(|q| {
            let owner = users.get(&q.owner_id).map(|u| u.username.clone());
            json!({ "quiz": q, "createdBy": owner })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn my_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id)
    })?;

    let quizzes = state.db.quizzes.read().await;
    let mut items: Vec<Quiz> = quizzes
        .values()
        .filter(|q| q.owner_id == user_id && !q.is_deleted)
        .cloned()
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({ "items": items })))
}

pub async fn get_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let quiz = state
        .db
        .quizzes
        .read()
        .await
        .get(&id)
        .cloned()
        .filter(|q| !q.is_deleted)
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "quiz not found", req_id.clone())
        })?;
    if !quiz.is_public && quiz.owner_id != user_id {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "this quiz is private",
            req_id,
        ));
    }
    Ok(Json(quiz))
}

pub async fn toggle_public(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    let updated = {
        let mut quizzes = state.db.quizzes.write().await;
        let quiz = quizzes.get_mut(&id).filter(|q| !q.is_deleted).ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "quiz not found",
                request_id_from_headers(&headers),
            )
        })?;
        if quiz.owner_id != user_id {
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "not authorized to modify this quiz",
                request_id_from_headers(&headers),
            ));
        }
        quiz.is_public = !quiz.is_public;
        quiz.clone()
    };
    if let Err(err) = state.persist_core_data().await {
        warn!("failed to persist local state after toggle_public: {}", err);
    }
    Ok(Json(updated))
}

pub async fn delete_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    {
        let mut quizzes = state.db.quizzes.write().await;
        let quiz = quizzes.get_mut(&id).filter(|q| !q.is_deleted).ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "quiz not found",
                request_id_from_headers(&headers),
            )
        })?;
        if quiz.owner_id != user_id {
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "not authorized to delete this quiz",
                request_id_from_headers(&headers),
            ));
        }
        // Soft delete: the row stays for existing results, it just leaves
        // every listing and access path.
        quiz.is_deleted = true;
    }
    if let Err(err) = state.persist_core_data().await {
        warn!("failed to persist local state after delete_quiz: {}", err);
    }
    Ok(Json(json!({ "message": "quiz deleted successfully" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub answers: Vec<i64>,
    pub time_taken: i64,
}

/// Scores an attempt and upserts the result. A retake overwrites the
/// previous row; two racing submissions end with the later writer's data
/// and never a second row.
pub async fn submit_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Json<crate::models::AttemptResult>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !ensure_csrf(&headers, &jar, &state).await {
        return Err(AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "csrf token invalid", req_id));
    }
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "not logged in",
            request_id_from_headers(&headers),
        )
    })?;

    let quiz = state
        .db
        .quizzes
        .read()
        .await
        .get(&id)
        .cloned()
        .filter(|q| !q.is_deleted)
        .ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "quiz not found",
                request_id_from_headers(&headers),
            )
        })?;
    if !quiz.is_public && quiz.owner_id != user_id {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "this quiz is private",
            request_id_from_headers(&headers),
        ));
    }

    let result = score_attempt(user_id, &quiz, &payload.answers, payload.time_taken.max(0));
    let stored = state.db.upsert_result(result).await;
    if let Err(err) = state.persist_core_data().await {
        warn!("failed to persist local state after submit_quiz: {}", err);
    }
    Ok(Json(stored))
}

pub async fn quiz_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<crate::models::AttemptResult>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user_id = auth_user_id(&jar, &state).await.ok_or_else(|| {
        AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id.clone())
    })?;
    let result = state.db.get_result(user_id, id).await.ok_or_else(|| {
        AppError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no result found for this quiz",
            req_id,
        )
    })?;
    Ok(Json(result))
}
