use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin([HeaderValue::from_static("http://localhost:5173")])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::header::SET_COOKIE,
            axum::http::HeaderName::from_static("x-csrf-token"),
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/user/me", get(handlers::me))
        .route("/api/user/search", get(handlers::search_users))
        .route("/api/user/stats-visibility", patch(handlers::update_stats_visibility))
        .route("/api/user/:id", get(handlers::get_user))
        .route("/api/user/:id/history", get(handlers::user_history))
        .route("/api/user/:id/created-quizzes", get(handlers::user_created_quizzes))
        .route("/api/quiz/create", post(handlers::create_quiz))
        .route("/api/quiz/generate-ai", post(handlers::generate_ai_quiz))
        .route("/api/quiz/public", get(handlers::list_public_quizzes))
        .route("/api/quiz/my-quizzes", get(handlers::my_quizzes))
        .route(
            "/api/quiz/:id",
            get(handlers::get_quiz).delete(handlers::delete_quiz),
        )
        .route("/api/quiz/:id/toggle-public", patch(handlers::toggle_public))
        .route("/api/quiz/:id/submit", post(handlers::submit_quiz))
        .route("/api/quiz/:id/result", get(handlers::quiz_result))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
