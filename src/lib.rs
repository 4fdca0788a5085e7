pub mod ai;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod session;
pub mod state;

use std::sync::Arc;

pub fn build_state() -> anyhow::Result<state::AppState> {
    let schema_raw = include_str!("../contracts/ai_questions.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_raw)?;
    let ai_client: Arc<dyn ai::AiQuizClient> =
        if let Some(real) = ai::OpenRouterAiClient::from_env() {
            Arc::new(real)
        } else {
            Arc::new(ai::MockAiClient)
        };
    Ok(state::AppState::new(ai_client, schema))
}
