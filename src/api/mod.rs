use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};


use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub reply: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/command", post(run_command))
        .route("/_health", get(|| async { Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })) }))
        .with_state(state)
}

pub async fn run_command(
    State(state): State<AppState>,
    Json(input): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, StatusCode> {
    let dispatcher = state.dispatcher.clone();
    // Detached so a steal transaction finishes even if the caller hangs up.
    let task = tokio::spawn(async move { dispatcher.handle(&input.user_id, &input.message).await });

    match task.await {
        Ok(reply) => Ok(Json(CommandResponse { reply })),
        Err(e) => {
            tracing::error!(error = ?e, "Command task aborted");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
