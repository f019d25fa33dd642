use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

const MAX_EXPRESSION_LEN: usize = 2_000;

#[derive(Debug, Deserialize)]
pub struct MathProblem {
    pub expression: String,
}

#[derive(Debug, Serialize)]
pub struct MathSolution {
    pub solution: String,
}

pub fn ai_routes() -> Router<AppState> {
    Router::new().route("/ai/solve-math", post(solve_math))
}

#[instrument(skip_all)]
pub async fn solve_math(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(problem): Json<MathProblem>,
) -> Result<Json<MathSolution>, AppError> {
    let expression = problem.expression.trim();
    if expression.is_empty() {
        return Err(AppError::BadRequest("Expression must not be empty".into()));
    }
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(AppError::BadRequest(format!(
            "Expression must be at most {MAX_EXPRESSION_LEN} characters"
        )));
    }

    let solver = state.solver.as_ref().ok_or(AppError::SolverUnavailable)?;
    let solution = solver.solve(expression).await.map_err(|e| {
        warn!(user_id = %user.id, error = %e, "math solver failed");
        AppError::Upstream(e.to_string())
    })?;
    Ok(Json(MathSolution { solution }))
}
