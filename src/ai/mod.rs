use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod solver;

pub fn router() -> Router<AppState> {
    handlers::ai_routes()
}
