use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
    pub duration: String,
    pub modules_count: i32,
    pub thumbnail: String,
    pub requires_terms: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Module {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub content: String,
    pub order: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: String,
    pub terms_accepted: bool,
    pub progress: f64, // percent of modules completed, 0..=100
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
}

/// Completion state of one module for one user.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: String,
    pub module_id: String,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Result of recording one module's completion.
#[derive(Debug, Clone)]
pub enum ProgressOutcome {
    NotEnrolled,
    UnknownModule,
    Updated(Enrollment),
}

/// Share of completed modules as a percentage rounded to two decimals.
/// A course without modules is at 0%.
pub fn progress_percentage(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = completed.clamp(0, total) as f64 * 100.0 / total as f64;
    (pct * 100.0).round() / 100.0
}
