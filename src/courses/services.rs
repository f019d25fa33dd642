use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    courses::{
        dto::ProgressUpdate,
        repo::CourseRepo,
        repo_types::{Course, Enrollment, ProgressOutcome},
    },
    error::AppError,
};

pub fn check_terms(course: &Course, terms_accepted: bool) -> Result<(), AppError> {
    if course.requires_terms && !terms_accepted {
        return Err(AppError::BadRequest(
            "Terms and conditions must be accepted".into(),
        ));
    }
    Ok(())
}

pub async fn enroll(
    repo: &dyn CourseRepo,
    user_id: Uuid,
    course_id: &str,
    terms_accepted: bool,
) -> Result<Enrollment, AppError> {
    let course = repo
        .get_course(course_id)
        .await?
        .ok_or(AppError::NotFound("Course"))?;
    check_terms(&course, terms_accepted)?;

    match repo
        .insert_enrollment(user_id, &course.id, terms_accepted)
        .await?
    {
        Some(enrollment) => {
            info!(%user_id, course_id = %course.id, "enrolled");
            Ok(enrollment)
        }
        None => {
            warn!(%user_id, course_id = %course.id, "already enrolled");
            Err(AppError::Conflict("Already enrolled in this course".into()))
        }
    }
}

/// Marks one module done or not done and returns the recomputed enrollment.
pub async fn set_module_progress(
    repo: &dyn CourseRepo,
    user_id: Uuid,
    update: &ProgressUpdate,
) -> Result<Enrollment, AppError> {
    let outcome = repo
        .record_progress(
            user_id,
            &update.course_id,
            &update.module_id,
            update.completed,
        )
        .await?;

    match outcome {
        ProgressOutcome::NotEnrolled => Err(AppError::NotFound("Enrollment")),
        ProgressOutcome::UnknownModule => Err(AppError::NotFound("Module")),
        ProgressOutcome::Updated(enrollment) => {
            info!(
                %user_id,
                course_id = %update.course_id,
                progress = enrollment.progress,
                "progress updated"
            );
            Ok(enrollment)
        }
    }
}
