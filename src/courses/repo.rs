use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    courses::repo_types::{
        progress_percentage, Course, Enrollment, Module, ModuleProgress, ProgressOutcome,
    },
    db,
};

/// Catalog, enrollment and progress store.
#[async_trait]
pub trait CourseRepo: Send + Sync {
    /// All courses, optionally narrowed to one category.
    async fn list_courses(&self, category: Option<&str>) -> anyhow::Result<Vec<Course>>;
    async fn get_course(&self, course_id: &str) -> anyhow::Result<Option<Course>>;
    async fn list_modules(&self, course_id: &str) -> anyhow::Result<Vec<Module>>;
    /// Returns `None` when the user is already enrolled in the course.
    async fn insert_enrollment(
        &self,
        user_id: Uuid,
        course_id: &str,
        terms_accepted: bool,
    ) -> anyhow::Result<Option<Enrollment>>;
    async fn list_enrollments(&self, user_id: Uuid) -> anyhow::Result<Vec<Enrollment>>;
    /// Stores one module's completion and recomputes the enrollment's progress
    /// as a single atomic step.
    async fn record_progress(
        &self,
        user_id: Uuid,
        course_id: &str,
        module_id: &str,
        completed: bool,
    ) -> anyhow::Result<ProgressOutcome>;
    async fn list_progress(
        &self,
        user_id: Uuid,
        course_id: &str,
    ) -> anyhow::Result<Vec<ModuleProgress>>;
}

pub struct PgCourseRepo {
    db: PgPool,
    io_timeout: Duration,
}

impl PgCourseRepo {
    pub fn new(db: PgPool, io_timeout: Duration) -> Self {
        Self { db, io_timeout }
    }
}

#[async_trait]
impl CourseRepo for PgCourseRepo {
    async fn list_courses(&self, category: Option<&str>) -> anyhow::Result<Vec<Course>> {
        let rows = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, Course>(
                r#"
                SELECT id, title, description, category, difficulty, duration,
                       modules_count, thumbnail, requires_terms, created_at
                  FROM courses
                 WHERE ($1::TEXT IS NULL OR category = $1)
                 ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(category)
            .fetch_all(&self.db),
        )
        .await
        .context("list courses")?;
        Ok(rows)
    }

    async fn get_course(&self, course_id: &str) -> anyhow::Result<Option<Course>> {
        let row = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, Course>(
                r#"
                SELECT id, title, description, category, difficulty, duration,
                       modules_count, thumbnail, requires_terms, created_at
                  FROM courses
                 WHERE id = $1
                "#,
            )
            .bind(course_id)
            .fetch_optional(&self.db),
        )
        .await
        .context("get course")?;
        Ok(row)
    }

    async fn list_modules(&self, course_id: &str) -> anyhow::Result<Vec<Module>> {
        let rows = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, Module>(
                r#"
                SELECT id, course_id, title, content, "order", created_at
                  FROM modules
                 WHERE course_id = $1
                 ORDER BY "order" ASC
                "#,
            )
            .bind(course_id)
            .fetch_all(&self.db),
        )
        .await
        .context("list modules")?;
        Ok(rows)
    }

    async fn insert_enrollment(
        &self,
        user_id: Uuid,
        course_id: &str,
        terms_accepted: bool,
    ) -> anyhow::Result<Option<Enrollment>> {
        let row = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, Enrollment>(
                r#"
                INSERT INTO enrollments (id, user_id, course_id, terms_accepted)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT ON CONSTRAINT enrollments_user_course_key DO NOTHING
                RETURNING id, user_id, course_id, terms_accepted, progress, completed, enrolled_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(course_id)
            .bind(terms_accepted)
            .fetch_optional(&self.db),
        )
        .await
        .context("insert enrollment")?;
        Ok(row)
    }

    async fn list_enrollments(&self, user_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        let rows = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, Enrollment>(
                r#"
                SELECT id, user_id, course_id, terms_accepted, progress, completed, enrolled_at
                  FROM enrollments
                 WHERE user_id = $1
                 ORDER BY enrolled_at DESC
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.db),
        )
        .await
        .context("list enrollments")?;
        Ok(rows)
    }

    async fn record_progress(
        &self,
        user_id: Uuid,
        course_id: &str,
        module_id: &str,
        completed: bool,
    ) -> anyhow::Result<ProgressOutcome> {
        // The whole transaction shares one bound; dropping it on timeout rolls back.
        let outcome = db::timed(self.io_timeout, async {
            let mut tx = self.db.begin().await?;

            let Some(enrollment) = lock_enrollment_tx(&mut tx, user_id, course_id).await? else {
                return Ok(ProgressOutcome::NotEnrolled);
            };
            if !module_in_course_tx(&mut tx, course_id, module_id).await? {
                return Ok(ProgressOutcome::UnknownModule);
            }

            upsert_progress_tx(&mut tx, user_id, course_id, module_id, completed).await?;
            let (done, total) = module_counts_tx(&mut tx, user_id, course_id).await?;
            let progress = progress_percentage(done, total);
            let updated =
                update_enrollment_progress_tx(&mut tx, enrollment.id, progress, progress >= 100.0)
                    .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(ProgressOutcome::Updated(updated))
        })
        .await
        .context("record progress")?;
        Ok(outcome)
    }

    async fn list_progress(
        &self,
        user_id: Uuid,
        course_id: &str,
    ) -> anyhow::Result<Vec<ModuleProgress>> {
        let rows = db::timed(
            self.io_timeout,
            sqlx::query_as::<_, ModuleProgress>(
                r#"
                SELECT id, user_id, course_id, module_id, completed, updated_at
                  FROM progress
                 WHERE user_id = $1 AND course_id = $2
                 ORDER BY updated_at ASC
                "#,
            )
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.db),
        )
        .await
        .context("list progress")?;
        Ok(rows)
    }
}

/// Loads the enrollment and holds a row lock on it until the transaction ends.
async fn lock_enrollment_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    course_id: &str,
) -> Result<Option<Enrollment>, sqlx::Error> {
    sqlx::query_as::<_, Enrollment>(
        r#"
        SELECT id, user_id, course_id, terms_accepted, progress, completed, enrolled_at
          FROM enrollments
         WHERE user_id = $1 AND course_id = $2
           FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut **tx)
    .await
}

async fn module_in_course_tx(
    tx: &mut Transaction<'_, Postgres>,
    course_id: &str,
    module_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"SELECT EXISTS (SELECT 1 FROM modules WHERE id = $1 AND course_id = $2)"#,
    )
    .bind(module_id)
    .bind(course_id)
    .fetch_one(&mut **tx)
    .await
}

async fn upsert_progress_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    course_id: &str,
    module_id: &str,
    completed: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO progress (id, user_id, course_id, module_id, completed)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ON CONSTRAINT progress_user_module_key
        DO UPDATE SET completed = EXCLUDED.completed, updated_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(course_id)
    .bind(module_id)
    .bind(completed)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// `(completed, total)` module counts for one user in one course.
async fn module_counts_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    course_id: &str,
) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COUNT(p.id) FILTER (WHERE p.completed) AS completed,
               COUNT(m.id)                            AS total
          FROM modules m
          LEFT JOIN progress p
                 ON p.module_id = m.id AND p.user_id = $1
         WHERE m.course_id = $2
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&mut **tx)
    .await
}

async fn update_enrollment_progress_tx(
    tx: &mut Transaction<'_, Postgres>,
    enrollment_id: Uuid,
    progress: f64,
    completed: bool,
) -> Result<Enrollment, sqlx::Error> {
    sqlx::query_as::<_, Enrollment>(
        r#"
        UPDATE enrollments
           SET progress = $2, completed = $3
         WHERE id = $1
        RETURNING id, user_id, course_id, terms_accepted, progress, completed, enrolled_at
        "#,
    )
    .bind(enrollment_id)
    .bind(progress)
    .bind(completed)
    .fetch_one(&mut **tx)
    .await
}
