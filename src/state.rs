use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    ai::solver::{MathSolver, OpenAiSolver},
    auth::{jwt::JwtKeys, password::Hasher, repo::PgUserRepo, services::AuthService},
    config::AppConfig,
    courses::repo::{CourseRepo, PgCourseRepo},
};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub courses: Arc<dyn CourseRepo>,
    /// `None` when no API key is configured.
    pub solver: Option<Arc<dyn MathSolver>>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let statement_timeout = format!(
            "SET statement_timeout = {}",
            config.database.io_timeout.as_millis()
        );
        let db = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.acquire_timeout)
            .after_connect(move |conn, _meta| {
                let sql = statement_timeout.clone();
                Box::pin(async move {
                    sqlx::query(&sql).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&config.database.url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserRepo::new(db.clone(), config.database.io_timeout));
        let auth = AuthService::new(users, JwtKeys::from_config(&config.jwt), Hasher::default());
        auth.warm_up().await.context("prepare password hasher")?;
        let courses = Arc::new(PgCourseRepo::new(db.clone(), config.database.io_timeout));

        let solver = match config.ai.api_key.as_deref() {
            Some(key) => {
                let solver = OpenAiSolver::new(&config.ai, key).context("build math solver")?;
                info!(model = %config.ai.model, "math solver enabled");
                Some(Arc::new(solver) as Arc<dyn MathSolver>)
            }
            None => {
                warn!("OPENAI_API_KEY not set; math solver disabled");
                None
            }
        };

        Ok(Self {
            db,
            config,
            auth,
            courses,
            solver,
        })
    }

    /// In-memory stores, a lazy pool that never connects, and no solver.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::{
            auth::repo::memory::MemoryUserRepo, courses::repo::memory::MemoryCourseRepo,
        };

        let config = Arc::new(AppConfig::for_tests());
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database.url)
            .expect("lazy pool ok");
        let auth = AuthService::new(
            Arc::new(MemoryUserRepo::default()),
            JwtKeys::from_config(&config.jwt),
            Hasher::fast(),
        );

        Self {
            db,
            config,
            auth,
            courses: Arc::new(MemoryCourseRepo::default()),
            solver: None,
        }
    }

    #[cfg(test)]
    pub fn with_solver(mut self, solver: Arc<dyn MathSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    #[cfg(test)]
    pub fn with_courses(mut self, courses: Arc<dyn CourseRepo>) -> Self {
        self.courses = courses;
        self
    }
}
