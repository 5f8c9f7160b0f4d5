use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    assessments::repo::{AssessmentStore, PgAssessmentStore},
    auth::{
        mailer::{LogMailer, ResetCodeSender},
        repo::{PgUserStore, UserStore},
    },
    clock::{Clock, SystemClock},
    config::AppConfig,
    db,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub assessments: Arc<dyn AssessmentStore>,
    pub mailer: Arc<dyn ResetCodeSender>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Reads the environment, connects to Postgres and applies migrations.
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;
        Ok(Self::from_pool(config, pool))
    }

    pub fn from_pool(config: AppConfig, pool: PgPool) -> Self {
        Self::from_parts(
            Arc::new(config),
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgAssessmentStore::new(pool)),
            Arc::new(LogMailer),
            Arc::new(SystemClock),
        )
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        assessments: Arc<dyn AssessmentStore>,
        mailer: Arc<dyn ResetCodeSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            users,
            assessments,
            mailer,
            clock,
        }
    }

    /// In-memory state for tests: no database, codes go to the log.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::{assessments::memory::MemoryAssessmentStore, auth::memory::MemoryUserStore};

        Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            Arc::new(MemoryUserStore::default()),
            Arc::new(MemoryAssessmentStore::default()),
            Arc::new(LogMailer),
            Arc::new(SystemClock),
        )
    }
}
