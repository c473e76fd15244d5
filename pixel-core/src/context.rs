use crate::config::Config;
use crate::db::{create_pool as create_db_pool, DbPool};
use std::sync::Arc;

#[derive(Clone)]
pub struct PixelContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
}

impl PixelContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db_pool = create_db_pool(&config.database).await?;

        Ok(PixelContext {
            config: Arc::new(config),
            db_pool,
        })
    }
}
