use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use pixel_core::schema::{pixel_configs, pixel_logs};
use pixel_core::DbPool;
use std::sync::Arc;
use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One dispatch attempt, recorded regardless of outcome.
#[derive(Debug, Clone)]
pub struct NewPixelLog {
    pub shop_id: String,
    pub platform: String,
    pub event: String,
    pub status: DeliveryStatus,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

/// Append-only audit trail of dispatch attempts plus the per-config
/// "last fired" bookkeeping. The dispatch path never reads back from it.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, entry: NewPixelLog) -> Result<()>;
    async fn touch_last_fired(&self, config_id: i64) -> Result<()>;
}

pub struct PgDeliveryLog {
    pool: Arc<DbPool>,
}

impl PgDeliveryLog {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLog for PgDeliveryLog {
    async fn record(&self, entry: NewPixelLog) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(pixel_logs::table)
            .values((
                pixel_logs::shop_id.eq(&entry.shop_id),
                pixel_logs::platform.eq(&entry.platform),
                pixel_logs::event.eq(&entry.event),
                pixel_logs::status.eq(entry.status.as_str()),
                pixel_logs::payload.eq(&entry.payload),
                pixel_logs::error.eq(entry.error.as_deref()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn touch_last_fired(&self, config_id: i64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        // Single-column touch; lost updates under concurrent dispatch of the
        // same platform are acceptable.
        diesel::update(pixel_configs::table.filter(pixel_configs::id.eq(config_id)))
            .set(pixel_configs::last_fired_at.eq(Some(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

/// Record an attempt, absorbing log-write failures. A broken audit trail
/// must not take the dispatch path down with it.
pub async fn record_attempt(log: &dyn DeliveryLog, entry: NewPixelLog) {
    let (platform, event, status) = (entry.platform.clone(), entry.event.clone(), entry.status);
    if let Err(e) = log.record(entry).await {
        tracing::error!(
            "Failed to write pixel log ({} / {} / {}): {}",
            platform,
            event,
            status.as_str(),
            e
        );
    }
}
