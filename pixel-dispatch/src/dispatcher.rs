use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use pixel_core::schema::pixel_configs;
use pixel_core::types::{DispatchJob, PixelConfig, PixelPlatform};
use pixel_core::{decrypt_credential, PixelContext};
use serde_json::json;
use std::sync::Arc;
use tracing;

use crate::http::{HttpSender, ReqwestSender};
use crate::log::{record_attempt, DeliveryLog, DeliveryStatus, NewPixelLog, PgDeliveryLog};

/// Fan-out entry point for the pixel pipeline. Invoked best-effort from the
/// request-submission path; nothing here may fail the caller.
pub struct Dispatcher {
    ctx: PixelContext,
    http: Arc<dyn HttpSender>,
    log: Arc<dyn DeliveryLog>,
}

impl Dispatcher {
    pub fn new(ctx: PixelContext) -> anyhow::Result<Self> {
        let http = Arc::new(ReqwestSender::new(ctx.config.dispatch.http_timeout_secs)?);
        let log = Arc::new(PgDeliveryLog::new(ctx.db_pool.clone()));
        Ok(Self { ctx, http, log })
    }

    /// Dispatch the event to every configured platform for the shop.
    /// Absorbs every failure; the only observable output is the pixel log.
    pub async fn fire_pixels(&self, job: DispatchJob) {
        let configs = match self.load_enabled_configs(&job.shop_id).await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::error!("Failed to load pixel configs for {}: {}", job.shop_id, e);
                return;
            }
        };

        if configs.is_empty() {
            tracing::debug!("No enabled pixels for {}, nothing to fire", job.shop_id);
            return;
        }

        dispatch_to_configs(
            self.http.as_ref(),
            self.log.as_ref(),
            &self.ctx.config.server.encryption_key,
            &self.ctx.config.dispatch.default_currency,
            &configs,
            &job,
        )
        .await;
    }

    /// Fire-and-forget variant for the request-submission handler: the
    /// customer-facing response must not wait on third-party platforms.
    pub fn spawn_fire_pixels(self: &Arc<Self>, job: DispatchJob) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.fire_pixels(job).await;
        });
    }

    async fn load_enabled_configs(&self, shop_id: &str) -> anyhow::Result<Vec<PixelConfig>> {
        let mut conn = self.ctx.db_pool.get().await?;
        let configs = pixel_configs::table
            .filter(pixel_configs::shop_id.eq(shop_id))
            .filter(pixel_configs::enabled.eq(true))
            .select(PixelConfig::as_select())
            .load(&mut conn)
            .await?;
        Ok(configs)
    }
}

/// Sequential fan-out over the loaded configurations. Each adapter fully
/// isolates its own failures, so no ordering or parallelism is needed.
pub async fn dispatch_to_configs(
    http: &dyn HttpSender,
    log: &dyn DeliveryLog,
    encryption_key: &str,
    default_currency: &str,
    configs: &[PixelConfig],
    job: &DispatchJob,
) {
    for config in configs {
        let settings = config.event_settings();
        if !job.force && !settings.is_enabled(job.event) {
            tracing::debug!(
                "Pixel {} / {} has {} disabled, skipping",
                config.shop_id,
                config.platform,
                job.event
            );
            continue;
        }

        let platform = match PixelPlatform::parse(&config.platform) {
            Some(platform) => platform,
            None => {
                record_attempt(
                    log,
                    NewPixelLog {
                        shop_id: config.shop_id.clone(),
                        platform: config.platform.clone(),
                        event: job.event.as_str().to_string(),
                        status: DeliveryStatus::Failed,
                        payload: json!({ "platform": config.platform }),
                        error: Some("unsupported platform".to_string()),
                    },
                )
                .await;
                continue;
            }
        };

        // Credentials are opaque ciphertext at rest; decrypt only here. A
        // failed decrypt falls through as a missing credential inside the
        // adapter.
        let credential = config.credential_ciphertext.as_deref().and_then(|envelope| {
            match decrypt_credential(envelope, &config.shop_id, encryption_key) {
                Ok(plaintext) => Some(plaintext),
                Err(e) => {
                    tracing::warn!(
                        "Failed to decrypt credential for {} / {}: {}",
                        config.shop_id,
                        config.platform,
                        e
                    );
                    None
                }
            }
        });

        match platform {
            PixelPlatform::Meta => {
                crate::meta::send(http, log, config, credential.as_deref(), job, default_currency)
                    .await
            }
            PixelPlatform::Tiktok => {
                crate::tiktok::send(http, log, config, credential.as_deref(), job, default_currency)
                    .await
            }
            PixelPlatform::Google => {
                crate::ga4::send(http, log, config, credential.as_deref(), job, default_currency)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config, MemoryLog, MockHttp};
    use pixel_core::encrypt_credential;
    use pixel_core::types::{DomainEvent, LeadSnapshot};

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn job(event: DomainEvent, force: bool) -> DispatchJob {
        DispatchJob {
            shop_id: "demo-shop.myshopify.com".to_string(),
            event,
            lead: Some(LeadSnapshot {
                id: Some(5),
                email: Some("A@Example.com".to_string()),
                ..Default::default()
            }),
            force,
            test: false,
        }
    }

    fn encrypted(token: &str) -> Option<String> {
        Some(encrypt_credential(token, "demo-shop.myshopify.com", KEY).unwrap())
    }

    #[tokio::test]
    async fn test_no_configs_no_calls_no_logs() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();

        dispatch_to_configs(&http, &log, KEY, "AUD", &[], &job(DomainEvent::RequestSubmitted, false))
            .await;

        assert_eq!(http.call_count(), 0);
        assert_eq!(log.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_event_toggle_skips_adapter() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let mut cfg = config("meta", "123");
        cfg.credential_ciphertext = encrypted("token");
        cfg.events = serde_json::json!({ "enabled": { "request_submitted": false } });

        dispatch_to_configs(
            &http,
            &log,
            KEY,
            "AUD",
            &[cfg],
            &job(DomainEvent::RequestSubmitted, false),
        )
        .await;

        assert_eq!(http.call_count(), 0);
        assert_eq!(log.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_force_fires_regardless_of_toggles() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();

        let mut meta_cfg = config("meta", "123");
        meta_cfg.credential_ciphertext = encrypted("m-token");
        meta_cfg.events = serde_json::json!({ "enabled": {} });

        let mut ga4_cfg = config("google", "G-XYZ");
        ga4_cfg.id = 2;
        ga4_cfg.credential_ciphertext = encrypted("g-secret");
        ga4_cfg.events = serde_json::json!({ "enabled": {} });

        dispatch_to_configs(
            &http,
            &log,
            KEY,
            "AUD",
            &[meta_cfg, ga4_cfg],
            &job(DomainEvent::RequestSubmitted, true),
        )
        .await;

        assert_eq!(http.call_count(), 2);
        assert_eq!(log.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_platform_logs_without_adapter_call() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let cfg = config("snapchat", "abc");

        dispatch_to_configs(
            &http,
            &log,
            KEY,
            "AUD",
            &[cfg],
            &job(DomainEvent::RequestSubmitted, false),
        )
        .await;

        assert_eq!(http.call_count(), 0);
        let entries = log.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].platform, "snapchat");
        assert_eq!(entries[0].event, "request_submitted");
        assert_eq!(entries[0].error.as_deref(), Some("unsupported platform"));
    }

    #[tokio::test]
    async fn test_end_to_end_meta_email_hashing() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let mut cfg = config("meta", "123");
        cfg.credential_ciphertext = encrypted("valid-token");

        dispatch_to_configs(
            &http,
            &log,
            KEY,
            "AUD",
            &[cfg],
            &job(DomainEvent::RequestSubmitted, false),
        )
        .await;

        let calls = http.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let user_data = &calls[0].body["data"][0]["user_data"];
        assert_eq!(
            user_data["em"][0],
            "08168cd80dfd534ab0f10af10f1303fe00af2d43ab5c1432360d137f8197e17a"
        );
        assert!(user_data.get("ph").is_none());
        assert_eq!(log.entries.lock().unwrap()[0].status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_double_invocation_produces_two_entries() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let mut cfg = config("meta", "123");
        cfg.credential_ciphertext = encrypted("valid-token");
        let configs = [cfg];
        let j = job(DomainEvent::RequestSubmitted, false);

        dispatch_to_configs(&http, &log, KEY, "AUD", &configs, &j).await;
        dispatch_to_configs(&http, &log, KEY, "AUD", &configs, &j).await;

        // No de-duplication here; the platform merges via event_id.
        assert_eq!(http.call_count(), 2);
        assert_eq!(log.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_undecryptable_credential_becomes_missing_credential() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let mut cfg = config("meta", "123");
        cfg.credential_ciphertext = Some("not-a-valid-envelope".to_string());

        dispatch_to_configs(
            &http,
            &log,
            KEY,
            "AUD",
            &[cfg],
            &job(DomainEvent::RequestSubmitted, false),
        )
        .await;

        assert_eq!(http.call_count(), 0);
        assert_eq!(
            log.entries.lock().unwrap()[0].error.as_deref(),
            Some("missing credential")
        );
    }
}
