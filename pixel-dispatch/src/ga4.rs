use chrono::Utc;
use pixel_core::types::{DispatchJob, DomainEvent, LeadSnapshot, PixelConfig, PixelPlatform};
use pixel_core::{map_event_name, sanitize_ga4_event_name};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing;

use crate::http::HttpSender;
use crate::log::{record_attempt, DeliveryLog, DeliveryStatus, NewPixelLog};

const COLLECT_URL: &str = "https://www.google-analytics.com/mp/collect";

/// Measurement Protocol discards events reported with zero engagement time.
const ENGAGEMENT_TIME_MSEC: u64 = 100;

/// Fire one event at the GA4 Measurement Protocol. Never propagates an
/// error; every exit path records exactly one delivery log entry.
pub async fn send(
    http: &dyn HttpSender,
    log: &dyn DeliveryLog,
    config: &PixelConfig,
    credential: Option<&str>,
    job: &DispatchJob,
    default_currency: &str,
) {
    let settings = config.event_settings();
    let event_name =
        sanitize_ga4_event_name(&map_event_name(PixelPlatform::Google, job.event, &settings));

    if !config.api_enabled {
        record_attempt(
            log,
            failure(config, &event_name, json!({ "measurement_id": config.account_id }), "API disabled"),
        )
        .await;
        return;
    }

    let api_secret = match credential {
        Some(secret) if !secret.trim().is_empty() => secret,
        _ => {
            record_attempt(
                log,
                failure(config, &event_name, json!({ "measurement_id": config.account_id }), "missing credential"),
            )
            .await;
            return;
        }
    };

    let measurement_id = config.account_id.trim();
    if !measurement_id.starts_with("G-") {
        record_attempt(
            log,
            failure(
                config,
                &event_name,
                json!({ "measurement_id": config.account_id }),
                "invalid measurement id",
            ),
        )
        .await;
        return;
    }

    let lead = job.lead.as_ref();

    let timestamp_micros = lead
        .and_then(|l| l.created_at)
        .unwrap_or_else(Utc::now)
        .timestamp_micros();

    let currency = lead
        .and_then(|l| l.currency.as_deref())
        .unwrap_or(default_currency);
    let mut params = serde_json::Map::new();
    params.insert("currency".to_string(), json!(currency));
    params.insert("value".to_string(), json!(lead.and_then(|l| l.value).unwrap_or(0.0)));
    params.insert("engagement_time_msec".to_string(), json!(ENGAGEMENT_TIME_MSEC));
    if let Some(l) = lead {
        if !l.items.is_empty() {
            let items: Vec<Value> = l
                .items
                .iter()
                .map(|item| json!({ "item_id": item.product_id, "quantity": item.quantity }))
                .collect();
            params.insert("items".to_string(), json!(items));
        }
    }
    if job.event == DomainEvent::RequestConfirmed {
        if let Some(id) = lead.and_then(|l| l.id) {
            params.insert("transaction_id".to_string(), json!(id.to_string()));
        }
    }
    if job.test {
        params.insert("debug_mode".to_string(), json!(1));
    }

    let body = json!({
        "client_id": synthesize_client_id(lead),
        "timestamp_micros": timestamp_micros,
        "events": [{ "name": event_name, "params": Value::Object(params) }],
    });

    // Both credentials travel as plaintext query parameters; keep them out
    // of the audit payload.
    let url = format!(
        "{}?measurement_id={}&api_secret={}",
        COLLECT_URL, measurement_id, api_secret
    );

    match http.post_json(&url, &[], &body).await {
        Ok(response) if response.is_success() => {
            tracing::debug!("GA4 event {} accepted for {}", event_name, measurement_id);
            record_attempt(
                log,
                NewPixelLog {
                    shop_id: config.shop_id.clone(),
                    platform: PixelPlatform::Google.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Success,
                    payload: json!({
                        "endpoint": COLLECT_URL,
                        "request": body,
                        "response": response.body_json(),
                    }),
                    error: None,
                },
            )
            .await;
            if let Err(e) = log.touch_last_fired(config.id).await {
                tracing::warn!("Failed to update last_fired_at for config {}: {}", config.id, e);
            }
        }
        Ok(response) => {
            record_attempt(
                log,
                NewPixelLog {
                    shop_id: config.shop_id.clone(),
                    platform: PixelPlatform::Google.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({
                        "endpoint": COLLECT_URL,
                        "request": body,
                        "response": response.body_json(),
                    }),
                    error: Some(format!("HTTP {}", response.status)),
                },
            )
            .await;
        }
        Err(e) => {
            record_attempt(
                log,
                NewPixelLog {
                    shop_id: config.shop_id.clone(),
                    platform: PixelPlatform::Google.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({ "endpoint": COLLECT_URL, "request": body }),
                    error: Some(e.to_string()),
                },
            )
            .await;
        }
    }
}

/// The Measurement Protocol requires a client_id, but there is no first-party
/// GA cookie on the server side. Derive a stable-ish one by hashing whatever
/// identifying material the lead carries into two sub-10-digit numeric
/// components joined by a period (the cookie's own shape).
fn synthesize_client_id(lead: Option<&LeadSnapshot>) -> String {
    let composite = match lead {
        Some(l) => format!(
            "{}|{}|{}|{}|{}",
            l.client_ip.as_deref().unwrap_or(""),
            l.user_agent.as_deref().unwrap_or(""),
            l.email.as_deref().unwrap_or(""),
            l.phone.as_deref().unwrap_or(""),
            l.id.map(|id| id.to_string()).unwrap_or_default(),
        ),
        None => String::from("||||"),
    };

    let digest = Sha256::digest(composite.as_bytes());
    let first = u64::from_be_bytes(digest[0..8].try_into().unwrap()) % 1_000_000_000;
    let second = u64::from_be_bytes(digest[8..16].try_into().unwrap()) % 1_000_000_000;
    format!("{}.{}", first, second)
}

fn failure(config: &PixelConfig, event_name: &str, payload: Value, reason: &str) -> NewPixelLog {
    NewPixelLog {
        shop_id: config.shop_id.clone(),
        platform: PixelPlatform::Google.as_str().to_string(),
        event: event_name.to_string(),
        status: DeliveryStatus::Failed,
        payload,
        error: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config, MemoryLog, MockHttp};
    use chrono::TimeZone;

    fn job(event: DomainEvent) -> DispatchJob {
        DispatchJob {
            shop_id: "demo-shop.myshopify.com".to_string(),
            event,
            lead: Some(LeadSnapshot {
                id: Some(11),
                email: Some("lead@example.com".to_string()),
                phone: None,
                client_ip: Some("192.0.2.20".to_string()),
                user_agent: Some("Mozilla/5.0".to_string()),
                page_url: None,
                referrer: None,
                items: vec![],
                value: Some(40.0),
                currency: None,
                created_at: Some(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()),
            }),
            force: false,
            test: false,
        }
    }

    #[tokio::test]
    async fn test_invalid_measurement_id_short_circuits() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let cfg = config("google", "UA-12345");

        send(&http, &log, &cfg, Some("secret"), &job(DomainEvent::RequestSubmitted), "AUD").await;

        assert_eq!(http.call_count(), 0);
        assert_eq!(log.entry_count(), 1);
        assert_eq!(
            log.entries.lock().unwrap()[0].error.as_deref(),
            Some("invalid measurement id")
        );
    }

    #[tokio::test]
    async fn test_missing_secret_short_circuits() {
        let http = MockHttp::ok();
        let log = MemoryLog::default();
        let cfg = config("google", "G-ABC123");

        send(&http, &log, &cfg, None, &job(DomainEvent::RequestSubmitted), "AUD").await;

        assert_eq!(http.call_count(), 0);
        assert_eq!(
            log.entries.lock().unwrap()[0].error.as_deref(),
            Some("missing credential")
        );
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let http = MockHttp::with_status(204, "");
        let log = MemoryLog::default();
        let cfg = config("google", "G-ABC123");

        send(&http, &log, &cfg, Some("secret"), &job(DomainEvent::RequestSubmitted), "AUD").await;

        let calls = http.calls.lock().unwrap();
        assert!(calls[0].url.contains("measurement_id=G-ABC123"));
        assert!(calls[0].url.contains("api_secret=secret"));
        let body = &calls[0].body;
        // Two numeric components joined by a period.
        let client_id = body["client_id"].as_str().unwrap();
        let parts: Vec<&str> = client_id.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.parse::<u64>().unwrap() < 1_000_000_000));
        assert_eq!(body["timestamp_micros"].as_i64().unwrap(), 1740816000000000);
        let event = &body["events"][0];
        assert_eq!(event["name"], "generate_lead");
        assert_eq!(event["params"]["engagement_time_msec"], 100);
        assert_eq!(event["params"]["currency"], "AUD");
        // Lead submission is not the purchase-equivalent event.
        assert!(event["params"].get("transaction_id").is_none());

        assert_eq!(log.entries.lock().unwrap()[0].status, DeliveryStatus::Success);
        assert_eq!(*log.touched.lock().unwrap(), vec![1]);
        // Secret never lands in the audit payload.
        assert!(!log.entries.lock().unwrap()[0].payload.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_purchase_event_carries_transaction_id_and_debug_mode() {
        let http = MockHttp::with_status(204, "");
        let log = MemoryLog::default();
        let cfg = config("google", "G-ABC123");

        let mut j = job(DomainEvent::RequestConfirmed);
        j.test = true;
        send(&http, &log, &cfg, Some("secret"), &j, "AUD").await;

        let calls = http.calls.lock().unwrap();
        let params = &calls[0].body["events"][0]["params"];
        assert_eq!(calls[0].body["events"][0]["name"], "purchase");
        assert_eq!(params["transaction_id"], "11");
        assert_eq!(params["debug_mode"], 1);
    }

    #[tokio::test]
    async fn test_client_id_is_deterministic() {
        let j = job(DomainEvent::RequestSubmitted);
        assert_eq!(
            synthesize_client_id(j.lead.as_ref()),
            synthesize_client_id(j.lead.as_ref())
        );
    }
}
