use chrono::Utc;
use pixel_core::types::{DispatchJob, PixelConfig, PixelPlatform};
use pixel_core::{hash_email, hash_phone, map_event_name};
use serde_json::{json, Value};
use tracing;
use uuid::Uuid;

use crate::http::HttpSender;
use crate::log::{record_attempt, DeliveryLog, DeliveryStatus, NewPixelLog};

const GRAPH_API_VERSION: &str = "v19.0";

/// Fire one event at the Meta Conversions API. Never propagates an error;
/// every exit path records exactly one delivery log entry.
pub async fn send(
    http: &dyn HttpSender,
    log: &dyn DeliveryLog,
    config: &PixelConfig,
    credential: Option<&str>,
    job: &DispatchJob,
    default_currency: &str,
) {
    let settings = config.event_settings();
    let event_name = map_event_name(PixelPlatform::Meta, job.event, &settings);

    if !config.api_enabled {
        record_attempt(
            log,
            failure(config, &event_name, json!({ "pixel_id": config.account_id }), "API disabled"),
        )
        .await;
        return;
    }

    let access_token = match credential {
        Some(token) if !token.trim().is_empty() => token,
        _ => {
            record_attempt(
                log,
                failure(config, &event_name, json!({ "pixel_id": config.account_id }), "missing credential"),
            )
            .await;
            return;
        }
    };

    let lead = job.lead.as_ref();

    // De-duplication id: stable per (event, lead) so a client-side pixel
    // reporting the same conversion can be merged by Meta.
    let event_id = lead
        .and_then(|l| l.id)
        .map(|id| format!("{}:{}", job.event, id))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut user_data = serde_json::Map::new();
    if let Some(ip) = lead.and_then(|l| l.client_ip.as_deref()) {
        user_data.insert("client_ip_address".to_string(), json!(ip));
    }
    if let Some(ua) = lead.and_then(|l| l.user_agent.as_deref()) {
        user_data.insert("client_user_agent".to_string(), json!(ua));
    }
    if let Some(em) = hash_email(lead.and_then(|l| l.email.as_deref())) {
        user_data.insert("em".to_string(), json!([em]));
    }
    if let Some(ph) = hash_phone(lead.and_then(|l| l.phone.as_deref())) {
        user_data.insert("ph".to_string(), json!([ph]));
    }

    let currency = lead
        .and_then(|l| l.currency.as_deref())
        .unwrap_or(default_currency);
    let mut custom_data = serde_json::Map::new();
    custom_data.insert("currency".to_string(), json!(currency));
    custom_data.insert("value".to_string(), json!(lead.and_then(|l| l.value).unwrap_or(0.0)));
    if let Some(l) = lead {
        if !l.items.is_empty() {
            let contents: Vec<Value> = l
                .items
                .iter()
                .map(|item| json!({ "id": item.product_id, "quantity": item.quantity }))
                .collect();
            let content_ids: Vec<&str> =
                l.items.iter().map(|item| item.product_id.as_str()).collect();
            custom_data.insert("contents".to_string(), json!(contents));
            custom_data.insert("content_ids".to_string(), json!(content_ids));
            custom_data.insert("content_type".to_string(), json!("product"));
        }
    }

    let mut event = serde_json::Map::new();
    event.insert("event_name".to_string(), json!(event_name));
    event.insert("event_time".to_string(), json!(Utc::now().timestamp()));
    event.insert("action_source".to_string(), json!("website"));
    if let Some(url) = lead.and_then(|l| l.page_url.as_deref()) {
        event.insert("event_source_url".to_string(), json!(url));
    }
    event.insert("event_id".to_string(), json!(event_id));
    event.insert("user_data".to_string(), Value::Object(user_data));
    event.insert("custom_data".to_string(), Value::Object(custom_data));
    if job.test {
        if let Some(code) = &config.test_code {
            event.insert("test_event_code".to_string(), json!(code));
        }
    }

    let body = json!({ "data": [Value::Object(event)] });

    // Token travels as a query credential; keep it out of the audit payload.
    let endpoint = format!(
        "https://graph.facebook.com/{}/{}/events",
        GRAPH_API_VERSION, config.account_id
    );
    let url = format!("{}?access_token={}", endpoint, access_token);

    match http.post_json(&url, &[], &body).await {
        Ok(response) if response.is_success() => {
            tracing::debug!("Meta event {} accepted for pixel {}", event_name, config.account_id);
            record_attempt(
                log,
                NewPixelLog {
                    shop_id: config.shop_id.clone(),
                    platform: PixelPlatform::Meta.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Success,
                    payload: json!({
                        "endpoint": endpoint,
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
                    platform: PixelPlatform::Meta.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({
                        "endpoint": endpoint,
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
                    platform: PixelPlatform::Meta.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({ "endpoint": endpoint, "request": body }),
                    error: Some(e.to_string()),
                },
            )
            .await;
        }
    }
}

fn failure(config: &PixelConfig, event_name: &str, payload: Value, reason: &str) -> NewPixelLog {
    NewPixelLog {
        shop_id: config.shop_id.clone(),
        platform: PixelPlatform::Meta.as_str().to_string(),
        event: event_name.to_string(),
        status: DeliveryStatus::Failed,
        payload,
        error: Some(reason.to_string()),
    }
}
