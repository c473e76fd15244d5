use chrono::Utc;
use pixel_core::types::{DispatchJob, PixelConfig, PixelPlatform};
use pixel_core::{hash_email, hash_phone, map_event_name};
use serde_json::{json, Value};
use tracing;
use uuid::Uuid;

use crate::http::HttpSender;
use crate::log::{record_attempt, DeliveryLog, DeliveryStatus, NewPixelLog};

const EVENTS_API_URL: &str = "https://business-api.tiktok.com/open_api/v1.3/pixel/track/";

/// Fire one event at the TikTok Events API. Never propagates an error;
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
    let event_name = map_event_name(PixelPlatform::Tiktok, job.event, &settings);

    if !config.api_enabled {
        record_attempt(
            log,
            failure(config, &event_name, json!({ "pixel_code": config.account_id }), "API disabled"),
        )
        .await;
        return;
    }

    let access_token = match credential {
        Some(token) if !token.trim().is_empty() => token,
        _ => {
            record_attempt(
                log,
                failure(config, &event_name, json!({ "pixel_code": config.account_id }), "missing credential"),
            )
            .await;
            return;
        }
    };

    let lead = job.lead.as_ref();

    let event_id = lead
        .and_then(|l| l.id)
        .map(|id| format!("{}:{}", job.event, id))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // TikTok wants the time the conversion actually happened, not the time
    // we got around to reporting it.
    let timestamp = lead
        .and_then(|l| l.created_at)
        .unwrap_or_else(Utc::now)
        .to_rfc3339();

    let mut user = serde_json::Map::new();
    if let Some(em) = hash_email(lead.and_then(|l| l.email.as_deref())) {
        user.insert("email".to_string(), json!(em));
    }
    if let Some(ph) = hash_phone(lead.and_then(|l| l.phone.as_deref())) {
        user.insert("phone_number".to_string(), json!(ph));
    }

    let mut page = serde_json::Map::new();
    if let Some(url) = lead.and_then(|l| l.page_url.as_deref()) {
        page.insert("url".to_string(), json!(url));
    }
    if let Some(referrer) = lead.and_then(|l| l.referrer.as_deref()) {
        page.insert("referrer".to_string(), json!(referrer));
    }

    let mut context = serde_json::Map::new();
    if let Some(ip) = lead.and_then(|l| l.client_ip.as_deref()) {
        context.insert("ip".to_string(), json!(ip));
    }
    if let Some(ua) = lead.and_then(|l| l.user_agent.as_deref()) {
        context.insert("user_agent".to_string(), json!(ua));
    }
    context.insert("page".to_string(), Value::Object(page));
    context.insert("user".to_string(), Value::Object(user));

    let currency = lead
        .and_then(|l| l.currency.as_deref())
        .unwrap_or(default_currency);
    let mut properties = serde_json::Map::new();
    properties.insert("currency".to_string(), json!(currency));
    properties.insert("value".to_string(), json!(lead.and_then(|l| l.value).unwrap_or(0.0)));
    if let Some(l) = lead {
        if !l.items.is_empty() {
            let contents: Vec<Value> = l
                .items
                .iter()
                .map(|item| json!({ "content_id": item.product_id, "quantity": item.quantity }))
                .collect();
            properties.insert("contents".to_string(), json!(contents));
            properties.insert("content_type".to_string(), json!("product"));
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("pixel_code".to_string(), json!(config.account_id));
    body.insert("event".to_string(), json!(event_name));
    body.insert("event_id".to_string(), json!(event_id));
    body.insert("timestamp".to_string(), json!(timestamp));
    body.insert("context".to_string(), Value::Object(context));
    body.insert("properties".to_string(), Value::Object(properties));
    if job.test {
        if let Some(code) = &config.test_code {
            body.insert("test_event_code".to_string(), json!(code));
        }
    }
    let body = Value::Object(body);

    let headers = vec![("Access-Token".to_string(), access_token.to_string())];

    match http.post_json(EVENTS_API_URL, &headers, &body).await {
        Ok(response) if response.is_success() => {
            tracing::debug!("TikTok event {} accepted for pixel {}", event_name, config.account_id);
            record_attempt(
                log,
                NewPixelLog {
                    shop_id: config.shop_id.clone(),
                    platform: PixelPlatform::Tiktok.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Success,
                    payload: json!({
                        "endpoint": EVENTS_API_URL,
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
                    platform: PixelPlatform::Tiktok.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({
                        "endpoint": EVENTS_API_URL,
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
                    platform: PixelPlatform::Tiktok.as_str().to_string(),
                    event: event_name,
                    status: DeliveryStatus::Failed,
                    payload: json!({ "endpoint": EVENTS_API_URL, "request": body }),
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
        platform: PixelPlatform::Tiktok.as_str().to_string(),
        event: event_name.to_string(),
        status: DeliveryStatus::Failed,
        payload,
        error: Some(reason.to_string()),
    }
}
