use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use pixel_core::schema::{pixel_configs, pixel_logs};
use pixel_core::types::{DispatchJob, DomainEvent, LeadSnapshot, LineItem, PixelPlatform};
use pixel_core::{encrypt_credential, PixelContext};
use pixel_dispatch::Dispatcher;
use serde::Deserialize;
use std::sync::Arc;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pixel-api"
    }))
}

pub async fn list_pixels(
    Extension(ctx): Extension<PixelContext>,
    Path(shop_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut conn = match ctx.db_pool.get().await {
        Ok(c) => c,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    type Row = (
        i64,
        String,
        String,
        bool,
        bool,
        Option<String>,
        Option<String>,
        serde_json::Value,
        Option<chrono::DateTime<chrono::Utc>>,
    );
    let configs: Vec<Row> = match pixel_configs::table
        .filter(pixel_configs::shop_id.eq(&shop_id))
        .order(pixel_configs::platform.asc())
        .select((
            pixel_configs::id,
            pixel_configs::platform,
            pixel_configs::account_id,
            pixel_configs::enabled,
            pixel_configs::api_enabled,
            pixel_configs::credential_ciphertext,
            pixel_configs::test_code,
            pixel_configs::events,
            pixel_configs::last_fired_at,
        ))
        .load(&mut conn)
        .await
    {
        Ok(c) => c,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    // Credentials are write-only: only their presence is reported.
    let result: Vec<serde_json::Value> = configs
        .into_iter()
        .map(
            |(id, platform, account_id, enabled, api_enabled, credential, test_code, events, last_fired_at)| {
                serde_json::json!({
                    "id": id,
                    "platform": platform,
                    "account_id": account_id,
                    "enabled": enabled,
                    "api_enabled": api_enabled,
                    "has_credential": credential.is_some(),
                    "test_code": test_code,
                    "events": events,
                    "last_fired_at": last_fired_at,
                })
            },
        )
        .collect();

    Ok(Json(serde_json::json!(result)))
}

#[derive(Deserialize)]
pub struct UpsertPixelRequest {
    pub account_id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub api_enabled: Option<bool>,
    /// Omitted: keep the stored credential. Empty string: clear it.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub test_code: Option<String>,
    #[serde(default)]
    pub events: Option<serde_json::Value>,
}

/// Event settings are validated at write time so the dispatch path can
/// treat the stored jsonb as trusted.
fn validate_event_settings(events: &serde_json::Value) -> Result<(), String> {
    let obj = events
        .as_object()
        .ok_or_else(|| "events must be an object".to_string())?;
    for (section, want_bool) in [("enabled", true), ("map", false)] {
        let Some(value) = obj.get(section) else { continue };
        let map = value
            .as_object()
            .ok_or_else(|| format!("events.{} must be an object", section))?;
        for (key, v) in map {
            if DomainEvent::parse(key).is_none() {
                return Err(format!("unknown event name: {}", key));
            }
            if want_bool && !v.is_boolean() {
                return Err(format!("events.enabled.{} must be a boolean", key));
            }
            if !want_bool && !v.is_string() {
                return Err(format!("events.map.{} must be a string", key));
            }
        }
    }
    Ok(())
}

pub async fn upsert_pixel(
    Extension(ctx): Extension<PixelContext>,
    Path((shop_id, platform)): Path<(String, String)>,
    Json(req): Json<UpsertPixelRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let bad_request = |msg: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": msg })),
        )
    };
    let internal = || {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "internal error" })),
        )
    };

    if PixelPlatform::parse(&platform).is_none() {
        return Err(bad_request(format!("unknown platform: {}", platform)));
    }
    if req.account_id.trim().is_empty() {
        return Err(bad_request("account_id must not be empty".to_string()));
    }
    if let Some(events) = &req.events {
        validate_event_settings(events).map_err(bad_request)?;
    }

    // Encrypt before the row ever exists; plaintext tokens are never stored.
    let credential_ciphertext = match req.credential.as_deref() {
        None => None,
        Some("") => Some(None),
        Some(token) => {
            match encrypt_credential(token, &shop_id, &ctx.config.server.encryption_key) {
                Ok(envelope) => Some(Some(envelope)),
                Err(e) => {
                    tracing::error!("Failed to encrypt credential for {}: {}", shop_id, e);
                    return Err(internal());
                }
            }
        }
    };

    let mut conn = ctx.db_pool.get().await.map_err(|_| internal())?;

    let existing: Option<i64> = pixel_configs::table
        .filter(pixel_configs::shop_id.eq(&shop_id))
        .filter(pixel_configs::platform.eq(&platform))
        .select(pixel_configs::id)
        .first(&mut conn)
        .await
        .optional()
        .map_err(|_| internal())?;

    let id = match existing {
        Some(id) => {
            let update = diesel::update(pixel_configs::table.filter(pixel_configs::id.eq(id)));
            let result = match &credential_ciphertext {
                // No credential in the request: leave the stored one alone.
                None => {
                    update
                        .set((
                            pixel_configs::account_id.eq(&req.account_id),
                            pixel_configs::enabled.eq(req.enabled.unwrap_or(true)),
                            pixel_configs::api_enabled.eq(req.api_enabled.unwrap_or(false)),
                            pixel_configs::test_code.eq(req.test_code.as_deref()),
                            pixel_configs::events
                                .eq(req.events.clone().unwrap_or_else(|| serde_json::json!({}))),
                            pixel_configs::updated_at.eq(Utc::now()),
                        ))
                        .execute(&mut conn)
                        .await
                }
                Some(new_value) => {
                    update
                        .set((
                            pixel_configs::account_id.eq(&req.account_id),
                            pixel_configs::enabled.eq(req.enabled.unwrap_or(true)),
                            pixel_configs::api_enabled.eq(req.api_enabled.unwrap_or(false)),
                            pixel_configs::credential_ciphertext.eq(new_value.as_deref()),
                            pixel_configs::test_code.eq(req.test_code.as_deref()),
                            pixel_configs::events
                                .eq(req.events.clone().unwrap_or_else(|| serde_json::json!({}))),
                            pixel_configs::updated_at.eq(Utc::now()),
                        ))
                        .execute(&mut conn)
                        .await
                }
            };
            result.map_err(|_| internal())?;
            id
        }
        None => {
            let inserted: i64 = diesel::insert_into(pixel_configs::table)
                .values((
                    pixel_configs::shop_id.eq(&shop_id),
                    pixel_configs::platform.eq(&platform),
                    pixel_configs::account_id.eq(&req.account_id),
                    pixel_configs::enabled.eq(req.enabled.unwrap_or(true)),
                    pixel_configs::api_enabled.eq(req.api_enabled.unwrap_or(false)),
                    pixel_configs::credential_ciphertext
                        .eq(credential_ciphertext.flatten().as_deref()),
                    pixel_configs::test_code.eq(req.test_code.as_deref()),
                    pixel_configs::events
                        .eq(req.events.clone().unwrap_or_else(|| serde_json::json!({}))),
                ))
                .returning(pixel_configs::id)
                .get_result(&mut conn)
                .await
                .map_err(|_| internal())?;
            inserted
        }
    };

    Ok(Json(serde_json::json!({ "status": "ok", "id": id })))
}

pub async fn delete_pixel(
    Extension(ctx): Extension<PixelContext>,
    Path((shop_id, platform)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut conn = match ctx.db_pool.get().await {
        Ok(c) => c,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let deleted = diesel::delete(
        pixel_configs::table
            .filter(pixel_configs::shop_id.eq(&shop_id))
            .filter(pixel_configs::platform.eq(&platform)),
    )
    .execute(&mut conn)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if deleted == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Deserialize, Default)]
pub struct TestEventRequest {
    #[serde(default)]
    pub event: Option<String>,
}

/// Admin "send test event": force-fires every enabled pixel with synthetic
/// lead data and the platform test markers attached.
pub async fn send_test_event(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Path(shop_id): Path<String>,
    body: Option<Json<TestEventRequest>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let event = match req.event.as_deref() {
        None => DomainEvent::RequestSubmitted,
        Some(name) => DomainEvent::parse(name).ok_or(StatusCode::BAD_REQUEST)?,
    };

    let job = DispatchJob {
        shop_id: shop_id.clone(),
        event,
        lead: Some(synthetic_lead()),
        force: true,
        test: true,
    };

    // Awaited deliberately: the admin wants the log rows to exist when the
    // logs table refreshes.
    dispatcher.fire_pixels(job).await;

    Ok(Json(serde_json::json!({
        "status": "dispatched",
        "event": event.as_str(),
    })))
}

fn synthetic_lead() -> LeadSnapshot {
    LeadSnapshot {
        id: None,
        email: Some("test@example.com".to_string()),
        phone: Some("+61412345678".to_string()),
        client_ip: Some("127.0.0.1".to_string()),
        user_agent: Some("leadform-test-event".to_string()),
        page_url: Some("https://example.com/test".to_string()),
        referrer: None,
        items: vec![LineItem {
            product_id: "test-product".to_string(),
            quantity: 1,
        }],
        value: Some(1.0),
        currency: None,
        created_at: Some(Utc::now()),
    }
}

#[derive(Deserialize)]
pub struct PixelLogQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub platform: Option<String>,
}

pub async fn get_pixel_logs(
    Extension(ctx): Extension<PixelContext>,
    Path(shop_id): Path<String>,
    Query(params): Query<PixelLogQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50).min(100);
    let offset = params.offset.unwrap_or(0);
    let mut conn = match ctx.db_pool.get().await {
        Ok(c) => c,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let mut query = pixel_logs::table
        .filter(pixel_logs::shop_id.eq(&shop_id))
        .order(pixel_logs::created_at.desc())
        .limit(limit)
        .offset(offset)
        .into_boxed();

    if let Some(platform) = &params.platform {
        query = query.filter(pixel_logs::platform.eq(platform));
    }

    type Row = (
        i64,
        String,
        String,
        String,
        serde_json::Value,
        Option<String>,
        chrono::DateTime<chrono::Utc>,
    );
    let logs: Vec<Row> = match query
        .select((
            pixel_logs::id,
            pixel_logs::platform,
            pixel_logs::event,
            pixel_logs::status,
            pixel_logs::payload,
            pixel_logs::error,
            pixel_logs::created_at,
        ))
        .load(&mut conn)
        .await
    {
        Ok(l) => l,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let result: Vec<serde_json::Value> = logs
        .into_iter()
        .map(|(id, platform, event, status, payload, error, created_at)| {
            serde_json::json!({
                "id": id,
                "platform": platform,
                "event": event,
                "status": status,
                "payload": payload,
                "error": error,
                "created_at": created_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_settings_accepts_known_events() {
        let events = serde_json::json!({
            "enabled": { "request_submitted": true, "form_opened": false },
            "map": { "request_confirmed": "BookingConfirmed" }
        });
        assert!(validate_event_settings(&events).is_ok());
    }

    #[test]
    fn test_validate_event_settings_rejects_unknown_event() {
        let events = serde_json::json!({ "enabled": { "add_to_cart": true } });
        assert!(validate_event_settings(&events).is_err());
    }

    #[test]
    fn test_validate_event_settings_rejects_wrong_types() {
        let events = serde_json::json!({ "enabled": { "form_opened": "yes" } });
        assert!(validate_event_settings(&events).is_err());
        let events = serde_json::json!({ "map": { "form_opened": true } });
        assert!(validate_event_settings(&events).is_err());
        assert!(validate_event_settings(&serde_json::json!([])).is_err());
    }
}
