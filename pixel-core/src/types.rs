use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::schema::pixel_configs;

/// Advertising platforms with a server-side events API adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelPlatform {
    Meta,
    Tiktok,
    Google,
}

impl PixelPlatform {
    pub const ALL: [PixelPlatform; 3] =
        [PixelPlatform::Meta, PixelPlatform::Tiktok, PixelPlatform::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelPlatform::Meta => "meta",
            PixelPlatform::Tiktok => "tiktok",
            PixelPlatform::Google => "google",
        }
    }

    pub fn parse(s: &str) -> Option<PixelPlatform> {
        match s {
            "meta" => Some(PixelPlatform::Meta),
            "tiktok" => Some(PixelPlatform::Tiktok),
            "google" => Some(PixelPlatform::Google),
            _ => None,
        }
    }
}

impl fmt::Display for PixelPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain events emitted by the lead form funnel. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEvent {
    FormOpened,
    RoleSelected,
    RequestSubmitted,
    RequestConfirmed,
}

impl DomainEvent {
    pub const ALL: [DomainEvent; 4] = [
        DomainEvent::FormOpened,
        DomainEvent::RoleSelected,
        DomainEvent::RequestSubmitted,
        DomainEvent::RequestConfirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEvent::FormOpened => "form_opened",
            DomainEvent::RoleSelected => "role_selected",
            DomainEvent::RequestSubmitted => "request_submitted",
            DomainEvent::RequestConfirmed => "request_confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<DomainEvent> {
        match s {
            "form_opened" => Some(DomainEvent::FormOpened),
            "role_selected" => Some(DomainEvent::RoleSelected),
            "request_submitted" => Some(DomainEvent::RequestSubmitted),
            "request_confirmed" => Some(DomainEvent::RequestConfirmed),
            _ => None,
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-event settings stored in the `events` jsonb column of a pixel config:
/// which domain events fire for this platform, and optional per-shop renames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
    #[serde(default)]
    pub map: HashMap<String, String>,
}

impl EventSettings {
    /// Tolerant parse of the jsonb column. Malformed settings behave as
    /// "nothing enabled, no overrides" rather than failing the dispatch.
    pub fn from_value(value: &serde_json::Value) -> EventSettings {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn is_enabled(&self, event: DomainEvent) -> bool {
        self.enabled.get(event.as_str()).copied().unwrap_or(false)
    }

    pub fn override_for(&self, event: DomainEvent) -> Option<&str> {
        self.map
            .get(event.as_str())
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// One configured pixel for a shop. At most one row per (shop, platform).
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = pixel_configs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PixelConfig {
    pub id: i64,
    pub shop_id: String,
    pub platform: String,
    pub account_id: String,
    pub enabled: bool,
    pub api_enabled: bool,
    pub credential_ciphertext: Option<String>,
    pub test_code: Option<String>,
    pub events: serde_json::Value,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PixelConfig {
    pub fn event_settings(&self) -> EventSettings {
        EventSettings::from_value(&self.events)
    }
}

/// A (product, quantity) pair from the submitted lead request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: i64,
}

/// Read-only snapshot of the lead request that triggered a domain event.
/// Contact fields arrive raw; hashing happens inside each adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadSnapshot {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// One fan-out request handed to the dispatcher. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub shop_id: String,
    pub event: DomainEvent,
    pub lead: Option<LeadSnapshot>,
    /// Bypass the per-event toggle (admin "send test event" action).
    pub force: bool,
    /// Attach the platform's test/debug marker to the outgoing payload.
    pub test: bool,
}
