use crate::types::{DomainEvent, EventSettings, PixelPlatform};

/// Built-in event vocabulary per platform. Per-shop overrides win over
/// these; an event missing from both falls through as its raw name.
fn platform_default(platform: PixelPlatform, event: DomainEvent) -> &'static str {
    match platform {
        PixelPlatform::Meta => match event {
            DomainEvent::FormOpened => "ViewContent",
            DomainEvent::RoleSelected => "InitiateCheckout",
            DomainEvent::RequestSubmitted => "Lead",
            DomainEvent::RequestConfirmed => "Purchase",
        },
        PixelPlatform::Tiktok => match event {
            DomainEvent::FormOpened => "ViewContent",
            DomainEvent::RoleSelected => "InitiateCheckout",
            DomainEvent::RequestSubmitted => "SubmitForm",
            DomainEvent::RequestConfirmed => "CompletePayment",
        },
        PixelPlatform::Google => match event {
            DomainEvent::FormOpened => "page_view",
            DomainEvent::RoleSelected => "select_item",
            DomainEvent::RequestSubmitted => "generate_lead",
            DomainEvent::RequestConfirmed => "purchase",
        },
    }
}

/// Resolve a domain event into the platform's vocabulary.
/// Fallback order: per-shop override -> platform default -> raw event name.
pub fn map_event_name(
    platform: PixelPlatform,
    event: DomainEvent,
    settings: &EventSettings,
) -> String {
    if let Some(renamed) = settings.override_for(event) {
        return renamed.to_string();
    }
    platform_default(platform, event).to_string()
}

/// GA4 event names must be snake_case alphanumeric, at most 40 characters.
/// Empty results fall back to a fixed catch-all name.
pub fn sanitize_ga4_event_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed: String = out.trim_matches('_').chars().take(40).collect();
    let trimmed = trimmed.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        "leadform_event".to_string()
    } else {
        trimmed
    }
}
