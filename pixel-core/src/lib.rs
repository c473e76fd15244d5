pub mod config;
pub mod context;
pub mod db;
pub mod encryption;
pub mod events;
pub mod identity;
pub mod schema;
pub mod types;

pub use config::Config;
pub use context::PixelContext;
pub use db::DbPool;
pub use encryption::{decrypt_credential, encrypt_credential};
pub use events::{map_event_name, sanitize_ga4_event_name};
pub use identity::{hash_email, hash_phone};
pub use types::{DispatchJob, DomainEvent, EventSettings, LeadSnapshot, PixelConfig, PixelPlatform};
