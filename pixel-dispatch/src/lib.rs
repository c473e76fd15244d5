pub mod dispatcher;
pub mod ga4;
pub mod http;
pub mod log;
pub mod meta;
pub mod tiktok;

#[cfg(test)]
pub(crate) mod testutil;

pub use dispatcher::{dispatch_to_configs, Dispatcher};
pub use http::{HttpResponse, HttpSender, ReqwestSender};
pub use log::{DeliveryLog, DeliveryStatus, NewPixelLog, PgDeliveryLog};
