use crate::http::{HttpResponse, HttpSender};
use crate::log::{DeliveryLog, NewPixelLog};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use pixel_core::types::PixelConfig;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// Canned-response HTTP sender that records every outbound call.
pub struct MockHttp {
    pub status: u16,
    pub body: String,
    pub fail_transport: bool,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl MockHttp {
    pub fn ok() -> Self {
        Self::with_status(200, r#"{"events_received":1}"#)
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            fail_transport: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn transport_error() -> Self {
        Self {
            status: 0,
            body: String::new(),
            fail_transport: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpSender for MockHttp {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.clone(),
        });
        if self.fail_transport {
            return Err(anyhow!("connection refused"));
        }
        Ok(HttpResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

/// In-memory delivery log.
#[derive(Default)]
pub struct MemoryLog {
    pub entries: Mutex<Vec<NewPixelLog>>,
    pub touched: Mutex<Vec<i64>>,
}

#[async_trait]
impl DeliveryLog for MemoryLog {
    async fn record(&self, entry: NewPixelLog) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn touch_last_fired(&self, config_id: i64) -> Result<()> {
        self.touched.lock().unwrap().push(config_id);
        Ok(())
    }
}

impl MemoryLog {
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

pub fn config(platform: &str, account_id: &str) -> PixelConfig {
    PixelConfig {
        id: 1,
        shop_id: "demo-shop.myshopify.com".to_string(),
        platform: platform.to_string(),
        account_id: account_id.to_string(),
        enabled: true,
        api_enabled: true,
        credential_ciphertext: None,
        test_code: None,
        events: serde_json::json!({
            "enabled": {
                "form_opened": true,
                "role_selected": true,
                "request_submitted": true,
                "request_confirmed": true,
            }
        }),
        last_fired_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
