//! Twilio WhatsApp send binding. One reqwest client for the process; the
//! per-tenant credentials ride on each request.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use duka_outbound::delivery::{GatewayError, WaGateway};
use duka_outbound::WaPayload;
use duka_tenancy::types::GatewayCredentials;

pub struct TwilioGateway {
    http: reqwest::Client,
    base_url: String,
}

impl TwilioGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Flatten a structured payload into the text body Twilio's WhatsApp
    /// API accepts. Interactive payloads degrade to numbered text.
    fn render(payload: &WaPayload) -> String {
        match payload {
            WaPayload::Text { body } => body.clone(),
            WaPayload::InteractiveButtons { body, buttons } => {
                let mut out = body.clone();
                for (i, b) in buttons.iter().enumerate() {
                    out.push_str(&format!("\n{}. {}", i + 1, b));
                }
                out
            }
            WaPayload::InteractiveList { header, rows } => {
                let mut out = header.clone();
                for (i, r) in rows.iter().enumerate() {
                    out.push_str(&format!("\n{}. {} — {}", i + 1, r.title, r.description));
                }
                out
            }
            WaPayload::ProductCard { title, body, .. } => format!("*{}*\n{}", title, body),
        }
    }
}

#[async_trait]
impl WaGateway for TwilioGateway {
    async fn send(
        &self,
        creds: &GatewayCredentials,
        to_phone: &str,
        payload: &WaPayload,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/Accounts/{}/Messages.json", self.base_url, creds.account_sid);
        let body = Self::render(payload);
        debug!(to = %to_phone, bytes = body.len(), "gateway send");

        let params = [
            ("From", format!("whatsapp:{}", creds.sender_number)),
            ("To", format!("whatsapp:{}", to_phone)),
            ("Body", body),
        ];

        let resp = self
            .http
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GatewayError::Transient(e.to_string())
                } else {
                    GatewayError::Permanent(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GatewayError::Transient(format!("gateway status {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Permanent(format!(
                "gateway status {}: {}",
                status,
                body.chars().take(256).collect::<String>()
            )));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(e.to_string()))?;
        parsed["sid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Permanent("response missing sid".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duka_outbound::format::ListRow;

    #[test]
    fn interactive_payloads_degrade_to_numbered_text() {
        let rendered = TwilioGateway::render(&WaPayload::InteractiveList {
            header: "Pick one:".into(),
            rows: vec![
                ListRow {
                    id: "a".into(),
                    title: "First".into(),
                    description: "desc".into(),
                },
                ListRow {
                    id: "b".into(),
                    title: "Second".into(),
                    description: "desc2".into(),
                },
            ],
        });
        assert!(rendered.starts_with("Pick one:"));
        assert!(rendered.contains("1. First"));
        assert!(rendered.contains("2. Second"));
    }
}
