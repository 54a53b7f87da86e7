use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::model::ScheduleDate;
use crate::observability::CONFIRMATIONS_TOTAL;

/// Detached dispatch gets this long end-to-end; an in-flight send past the
/// deadline is abandoned, never retried.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default country prefix for bare national numbers.
const DEFAULT_COUNTRY_CODE: &str = "91";

/// Outbound confirmation for one accepted reservation.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub patient_name: String,
    pub patient_mobile: String,
    pub date: ScheduleDate,
    pub time: String,
}

#[derive(Debug)]
pub enum DispatchError {
    /// Messaging credentials are absent; delivery is skipped, not failed.
    NotConfigured,
    Http(String),
    Rejected { status: u16, body: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NotConfigured => write!(f, "messaging API not configured"),
            DispatchError::Http(e) => write!(f, "request failed: {e}"),
            DispatchError::Rejected { status, body } => {
                write!(f, "messaging API rejected the message ({status}): {body}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// WhatsApp Cloud API client for the approved `booking_confirmation`
/// template. The reservation engine treats every outcome as informational:
/// nothing here can fail a committed booking.
pub struct ConfirmationDispatcher {
    client: reqwest::Client,
    phone_number_id: Option<String>,
    access_token: Option<String>,
    api_version: String,
}

impl ConfirmationDispatcher {
    pub fn new(
        phone_number_id: Option<String>,
        access_token: Option<String>,
        api_version: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            phone_number_id,
            access_token,
            api_version: api_version.unwrap_or_else(|| "v21.0".into()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("SLOTD_WA_PHONE_NUMBER_ID").ok(),
            std::env::var("SLOTD_WA_ACCESS_TOKEN").ok(),
            std::env::var("SLOTD_WA_API_VERSION").ok(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.phone_number_id.is_some() && self.access_token.is_some()
    }

    /// International digits-only form: a leading `+` is stripped; bare
    /// national numbers get the default country prefix.
    fn format_mobile(mobile: &str) -> String {
        let digits: String = mobile
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        match digits.strip_prefix('+') {
            Some(rest) => rest.to_string(),
            None if digits.starts_with(DEFAULT_COUNTRY_CODE) => digits,
            None => format!("{DEFAULT_COUNTRY_CODE}{digits}"),
        }
    }

    fn template_payload(req: &ConfirmationRequest) -> serde_json::Value {
        json!({
            "messaging_product": "whatsapp",
            "to": Self::format_mobile(&req.patient_mobile),
            "type": "template",
            "template": {
                "name": "booking_confirmation",
                "language": { "code": "en_US" },
                "components": [{
                    "type": "body",
                    "parameters": [
                        { "type": "text", "text": req.patient_name },
                        { "type": "text", "text": req.date.long_form() },
                        { "type": "text", "text": req.time },
                    ],
                }],
            },
        })
    }

    /// One delivery attempt through the Cloud API.
    pub async fn send_confirmation(&self, req: &ConfirmationRequest) -> Result<(), DispatchError> {
        let (Some(phone_number_id), Some(token)) = (&self.phone_number_id, &self.access_token)
        else {
            return Err(DispatchError::NotConfigured);
        };

        let url = format!(
            "https://graph.facebook.com/{}/{}/messages",
            self.api_version, phone_number_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&Self::template_payload(req))
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }
        Ok(())
    }

    /// Fire-and-forget post-commit dispatch: detached task with its own
    /// timeout. Failure is logged and never reaches the booking caller.
    pub fn spawn_confirmation(self: Arc<Self>, req: ConfirmationRequest) {
        let dispatcher = self;
        tokio::spawn(async move {
            match tokio::time::timeout(DISPATCH_TIMEOUT, dispatcher.send_confirmation(&req)).await
            {
                Ok(Ok(())) => {
                    metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => "sent").increment(1);
                    debug!("confirmation sent for {} {}", req.date, req.time);
                }
                Ok(Err(DispatchError::NotConfigured)) => {
                    debug!(
                        "confirmation skipped for {} {} (messaging not configured)",
                        req.date, req.time
                    );
                }
                Ok(Err(e)) => {
                    metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => "failed").increment(1);
                    warn!("confirmation dispatch failed for {} {}: {e}", req.date, req.time);
                }
                Err(_) => {
                    metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => "timeout").increment(1);
                    warn!("confirmation dispatch timed out for {} {}", req.date, req.time);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            patient_name: "A".into(),
            patient_mobile: "9876543210".into(),
            date: ScheduleDate::parse("2026-08-10").unwrap(),
            time: "09:00".into(),
        }
    }

    #[test]
    fn format_mobile_variants() {
        assert_eq!(ConfirmationDispatcher::format_mobile("+14155550100"), "14155550100");
        assert_eq!(ConfirmationDispatcher::format_mobile("919876543210"), "919876543210");
        assert_eq!(ConfirmationDispatcher::format_mobile("9876543210"), "919876543210");
        assert_eq!(ConfirmationDispatcher::format_mobile("98765 43210"), "919876543210");
    }

    #[test]
    fn template_payload_shape() {
        let payload = ConfirmationDispatcher::template_payload(&request());
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "919876543210");
        assert_eq!(payload["template"]["name"], "booking_confirmation");
        let params = &payload["template"]["components"][0]["parameters"];
        assert_eq!(params[0]["text"], "A");
        assert_eq!(params[1]["text"], "Monday, August 10, 2026");
        assert_eq!(params[2]["text"], "09:00");
    }

    #[tokio::test]
    async fn unconfigured_dispatcher_skips() {
        let dispatcher = ConfirmationDispatcher::new(None, None, None);
        assert!(!dispatcher.is_configured());
        let result = dispatcher.send_confirmation(&request()).await;
        assert!(matches!(result, Err(DispatchError::NotConfigured)));
    }
}
