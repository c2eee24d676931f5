//! Twilio REST transport.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use super::{PlaceCallRequest, Telephony};
use crate::config::TwilioConfig;
use crate::error::TelephonyError;

const PROVIDER: &str = "twilio";
const API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Deserialize)]
struct SidResponse {
    #[serde(default)]
    sid: Option<String>,
}

pub struct TwilioTelephony {
    config: TwilioConfig,
    api_base: String,
    client: reqwest::Client,
}

impl TwilioTelephony {
    pub fn new(config: TwilioConfig) -> Self {
        Self::with_api_base(config, API_BASE)
    }

    /// Point the client at a different API root (used against local fakes).
    pub fn with_api_base(config: TwilioConfig, api_base: impl Into<String>) -> Self {
        Self {
            config,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/Accounts/{}/{resource}.json",
            self.api_base, self.config.account_sid
        )
    }

    async fn post_form(&self, resource: &str, form: &[(&str, String)]) -> Result<String, TelephonyError> {
        let resp = self
            .client
            .post(self.resource_url(resource))
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| TelephonyError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TelephonyError::Rejected {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SidResponse = resp.json().await.map_err(|e| TelephonyError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
        parsed
            .sid
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| TelephonyError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("{resource} response did not include a SID"),
            })
    }
}

/// Form fields for a call create request. Repeated keys are intentional.
fn call_form(from: &str, request: &PlaceCallRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("To", request.to.clone()),
        ("From", from.to_string()),
        ("Twiml", request.twiml.clone()),
    ];
    if let Some(url) = &request.status_callback_url {
        form.push(("StatusCallback", url.clone()));
        form.push(("StatusCallbackMethod", "POST".into()));
        for event in ["initiated", "ringing", "answered", "completed"] {
            form.push(("StatusCallbackEvent", event.into()));
        }
    }
    if request.record {
        form.push(("Record", "true".into()));
        form.push(("RecordingChannels", "dual".into()));
        if let Some(url) = &request.recording_callback_url {
            form.push(("RecordingStatusCallback", url.clone()));
            form.push(("RecordingStatusCallbackMethod", "POST".into()));
        }
    }
    form
}

#[async_trait]
impl Telephony for TwilioTelephony {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn place_call(&self, request: PlaceCallRequest) -> Result<String, TelephonyError> {
        let form = call_form(&self.config.from_number, &request);
        debug!(to = %request.to, record = request.record, "Placing Twilio call");
        let sid = self.post_form("Calls", &form).await?;
        info!(sid = %sid, "Twilio call created");
        Ok(sid)
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<String, TelephonyError> {
        let form = [
            ("To", to.to_string()),
            ("From", self.config.from_number.clone()),
            ("Body", body.to_string()),
        ];
        let sid = self.post_form("Messages", &form).await?;
        info!(sid = %sid, "Twilio message sent");
        Ok(sid)
    }
}
