/// HTTP client for the meter's local API
///
/// Every request is bounded by the configured timeout; a request that hangs
/// comes back as `ApiUnreachable` rather than blocking the caller.
use log::debug;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use url::Url;

use crate::config::ApiSettings;
use crate::error::{BridgeError, Result};
use crate::models::MeterLevels;

/// Commands the bridge issues to the meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterCommand {
    StartMeasurement,
    StopMeasurement,
    ShutdownApplication,
}

/// SPL meter setup sent after the meter becomes ready
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterProfile {
    pub mode: String,
    pub weighting: String,
    pub filter: String,
    pub rolling_leq_active: bool,
    pub rolling_leq_minutes: u32,
}

impl MeterProfile {
    pub fn new(settings: &ApiSettings, rolling_leq_minutes: u32) -> Self {
        Self {
            mode: "SPL".to_string(),
            weighting: settings.weighting.clone(),
            filter: settings.filter.clone(),
            rolling_leq_active: true,
            rolling_leq_minutes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeterClient {
    http: reqwest::Client,
    base: Url,
    meter_number: u32,
}

impl MeterClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let base = Url::parse(&format!("http://{}:{}/", settings.host, settings.port))
            .map_err(|e| BridgeError::config(format!("invalid meter API address: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout)
            .build()
            .map_err(|e| BridgeError::config(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http,
            base,
            meter_number: settings.meter_number,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| BridgeError::Protocol(format!("bad endpoint {}: {}", path, e)))
    }

    fn meter_path(&self, suffix: &str) -> String {
        format!("spl-meter/{}/{}", self.meter_number, suffix)
    }

    /// Health probe: succeeds once the meter's API answers at all
    pub async fn probe(&self) -> Result<()> {
        let response = self.http.get(self.endpoint("application")?).send().await?;
        check_status(response).await.map(|_| ())
    }

    /// Latest levels reported by the meter
    ///
    /// # Returns
    /// `Ok(None)` when the meter has no active measurement (204 or a `null`
    /// body); errors only when the meter could not be reached or refused.
    pub async fn fetch_current(&self) -> Result<Option<MeterLevels>> {
        let url = self.endpoint(&self.meter_path("levels"))?;
        let response = check_status(self.http.get(url).send().await?).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Option<MeterLevels>>(&body)
            .map_err(|e| BridgeError::Protocol(format!("levels: {}", e)))
    }

    /// Ask the meter to push level updates to `callback_url`
    ///
    /// A subscription can silently stop delivering; the poller notices via
    /// the inbox timestamps and calls this again.
    pub async fn subscribe_updates(&self, callback_url: &str) -> Result<()> {
        let url = self.endpoint(&self.meter_path("subscribe"))?;
        let body = json!({ "callbackUrl": callback_url });
        check_status(self.http.post(url).json(&body).send().await?).await?;
        debug!("Subscribed to meter updates at {}", callback_url);
        Ok(())
    }

    pub async fn configure_meter(&self, profile: &MeterProfile) -> Result<()> {
        let url = self.endpoint(&self.meter_path("configuration"))?;
        check_status(self.http.post(url).json(profile).send().await?).await?;
        Ok(())
    }

    pub async fn send_command(&self, command: MeterCommand) -> Result<()> {
        let (path, name) = match command {
            MeterCommand::StartMeasurement => (self.meter_path("command"), "Start"),
            MeterCommand::StopMeasurement => (self.meter_path("command"), "Stop"),
            MeterCommand::ShutdownApplication => ("application/command".to_string(), "shutdown"),
        };
        let url = self.endpoint(&path)?;
        check_status(
            self.http
                .post(url)
                .json(&json!({ "command": name }))
                .send()
                .await?,
        )
        .await?;
        debug!("Meter command '{}' accepted", name);
        Ok(())
    }
}

/// Turn non-success statuses into `ApiRejected`, keeping the body for logs
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BridgeError::ApiRejected {
        status: status.as_u16(),
        body,
    })
}
