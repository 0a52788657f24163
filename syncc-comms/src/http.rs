use crate::device::{DeviceAddress, DeviceClient};
use crate::error::DeviceError;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{info, warn};

/// HTTP client for the acquisition units' REST interface:
/// `GET /health`, `POST /startRecord?filename=<label>`, `POST /stopRecord`.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: Client,
    health_timeout: Duration,
}

impl HttpDeviceClient {
    /// `command_timeout` bounds start/stop requests, `health_timeout` bounds
    /// health checks.
    pub fn new(health_timeout: Duration, command_timeout: Duration) -> Result<Self, DeviceError> {
        let http = Client::builder().timeout(command_timeout).build()?;
        Ok(Self {
            http,
            health_timeout,
        })
    }

    fn exchange(&self, request: RequestBuilder) -> Result<(), DeviceError> {
        let response = request.send()?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(DeviceError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub fn try_health(&self, device: &DeviceAddress) -> Result<(), DeviceError> {
        let url = format!("{}/health", device.base_url());
        self.exchange(self.http.get(url).timeout(self.health_timeout))
    }

    pub fn try_start(&self, device: &DeviceAddress, label: &str) -> Result<(), DeviceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/startRecord", device.base_url()),
            &[("filename", label)],
        )
        .map_err(|e| DeviceError::Url(e.to_string()))?;
        self.exchange(self.http.post(url))
    }

    pub fn try_stop(&self, device: &DeviceAddress) -> Result<(), DeviceError> {
        let url = format!("{}/stopRecord", device.base_url());
        self.exchange(self.http.post(url))
    }
}

impl DeviceClient for HttpDeviceClient {
    fn health(&self, device: &DeviceAddress) -> bool {
        match self.try_health(device) {
            Ok(()) => {
                info!(device = %device, "device is healthy");
                true
            }
            Err(e) => {
                warn!(device = %device, error = %e, "health check failed");
                false
            }
        }
    }

    fn start(&self, device: &DeviceAddress, label: &str) -> bool {
        match self.try_start(device, label) {
            Ok(()) => {
                info!(device = %device, label, "recording started");
                true
            }
            Err(e) => {
                warn!(device = %device, label, error = %e, "failed to start recording");
                false
            }
        }
    }

    fn stop(&self, device: &DeviceAddress) -> bool {
        match self.try_stop(device) {
            Ok(()) => {
                info!(device = %device, "recording stopped");
                true
            }
            Err(e) => {
                warn!(device = %device, error = %e, "failed to stop recording");
                false
            }
        }
    }
}
