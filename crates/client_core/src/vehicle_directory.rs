use reqwest::Client;
use shared::domain::VehicleSummary;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{endpoint_url, EndpointError};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("vehicle directory unreachable: {0}")]
    Request(String),
    #[error("vehicle directory answered {status}")]
    Status { status: u16 },
    #[error("malformed vehicle list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read-only listing of the vehicles an operator can target.
pub struct HttpVehicleDirectory {
    http: Client,
    api_base_url: String,
}

impl HttpVehicleDirectory {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base_url: api_base_url.into(),
        }
    }

    pub async fn list_vehicles(&self) -> Result<Vec<VehicleSummary>, DirectoryError> {
        let url = endpoint_url(&self.api_base_url, &["api", "vehicles"])?;
        debug!("directory: GET {url}");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| DirectoryError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            warn!("directory: listing refused status={}", status.as_u16());
            return Err(DirectoryError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| DirectoryError::Request(err.to_string()))?;
        let vehicles: Vec<VehicleSummary> = serde_json::from_str(&body)?;
        info!("directory: listed vehicles count={}", vehicles.len());
        Ok(vehicles)
    }
}

#[cfg(test)]
#[path = "tests/vehicle_directory_tests.rs"]
mod tests;
