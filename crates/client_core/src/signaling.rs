use std::{sync::Arc, time::Duration};

use media_transport::{MediaTransport, MediaTransportConnector, ReceiveOnlyOptions};
use reqwest::{header::CONTENT_TYPE, Client};
use shared::protocol::SDP_CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::ClientSettings, endpoint_url, EndpointError};

pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("feed name must not be empty")]
    EmptyFeedName,
    #[error("ICE negotiation timeout after {}ms", .0.as_millis())]
    NegotiationTimeout(Duration),
    #[error("stream not found (gateway answered {status})")]
    SignalingRejected { status: u16 },
    #[error("media gateway unreachable: {0}")]
    GatewayUnreachable(String),
    #[error("media transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// One offer/answer round trip. Lives only for the duration of a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingExchange {
    pub local_offer: String,
    pub ice_gathering_complete: bool,
    pub remote_answer: Option<String>,
}

pub struct EstablishedSession {
    pub transport: Arc<dyn MediaTransport>,
    pub exchange: SignalingExchange,
}

/// WHEP-style client: gathers every candidate up front, then performs a
/// single offer POST against `/{prefix}/{feed}/whep`.
pub struct SignalingClient {
    http: Client,
    gateway_base_url: String,
    gateway_prefix: String,
    gather_timeout: Duration,
    ice_servers: Vec<String>,
    connector: Arc<dyn MediaTransportConnector>,
}

impl SignalingClient {
    pub fn new(
        gateway_base_url: impl Into<String>,
        gateway_prefix: impl Into<String>,
        connector: Arc<dyn MediaTransportConnector>,
    ) -> Self {
        Self {
            http: Client::new(),
            gateway_base_url: gateway_base_url.into(),
            gateway_prefix: gateway_prefix.into(),
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            ice_servers: Vec::new(),
            connector,
        }
    }

    pub fn from_settings(
        settings: &ClientSettings,
        connector: Arc<dyn MediaTransportConnector>,
    ) -> Self {
        Self::new(
            settings.gateway_base_url.clone(),
            settings.gateway_prefix.clone(),
            connector,
        )
        .with_gather_timeout(settings.ice_gather_timeout())
        .with_ice_servers(settings.ice_servers.clone())
    }

    pub fn with_gather_timeout(mut self, gather_timeout: Duration) -> Self {
        self.gather_timeout = gather_timeout;
        self
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<String>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    /// Feed names may be nested paths such as `usv001/bow`.
    pub fn whep_url(&self, feed_name: &str) -> Result<Url, EndpointError> {
        let segments: Vec<&str> = self
            .gateway_prefix
            .split('/')
            .chain(feed_name.split('/'))
            .chain(["whep"])
            .collect();
        endpoint_url(&self.gateway_base_url, &segments)
    }

    /// Opens a transport that receives one video and one audio stream.
    pub async fn open_transport(&self) -> Result<Arc<dyn MediaTransport>, SignalingError> {
        self.connector
            .open(ReceiveOnlyOptions {
                video_streams: 1,
                audio_streams: 1,
                ice_servers: self.ice_servers.clone(),
            })
            .await
            .map_err(|err| SignalingError::Transport(err.to_string()))
    }

    /// Opens a transport and runs the full handshake on it. The transport is
    /// closed again if the handshake fails.
    pub async fn negotiate(&self, feed_name: &str) -> Result<EstablishedSession, SignalingError> {
        if feed_name.trim().is_empty() {
            return Err(SignalingError::EmptyFeedName);
        }

        let transport = self.open_transport().await?;
        match self.negotiate_on(feed_name, transport.as_ref()).await {
            Ok(exchange) => Ok(EstablishedSession {
                transport,
                exchange,
            }),
            Err(err) => {
                if let Err(close_err) = transport.close().await {
                    warn!("signaling: transport close failed after error: {close_err}");
                }
                Err(err)
            }
        }
    }

    /// Runs the handshake on a transport owned by the caller.
    pub async fn negotiate_on(
        &self,
        feed_name: &str,
        transport: &dyn MediaTransport,
    ) -> Result<SignalingExchange, SignalingError> {
        let feed_name = feed_name.trim();
        if feed_name.is_empty() {
            return Err(SignalingError::EmptyFeedName);
        }
        let url = self.whep_url(feed_name)?;

        let initial_offer = transport
            .create_offer()
            .await
            .map_err(|err| SignalingError::Transport(err.to_string()))?;
        debug!(
            "signaling: offer created feed={feed_name} sdp_bytes={}",
            initial_offer.len()
        );

        let local_offer = match tokio::time::timeout(self.gather_timeout, transport.gather_candidates())
            .await
        {
            Ok(gathered) => gathered.map_err(|err| SignalingError::Transport(err.to_string()))?,
            Err(_) => {
                warn!(
                    "signaling: candidate gathering timed out feed={feed_name} after_ms={}",
                    self.gather_timeout.as_millis()
                );
                return Err(SignalingError::NegotiationTimeout(self.gather_timeout));
            }
        };

        let mut exchange = SignalingExchange {
            local_offer,
            ice_gathering_complete: true,
            remote_answer: None,
        };

        debug!("signaling: POST {url}");
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(exchange.local_offer.clone())
            .send()
            .await
            .map_err(|err| SignalingError::GatewayUnreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "signaling: gateway rejected offer feed={feed_name} status={}",
                status.as_u16()
            );
            return Err(SignalingError::SignalingRejected {
                status: status.as_u16(),
            });
        }

        let answer = response
            .text()
            .await
            .map_err(|err| SignalingError::GatewayUnreachable(err.to_string()))?;
        transport
            .set_remote_answer(answer.clone())
            .await
            .map_err(|err| SignalingError::Transport(err.to_string()))?;
        exchange.remote_answer = Some(answer);

        info!("signaling: answer applied feed={feed_name}");
        Ok(exchange)
    }
}

#[cfg(test)]
#[path = "tests/signaling_tests.rs"]
mod tests;
