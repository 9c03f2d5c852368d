use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::broadcast;

mod webrtc_engine;

pub use webrtc_engine::WebRtcConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Options for a transport that only pulls media from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOnlyOptions {
    pub video_streams: usize,
    pub audio_streams: usize,
    pub ice_servers: Vec<String>,
}

impl Default for ReceiveOnlyOptions {
    fn default() -> Self {
        Self {
            video_streams: 1,
            audio_streams: 1,
            ice_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportConnectionState {
    /// Disconnected, failed and closed transports never carry media again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl fmt::Display for TransportConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    TrackArrived(RemoteTrack),
    ConnectionStateChanged(TransportConnectionState),
}

/// A real-time media endpoint driven through an offer/answer + ICE exchange.
///
/// `create_offer` starts candidate gathering; `gather_candidates` resolves
/// once gathering is complete and returns the local description with every
/// candidate inlined. Callers bound the wait themselves.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> anyhow::Result<String>;
    async fn gather_candidates(&self) -> anyhow::Result<String>;
    async fn set_remote_answer(&self, sdp: String) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
    async fn close(&self) -> anyhow::Result<()>;
    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait MediaTransportConnector: Send + Sync {
    async fn open(&self, options: ReceiveOnlyOptions) -> anyhow::Result<Arc<dyn MediaTransport>>;
}
