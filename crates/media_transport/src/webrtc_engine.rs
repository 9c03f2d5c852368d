use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use crate::{
    MediaKind, MediaTransport, MediaTransportConnector, ReceiveOnlyOptions, RemoteTrack,
    TransportConnectionState, TransportEvent,
};

const TRANSPORT_EVENT_CAPACITY: usize = 64;

/// Opens receive-only peer connections backed by the `webrtc` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcConnector;

#[async_trait]
impl MediaTransportConnector for WebRtcConnector {
    async fn open(&self, options: ReceiveOnlyOptions) -> Result<Arc<dyn MediaTransport>> {
        let transport = WebRtcTransport::open(options).await?;
        Ok(Arc::new(transport))
    }
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: broadcast::Sender<TransportEvent>,
    gather_complete: Mutex<Option<mpsc::Receiver<()>>>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    async fn open(options: ReceiveOnlyOptions) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if options.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: options.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .context("failed to create peer connection")?,
        );

        let receive_only = || RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        };
        for _ in 0..options.video_streams {
            pc.add_transceiver_from_kind(RTPCodecType::Video, Some(receive_only()))
                .await
                .context("failed to add video transceiver")?;
        }
        for _ in 0..options.audio_streams {
            pc.add_transceiver_from_kind(RTPCodecType::Audio, Some(receive_only()))
                .await
                .context("failed to add audio transceiver")?;
        }

        let (events, _) = broadcast::channel(TRANSPORT_EVENT_CAPACITY);

        let track_events = events.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let track_events = track_events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => MediaKind::Video,
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => return,
                };
                let remote = RemoteTrack {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                };
                info!(
                    "transport: remote track arrived kind={} track={}",
                    remote.kind, remote.track_id
                );
                let _ = track_events.send(TransportEvent::TrackArrived(remote));
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_events = state_events.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::New => TransportConnectionState::New,
                    RTCPeerConnectionState::Connecting => TransportConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => TransportConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => {
                        TransportConnectionState::Disconnected
                    }
                    RTCPeerConnectionState::Failed => TransportConnectionState::Failed,
                    RTCPeerConnectionState::Closed => TransportConnectionState::Closed,
                    _ => return,
                };
                debug!("transport: connection state={state}");
                let _ = state_events.send(TransportEvent::ConnectionStateChanged(state));
            })
        }));

        Ok(Self {
            pc,
            events,
            gather_complete: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("failed to create offer")?;

        let gather_complete = self.pc.gathering_complete_promise().await;
        *self.gather_complete.lock().await = Some(gather_complete);

        self.pc
            .set_local_description(offer.clone())
            .await
            .context("failed to set local description")?;

        Ok(offer.sdp)
    }

    async fn gather_candidates(&self) -> Result<String> {
        let Some(mut gather_complete) = self.gather_complete.lock().await.take() else {
            return Err(anyhow!("candidate gathering requested before an offer was created"));
        };
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("local description missing after candidate gathering"))?;
        debug!("transport: gathering complete sdp_bytes={}", local.sdp.len());
        Ok(local.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp).context("invalid SDP answer")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("failed to apply remote answer")?;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc
            .close()
            .await
            .context("failed to close peer connection")?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "tests/webrtc_engine_tests.rs"]
mod tests;
