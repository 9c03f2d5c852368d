use std::sync::Arc;

use media_transport::{MediaTransport, RemoteTrack, TransportEvent};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    notifications::{Notification, NotificationSink, Severity},
    signaling::SignalingClient,
};

const SESSION_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSessionState {
    Idle,
    Negotiating,
    Connected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSessionSnapshot {
    pub session_id: Uuid,
    pub feed_name: String,
    pub state: MediaSessionState,
    pub remote_track: Option<RemoteTrack>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSessionEvent {
    StateChanged(MediaSessionSnapshot),
    /// The session was torn down and its rendered output released.
    Cleared { session_id: Uuid, feed_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaSessionError {
    #[error("feed name must not be empty")]
    EmptyFeedName,
}

struct ActiveMediaSession {
    session_id: Uuid,
    feed_name: String,
    state: MediaSessionState,
    transport: Option<Arc<dyn MediaTransport>>,
    remote_track: Option<RemoteTrack>,
    last_error: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl ActiveMediaSession {
    fn snapshot(&self) -> MediaSessionSnapshot {
        MediaSessionSnapshot {
            session_id: self.session_id,
            feed_name: self.feed_name.clone(),
            state: self.state,
            remote_track: self.remote_track.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Owns the single live-video session of one viewer.
///
/// `connect` and `disconnect` are serialized on the session lock, and a prior
/// session is fully closed before the next transport is opened. Results that
/// arrive for a session that is no longer current are dropped. A failed
/// session stays failed until the operator connects again.
pub struct MediaSessionManager {
    signaling: Arc<SignalingClient>,
    notifications: Arc<dyn NotificationSink>,
    session: Mutex<Option<ActiveMediaSession>>,
    events: broadcast::Sender<MediaSessionEvent>,
}

impl MediaSessionManager {
    pub fn new(
        signaling: Arc<SignalingClient>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Arc::new(Self {
            signaling,
            notifications,
            session: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MediaSessionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> MediaSessionState {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(MediaSessionState::Idle)
    }

    pub async fn snapshot(&self) -> Option<MediaSessionSnapshot> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(ActiveMediaSession::snapshot)
    }

    pub async fn connect(self: &Arc<Self>, feed_name: &str) -> Result<Uuid, MediaSessionError> {
        let feed_name = feed_name.trim();
        if feed_name.is_empty() {
            warn!("media: connect refused reason=empty_feed_name");
            self.notifications.notify(Notification::new(
                Severity::Warning,
                "select a video feed before connecting",
            ));
            return Err(MediaSessionError::EmptyFeedName);
        }

        let mut guard = self.session.lock().await;
        if let Some(previous) = guard.take() {
            self.teardown(previous).await;
        }

        let mut session = ActiveMediaSession {
            session_id: Uuid::new_v4(),
            feed_name: feed_name.to_string(),
            state: MediaSessionState::Negotiating,
            transport: None,
            remote_track: None,
            last_error: None,
            task: None,
        };
        let session_id = session.session_id;
        info!("media: negotiating feed={feed_name} session={session_id}");
        self.emit_state(&session);

        match self.signaling.open_transport().await {
            Ok(transport) => {
                let transport_events = transport.subscribe_events();
                let manager = Arc::clone(self);
                let task_transport = Arc::clone(&transport);
                let task_feed = session.feed_name.clone();
                session.transport = Some(transport);
                session.task = Some(tokio::spawn(async move {
                    manager
                        .drive_session(session_id, task_feed, task_transport, transport_events)
                        .await;
                }));
            }
            Err(err) => {
                let cause = err.to_string();
                session.state = MediaSessionState::Failed;
                session.last_error = Some(cause.clone());
                self.report_failure(&session, &cause);
            }
        }

        *guard = Some(session);
        Ok(session_id)
    }

    /// Idempotent; a no-op when nothing is connected.
    pub async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(previous) => self.teardown(previous).await,
            None => debug!("media: disconnect with no active session"),
        }
    }

    async fn teardown(&self, mut session: ActiveMediaSession) {
        if let Some(task) = session.task.take() {
            task.abort();
        }
        if let Some(transport) = session.transport.take() {
            if let Err(err) = transport.close().await {
                warn!(
                    "media: transport close failed session={} error={err}",
                    session.session_id
                );
            }
        }
        session.remote_track = None;

        info!(
            "media: torn down feed={} session={}",
            session.feed_name, session.session_id
        );
        let _ = self.events.send(MediaSessionEvent::Cleared {
            session_id: session.session_id,
            feed_name: session.feed_name,
        });
    }

    async fn drive_session(
        self: Arc<Self>,
        session_id: Uuid,
        feed_name: String,
        transport: Arc<dyn MediaTransport>,
        mut transport_events: broadcast::Receiver<TransportEvent>,
    ) {
        if let Err(err) = self
            .signaling
            .negotiate_on(&feed_name, transport.as_ref())
            .await
        {
            self.fail_session(session_id, err.to_string()).await;
            return;
        }
        debug!("media: answer applied, awaiting remote track session={session_id}");

        loop {
            match transport_events.recv().await {
                Ok(TransportEvent::TrackArrived(track)) => {
                    self.mark_connected(session_id, track).await;
                }
                Ok(TransportEvent::ConnectionStateChanged(state)) if state.is_terminal() => {
                    self.fail_session(session_id, format!("transport {state}"))
                        .await;
                    return;
                }
                Ok(TransportEvent::ConnectionStateChanged(state)) => {
                    debug!("media: transport state={state} session={session_id}");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("media: transport events lagged skipped={skipped} session={session_id}");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.fail_session(session_id, "transport event stream closed".to_string())
                        .await;
                    return;
                }
            }
        }
    }

    async fn mark_connected(&self, session_id: Uuid, track: RemoteTrack) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard
            .as_mut()
            .filter(|session| session.session_id == session_id)
        else {
            debug!("media: dropping track for stale session={session_id}");
            return;
        };
        if session.state != MediaSessionState::Negotiating {
            debug!(
                "media: additional track kind={} session={session_id}",
                track.kind
            );
            return;
        }

        session.state = MediaSessionState::Connected;
        session.remote_track = Some(track);
        info!(
            "media: connected feed={} session={session_id}",
            session.feed_name
        );
        self.emit_state(session);
        self.notifications.notify(Notification::new(
            Severity::Success,
            format!("live feed {} connected", session.feed_name),
        ));
    }

    async fn fail_session(&self, session_id: Uuid, cause: String) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard
            .as_mut()
            .filter(|session| session.session_id == session_id)
        else {
            debug!("media: dropping failure for stale session={session_id} cause={cause}");
            return;
        };
        if session.state == MediaSessionState::Failed {
            return;
        }

        if let Some(transport) = session.transport.take() {
            if let Err(err) = transport.close().await {
                warn!("media: transport close failed session={session_id} error={err}");
            }
        }
        session.state = MediaSessionState::Failed;
        session.remote_track = None;
        session.last_error = Some(cause.clone());
        self.report_failure(session, &cause);
    }

    fn report_failure(&self, session: &ActiveMediaSession, cause: &str) {
        warn!(
            "media: failed feed={} session={} cause={cause}",
            session.feed_name, session.session_id
        );
        self.emit_state(session);
        self.notifications.notify(Notification::new(
            Severity::Error,
            format!("live feed {} failed: {cause}", session.feed_name),
        ));
    }

    fn emit_state(&self, session: &ActiveMediaSession) {
        let _ = self
            .events
            .send(MediaSessionEvent::StateChanged(session.snapshot()));
    }
}

#[cfg(test)]
#[path = "tests/media_session_tests.rs"]
mod tests;
