//! Stub collaborators shared by the client_core test modules.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex as StdMutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use media_transport::{
    MediaKind, MediaTransport, MediaTransportConnector, ReceiveOnlyOptions, RemoteTrack,
    TransportConnectionState, TransportEvent,
};
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex, Notify},
};

use crate::notifications::{Notification, NotificationSink};

async fn serve(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// Stand-in for the vehicle command endpoint and vehicle directory.
#[derive(Clone)]
pub(crate) struct CommandStub {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    response: Arc<Mutex<(StatusCode, Value)>>,
    hold: Arc<Mutex<Option<Arc<Notify>>>>,
    vehicles: Arc<Mutex<(StatusCode, Value)>>,
}

impl CommandStub {
    pub(crate) fn responding(status: u16, body: Value) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            response: Arc::new(Mutex::new((
                StatusCode::from_u16(status).expect("status"),
                body,
            ))),
            hold: Arc::new(Mutex::new(None)),
            vehicles: Arc::new(Mutex::new((StatusCode::OK, Value::Array(Vec::new())))),
        }
    }

    /// Subsequent requests wait until the returned handle is notified.
    pub(crate) async fn hold_responses(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.hold.lock().await = Some(Arc::clone(&release));
        release
    }

    pub(crate) async fn set_response(&self, status: u16, body: Value) {
        *self.response.lock().await = (StatusCode::from_u16(status).expect("status"), body);
    }

    pub(crate) async fn set_vehicles(&self, status: u16, body: Value) {
        *self.vehicles.lock().await = (StatusCode::from_u16(status).expect("status"), body);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) async fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().await.clone()
    }

    pub(crate) async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/vehicles", get(handle_list_vehicles))
            .route("/api/vehicles/:code/command", post(handle_command))
            .with_state(self.clone());
        serve(app).await
    }
}

async fn handle_command(
    State(stub): State<CommandStub>,
    Path(code): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    stub.calls.fetch_add(1, Ordering::SeqCst);
    stub.requests.lock().await.push((code, body));

    let hold = stub.hold.lock().await.clone();
    if let Some(release) = hold {
        release.notified().await;
    }

    let (status, body) = stub.response.lock().await.clone();
    (status, Json(body))
}

async fn handle_list_vehicles(State(stub): State<CommandStub>) -> impl IntoResponse {
    let (status, body) = stub.vehicles.lock().await.clone();
    (status, Json(body))
}

/// Stand-in for the WHEP media gateway.
#[derive(Clone)]
pub(crate) struct GatewayStub {
    status: StatusCode,
    answer: String,
    posts: Arc<AtomicUsize>,
    offers: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
}

pub(crate) const STUB_ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

impl GatewayStub {
    pub(crate) fn answering() -> Self {
        Self::with_status(201)
    }

    pub(crate) fn with_status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("status"),
            answer: STUB_ANSWER_SDP.to_string(),
            posts: Arc::new(AtomicUsize::new(0)),
            offers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    /// `(path, body, content type)` per offer received.
    pub(crate) async fn offers(&self) -> Vec<(String, String, Option<String>)> {
        self.offers.lock().await.clone()
    }

    pub(crate) async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/:prefix/:feed/whep", post(handle_whep))
            .with_state(self.clone());
        serve(app).await
    }
}

async fn handle_whep(
    State(stub): State<GatewayStub>,
    Path((prefix, feed)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    stub.posts.fetch_add(1, Ordering::SeqCst);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    stub.offers.lock().await.push((
        format!("/{prefix}/{feed}/whep"),
        String::from_utf8_lossy(&body).into_owned(),
        content_type,
    ));

    if stub.status.is_success() {
        (stub.status, stub.answer.clone())
    } else {
        (stub.status, "stream not found".to_string())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    received: StdMutex<Vec<Notification>>,
}

impl RecordingSink {
    pub(crate) fn notifications(&self) -> Vec<Notification> {
        self.received.lock().expect("sink lock").clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.received.lock().expect("sink lock").push(notification);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GatherBehavior {
    Complete,
    Never,
}

pub(crate) const FAKE_OFFER_SDP: &str = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n";

pub(crate) struct FakeTransport {
    closed: AtomicBool,
    gather: GatherBehavior,
    events: broadcast::Sender<TransportEvent>,
    answers: StdMutex<Vec<String>>,
}

impl FakeTransport {
    fn new(gather: GatherBehavior) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            closed: AtomicBool::new(false),
            gather,
            events,
            answers: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn arrive_track(&self) {
        let _ = self.events.send(TransportEvent::TrackArrived(RemoteTrack {
            track_id: "video0".into(),
            stream_id: "feed".into(),
            kind: MediaKind::Video,
        }));
    }

    pub(crate) fn change_state(&self, state: TransportConnectionState) {
        let _ = self
            .events
            .send(TransportEvent::ConnectionStateChanged(state));
    }

    pub(crate) fn applied_answers(&self) -> Vec<String> {
        self.answers.lock().expect("answers lock").clone()
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn create_offer(&self) -> Result<String> {
        Ok(FAKE_OFFER_SDP.to_string())
    }

    async fn gather_candidates(&self) -> Result<String> {
        match self.gather {
            GatherBehavior::Complete => Ok(format!(
                "{FAKE_OFFER_SDP}a=candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host\r\n"
            )),
            GatherBehavior::Never => {
                std::future::pending::<()>().await;
                Err(anyhow!("unreachable"))
            }
        }
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        if self.is_closed() {
            return Err(anyhow!("transport closed"));
        }
        self.answers.lock().expect("answers lock").push(sdp);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out [`FakeTransport`]s and remembers every one it opened.
pub(crate) struct FakeConnector {
    gather: StdMutex<GatherBehavior>,
    opened: StdMutex<Vec<Arc<FakeTransport>>>,
    previous_closed_at_open: StdMutex<Vec<bool>>,
    options: StdMutex<Vec<ReceiveOnlyOptions>>,
}

impl FakeConnector {
    pub(crate) fn new(gather: GatherBehavior) -> Self {
        Self {
            gather: StdMutex::new(gather),
            opened: StdMutex::new(Vec::new()),
            previous_closed_at_open: StdMutex::new(Vec::new()),
            options: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_gather(&self, gather: GatherBehavior) {
        *self.gather.lock().expect("gather lock") = gather;
    }

    pub(crate) fn opened(&self) -> Vec<Arc<FakeTransport>> {
        self.opened.lock().expect("opened lock").clone()
    }

    pub(crate) fn last(&self) -> Arc<FakeTransport> {
        self.opened().last().cloned().expect("a transport was opened")
    }

    pub(crate) fn live_count(&self) -> usize {
        self.opened().iter().filter(|t| !t.is_closed()).count()
    }

    /// For each open, whether every earlier transport was already closed.
    pub(crate) fn previous_closed_at_open(&self) -> Vec<bool> {
        self.previous_closed_at_open
            .lock()
            .expect("closed lock")
            .clone()
    }

    pub(crate) fn options(&self) -> Vec<ReceiveOnlyOptions> {
        self.options.lock().expect("options lock").clone()
    }
}

#[async_trait]
impl MediaTransportConnector for FakeConnector {
    async fn open(&self, options: ReceiveOnlyOptions) -> Result<Arc<dyn MediaTransport>> {
        let gather = *self.gather.lock().expect("gather lock");
        let transport = Arc::new(FakeTransport::new(gather));
        {
            let mut opened = self.opened.lock().expect("opened lock");
            self.previous_closed_at_open
                .lock()
                .expect("closed lock")
                .push(opened.iter().all(|t| t.is_closed()));
            opened.push(Arc::clone(&transport));
        }
        self.options.lock().expect("options lock").push(options);
        Ok(transport)
    }
}
