use thiserror::Error;
use url::Url;

pub mod command_dispatcher;
pub mod config;
pub mod confirmation;
pub mod media_session;
pub mod notifications;
pub mod signaling;
pub mod vehicle_directory;

pub use command_dispatcher::{CommandDispatcher, CommandIntent, ControlCommand};
pub use confirmation::{
    Acknowledgment, ConfirmationPolicy, GateError, GateState, ModeOrchestrator,
    PendingConfirmation,
};
pub use media_session::{
    MediaSessionError, MediaSessionEvent, MediaSessionManager, MediaSessionSnapshot,
    MediaSessionState,
};
pub use notifications::{Notification, NotificationHub, NotificationSink, Severity};
pub use signaling::{EstablishedSession, SignalingClient, SignalingError, SignalingExchange};
pub use vehicle_directory::{DirectoryError, HttpVehicleDirectory};

/// Who is at the console. Recorded on command logs only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub username: String,
}

impl OperatorIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid base url '{url}': {source}")]
    InvalidBase {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base url '{0}' cannot carry a path")]
    CannotBeABase(String),
}

/// Appends percent-encoded path segments to a base URL, keeping any base path.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, EndpointError> {
    let mut url = Url::parse(base).map_err(|source| EndpointError::InvalidBase {
        url: base.to_string(),
        source,
    })?;
    url.path_segments_mut()
        .map_err(|_| EndpointError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .extend(segments.iter().filter(|segment| !segment.is_empty()));
    Ok(url)
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
