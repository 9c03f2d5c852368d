use serde::{Deserialize, Serialize};

use crate::domain::{CommandType, VehicleMode};

/// Content type of offer/answer bodies exchanged with the media gateway.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<VehicleMode>,
}

/// 2xx body from the command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAccepted {
    pub message: String,
}

/// Non-2xx body from the command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRejected {
    pub error: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
