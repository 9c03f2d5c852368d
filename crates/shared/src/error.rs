use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// No vehicle was targeted; nothing was sent.
    NoVehicleSelected,
    /// Another command for the same vehicle is still in flight; nothing was sent.
    Busy,
    BrokerUnavailable,
    Timeout,
    /// The hardware refused the command; the message carries its reason.
    HardwareRejected,
    Unknown,
}

impl CommandErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoVehicleSelected => "no vehicle selected",
            Self::Busy => "vehicle busy",
            Self::BrokerUnavailable => "broker unavailable",
            Self::Timeout => "hardware acknowledgment timeout",
            Self::HardwareRejected => "hardware rejected",
            Self::Unknown => "unknown failure",
        }
    }
}

impl fmt::Display for CommandErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<CommandErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandOutcome {
    pub fn succeeded(message: Option<String>) -> Self {
        Self {
            success: true,
            error_kind: None,
            message,
        }
    }

    pub fn failed(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    /// One-line summary suitable for a notification.
    pub fn describe(&self) -> String {
        match (self.error_kind, self.message.as_deref()) {
            (None, Some(message)) => message.to_string(),
            (None, None) => "command acknowledged".to_string(),
            (Some(kind), Some(message)) if !message.is_empty() => format!("{kind}: {message}"),
            (Some(kind), _) => kind.to_string(),
        }
    }
}
