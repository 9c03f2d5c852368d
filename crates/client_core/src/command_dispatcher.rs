use std::{fmt, time::Duration};

use dashmap::DashSet;
use reqwest::{Client, StatusCode};
use shared::{
    domain::{CommandType, VehicleCode, VehicleMode},
    error::{CommandErrorKind, CommandOutcome},
    protocol::{CommandAccepted, CommandRejected, CommandRequest},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::endpoint_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub vehicle_code: VehicleCode,
    pub command_type: CommandType,
    pub mode: Option<VehicleMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCommand {
    #[error("set_mode requires a target mode")]
    MissingMode,
    #[error("{0} does not take a mode")]
    UnexpectedMode(CommandType),
}

impl ControlCommand {
    pub fn new(
        vehicle_code: VehicleCode,
        command_type: CommandType,
        mode: Option<VehicleMode>,
    ) -> Result<Self, InvalidCommand> {
        match (command_type, mode) {
            (CommandType::SetMode, None) => Err(InvalidCommand::MissingMode),
            (CommandType::Arm | CommandType::Disarm, Some(_)) => {
                Err(InvalidCommand::UnexpectedMode(command_type))
            }
            _ => Ok(Self {
                vehicle_code,
                command_type,
                mode,
            }),
        }
    }

    pub fn request_body(&self) -> CommandRequest {
        CommandRequest {
            command: self.command_type,
            mode: self.mode,
        }
    }
}

/// What the operator asked for, before it is bound to a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandIntent {
    Arm,
    Disarm,
    SetMode(VehicleMode),
}

impl CommandIntent {
    pub fn command_type(self) -> CommandType {
        match self {
            Self::Arm => CommandType::Arm,
            Self::Disarm => CommandType::Disarm,
            Self::SetMode(_) => CommandType::SetMode,
        }
    }

    pub fn target_mode(self) -> Option<VehicleMode> {
        match self {
            Self::SetMode(mode) => Some(mode),
            Self::Arm | Self::Disarm => None,
        }
    }

    pub fn for_vehicle(self, vehicle_code: VehicleCode) -> ControlCommand {
        ControlCommand {
            vehicle_code,
            command_type: self.command_type(),
            mode: self.target_mode(),
        }
    }
}

impl fmt::Display for CommandIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arm => f.write_str("arm"),
            Self::Disarm => f.write_str("disarm"),
            Self::SetMode(mode) => write!(f, "set mode {mode}"),
        }
    }
}

/// Sends actuation commands to the per-vehicle command endpoint.
///
/// At most one command per vehicle is in flight at any time; a second
/// dispatch for the same vehicle is refused with [`CommandErrorKind::Busy`]
/// without touching the network. Nothing is ever retried.
pub struct CommandDispatcher {
    http: Client,
    api_base_url: String,
    in_flight: DashSet<VehicleCode>,
}

impl CommandDispatcher {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self::with_client(api_base_url, Client::new())
    }

    /// `None` leaves the wait unbounded and relies on the agent reporting a timeout.
    pub fn with_timeout(
        api_base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(api_base_url, builder.build()?))
    }

    pub fn with_client(api_base_url: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into(),
            in_flight: DashSet::new(),
        }
    }

    pub fn is_busy(&self, vehicle_code: &VehicleCode) -> bool {
        self.in_flight.contains(vehicle_code)
    }

    pub async fn dispatch(
        &self,
        vehicle_code: &str,
        command_type: CommandType,
        mode: Option<VehicleMode>,
    ) -> CommandOutcome {
        let vehicle_code = vehicle_code.trim();
        if vehicle_code.is_empty() {
            return no_vehicle_selected(command_type);
        }

        match ControlCommand::new(VehicleCode::new(vehicle_code), command_type, mode) {
            Ok(command) => self.dispatch_command(&command).await,
            Err(err) => {
                warn!("command: malformed vehicle={vehicle_code} command={command_type} error={err}");
                CommandOutcome::failed(CommandErrorKind::Unknown, err.to_string())
            }
        }
    }

    pub async fn dispatch_command(&self, command: &ControlCommand) -> CommandOutcome {
        if command.vehicle_code.is_blank() {
            return no_vehicle_selected(command.command_type);
        }

        let Some(_in_flight) = InFlightGuard::acquire(&self.in_flight, &command.vehicle_code)
        else {
            warn!(
                "command: refused vehicle={} command={} reason=in_flight",
                command.vehicle_code, command.command_type
            );
            return CommandOutcome::failed(
                CommandErrorKind::Busy,
                format!(
                    "a command for {} is still awaiting acknowledgment",
                    command.vehicle_code
                ),
            );
        };

        let url = match endpoint_url(
            &self.api_base_url,
            &["api", "vehicles", command.vehicle_code.as_str(), "command"],
        ) {
            Ok(url) => url,
            Err(err) => return CommandOutcome::failed(CommandErrorKind::Unknown, err.to_string()),
        };

        info!(
            "command: dispatched vehicle={} command={} mode={}",
            command.vehicle_code,
            command.command_type,
            command.mode.map(|m| m.as_str()).unwrap_or("-")
        );
        debug!("command: POST {url}");

        let outcome = match self.http.post(url).json(&command.request_body()).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                outcome_from_response(status, &body)
            }
            Err(err) => outcome_from_transport_error(&err),
        };

        if outcome.success {
            info!(
                "command: acknowledged vehicle={} command={}",
                command.vehicle_code, command.command_type
            );
        } else {
            warn!(
                "command: failed vehicle={} command={} kind={:?} message={}",
                command.vehicle_code,
                command.command_type,
                outcome.error_kind,
                outcome.message.as_deref().unwrap_or("")
            );
        }

        outcome
    }
}

fn no_vehicle_selected(command_type: CommandType) -> CommandOutcome {
    warn!("command: refused command={command_type} reason=no_vehicle_selected");
    CommandOutcome::failed(
        CommandErrorKind::NoVehicleSelected,
        "select a vehicle before sending commands",
    )
}

struct InFlightGuard<'a> {
    in_flight: &'a DashSet<VehicleCode>,
    vehicle_code: VehicleCode,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a DashSet<VehicleCode>, vehicle_code: &VehicleCode) -> Option<Self> {
        in_flight.insert(vehicle_code.clone()).then(|| Self {
            in_flight,
            vehicle_code: vehicle_code.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.vehicle_code);
    }
}

/// Total mapping from an HTTP response to a command outcome.
pub fn outcome_from_response(status: StatusCode, body: &str) -> CommandOutcome {
    if status.is_success() {
        let message = serde_json::from_str::<CommandAccepted>(body)
            .ok()
            .map(|accepted| accepted.message);
        return CommandOutcome::succeeded(message);
    }

    let reported = serde_json::from_str::<CommandRejected>(body)
        .ok()
        .map(|rejected| rejected.error);

    match status {
        StatusCode::SERVICE_UNAVAILABLE => CommandOutcome::failed(
            CommandErrorKind::BrokerUnavailable,
            reported.unwrap_or_else(|| "command broker is unavailable".to_string()),
        ),
        StatusCode::GATEWAY_TIMEOUT => CommandOutcome::failed(
            CommandErrorKind::Timeout,
            reported.unwrap_or_else(|| "vehicle did not acknowledge the command in time".to_string()),
        ),
        StatusCode::UNPROCESSABLE_ENTITY => CommandOutcome::failed(
            CommandErrorKind::HardwareRejected,
            reported.unwrap_or_else(|| "vehicle rejected the command".to_string()),
        ),
        other => CommandOutcome::failed(
            CommandErrorKind::Unknown,
            reported.unwrap_or_else(|| format!("unexpected response status {}", other.as_u16())),
        ),
    }
}

fn outcome_from_transport_error(err: &reqwest::Error) -> CommandOutcome {
    if err.is_timeout() {
        CommandOutcome::failed(
            CommandErrorKind::Timeout,
            "no response from the command endpoint within the client timeout",
        )
    } else if err.is_connect() {
        CommandOutcome::failed(
            CommandErrorKind::BrokerUnavailable,
            format!("command endpoint unreachable: {err}"),
        )
    } else {
        CommandOutcome::failed(CommandErrorKind::Unknown, err.to_string())
    }
}

#[cfg(test)]
#[path = "tests/command_dispatcher_tests.rs"]
mod tests;
