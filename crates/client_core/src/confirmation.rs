use std::{collections::HashMap, mem, sync::Arc, time::Duration};

use shared::{
    domain::{ArmState, CommandType, VehicleCode, VehicleMode},
    error::{CommandErrorKind, CommandOutcome},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    command_dispatcher::{CommandDispatcher, CommandIntent},
    notifications::{Notification, NotificationSink, Severity},
    OperatorIdentity,
};

/// The effort an operator must spend before a destructive command is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// The operator retypes the challenge phrase exactly.
    TypedPhrase,
    /// The operator holds a control for at least `min_hold`.
    HoldToConfirm { min_hold: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    TypedPhrase(String),
    Held(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub vehicle_code: VehicleCode,
    pub intent: CommandIntent,
}

impl PendingConfirmation {
    pub fn command_type(&self) -> CommandType {
        self.intent.command_type()
    }

    pub fn target_mode(&self) -> Option<VehicleMode> {
        self.intent.target_mode()
    }

    pub fn challenge_phrase(&self) -> String {
        match self.intent {
            CommandIntent::Arm => format!("ARM {}", self.vehicle_code),
            CommandIntent::Disarm => format!("DISARM {}", self.vehicle_code),
            CommandIntent::SetMode(mode) => format!("SET MODE {mode} {}", self.vehicle_code),
        }
    }

    fn is_satisfied_by(&self, policy: &ConfirmationPolicy, ack: &Acknowledgment) -> bool {
        match (policy, ack) {
            (ConfirmationPolicy::TypedPhrase, Acknowledgment::TypedPhrase(typed)) => {
                typed.trim() == self.challenge_phrase()
            }
            (ConfirmationPolicy::HoldToConfirm { min_hold }, Acknowledgment::Held(held)) => {
                held >= min_hold
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Idle,
    PendingConfirmation(PendingConfirmation),
    Dispatching(PendingConfirmation),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("select a vehicle before sending commands")]
    NoVehicleSelected,
    #[error("vehicle {0} is still processing another command")]
    DispatcherBusy(VehicleCode),
    #[error("{0} is already the active mode")]
    ModeAlreadyActive(VehicleMode),
    #[error("a confirmed command is still being dispatched")]
    DispatchInProgress,
    #[error("nothing is awaiting confirmation")]
    NothingPending,
    #[error("acknowledgment does not satisfy the confirmation requirement")]
    AcknowledgmentRejected,
}

struct OrchestratorState {
    selected_vehicle: Option<VehicleCode>,
    arm_states: HashMap<VehicleCode, ArmState>,
    gate: GateState,
}

/// Gates arm, disarm and mode changes behind an explicit acknowledgment and
/// commits [`ArmState`] only after the hardware acknowledged the command.
pub struct ModeOrchestrator {
    dispatcher: Arc<CommandDispatcher>,
    notifications: Arc<dyn NotificationSink>,
    policy: ConfirmationPolicy,
    operator: Option<OperatorIdentity>,
    state: Mutex<OrchestratorState>,
}

impl ModeOrchestrator {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        notifications: Arc<dyn NotificationSink>,
        policy: ConfirmationPolicy,
        operator: Option<OperatorIdentity>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            notifications,
            policy,
            operator,
            state: Mutex::new(OrchestratorState {
                selected_vehicle: None,
                arm_states: HashMap::new(),
                gate: GateState::Idle,
            }),
        })
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    /// Changing the target discards whatever was awaiting confirmation.
    pub async fn select_vehicle(&self, vehicle_code: Option<VehicleCode>) {
        let vehicle_code = vehicle_code
            .map(|code| VehicleCode::new(code.as_str().trim()))
            .filter(|code| !code.is_blank());
        let mut state = self.state.lock().await;
        if matches!(state.gate, GateState::PendingConfirmation(_)) {
            debug!("gate: pending confirmation discarded by vehicle selection");
            state.gate = GateState::Idle;
        }
        state.selected_vehicle = vehicle_code;
    }

    pub async fn selected_vehicle(&self) -> Option<VehicleCode> {
        self.state.lock().await.selected_vehicle.clone()
    }

    /// Arm state of the selected vehicle.
    pub async fn arm_state(&self) -> ArmState {
        let state = self.state.lock().await;
        state
            .selected_vehicle
            .as_ref()
            .and_then(|code| state.arm_states.get(code))
            .copied()
            .unwrap_or_default()
    }

    pub async fn arm_state_of(&self, vehicle_code: &VehicleCode) -> ArmState {
        self.state
            .lock()
            .await
            .arm_states
            .get(vehicle_code)
            .copied()
            .unwrap_or_default()
    }

    /// Records state reported by telemetry rather than by a command.
    pub async fn seed_arm_state(&self, vehicle_code: VehicleCode, arm_state: ArmState) {
        self.state
            .lock()
            .await
            .arm_states
            .insert(vehicle_code, arm_state);
    }

    pub async fn gate_state(&self) -> GateState {
        self.state.lock().await.gate.clone()
    }

    /// Opens a confirmation for the selected vehicle. A refusal is also
    /// reported to the notification sink, once.
    pub async fn request(&self, intent: CommandIntent) -> Result<PendingConfirmation, GateError> {
        let mut state = self.state.lock().await;
        let vehicle_code = match self.admit(&state, intent) {
            Ok(vehicle_code) => vehicle_code,
            Err(err) => {
                drop(state);
                self.report_refusal(intent, &err);
                return Err(err);
            }
        };

        let pending = PendingConfirmation {
            vehicle_code,
            intent,
        };
        let previous = mem::replace(
            &mut state.gate,
            GateState::PendingConfirmation(pending.clone()),
        );
        if let GateState::PendingConfirmation(previous) = previous {
            debug!("gate: replaced pending phrase={}", previous.challenge_phrase());
        }

        info!(
            "gate: awaiting confirmation vehicle={} command={} operator={}",
            pending.vehicle_code,
            pending.command_type(),
            self.operator_name()
        );
        Ok(pending)
    }

    fn admit(
        &self,
        state: &OrchestratorState,
        intent: CommandIntent,
    ) -> Result<VehicleCode, GateError> {
        if matches!(state.gate, GateState::Dispatching(_)) {
            return Err(GateError::DispatchInProgress);
        }

        let vehicle_code = state
            .selected_vehicle
            .clone()
            .ok_or(GateError::NoVehicleSelected)?;
        if self.dispatcher.is_busy(&vehicle_code) {
            return Err(GateError::DispatcherBusy(vehicle_code));
        }

        if let CommandIntent::SetMode(mode) = intent {
            let active = state
                .arm_states
                .get(&vehicle_code)
                .and_then(|arm| arm.active_mode);
            if active == Some(mode) {
                return Err(GateError::ModeAlreadyActive(mode));
            }
        }
        Ok(vehicle_code)
    }

    /// Same-mode requests are informational; every other refusal is a warning.
    fn report_refusal(&self, intent: CommandIntent, err: &GateError) {
        let severity = match err {
            GateError::ModeAlreadyActive(_) => {
                debug!("gate: refused command={} reason={err}", intent.command_type());
                Severity::Info
            }
            _ => {
                warn!("gate: refused command={} reason={err}", intent.command_type());
                Severity::Warning
            }
        };
        self.notifications
            .notify(Notification::new(severity, err.to_string()));
    }

    /// Returns whether a pending confirmation was discarded.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if let GateState::PendingConfirmation(pending) = &state.gate {
            info!(
                "gate: cancelled vehicle={} command={} operator={}",
                pending.vehicle_code,
                pending.command_type(),
                self.operator_name()
            );
            state.gate = GateState::Idle;
            return true;
        }
        false
    }

    /// Sends the pending command once the acknowledgment satisfies the policy.
    ///
    /// Every dispatched command ends with exactly one notification and the
    /// gate back in [`GateState::Idle`]. The dispatch runs on its own task so
    /// it completes even if the caller stops waiting.
    pub async fn confirm(
        self: &Arc<Self>,
        acknowledgment: Acknowledgment,
    ) -> Result<CommandOutcome, GateError> {
        let pending = {
            let mut state = self.state.lock().await;
            let pending = match &state.gate {
                GateState::PendingConfirmation(pending) => pending.clone(),
                GateState::Dispatching(dispatching) => {
                    let intent = dispatching.intent;
                    drop(state);
                    self.report_refusal(intent, &GateError::DispatchInProgress);
                    return Err(GateError::DispatchInProgress);
                }
                GateState::Idle => return Err(GateError::NothingPending),
            };
            if !pending.is_satisfied_by(&self.policy, &acknowledgment) {
                warn!(
                    "gate: acknowledgment rejected vehicle={} command={}",
                    pending.vehicle_code,
                    pending.command_type()
                );
                return Err(GateError::AcknowledgmentRejected);
            }
            // Another caller may have reached the dispatcher since `request`.
            if self.dispatcher.is_busy(&pending.vehicle_code) {
                drop(state);
                let err = GateError::DispatcherBusy(pending.vehicle_code.clone());
                self.report_refusal(pending.intent, &err);
                return Err(err);
            }
            state.gate = GateState::Dispatching(pending.clone());
            pending
        };

        info!(
            "gate: confirmed vehicle={} command={} operator={}",
            pending.vehicle_code,
            pending.command_type(),
            self.operator_name()
        );

        let orchestrator = Arc::clone(self);
        match tokio::spawn(async move { orchestrator.dispatch_confirmed(pending).await }).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!("gate: dispatch task failed: {err}");
                self.state.lock().await.gate = GateState::Idle;
                let outcome = CommandOutcome::failed(CommandErrorKind::Unknown, err.to_string());
                self.notifications.notify(Notification::new(
                    Severity::Error,
                    format!("command failed: {}", outcome.describe()),
                ));
                Ok(outcome)
            }
        }
    }

    async fn dispatch_confirmed(&self, pending: PendingConfirmation) -> CommandOutcome {
        let command = pending.intent.for_vehicle(pending.vehicle_code.clone());
        let outcome = self.dispatcher.dispatch_command(&command).await;

        {
            let mut state = self.state.lock().await;
            if outcome.success {
                let arm_state = state
                    .arm_states
                    .entry(pending.vehicle_code.clone())
                    .or_default();
                match pending.intent {
                    CommandIntent::Arm => arm_state.armed = true,
                    CommandIntent::Disarm => arm_state.armed = false,
                    CommandIntent::SetMode(mode) => arm_state.active_mode = Some(mode),
                }
            }
            state.gate = GateState::Idle;
        }

        let notification = if outcome.success {
            Notification::new(Severity::Success, success_message(&pending, &outcome))
        } else {
            Notification::new(
                Severity::Error,
                format!(
                    "{} failed for {}: {}",
                    pending.intent,
                    pending.vehicle_code,
                    outcome.describe()
                ),
            )
        };
        self.notifications.notify(notification);

        outcome
    }

    fn operator_name(&self) -> &str {
        self.operator
            .as_ref()
            .map(|operator| operator.username.as_str())
            .unwrap_or("-")
    }
}

fn success_message(pending: &PendingConfirmation, outcome: &CommandOutcome) -> String {
    let summary = match pending.intent {
        CommandIntent::Arm => format!("{} armed", pending.vehicle_code),
        CommandIntent::Disarm => format!("{} disarmed", pending.vehicle_code),
        CommandIntent::SetMode(mode) => format!("{} switched to {mode}", pending.vehicle_code),
    };
    match outcome.message.as_deref() {
        Some(message) if !message.is_empty() => format!("{summary}: {message}"),
        _ => summary,
    }
}

#[cfg(test)]
#[path = "tests/confirmation_tests.rs"]
mod tests;
