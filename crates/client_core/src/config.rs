use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::confirmation::ConfirmationPolicy;
use crate::OperatorIdentity;

pub const DEFAULT_SETTINGS_FILE: &str = "console.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    TypedPhrase,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub gateway_base_url: String,
    pub gateway_prefix: String,
    pub ice_gather_timeout_ms: u64,
    pub ice_servers: Vec<String>,
    pub command_timeout_ms: Option<u64>,
    pub confirmation: ConfirmationMode,
    pub hold_to_confirm_ms: u64,
    pub operator: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".into(),
            gateway_base_url: "http://127.0.0.1:8889".into(),
            gateway_prefix: "live".into(),
            ice_gather_timeout_ms: 10_000,
            ice_servers: Vec::new(),
            command_timeout_ms: None,
            confirmation: ConfirmationMode::TypedPhrase,
            hold_to_confirm_ms: 1_500,
            operator: None,
        }
    }
}

impl ClientSettings {
    pub fn ice_gather_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gather_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        match self.confirmation {
            ConfirmationMode::TypedPhrase => ConfirmationPolicy::TypedPhrase,
            ConfirmationMode::Hold => ConfirmationPolicy::HoldToConfirm {
                min_hold: Duration::from_millis(self.hold_to_confirm_ms),
            },
        }
    }

    pub fn operator_identity(&self) -> Option<OperatorIdentity> {
        self.operator
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(OperatorIdentity::new)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Defaults, then the TOML file (if readable), then `APP__*` environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<ClientSettings, SettingsError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<ClientSettings>(&raw).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })?,
        Err(_) => ClientSettings::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__GATEWAY_BASE_URL") {
        settings.gateway_base_url = v;
    }
    if let Some(v) = lookup("APP__GATEWAY_PREFIX") {
        settings.gateway_prefix = v;
    }

    if let Some(v) = lookup("APP__ICE_GATHER_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.ice_gather_timeout_ms = parsed,
            Err(_) => warn!("config: ignoring invalid APP__ICE_GATHER_TIMEOUT_MS value={v}"),
        }
    }

    if let Some(v) = lookup("APP__ICE_SERVERS") {
        settings.ice_servers = v
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(v) = lookup("APP__COMMAND_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.command_timeout_ms = Some(parsed),
            Err(_) => warn!("config: ignoring invalid APP__COMMAND_TIMEOUT_MS value={v}"),
        }
    }

    if let Some(v) = lookup("APP__CONFIRMATION") {
        match v.trim().to_ascii_lowercase().as_str() {
            "typed_phrase" => settings.confirmation = ConfirmationMode::TypedPhrase,
            "hold" => settings.confirmation = ConfirmationMode::Hold,
            _ => warn!("config: ignoring invalid APP__CONFIRMATION value={v}"),
        }
    }

    if let Some(v) = lookup("APP__HOLD_TO_CONFIRM_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.hold_to_confirm_ms = parsed,
            Err(_) => warn!("config: ignoring invalid APP__HOLD_TO_CONFIRM_MS value={v}"),
        }
    }

    if let Some(v) = lookup("APP__OPERATOR") {
        settings.operator = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
