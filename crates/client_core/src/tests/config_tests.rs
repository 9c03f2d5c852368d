use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn temp_settings_path(label: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    env::temp_dir().join(format!("usv_console_{label}_{suffix}.toml"))
}

#[test]
fn defaults_wait_ten_seconds_for_ice_and_have_no_command_timeout() {
    let settings = ClientSettings::default();
    assert_eq!(settings.ice_gather_timeout(), Duration::from_secs(10));
    assert_eq!(settings.command_timeout(), None);
    assert_eq!(settings.gateway_prefix, "live");
    assert_eq!(settings.confirmation_policy(), ConfirmationPolicy::TypedPhrase);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let path = temp_settings_path("missing");
    let settings = load_settings(Some(&path)).expect("load");
    assert_eq!(settings.api_base_url, ClientSettings::default().api_base_url);
}

#[test]
fn partial_file_keeps_defaults_for_unset_fields() {
    let path = temp_settings_path("partial");
    fs::write(
        &path,
        "api_base_url = \"http://fleet.local:9000\"\nconfirmation = \"hold\"\nhold_to_confirm_ms = 2000\n",
    )
    .expect("write settings");

    let settings = load_settings(Some(&path)).expect("load");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.api_base_url, "http://fleet.local:9000");
    assert_eq!(settings.gateway_base_url, "http://127.0.0.1:8889");
    assert_eq!(
        settings.confirmation_policy(),
        ConfirmationPolicy::HoldToConfirm {
            min_hold: Duration::from_secs(2)
        }
    );
}

#[test]
fn malformed_file_is_reported() {
    let path = temp_settings_path("malformed");
    fs::write(&path, "ice_gather_timeout_ms = \"soon\"\n").expect("write settings");

    let err = load_settings(Some(&path)).expect_err("parse failure");
    fs::remove_file(&path).expect("cleanup");

    assert!(matches!(err, SettingsError::Parse { .. }));
}

#[test]
fn env_overrides_replace_file_values() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[
            ("APP__GATEWAY_PREFIX", "cams"),
            ("APP__ICE_SERVERS", "stun:stun.l.google.com:19302, turn:relay.local:3478"),
            ("APP__COMMAND_TIMEOUT_MS", "8000"),
            ("APP__OPERATOR", "deck-officer"),
        ]),
    );

    assert_eq!(settings.gateway_prefix, "cams");
    assert_eq!(
        settings.ice_servers,
        vec![
            "stun:stun.l.google.com:19302".to_string(),
            "turn:relay.local:3478".to_string()
        ]
    );
    assert_eq!(settings.command_timeout(), Some(Duration::from_secs(8)));
    assert_eq!(
        settings.operator_identity(),
        Some(OperatorIdentity::new("deck-officer"))
    );
}

#[test]
fn invalid_numeric_env_values_are_ignored() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[
            ("APP__ICE_GATHER_TIMEOUT_MS", "ten"),
            ("APP__CONFIRMATION", "slider"),
        ]),
    );

    assert_eq!(settings.ice_gather_timeout_ms, 10_000);
    assert_eq!(settings.confirmation, ConfirmationMode::TypedPhrase);
}

#[test]
fn blank_operator_is_treated_as_anonymous() {
    let settings = ClientSettings {
        operator: Some("   ".into()),
        ..ClientSettings::default()
    };
    assert_eq!(settings.operator_identity(), None);
}
