use super::*;

#[tokio::test]
async fn hub_fans_out_to_every_subscriber() {
    let hub = NotificationHub::new();
    let mut first = hub.subscribe();
    let mut second = hub.subscribe();

    hub.notify(Notification::new(Severity::Success, "USV-001 armed"));

    for rx in [&mut first, &mut second] {
        let received = rx.recv().await.expect("notification");
        assert_eq!(received.severity, Severity::Success);
        assert_eq!(received.message, "USV-001 armed");
    }
}

#[test]
fn notifying_without_listeners_is_harmless() {
    let hub = NotificationHub::default();
    hub.notify(Notification::new(Severity::Warning, "nobody is watching"));

    let mut late = hub.subscribe();
    assert!(late.try_recv().is_err());
}

#[test]
fn severity_labels_are_lowercase() {
    let labels: Vec<String> = [Severity::Info, Severity::Success, Severity::Warning, Severity::Error]
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(labels, ["info", "success", "warning", "error"]);
}
