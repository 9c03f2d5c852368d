use super::*;

fn lines_from(input: &'static str) -> Lines<BufReader<&'static [u8]>> {
    BufReader::new(input.as_bytes()).lines()
}

#[tokio::test]
async fn typed_phrase_is_passed_through_verbatim() {
    let mut input = lines_from("ARM USV-001\n");

    let ack = read_acknowledgment(&ConfirmationPolicy::TypedPhrase, "ARM USV-001", &mut input)
        .await
        .expect("read");

    assert_eq!(ack, Some(Acknowledgment::TypedPhrase("ARM USV-001".into())));
}

#[tokio::test]
async fn empty_line_or_end_of_input_cancels() {
    let mut blank = lines_from("   \n");
    let mut closed = lines_from("");

    for input in [&mut blank, &mut closed] {
        let ack = read_acknowledgment(&ConfirmationPolicy::TypedPhrase, "ARM USV-001", input)
            .await
            .expect("read");
        assert_eq!(ack, None);
    }
}

#[tokio::test]
async fn hold_is_measured_between_two_enter_presses() {
    let policy = ConfirmationPolicy::HoldToConfirm {
        min_hold: Duration::from_millis(1500),
    };

    let mut both = lines_from("\n\n");
    let ack = read_acknowledgment(&policy, "DISARM USV-001", &mut both)
        .await
        .expect("read");
    assert!(matches!(ack, Some(Acknowledgment::Held(held)) if held < Duration::from_millis(1500)));

    let mut only_start = lines_from("\n");
    let ack = read_acknowledgment(&policy, "DISARM USV-001", &mut only_start)
        .await
        .expect("read");
    assert_eq!(ack, None);
}

#[test]
fn hold_prompt_explains_what_is_timed() {
    let prompt = hold_prompt("DISARM USV-001", Duration::from_millis(1500));

    assert!(prompt.starts_with("DISARM USV-001:"));
    assert!(prompt.contains("at least 1500ms"));
    assert!(prompt.contains("time between the two presses"));
}
