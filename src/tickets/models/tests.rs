use super::*;

#[test]
fn status_round_trips_through_display_and_parse() {
    let statuses = [
        TicketStatus::Open,
        TicketStatus::Categorizing,
        TicketStatus::Categorized,
        TicketStatus::Resolving,
        TicketStatus::Resolved,
        TicketStatus::Failed,
        TicketStatus::Closed,
    ];

    for status in statuses {
        let parsed: TicketStatus = status.to_string().parse().expect("should parse");
        assert_eq!(parsed, status);
    }

    assert!("bogus".parse::<TicketStatus>().is_err());
}

#[test]
fn transitions_follow_the_chain() {
    assert!(TicketStatus::Open.can_transition_to(TicketStatus::Categorizing));
    assert!(TicketStatus::Categorizing.can_transition_to(TicketStatus::Categorized));
    assert!(TicketStatus::Categorized.can_transition_to(TicketStatus::Resolving));
    assert!(TicketStatus::Resolving.can_transition_to(TicketStatus::Resolved));
    assert!(TicketStatus::Resolved.can_transition_to(TicketStatus::Closed));

    // No skipping or moving backwards along the chain.
    assert!(!TicketStatus::Open.can_transition_to(TicketStatus::Categorized));
    assert!(!TicketStatus::Open.can_transition_to(TicketStatus::Resolved));
    assert!(!TicketStatus::Resolved.can_transition_to(TicketStatus::Open));
    assert!(!TicketStatus::Categorized.can_transition_to(TicketStatus::Open));
    assert!(!TicketStatus::Closed.can_transition_to(TicketStatus::Resolved));
}

#[test]
fn failed_is_reachable_from_in_flight_states_only() {
    assert!(TicketStatus::Categorizing.can_transition_to(TicketStatus::Failed));
    assert!(TicketStatus::Resolving.can_transition_to(TicketStatus::Failed));

    assert!(!TicketStatus::Open.can_transition_to(TicketStatus::Failed));
    assert!(!TicketStatus::Resolved.can_transition_to(TicketStatus::Failed));
    assert!(!TicketStatus::Closed.can_transition_to(TicketStatus::Failed));
}

#[test]
fn failed_retries_into_rollback_targets() {
    assert!(TicketStatus::Failed.can_transition_to(TicketStatus::Open));
    assert!(TicketStatus::Failed.can_transition_to(TicketStatus::Categorized));
    assert!(!TicketStatus::Failed.can_transition_to(TicketStatus::Resolved));
    assert!(!TicketStatus::Failed.can_transition_to(TicketStatus::Closed));
}

#[test]
fn rollback_target_depends_on_category() {
    let mut ticket = Ticket::new("T1".to_string(), "screen is cracked".to_string());
    assert_eq!(ticket.rollback_target(), TicketStatus::Open);

    ticket.category = Some("hardware".to_string());
    assert_eq!(ticket.rollback_target(), TicketStatus::Categorized);
}

#[test]
fn settled_states_are_skipped() {
    assert!(TicketStatus::Resolved.is_settled());
    assert!(TicketStatus::Closed.is_settled());
    assert!(!TicketStatus::Open.is_settled());
    assert!(!TicketStatus::Failed.is_settled());
}

#[test]
fn raw_row_validates_into_ticket() {
    let row = RawTicketRow {
        ticket_id: Some("T1".to_string()),
        content: Some("screen is cracked".to_string()),
        category: Some("hardware".to_string()),
        status: Some("categorized".to_string()),
        timestamp: Some("2026-08-01T10:00:00Z".to_string()),
        reporter: Some("alice".to_string()),
        ..RawTicketRow::default()
    };

    let ticket = row.validate().expect("should validate");
    assert_eq!(ticket.ticket_id, "T1");
    assert_eq!(ticket.status, TicketStatus::Categorized);
    assert_eq!(ticket.category.as_deref(), Some("hardware"));
    assert_eq!(ticket.reporter.as_deref(), Some("alice"));
    assert_eq!(ticket.retry_count, 0);
}

#[test]
fn missing_required_fields_fail_fast() {
    let row = RawTicketRow {
        content: Some("no id".to_string()),
        ..RawTicketRow::default()
    };
    assert!(matches!(
        row.validate(),
        Err(TicketRowError::MissingField("ticket_id"))
    ));

    let row = RawTicketRow {
        ticket_id: Some("T1".to_string()),
        content: Some("   ".to_string()),
        ..RawTicketRow::default()
    };
    assert!(matches!(
        row.validate(),
        Err(TicketRowError::EmptyField("content"))
    ));
}

#[test]
fn bad_status_and_timestamp_fail_fast() {
    let row = RawTicketRow {
        ticket_id: Some("T1".to_string()),
        content: Some("content".to_string()),
        status: Some("half-done".to_string()),
        ..RawTicketRow::default()
    };
    assert!(matches!(
        row.validate(),
        Err(TicketRowError::UnknownStatus(_))
    ));

    let row = RawTicketRow {
        ticket_id: Some("T1".to_string()),
        content: Some("content".to_string()),
        timestamp: Some("last tuesday".to_string()),
        ..RawTicketRow::default()
    };
    assert!(matches!(
        row.validate(),
        Err(TicketRowError::InvalidTimestamp("timestamp", _))
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    let json = r#"{"ticket_id": "T1", "content": "hi", "surprise": true}"#;
    assert!(serde_json::from_str::<RawTicketRow>(json).is_err());
}

#[test]
fn blank_status_defaults_to_open() {
    let row = RawTicketRow {
        ticket_id: Some("T1".to_string()),
        content: Some("content".to_string()),
        status: Some(String::new()),
        ..RawTicketRow::default()
    };
    assert_eq!(
        row.validate().expect("should validate").status,
        TicketStatus::Open
    );
}

#[test]
fn ticket_row_round_trip() {
    let mut ticket = Ticket::new("T7".to_string(), "billing question".to_string());
    ticket.category = Some("billing".to_string());
    ticket.status = TicketStatus::Resolved;
    ticket.resolution_text = Some("refunded".to_string());
    ticket.low_confidence = true;

    let row = RawTicketRow::from(&ticket);
    let back = row.validate().expect("should validate");

    assert_eq!(back.ticket_id, ticket.ticket_id);
    assert_eq!(back.status, ticket.status);
    assert_eq!(back.resolution_text, ticket.resolution_text);
    assert!(back.low_confidence);
}
