use calremind_core::EventId;
use calremind_protocol::{Notification, decode_message, encode_message};
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

fn sample() -> Notification {
    Notification {
        event_id: EventId::from_uuid(Uuid::from_u128(0x1)),
        title: "Quarterly review".to_string(),
        start: Utc.with_ymd_and_hms(2025, 2, 5, 10, 0, 0).unwrap(),
        duration: Duration::minutes(30),
        user_name: "Ada".to_string(),
        user_email: "ada@example.com".to_string(),
    }
}

#[test]
fn notification_wire_format() {
    insta::assert_json_snapshot!(sample(), @r#"
    {
      "event_id": "00000000-0000-0000-0000-000000000001",
      "title": "Quarterly review",
      "start": "2025-02-05T10:00:00Z",
      "duration": 1800000000000,
      "user_name": "Ada",
      "user_email": "ada@example.com"
    }
    "#);
}

#[test]
fn decodes_message_from_other_publishers() {
    // Field order and fractional seconds differ from what we emit.
    let body = br#"{
        "user_email": "ada@example.com",
        "user_name": "Ada",
        "duration": 1800000000000,
        "start": "2025-02-05T11:00:00.000+01:00",
        "title": "Quarterly review",
        "event_id": "00000000-0000-0000-0000-000000000001"
    }"#;
    let decoded: Notification = decode_message(body).unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn encoded_body_decodes_back() {
    let bytes = encode_message(&sample()).unwrap();
    let decoded: Notification = decode_message(&bytes).unwrap();
    assert_eq!(decoded, sample());
}
