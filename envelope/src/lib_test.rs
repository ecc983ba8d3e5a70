use super::*;

fn decode_chat_str(json: &str) -> ChatMessage {
    match decode(json.as_bytes()).expect("decode") {
        Envelope::Chat(message) => message,
        other => panic!("expected chat frame, got {other:?}"),
    }
}

fn sample_message() -> ChatMessage {
    ChatMessage {
        id: "m-1".to_owned(),
        user: "Alice".to_owned(),
        text: Some("hello".to_owned()),
        email: "alice@example.com".to_owned(),
        image_profile: "/alice.png".to_owned(),
        image_message: String::new(),
        role: "user".to_owned(),
        timestamp: 1_700_000_000_000,
    }
}

// =============================================================
// Chat defaults
// =============================================================

#[test]
fn missing_optional_fields_get_defaults() {
    let before = now_ms();
    let msg = decode_chat_str(r#"{"text":"hi"}"#);
    let after = now_ms();

    assert_eq!(msg.text.as_deref(), Some("hi"));
    assert_eq!(msg.role, "guest");
    assert_eq!(msg.image_profile, DEFAULT_PROFILE_IMAGE);
    assert_eq!(msg.image_message, "");
    assert_eq!(msg.email, "");
    assert!(msg.timestamp >= before && msg.timestamp <= after);
    assert!(!msg.id.is_empty());
}

#[test]
fn placeholder_user_is_user_plus_number_below_one_thousand() {
    let msg = decode_chat_str(r#"{"text":"hi"}"#);
    let suffix = msg.user.strip_prefix("User").expect("User prefix");
    let n: u32 = suffix.parse().expect("numeric suffix");
    assert!(n < 1000);
}

#[test]
fn empty_strings_count_as_absent() {
    let msg = decode_chat_str(r#"{"id":"","user":"","text":"x","imageProfile":"","role":"","timestamp":0}"#);
    assert!(!msg.id.is_empty());
    assert!(msg.user.starts_with("User"));
    assert_eq!(msg.image_profile, DEFAULT_PROFILE_IMAGE);
    assert_eq!(msg.role, "guest");
    assert!(msg.timestamp > 0);
}

#[test]
fn present_fields_are_kept() {
    let msg = decode_chat_str(
        r#"{"id":"abc","user":"Bob","text":"yo","email":"b@x.io","imageProfile":"/b.png",
            "imageMessage":"https://img/1.png","role":"user","timestamp":1234}"#,
    );
    assert_eq!(msg.id, "abc");
    assert_eq!(msg.user, "Bob");
    assert_eq!(msg.email, "b@x.io");
    assert_eq!(msg.image_profile, "/b.png");
    assert_eq!(msg.image_message, "https://img/1.png");
    assert_eq!(msg.role, "user");
    assert_eq!(msg.timestamp, 1234);
}

#[test]
fn numeric_id_and_float_timestamp_are_accepted() {
    let msg = decode_chat_str(r#"{"id":1700000000000,"text":"a","timestamp":1700000000000.0}"#);
    assert_eq!(msg.id, "1700000000000");
    assert_eq!(msg.timestamp, 1_700_000_000_000);
}

#[test]
fn image_only_frame_is_accepted() {
    let msg = decode_chat_str(r#"{"imageMessage":"https://img/2.png"}"#);
    assert!(msg.text.is_none());
    assert_eq!(msg.image_message, "https://img/2.png");
}

#[test]
fn empty_payload_is_not_rejected() {
    let msg = decode_chat_str(r#"{"text":"","imageMessage":""}"#);
    assert_eq!(msg.text.as_deref(), Some(""));
    assert_eq!(msg.image_message, "");
}

#[test]
fn synthesized_ids_differ() {
    let a = decode_chat_str(r#"{"text":"a"}"#);
    let b = decode_chat_str(r#"{"text":"b"}"#);
    assert_ne!(a.id, b.id);
}

// =============================================================
// Control frames
// =============================================================

#[test]
fn sync_frame_decodes() {
    let env = decode(br#"{"type":"sync","since":42}"#).expect("decode");
    assert_eq!(env, Envelope::Sync(SyncRequest { since: 42 }));
}

#[test]
fn sync_without_since_is_rejected() {
    let err = decode(br#"{"type":"sync"}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::MissingSince));
}

#[test]
fn sync_with_string_since_is_rejected() {
    let err = decode(br#"{"type":"sync","since":"yesterday"}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::InvalidField("since")));
}

#[test]
fn error_frame_decodes() {
    let env = decode(br#"{"type":"error","code":"E_DECODE","message":"bad"}"#).expect("decode");
    let Envelope::Error(frame) = env else {
        panic!("expected error frame");
    };
    assert_eq!(frame.code, "E_DECODE");
    assert_eq!(frame.message, "bad");
    assert!(!frame.retryable);
}

#[test]
fn unknown_type_is_rejected() {
    let err = decode(br#"{"type":"typing","text":"x"}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::UnknownType(ref t) if t == "typing"));
}

// =============================================================
// Malformed input
// =============================================================

#[test]
fn invalid_json_is_rejected() {
    let err = decode(b"{not json").expect_err("should fail");
    assert!(matches!(err, DecodeError::InvalidJson(_)));
    assert_eq!(err.error_code(), "E_DECODE");
}

#[test]
fn non_object_is_rejected() {
    assert!(matches!(decode(b"[1,2]"), Err(DecodeError::NotAnObject)));
    assert!(matches!(decode(b"\"hi\""), Err(DecodeError::NotAnObject)));
}

#[test]
fn chat_without_payload_is_rejected() {
    let err = decode(br#"{"user":"Alice","email":"a@x.io"}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::MissingPayload));
}

#[test]
fn null_payload_counts_as_missing() {
    let err = decode(br#"{"text":null,"imageMessage":null}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::MissingPayload));
}

#[test]
fn wrongly_typed_optional_fields_take_defaults() {
    let env = decode(br#"{"text":"hi","user":42,"role":1,"email":true,"imageProfile":[],"id":{},"timestamp":"soon"}"#)
        .expect("decode");
    let Envelope::Chat(message) = env else {
        panic!("expected chat");
    };
    assert_eq!(message.text.as_deref(), Some("hi"));
    assert!(message.user.starts_with("User"));
    assert_eq!(message.role, DEFAULT_ROLE);
    assert_eq!(message.email, "");
    assert_eq!(message.image_profile, DEFAULT_PROFILE_IMAGE);
    assert!(!message.id.is_empty());
    assert!(message.timestamp > 0);
}

#[test]
fn non_string_payload_counts_as_missing() {
    let err = decode(br#"{"text":5,"imageMessage":false}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::MissingPayload));
}

#[test]
fn wrongly_typed_frame_type_is_rejected() {
    let err = decode(br#"{"type":7,"text":"hi"}"#).expect_err("should fail");
    assert!(matches!(err, DecodeError::InvalidField("type")));
}

// =============================================================
// Encoding
// =============================================================

#[test]
fn chat_encoding_uses_camel_case_keys() {
    let value: Value = serde_json::from_slice(&encode(&Envelope::Chat(sample_message()))).expect("json");
    assert_eq!(value["imageProfile"], "/alice.png");
    assert_eq!(value["imageMessage"], "");
    assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
    assert!(value.get("type").is_none());
    assert!(value.get("image_profile").is_none());
}

#[test]
fn chat_encoding_omits_absent_text() {
    let mut msg = sample_message();
    msg.text = None;
    msg.image_message = "https://img/3.png".to_owned();
    let value: Value = serde_json::from_str(&encode_text(&msg.into())).expect("json");
    assert!(value.get("text").is_none());
}

#[test]
fn encoded_chat_decodes_unchanged() {
    let original = sample_message();
    let env = decode(&encode(&original.clone().into())).expect("decode");
    assert_eq!(env, Envelope::Chat(original));
}

#[test]
fn sync_encoding_matches_wire_shape() {
    let text = encode_text(&SyncRequest { since: 99 }.into());
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, serde_json::json!({"type": "sync", "since": 99}));
}

#[test]
fn error_frame_from_typed_error() {
    let frame = ErrorFrame::from_error(&DecodeError::MissingPayload);
    assert_eq!(frame.code, "E_DECODE");
    assert_eq!(frame.message, "chat frame requires text or imageMessage");

    let value: Value = serde_json::from_str(&encode_text(&frame.into())).expect("json");
    assert_eq!(value["type"], "error");
    assert_eq!(value["code"], "E_DECODE");
    assert_eq!(value["retryable"], false);
}
