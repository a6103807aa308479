use dataset_manager_api::{
    decode_frame, encode_frame, encode_request, parse_request, ControlResponse,
    DEFAULT_MAX_REQUEST_BYTES, FRAME_HEADER_LEN,
};
use dataset_manager_core::ErrorCode;
use dataset_manager_model::{DatasetMetadata, DatasetName, DatasetRecord};

fn metadata() -> DatasetMetadata {
    let records: Vec<DatasetRecord> = [1_700_000_000_u64, 1_700_003_600, 1_700_007_200]
        .into_iter()
        .map(|timestamp| DatasetRecord {
            timestamp,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        })
        .collect();
    DatasetMetadata::describe("ETHUSDT", "1h", &records).expect("metadata")
}

#[test]
fn ok_frame_is_length_prefixed_json_with_metadata() {
    let frame = encode_frame(&ControlResponse::Ready(metadata())).expect("frame");
    let mut header = [0_u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
    assert_eq!(u32::from_be_bytes(header) as usize, frame.len() - FRAME_HEADER_LEN);

    let body: serde_json::Value =
        serde_json::from_slice(&frame[FRAME_HEADER_LEN..]).expect("json body");
    assert_eq!(body["ok"], serde_json::json!(true));
    assert_eq!(body["metadata"]["candles"], serde_json::json!(3));
    assert!(body.get("error").is_none());

    match decode_frame(&frame).expect("decode") {
        ControlResponse::Ready(meta) => assert_eq!(meta, metadata()),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn error_frame_uses_wire_codes() {
    let frame = encode_frame(&ControlResponse::failed(
        ErrorCode::NotFound,
        "dataset not found: FAKE-9x",
    ))
    .expect("frame");
    let body: serde_json::Value =
        serde_json::from_slice(&frame[FRAME_HEADER_LEN..]).expect("json body");
    assert_eq!(body["ok"], serde_json::json!(false));
    assert_eq!(body["error"], serde_json::json!("not_found"));
    assert!(body.get("metadata").is_none());

    let internal = encode_frame(&ControlResponse::failed(ErrorCode::Internal, "disk full"))
        .expect("frame");
    let body: serde_json::Value =
        serde_json::from_slice(&internal[FRAME_HEADER_LEN..]).expect("json body");
    assert_eq!(body["error"], serde_json::json!("unavailable"));
}

#[test]
fn inconsistent_documents_are_protocol_errors() {
    for raw in [
        r#"{"ok":true}"#,
        r#"{"ok":false}"#,
        r#"{"ok":false,"error":"teapot"}"#,
        r#"{"ok":true,"error":"not_found"}"#,
    ] {
        let mut frame = (raw.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(raw.as_bytes());
        let err = decode_frame(&frame).expect_err(raw);
        assert_eq!(err.code, ErrorCode::Protocol, "{raw}");
    }
}

#[test]
fn truncated_frames_are_rejected() {
    let frame = encode_frame(&ControlResponse::Ready(metadata())).expect("frame");
    assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
    assert!(decode_frame(&frame[..2]).is_err());
}

#[test]
fn encoded_request_parses_back() {
    let name = DatasetName::parse("BTCUSDT-4h").expect("name");
    let raw = encode_request(&name);
    assert_eq!(raw.last(), Some(&b'\n'));
    assert_eq!(
        parse_request(&raw, DEFAULT_MAX_REQUEST_BYTES).expect("parse"),
        name
    );
}
