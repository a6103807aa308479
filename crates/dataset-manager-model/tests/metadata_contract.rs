use dataset_manager_model::{
    encode, ContentDigest, DatasetMetadata, DatasetName, DatasetRecord, RECORD_FIELDS,
};

// Shape written by the ingest pipeline (json.dump with indent=2).
const INGEST_META_JSON: &str = r#"{
  "symbol": "ETHUSDT",
  "timeframe": "1h",
  "candles": 3,
  "start_ts": 1700000000,
  "end_ts": 1700007200,
  "hash": "sha256:HASH",
  "encoding": "u64,f32,f32,f32,f32,f32",
  "bytes_per_record": 28,
  "endianness": "little",
  "fields": ["timestamp", "open", "high", "low", "close", "volume"]
}"#;

fn ingest_records() -> Vec<DatasetRecord> {
    vec![
        DatasetRecord {
            timestamp: 1_700_000_000,
            open: 2050.5,
            high: 2060.0,
            low: 2040.25,
            close: 2055.0,
            volume: 812.75,
        },
        DatasetRecord {
            timestamp: 1_700_003_600,
            open: 2055.0,
            high: 2071.5,
            low: 2049.0,
            close: 2068.0,
            volume: 640.0,
        },
        DatasetRecord {
            timestamp: 1_700_007_200,
            open: 2068.0,
            high: 2070.0,
            low: 2031.0,
            close: 2033.5,
            volume: 1024.5,
        },
    ]
}

#[test]
fn ingest_document_parses_and_matches_describe() {
    let records = ingest_records();
    let hex = ContentDigest::of_bytes(&encode(&records)).hex().to_string();
    let json = INGEST_META_JSON.replace("HASH", &hex);

    let parsed = DatasetMetadata::from_json_slice(json.as_bytes()).expect("parse ingest meta");
    let described = DatasetMetadata::describe("ETHUSDT", "1h", &records).expect("describe");
    assert_eq!(parsed, described);
    assert_eq!(parsed.fields, RECORD_FIELDS.map(String::from).to_vec());
    assert!(parsed.describes(&DatasetName::parse("ETHUSDT-1h").expect("name")));
    assert!(!parsed.describes(&DatasetName::parse("BTCUSDT-1h").expect("name")));
}

#[test]
fn serialized_field_order_is_stable() {
    let described = DatasetMetadata::describe("ETHUSDT", "1h", &ingest_records()).expect("describe");
    let text = serde_json::to_string(&described).expect("json");
    let symbol_at = text.find("\"symbol\"").expect("symbol");
    let hash_at = text.find("\"hash\"").expect("hash");
    let fields_at = text.find("\"fields\"").expect("fields");
    assert!(symbol_at < hash_at && hash_at < fields_at);
}
