use super::*;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Holder {
    #[serde(default, deserialize_with = "optional")]
    at: Option<ConfigTime>,
}

fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

#[test]
fn test_parse_rfc3339_with_offset() {
    let parsed = ConfigTime::parse("2024-03-01T12:00:00+02:00").unwrap();
    assert_eq!(parsed.0, utc("2024-03-01T10:00:00Z"));
}

#[test]
fn test_parse_naive_forms_as_local_time() {
    let expected = Local
        .with_ymd_and_hms(2024, 3, 1, 8, 30, 0)
        .earliest()
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(ConfigTime::parse("2024-03-01 08:30:00").unwrap().0, expected);
    assert_eq!(ConfigTime::parse("2024-03-01T08:30:00").unwrap().0, expected);

    let midnight = Local
        .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
        .earliest()
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(ConfigTime::parse("2024-03-01").unwrap().0, midnight);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(ConfigTime::parse("next tuesday").is_none());
    assert!(ConfigTime::parse("").is_none());
}

#[test]
fn test_display_is_utc_millis() {
    let time = ConfigTime(utc("2024-03-01T10:00:00.5Z"));
    assert_eq!(time.to_string(), "2024-03-01T10:00:00.500Z");
    assert_eq!(
        serde_json::to_value(time).unwrap(),
        json!("2024-03-01T10:00:00.500Z")
    );
}

#[test]
fn test_optional_accepts_every_stored_shape() {
    let cases = [
        (json!({}), None),
        (json!({ "at": null }), None),
        (json!({ "at": "" }), None),
        (json!({ "at": "  " }), None),
        (
            json!({ "at": "2024-03-01T10:00:00.000Z" }),
            Some(utc("2024-03-01T10:00:00Z")),
        ),
        (json!({ "at": 1709287200000i64 }), Some(utc("2024-03-01T10:00:00Z"))),
        (json!({ "at": 1709287200000.0 }), Some(utc("2024-03-01T10:00:00Z"))),
    ];
    for (raw, expected) in cases {
        let holder: Holder = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(holder.at.map(|time| time.0), expected, "input: {}", raw);
    }
}

#[test]
fn test_optional_rejects_unrecognized_text() {
    let result: Result<Holder, _> = serde_json::from_value(json!({ "at": "soon" }));
    assert!(result.is_err());
}

#[test]
fn test_written_form_reads_back_unchanged() {
    let original = ConfigTime(utc("2023-12-31T23:59:59.123Z"));
    let text = serde_json::to_string(&original).unwrap();
    let read: ConfigTime = serde_json::from_str(&text).unwrap();
    assert_eq!(read, original);
}
