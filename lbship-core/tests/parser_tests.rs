use lbship_core::error::RecordError;
use lbship_core::parser::{FIELD_DELIMITER, parse_line};

// =============================================================================
// Helpers
// =============================================================================

fn join(fields: &[&str]) -> String {
    fields.join(FIELD_DELIMITER)
}

// =============================================================================
// Well-formed lines
// =============================================================================

#[test]
fn test_every_field_maps_to_its_record_field() {
    let line = join(&[
        "203.0.113.9",
        "POST",
        "api.example.org",
        "/v1/orders?id=7",
        "201",
        "1048576",
        "https://example.org/cart",
        "Mozilla/5.0 (X11; Linux x86_64)",
        "bigip-02",
        "/Common/pool_api",
        "/Common/vs_api_443",
    ]);
    let rec = parse_line(&line).unwrap();

    assert_eq!(rec.client, "203.0.113.9");
    assert_eq!(rec.method, "POST");
    assert_eq!(rec.host, "api.example.org");
    assert_eq!(rec.uri, "/v1/orders?id=7");
    assert_eq!(rec.status, 201);
    assert_eq!(rec.content_length, 1_048_576);
    assert_eq!(rec.referer, "https://example.org/cart");
    assert_eq!(rec.user_agent, "Mozilla/5.0 (X11; Linux x86_64)");
    assert_eq!(rec.node, "bigip-02");
    assert_eq!(rec.pool, "pool_api");
    assert_eq!(rec.virtual_server, "vs_api_443");
}

#[test]
fn test_every_status_in_range_is_accepted() {
    for status in 100..=511 {
        let s = status.to_string();
        let line = join(&["c", "GET", "h", "/", &s, "0", "-", "ua", "n", "p", "v"]);
        let rec = parse_line(&line).unwrap_or_else(|e| panic!("status {status}: {e}"));
        assert_eq!(rec.status, status);
    }
}

#[test]
fn test_fields_may_contain_single_pipes() {
    let line = join(&["c", "GET", "h", "/a|b", "200", "0", "-", "ua|x", "n", "p", "v"]);
    let rec = parse_line(&line).unwrap();
    assert_eq!(rec.uri, "/a|b");
    assert_eq!(rec.user_agent, "ua|x");
}

#[test]
fn test_end_to_end_example_line() {
    let rec = parse_line(
        "10.0.0.5 || GET || example.com || /a || 200 || 512 || - || curl/7 || node1 || /pools/web || /virtuals/app",
    )
    .unwrap();
    assert_eq!(rec.client, "10.0.0.5");
    assert_eq!(rec.status, 200);
    assert_eq!(rec.content_length, 512);
    assert_eq!(rec.pool, "web");
    assert_eq!(rec.virtual_server, "app");
}

// =============================================================================
// Rejected lines
// =============================================================================

#[test]
fn test_any_field_count_other_than_eleven_is_malformed() {
    for count in (0..20).filter(|c| *c != 11) {
        let fields: Vec<&str> = std::iter::repeat("200").take(count).collect();
        let line = join(&fields);
        match parse_line(&line) {
            Err(RecordError::Malformed { fields, .. }) => {
                // An empty line still splits into one (empty) field.
                assert_eq!(fields, count.max(1));
            }
            other => panic!("{count} fields: expected Malformed, got {other:?}"),
        }
    }
}

#[test]
fn test_malformed_error_keeps_raw_line() {
    let err = parse_line("garbage").unwrap_err();
    assert!(err.to_string().contains("garbage"));
}

#[test]
fn test_rejected_statuses_are_distinct_from_malformed() {
    for status in ["0", "99", "512", "-1", "abc", "200.5", " 200"] {
        let line = join(&["c", "GET", "h", "/", status, "0", "-", "ua", "n", "p", "v"]);
        let err = parse_line(&line).unwrap_err();
        assert!(
            matches!(err, RecordError::RejectedStatus { .. }),
            "status {status:?}: {err:?}"
        );
    }
}
