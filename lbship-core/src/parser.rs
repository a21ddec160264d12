//! Access-log line parser.
//!
//! The load balancer emits one line per request with eleven fields joined by
//! [`FIELD_DELIMITER`]:
//!
//! ```text
//! client || method || host || uri || status || content-length || referer || user-agent || node || pool-path || virtual-path
//! ```
//!
//! ```
//! use lbship_core::parser::parse_line;
//!
//! let rec = parse_line(
//!     "10.0.0.5 || GET || example.com || /a || 200 || 512 || - || curl/7 || node1 || /pools/web || /virtuals/app",
//! ).unwrap();
//! assert_eq!(rec.pool, "web");
//! assert_eq!(rec.virtual_server, "app");
//! ```

use crate::error::RecordError;
use crate::record::AccessRecord;

pub const FIELD_DELIMITER: &str = " || ";

/// Number of fields every access-log line carries.
pub const FIELD_COUNT: usize = 11;

/// Inclusive range of status codes accepted for indexing.
pub const STATUS_MIN: i64 = 100;
pub const STATUS_MAX: i64 = 511;

/// Parse one raw line into an un-enriched [`AccessRecord`].
///
/// Geo fields and the timestamp are left empty; the enrichment stage fills
/// them in.
pub fn parse_line(line: &str) -> Result<AccessRecord, RecordError> {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if parts.len() != FIELD_COUNT {
        return Err(RecordError::Malformed {
            fields: parts.len(),
            line: line.to_string(),
        });
    }

    // Non-numeric status is treated as 0 and falls out of range below.
    let status = parts[4].parse::<i64>().unwrap_or(0);
    if !(STATUS_MIN..=STATUS_MAX).contains(&status) {
        return Err(RecordError::RejectedStatus {
            status,
            host: parts[2].to_string(),
            uri: parts[3].to_string(),
        });
    }

    Ok(AccessRecord {
        client: parts[0].to_string(),
        method: parts[1].to_string(),
        host: parts[2].to_string(),
        uri: parts[3].to_string(),
        status,
        content_length: parts[5].parse().unwrap_or(0),
        referer: parts[6].to_string(),
        user_agent: parts[7].to_string(),
        node: parts[8].to_string(),
        pool: basename(parts[9]),
        virtual_server: basename(parts[10]),
        ..Default::default()
    })
}

/// Last element of a slash-separated path.
///
/// Trailing slashes are ignored. An empty path yields `"."` and a path made
/// only of slashes yields `"/"`.
pub fn basename(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with_status(status: &str) -> String {
        format!(
            "1.2.3.4 || GET || h || /u || {status} || 10 || - || ua || n || /p/pool || /v/vs"
        )
    }

    #[test]
    fn basename_takes_last_segment() {
        assert_eq!(basename("/Common/pool_web"), "pool_web");
        assert_eq!(basename("pool_web"), "pool_web");
        assert_eq!(basename("/a/b/c/"), "c");
        assert_eq!(basename("/a/b//"), "b");
    }

    #[test]
    fn basename_edge_cases() {
        assert_eq!(basename(""), ".");
        assert_eq!(basename("/"), "/");
        assert_eq!(basename("///"), "/");
    }

    #[test]
    fn boundary_statuses_are_accepted() {
        assert_eq!(parse_line(&line_with_status("100")).unwrap().status, 100);
        assert_eq!(parse_line(&line_with_status("511")).unwrap().status, 511);
    }

    #[test]
    fn out_of_range_statuses_are_rejected() {
        for s in ["0", "99", "512", "-1", "abc", ""] {
            let err = parse_line(&line_with_status(s)).unwrap_err();
            assert!(
                matches!(err, RecordError::RejectedStatus { .. }),
                "status {s:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn rejected_status_carries_host_and_uri() {
        let err = parse_line(&line_with_status("999")).unwrap_err();
        assert_eq!(
            err,
            RecordError::RejectedStatus {
                status: 999,
                host: "h".into(),
                uri: "/u".into()
            }
        );
        assert!(!err.is_malformed());
    }

    #[test]
    fn bad_content_length_defaults_to_zero() {
        let line = "1.2.3.4 || GET || h || /u || 200 || n/a || - || ua || n || p || v";
        assert_eq!(parse_line(line).unwrap().content_length, 0);
    }

    #[test]
    fn too_few_or_too_many_fields_are_malformed() {
        let short = "1.2.3.4 || GET || h";
        let err = parse_line(short).unwrap_err();
        assert_eq!(
            err,
            RecordError::Malformed {
                fields: 3,
                line: short.into()
            }
        );

        let long = format!("{} || extra", line_with_status("200"));
        assert!(parse_line(&long).unwrap_err().is_malformed());
    }

    #[test]
    fn delimiter_requires_surrounding_spaces() {
        let line = "1.2.3.4||GET||h||/u||200||10||-||ua||n||p||v";
        assert!(parse_line(line).unwrap_err().is_malformed());
    }

    #[test]
    fn geo_fields_and_timestamp_start_empty() {
        let rec = parse_line(&line_with_status("200")).unwrap();
        assert!(rec.city.is_empty());
        assert!(rec.country.is_empty());
        assert!(rec.location.is_empty());
        assert!(rec.timestamp.is_empty());
    }
}
