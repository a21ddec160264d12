use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Timestamp layout stamped on every document (`2024-05-01T12:00:00Z`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One enriched load-balancer access record, as written to the document store.
///
/// `status` and `content-length` go out as JSON strings so documents keep
/// matching index templates that map them as keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub client: String,
    pub method: String,
    pub host: String,
    pub uri: String,
    #[serde(serialize_with = "int_as_string", deserialize_with = "int_from_string")]
    pub status: i64,
    #[serde(
        rename = "content-length",
        serialize_with = "int_as_string",
        deserialize_with = "int_from_string"
    )]
    pub content_length: i64,
    pub referer: String,
    #[serde(rename = "user-agent")]
    pub user_agent: String,
    pub node: String,
    pub pool: String,
    #[serde(rename = "virtual")]
    pub virtual_server: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub timestamp: String,
}

impl AccessRecord {
    /// Stamp the record with the given enrichment time.
    pub fn stamp(&mut self, at: DateTime<Utc>) {
        self.timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    }

    /// Serialise to a compact JSON line.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Format a coordinate pair the way the `location` field expects it.
pub fn format_location(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.6},{longitude:.6}")
}

fn int_as_string<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

fn int_from_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrInt {
        Str(String),
        Int(i64),
    }

    match StrOrInt::deserialize(deserializer)? {
        StrOrInt::Int(n) => Ok(n),
        StrOrInt::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> AccessRecord {
        AccessRecord {
            client: "10.0.0.5".into(),
            method: "GET".into(),
            host: "example.com".into(),
            uri: "/a".into(),
            status: 200,
            content_length: 512,
            referer: "-".into(),
            user_agent: "curl/7".into(),
            node: "node1".into(),
            pool: "web".into(),
            virtual_server: "app".into(),
            ..Default::default()
        }
    }

    #[test]
    fn serialises_with_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["content-length"], "512");
        assert_eq!(json["user-agent"], "curl/7");
        assert_eq!(json["virtual"], "app");
        assert_eq!(json["status"], "200");
        assert!(json.get("content_length").is_none());
        assert!(json.get("virtual_server").is_none());
    }

    #[test]
    fn deserialises_numeric_or_string_status() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["status"] = serde_json::json!(404);
        let rec: AccessRecord = serde_json::from_value(json).unwrap();
        assert_eq!(rec.status, 404);
        assert_eq!(rec.content_length, 512);
    }

    #[test]
    fn stamp_uses_utc_second_precision() {
        let mut rec = sample();
        rec.stamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap());
        assert_eq!(rec.timestamp, "2024-05-01T12:30:45Z");
    }

    #[test]
    fn location_has_six_decimals() {
        assert_eq!(format_location(52.5, 13.4), "52.500000,13.400000");
        assert_eq!(format_location(-33.8688, 151.2093), "-33.868800,151.209300");
    }

    #[test]
    fn to_json_line_is_single_line() {
        let line = sample().to_json_line();
        assert!(!line.contains('\n'));
        let back: AccessRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, sample());
    }
}
