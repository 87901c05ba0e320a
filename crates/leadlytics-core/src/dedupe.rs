use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::event::{EventBody, EventType, RequestContext, TrafficHints, Utm};

const DEDUPE_KEY_VERSION: &str = "v1";

/// Server-assigned timestamps fall into 30-second buckets so a client retry
/// of the same logical event lands on the same key.
pub const DEDUPE_BUCKET_MS: i64 = 30_000;

/// Inputs hashed into a dedupe key.
#[derive(Debug, Clone)]
pub struct DedupeInput<'a> {
    pub anon_id: &'a str,
    pub session_id: &'a str,
    pub event_type: EventType,
    pub path: &'a str,
    /// Timestamp the client sent, if any.
    pub explicit_occurred_at: Option<DateTime<Utc>>,
    /// The effective timestamp (explicit or server-assigned).
    pub occurred_at: DateTime<Utc>,
    pub referrer: Option<&'a str>,
    pub ip_hash: &'a str,
    pub ua_hash: &'a str,
    pub utm: Option<&'a Utm>,
    pub traffic: Option<&'a TrafficHints>,
    pub props: Option<&'a serde_json::Map<String, Value>>,
}

impl<'a> DedupeInput<'a> {
    pub fn from_body(
        body: &'a EventBody,
        session_id: &'a str,
        occurred_at: DateTime<Utc>,
        context: &'a RequestContext,
    ) -> Self {
        Self {
            anon_id: &body.anon_id,
            session_id,
            event_type: body.event_type,
            path: &body.path,
            explicit_occurred_at: body.occurred_at,
            occurred_at,
            referrer: body.referrer.as_deref(),
            ip_hash: &context.ip_hash,
            ua_hash: &context.ua_hash,
            utm: body.utm.as_ref(),
            traffic: body.traffic.as_ref(),
            props: body.props.as_ref(),
        }
    }
}

/// The time component of a dedupe key: the explicit timestamp as ISO-8601,
/// or the 30-second bucket index of a server-assigned one.
pub fn time_bucket_token(
    explicit_occurred_at: Option<DateTime<Utc>>,
    occurred_at: DateTime<Utc>,
) -> String {
    match explicit_occurred_at {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => occurred_at
            .timestamp_millis()
            .div_euclid(DEDUPE_BUCKET_MS)
            .to_string(),
    }
}

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn canonical_of<T: Serialize>(value: Option<&T>) -> Result<String, CoreError> {
    match value {
        Some(v) => Ok(canonical_json(&serde_json::to_value(v)?)),
        None => Ok(canonical_json(&Value::Object(Default::default()))),
    }
}

/// Compute the dedupe key: hex SHA-256 over the version tag, identity,
/// event shape, time bucket, request context and canonical UTM / traffic /
/// props JSON.
pub fn compute_dedupe_key(input: &DedupeInput<'_>) -> Result<String, CoreError> {
    let parts = [
        DEDUPE_KEY_VERSION.to_string(),
        input.anon_id.to_string(),
        input.session_id.to_string(),
        input.event_type.as_str().to_string(),
        input.path.to_string(),
        time_bucket_token(input.explicit_occurred_at, input.occurred_at),
        input.referrer.unwrap_or_default().to_string(),
        input.ip_hash.to_string(),
        input.ua_hash.to_string(),
        canonical_of(input.utm)?,
        canonical_of(input.traffic)?,
        canonical_of(input.props)?,
    ];
    // A JSON array keeps field boundaries unambiguous.
    let material = serde_json::to_string(&parts)?;
    Ok(hex::encode(Sha256::digest(material.as_bytes())))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid ts")
    }

    struct Fixture {
        utm: Utm,
        props: serde_json::Map<String, Value>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                utm: Utm {
                    source: Some("newsletter".into()),
                    medium: Some("email".into()),
                    ..Default::default()
                },
                props: json!({ "plan": "pro", "seats": 3 })
                    .as_object()
                    .cloned()
                    .expect("object"),
            }
        }

        fn input(&self) -> DedupeInput<'_> {
            DedupeInput {
                anon_id: "anon-1",
                session_id: "sess-1",
                event_type: EventType::PageView,
                path: "/pricing",
                explicit_occurred_at: None,
                occurred_at: ts(1_768_003_200),
                referrer: Some("https://google.com"),
                ip_hash: "ip",
                ua_hash: "ua",
                utm: Some(&self.utm),
                traffic: None,
                props: Some(&self.props),
            }
        }
    }

    #[test]
    fn key_is_hex_sha256() {
        let f = Fixture::new();
        let key = compute_dedupe_key(&f.input()).expect("key");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn changing_event_type_path_utm_or_props_changes_key() {
        let f = Fixture::new();
        let base = compute_dedupe_key(&f.input()).expect("key");

        let mut input = f.input();
        input.event_type = EventType::FormStart;
        assert_ne!(compute_dedupe_key(&input).expect("key"), base);

        let mut input = f.input();
        input.path = "/signup";
        assert_ne!(compute_dedupe_key(&input).expect("key"), base);

        let other_utm = Utm {
            source: Some("newsletter".into()),
            medium: Some("social".into()),
            ..Default::default()
        };
        let mut input = f.input();
        input.utm = Some(&other_utm);
        assert_ne!(compute_dedupe_key(&input).expect("key"), base);

        let other_props = json!({ "plan": "team", "seats": 3 })
            .as_object()
            .cloned()
            .expect("object");
        let mut input = f.input();
        input.props = Some(&other_props);
        assert_ne!(compute_dedupe_key(&input).expect("key"), base);
    }

    #[test]
    fn prop_key_order_does_not_change_key() {
        let f = Fixture::new();
        let base = compute_dedupe_key(&f.input()).expect("key");

        let mut reordered = serde_json::Map::new();
        reordered.insert("seats".into(), json!(3));
        reordered.insert("plan".into(), json!("pro"));
        let mut input = f.input();
        input.props = Some(&reordered);
        assert_eq!(compute_dedupe_key(&input).expect("key"), base);
    }

    #[test]
    fn server_timestamps_share_a_thirty_second_bucket() {
        let f = Fixture::new();
        let mut a = f.input();
        a.occurred_at = ts(1_768_003_200);
        let mut b = f.input();
        b.occurred_at = ts(1_768_003_229);
        let mut c = f.input();
        c.occurred_at = ts(1_768_003_230);
        let key_a = compute_dedupe_key(&a).expect("key");
        assert_eq!(key_a, compute_dedupe_key(&b).expect("key"));
        assert_ne!(key_a, compute_dedupe_key(&c).expect("key"));
    }

    #[test]
    fn explicit_timestamps_are_distinct_within_a_bucket() {
        let f = Fixture::new();
        let mut a = f.input();
        a.explicit_occurred_at = Some(ts(1_768_003_200));
        let mut b = f.input();
        b.explicit_occurred_at = Some(ts(1_768_003_201));
        assert_ne!(
            compute_dedupe_key(&a).expect("key"),
            compute_dedupe_key(&b).expect("key")
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({ "b": [ { "z": 1, "a": 2 } ], "a": null });
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":[{"a":2,"z":1}]}"#);
    }
}
