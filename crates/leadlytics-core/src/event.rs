use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classify::{DeviceType, TrafficSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    FormStart,
    FormSubmit,
    CtaClick,
    Engagement,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::FormStart => "form_start",
            Self::FormSubmit => "form_submit",
            Self::CtaClick => "cta_click",
            Self::Engagement => "engagement",
            Self::Custom => "custom",
        }
    }
}

/// UTM parameters as sent by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Utm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Client-side traffic hints: explicit classification overrides plus
/// Core Web Vitals and engagement samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_entrance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_exit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_conversion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcp_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lcp_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inp_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engaged_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<f64>,
}

impl TrafficHints {
    /// Vitals and engagement samples keyed the way they are stored in `props`.
    fn samples(&self) -> [(&'static str, Option<f64>); 7] {
        [
            ("ttfbMs", self.ttfb_ms),
            ("fcpMs", self.fcp_ms),
            ("lcpMs", self.lcp_ms),
            ("inpMs", self.inp_ms),
            ("cls", self.cls),
            ("engagedMs", self.engaged_ms),
            ("scrollDepth", self.scroll_depth),
        ]
    }
}

/// A validated event body for `/v1/events`. Schema validation happens
/// upstream; this is what the ingestor receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub tenant_id: String,
    #[serde(default)]
    pub property_id: Option<String>,
    pub anon_id: String,
    pub event_type: EventType,
    pub path: String,
    /// Client-supplied timestamp. `None` means the server assigns one.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub utm: Option<Utm>,
    #[serde(default)]
    pub traffic: Option<TrafficHints>,
    #[serde(default)]
    pub props: Option<Map<String, Value>>,
}

/// Per-request data hashed and sanitized by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub ip_hash: String,
    pub ua_hash: String,
    pub host: String,
    pub user_agent: String,
}

/// The enriched, stored version of an event. Mirrors the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub tenant_id: String,
    pub property_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub path: String,
    pub occurred_at: DateTime<Utc>,
    pub referrer: Option<String>,
    pub ip_hash: String,
    pub ua_hash: String,
    pub dedupe_key: String,
    /// JSON object string.
    pub props: String,
    pub traffic_source: TrafficSource,
    pub device_type: DeviceType,
    pub country_code: Option<String>,
    pub is_entrance: bool,
    pub is_exit: bool,
    pub is_conversion: bool,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
}

/// What the ingestor hands back: the canonical event identity, which may
/// belong to a row written by an earlier delivery of the same event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedEvent {
    pub event_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub dedupe_key: String,
    pub deduplicated: bool,
}

/// Derived flags written next to an event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFlags {
    pub is_entrance: bool,
    pub is_exit: bool,
    pub is_conversion: bool,
}

/// Explicit hint wins; otherwise entrance iff page view, conversion iff
/// form submit, exit false.
pub fn resolve_event_flags(event_type: EventType, hints: Option<&TrafficHints>) -> EventFlags {
    EventFlags {
        is_entrance: hints
            .and_then(|h| h.is_entrance)
            .unwrap_or(event_type == EventType::PageView),
        is_exit: hints.and_then(|h| h.is_exit).unwrap_or(false),
        is_conversion: hints
            .and_then(|h| h.is_conversion)
            .unwrap_or(event_type == EventType::FormSubmit),
    }
}

/// Merge vitals/engagement samples from the traffic block into `props`.
/// Samples overwrite same-named props.
pub fn merge_props(props: Option<&Map<String, Value>>, hints: Option<&TrafficHints>) -> Value {
    let mut merged = props.cloned().unwrap_or_default();
    if let Some(hints) = hints {
        for (key, sample) in hints.samples() {
            if let Some(number) = sample.and_then(serde_json::Number::from_f64) {
                merged.insert(key.to_string(), Value::Number(number));
            }
        }
    }
    Value::Object(merged)
}

pub fn normalize_country_code(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_view_defaults_to_entrance() {
        let flags = resolve_event_flags(EventType::PageView, None);
        assert!(flags.is_entrance);
        assert!(!flags.is_conversion);
        assert!(!flags.is_exit);
    }

    #[test]
    fn form_submit_defaults_to_conversion() {
        let flags = resolve_event_flags(EventType::FormSubmit, None);
        assert!(!flags.is_entrance);
        assert!(flags.is_conversion);
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let hints = TrafficHints {
            is_entrance: Some(false),
            is_exit: Some(true),
            ..Default::default()
        };
        let flags = resolve_event_flags(EventType::PageView, Some(&hints));
        assert!(!flags.is_entrance);
        assert!(flags.is_exit);
    }

    #[test]
    fn vitals_are_merged_into_props() {
        let props = json!({ "plan": "pro", "ttfbMs": 1 });
        let hints = TrafficHints {
            ttfb_ms: Some(120.0),
            lcp_ms: Some(900.5),
            ..Default::default()
        };
        let merged = merge_props(props.as_object(), Some(&hints));
        assert_eq!(merged["plan"], "pro");
        assert_eq!(merged["ttfbMs"], json!(120.0));
        assert_eq!(merged["lcpMs"], json!(900.5));
        assert!(merged.get("cls").is_none());
    }

    #[test]
    fn country_code_is_uppercased() {
        assert_eq!(normalize_country_code(Some(" pl ")).as_deref(), Some("PL"));
        assert_eq!(normalize_country_code(Some("")), None);
        assert_eq!(normalize_country_code(None), None);
    }

    #[test]
    fn event_type_wire_names() {
        let parsed: EventType = serde_json::from_value(json!("form_submit")).expect("parse");
        assert_eq!(parsed, EventType::FormSubmit);
        assert_eq!(EventType::PageView.as_str(), "page_view");
    }
}
