use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Confidence of the link between a lead and the visitor that submitted the form.
pub const DIRECT_LINK_CONFIDENCE: f64 = 1.0;

/// Confidence of a same-IP/UA heuristic link. Kept low so it never outranks
/// a direct `form_submit` link.
pub const HEURISTIC_LINK_CONFIDENCE: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    FormSubmit,
    SameIpUaWindow,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormSubmit => "form_submit",
            Self::SameIpUaWindow => "same_ip_ua_window",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "form_submit" => Some(Self::FormSubmit),
            "same_ip_ua_window" => Some(Self::SameIpUaWindow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Granted,
    Denied,
    #[default]
    Unknown,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "granted" => Self::Granted,
            "denied" => Self::Denied,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub tenant_id: String,
    pub email_normalized: String,
    pub first_captured_at: DateTime<Utc>,
    pub last_captured_at: DateTime<Utc>,
    pub consent_status: ConsentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadIdentity {
    pub lead_id: String,
    pub visitor_id: String,
    pub link_source: LinkSource,
    pub confidence: f64,
    pub linked_at: DateTime<Utc>,
}

/// What a single link upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Inserted,
    Upgraded,
    Unchanged,
}

/// A validated lead-capture body for `/v1/leads/capture`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCaptureRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub property_id: Option<String>,
    pub email: String,
    pub visitor_id: String,
    #[serde(default)]
    pub consent_status: Option<ConsentStatus>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CapturedLead {
    pub lead: Lead,
    pub created: bool,
    pub direct_link: LinkOutcome,
    /// Candidate visitors processed by the heuristic fan-out.
    pub heuristic_candidates: usize,
}

/// Applies consent bookkeeping after a lead capture. Implemented outside
/// this crate; invoked once the capture has been written.
#[async_trait]
pub trait ConsentApplier: Send + Sync {
    async fn apply_consent(&self, lead: &Lead, consent: ConsentStatus) -> anyhow::Result<()>;
}

/// Consent applier that does nothing, for deployments without consent audit.
pub struct NullConsentApplier;

#[async_trait]
impl ConsentApplier for NullConsentApplier {
    async fn apply_consent(&self, _lead: &Lead, _consent: ConsentStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Confidence on a (lead, visitor) pair never decreases: an incoming link
/// replaces the stored one only when strictly more confident.
pub fn should_upgrade(existing_confidence: f64, incoming_confidence: f64) -> bool {
    incoming_confidence > existing_confidence
}

pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

pub fn normalize_email(raw: &str) -> Result<String, CoreError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(CoreError::InvalidLead(format!("invalid email: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_confidence_is_not_an_upgrade() {
        assert!(!should_upgrade(0.9, 0.9));
        assert!(!should_upgrade(0.9, 0.5));
        assert!(should_upgrade(0.9, 0.95));
    }

    #[test]
    fn heuristic_confidence_stays_below_direct() {
        assert!(!should_upgrade(DIRECT_LINK_CONFIDENCE, HEURISTIC_LINK_CONFIDENCE));
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(1.5), 1.0);
        assert_eq!(clamp_confidence(-0.1), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM ").expect("email"),
            "jane.doe@example.com"
        );
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
    }

    #[test]
    fn link_source_wire_names() {
        assert_eq!(LinkSource::parse("same_ip_ua_window"), Some(LinkSource::SameIpUaWindow));
        assert_eq!(LinkSource::FormSubmit.as_str(), "form_submit");
        assert_eq!(LinkSource::parse("other"), None);
    }
}
