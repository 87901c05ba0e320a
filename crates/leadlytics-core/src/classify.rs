//! Traffic-source and device-type classification.
//!
//! Pure functions over raw event fields. No I/O, no state.

use serde::{Deserialize, Serialize};

use crate::event::Utm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficSource {
    Direct,
    Internal,
    OrganicSearch,
    Social,
    Referral,
    Paid,
    Email,
    Campaign,
}

impl TrafficSource {
    /// Every category, in the order dashboards list them.
    pub const ALL: [TrafficSource; 8] = [
        Self::Direct,
        Self::Internal,
        Self::OrganicSearch,
        Self::Social,
        Self::Referral,
        Self::Paid,
        Self::Email,
        Self::Campaign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Internal => "internal",
            Self::OrganicSearch => "organic_search",
            Self::Social => "social",
            Self::Referral => "referral",
            Self::Paid => "paid",
            Self::Email => "email",
            Self::Campaign => "campaign",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Bot => "bot",
        }
    }
}

const SEARCH_ENGINE_LABELS: &[&str] = &[
    "google",
    "bing",
    "yahoo",
    "duckduckgo",
    "baidu",
    "yandex",
    "ecosia",
    "startpage",
    "qwant",
];
const SEARCH_ENGINE_HOSTS: &[&str] = &["search.brave.com"];

const SOCIAL_LABELS: &[&str] = &[
    "facebook",
    "fb",
    "instagram",
    "linkedin",
    "lnkd",
    "twitter",
    "reddit",
    "pinterest",
    "tiktok",
    "youtube",
    "threads",
    "mastodon",
];
const SOCIAL_HOSTS: &[&str] = &["t.co", "x.com", "bsky.app"];

const PAID_MEDIUM_KEYWORDS: &[&str] = &["cpc", "ppc", "cpm", "paid", "display", "ads"];
const EMAIL_MEDIUM_KEYWORDS: &[&str] = &["email", "newsletter", "mail"];
const SOCIAL_MEDIUM_KEYWORDS: &[&str] = &["social"];
const ORGANIC_MEDIUM_KEYWORDS: &[&str] = &["organic", "seo"];

const BOT_UA_KEYWORDS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "headless",
    "lighthouse",
    "curl/",
    "wget/",
    "python-requests",
];
const TABLET_UA_KEYWORDS: &[&str] = &["ipad", "tablet", "kindle", "silk/", "playbook"];
const MOBILE_UA_KEYWORDS: &[&str] = &[
    "mobi",
    "iphone",
    "ipod",
    "android",
    "blackberry",
    "opera mini",
    "windows phone",
];

/// Normalize a host or URL: strip scheme, path, query, port and a leading
/// `www.`, then lower-case. Returns `None` when nothing host-like remains.
pub fn normalize_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    // Drop userinfo, then port.
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = host_port.split(':').next().unwrap_or_default();
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn host_matches(host: &str, labels: &[&str], hosts: &[&str]) -> bool {
    if hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    {
        return true;
    }
    host.split('.').any(|label| labels.contains(&label))
}

fn is_search_engine(host: &str) -> bool {
    host_matches(host, SEARCH_ENGINE_LABELS, SEARCH_ENGINE_HOSTS)
}

fn is_social(host: &str) -> bool {
    host_matches(host, SOCIAL_LABELS, SOCIAL_HOSTS)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Medium keywords match whole tokens split on non-alphanumerics, so
/// `paid_social` is paid and `e-mail` is email but `leads` is not `ads`.
fn has_token(tokens: &[&str], keywords: &[&str]) -> bool {
    tokens.iter().any(|t| keywords.contains(t))
}

fn classify_medium(medium: &str) -> Option<TrafficSource> {
    let medium = medium.to_lowercase();
    let tokens: Vec<&str> = medium
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if has_token(&tokens, PAID_MEDIUM_KEYWORDS) {
        Some(TrafficSource::Paid)
    } else if has_token(&tokens, EMAIL_MEDIUM_KEYWORDS) {
        Some(TrafficSource::Email)
    } else if has_token(&tokens, SOCIAL_MEDIUM_KEYWORDS) {
        Some(TrafficSource::Social)
    } else if has_token(&tokens, ORGANIC_MEDIUM_KEYWORDS) {
        Some(TrafficSource::OrganicSearch)
    } else {
        None
    }
}

fn classify_utm_source(source: &str) -> TrafficSource {
    match normalize_host(source) {
        Some(host) if is_search_engine(&host) => TrafficSource::OrganicSearch,
        Some(host) if is_social(&host) => TrafficSource::Social,
        _ => TrafficSource::Campaign,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the traffic source of an event.
///
/// Precedence: UTM medium keywords, then UTM source, then the referrer
/// (absent → direct, same host → internal, search/social lists, else referral).
pub fn resolve_traffic_source(
    utm: Option<&Utm>,
    referrer_host: Option<&str>,
    request_host: Option<&str>,
) -> TrafficSource {
    if let Some(medium) = non_blank(utm.and_then(|u| u.medium.as_deref())) {
        if let Some(source) = classify_medium(medium) {
            return source;
        }
    }

    if let Some(source) = non_blank(utm.and_then(|u| u.source.as_deref())) {
        return classify_utm_source(source);
    }

    let Some(referrer) = non_blank(referrer_host).and_then(normalize_host) else {
        return TrafficSource::Direct;
    };

    if request_host.and_then(normalize_host).as_deref() == Some(referrer.as_str()) {
        return TrafficSource::Internal;
    }
    if is_search_engine(&referrer) {
        return TrafficSource::OrganicSearch;
    }
    if is_social(&referrer) {
        return TrafficSource::Social;
    }
    TrafficSource::Referral
}

/// Resolve the device type: an explicit hint wins, otherwise keyword match
/// on the user agent in the order bot, tablet, mobile, falling back to desktop.
pub fn resolve_device_type(explicit_hint: Option<DeviceType>, user_agent: &str) -> DeviceType {
    if let Some(hint) = explicit_hint {
        return hint;
    }
    let ua = user_agent.to_lowercase();
    if contains_any(&ua, BOT_UA_KEYWORDS) {
        DeviceType::Bot
    } else if contains_any(&ua, TABLET_UA_KEYWORDS) {
        DeviceType::Tablet
    } else if contains_any(&ua, MOBILE_UA_KEYWORDS) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}
