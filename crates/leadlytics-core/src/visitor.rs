use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{RequestContext, Utm};

/// A session stays open while events keep arriving within this many minutes.
pub const SESSION_IDLE_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    pub id: String,
    pub tenant_id: String,
    pub anon_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_ip_hash: Option<String>,
    pub last_ua_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub visitor_id: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub entry_path: String,
    pub is_new: bool,
}

#[derive(Debug, Clone)]
pub struct VisitorSession {
    pub visitor: Visitor,
    pub session: Session,
}

/// Everything the resolver needs to assign a visitor and session.
#[derive(Debug, Clone)]
pub struct SessionRequest<'a> {
    pub tenant_id: &'a str,
    pub anon_id: &'a str,
    pub occurred_at: DateTime<Utc>,
    pub context: &'a RequestContext,
    pub path: &'a str,
    pub referrer: Option<&'a str>,
    pub utm: Option<&'a Utm>,
}

/// Resolves (or creates) the visitor and current session for an anonymous id.
#[async_trait]
pub trait VisitorSessionResolver: Send + Sync {
    async fn ensure_visitor_session(
        &self,
        request: &SessionRequest<'_>,
    ) -> anyhow::Result<VisitorSession>;
}
