use anyhow::Result;
use chrono::Utc;
use duckdb::Connection;
use tracing::debug;

use leadlytics_core::classify::{resolve_device_type, resolve_traffic_source};
use leadlytics_core::dedupe::{compute_dedupe_key, DedupeInput};
use leadlytics_core::error::CoreError;
use leadlytics_core::event::{
    merge_props, normalize_country_code, resolve_event_flags, Event, EventBody, IngestedEvent,
    RequestContext,
};
use leadlytics_core::visitor::{SessionRequest, VisitorSessionResolver};

use crate::coerce::format_ts;
use crate::DuckDbBackend;

/// Identity of an already-stored event, as found by its dedupe key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEventRef {
    pub event_id: String,
    pub visitor_id: String,
    pub session_id: String,
}

impl DuckDbBackend {
    /// Enrich and store one event. Re-delivery of the same logical event
    /// returns the identity of the row written the first time.
    #[tracing::instrument(
        skip(self, body, context, resolver),
        fields(tenant_id = %body.tenant_id, event_type = body.event_type.as_str())
    )]
    pub async fn ingest_event(
        &self,
        body: &EventBody,
        context: &RequestContext,
        resolver: &dyn VisitorSessionResolver,
        default_property_id: &str,
    ) -> Result<IngestedEvent> {
        let occurred_at = body.occurred_at.unwrap_or_else(Utc::now);
        let property_id = body
            .property_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(default_property_id);

        let resolved = resolver
            .ensure_visitor_session(&SessionRequest {
                tenant_id: &body.tenant_id,
                anon_id: &body.anon_id,
                occurred_at,
                context,
                path: &body.path,
                referrer: body.referrer.as_deref(),
                utm: body.utm.as_ref(),
            })
            .await?;

        let dedupe_key = compute_dedupe_key(&DedupeInput::from_body(
            body,
            &resolved.session.id,
            occurred_at,
            context,
        ))?;
        let event = enrich_event(
            body,
            context,
            property_id,
            &resolved.visitor.id,
            &resolved.session.id,
            occurred_at,
            dedupe_key,
        );

        let conn = self.conn.lock().await;
        if insert_event(&conn, &event)? > 0 {
            return Ok(IngestedEvent {
                event_id: event.id,
                visitor_id: event.visitor_id,
                session_id: event.session_id,
                dedupe_key: event.dedupe_key,
                deduplicated: false,
            });
        }

        debug!(dedupe_key = %event.dedupe_key, "duplicate event, resolving existing row");
        let existing = find_event_by_dedupe_key(&conn, &event.tenant_id, &event.dedupe_key)?;
        Ok(resolve_conflict(existing, &event.tenant_id, &event.dedupe_key)?)
    }

    pub async fn event_by_dedupe_key(
        &self,
        tenant_id: &str,
        dedupe_key: &str,
    ) -> Result<Option<StoredEventRef>> {
        let conn = self.conn.lock().await;
        find_event_by_dedupe_key(&conn, tenant_id, dedupe_key)
    }
}

fn enrich_event(
    body: &EventBody,
    context: &RequestContext,
    property_id: &str,
    visitor_id: &str,
    session_id: &str,
    occurred_at: chrono::DateTime<Utc>,
    dedupe_key: String,
) -> Event {
    let traffic = body.traffic.as_ref();
    let flags = resolve_event_flags(body.event_type, traffic);
    let utm = body.utm.as_ref();
    Event {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: body.tenant_id.clone(),
        property_id: property_id.to_string(),
        visitor_id: visitor_id.to_string(),
        session_id: session_id.to_string(),
        event_type: body.event_type,
        path: body.path.clone(),
        occurred_at,
        referrer: body.referrer.clone(),
        ip_hash: context.ip_hash.clone(),
        ua_hash: context.ua_hash.clone(),
        dedupe_key,
        props: merge_props(body.props.as_ref(), traffic).to_string(),
        traffic_source: resolve_traffic_source(
            utm,
            body.referrer.as_deref(),
            Some(context.host.as_str()),
        ),
        device_type: resolve_device_type(
            traffic.and_then(|t| t.device_type),
            &context.user_agent,
        ),
        country_code: normalize_country_code(traffic.and_then(|t| t.country_code.as_deref())),
        is_entrance: flags.is_entrance,
        is_exit: flags.is_exit,
        is_conversion: flags.is_conversion,
        utm_source: utm.and_then(|u| u.source.clone()),
        utm_medium: utm.and_then(|u| u.medium.clone()),
        utm_campaign: utm.and_then(|u| u.campaign.clone()),
    }
}

/// Insert unless `(tenant_id, dedupe_key)` already exists. Returns the number
/// of rows written: 0 means the conflict branch was taken.
fn insert_event(conn: &Connection, event: &Event) -> Result<usize> {
    let written = conn.execute(
        "INSERT INTO events (
            id, tenant_id, property_id, visitor_id, session_id, event_type, path,
            occurred_at, referrer, ip_hash, ua_hash, dedupe_key, props,
            traffic_source, device_type, country_code,
            is_entrance, is_exit, is_conversion,
            utm_source, utm_medium, utm_campaign
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            CAST(?8 AS TIMESTAMP), ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16,
            ?17, ?18, ?19,
            ?20, ?21, ?22
        )
        ON CONFLICT (tenant_id, dedupe_key) DO NOTHING",
        duckdb::params![
            event.id,
            event.tenant_id,
            event.property_id,
            event.visitor_id,
            event.session_id,
            event.event_type.as_str(),
            event.path,
            format_ts(event.occurred_at),
            event.referrer,
            event.ip_hash,
            event.ua_hash,
            event.dedupe_key,
            event.props,
            event.traffic_source.as_str(),
            event.device_type.as_str(),
            event.country_code,
            event.is_entrance,
            event.is_exit,
            event.is_conversion,
            event.utm_source,
            event.utm_medium,
            event.utm_campaign,
        ],
    )?;
    Ok(written)
}

fn find_event_by_dedupe_key(
    conn: &Connection,
    tenant_id: &str,
    dedupe_key: &str,
) -> Result<Option<StoredEventRef>> {
    let found = conn.query_row(
        "SELECT id, visitor_id, session_id FROM events
         WHERE tenant_id = ?1 AND dedupe_key = ?2
         LIMIT 1",
        duckdb::params![tenant_id, dedupe_key],
        |row| {
            Ok(StoredEventRef {
                event_id: row.get(0)?,
                visitor_id: row.get(1)?,
                session_id: row.get(2)?,
            })
        },
    );
    match found {
        Ok(row) => Ok(Some(row)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The conflict branch must find the row that caused the conflict. Anything
/// else means the events table is inconsistent and is fatal.
fn resolve_conflict(
    existing: Option<StoredEventRef>,
    tenant_id: &str,
    dedupe_key: &str,
) -> Result<IngestedEvent, CoreError> {
    match existing {
        Some(row) => Ok(IngestedEvent {
            event_id: row.event_id,
            visitor_id: row.visitor_id,
            session_id: row.session_id,
            dedupe_key: dedupe_key.to_string(),
            deduplicated: true,
        }),
        None => Err(CoreError::DedupeLookupFailed {
            tenant_id: tenant_id.to_string(),
            dedupe_key: dedupe_key.to_string(),
        }),
    }
}
