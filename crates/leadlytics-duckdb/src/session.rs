use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use duckdb::Connection;
use sha2::{Digest, Sha256};

use leadlytics_core::visitor::{
    Session, SessionRequest, Visitor, VisitorSession, VisitorSessionResolver,
    SESSION_IDLE_MINUTES,
};

use crate::coerce::{format_ts, parse_ts};
use crate::DuckDbBackend;

#[async_trait]
impl VisitorSessionResolver for DuckDbBackend {
    /// Find or create the visitor for `(tenant_id, anon_id)`, then reuse the
    /// session that covers `occurred_at` (started at or before it, idle for no
    /// longer than the window), or open a new one. Both steps run under one connection lock so concurrent events
    /// for the same visitor cannot open two sessions.
    async fn ensure_visitor_session(&self, request: &SessionRequest<'_>) -> Result<VisitorSession> {
        let conn = self.conn.lock().await;
        let visitor = upsert_visitor(&conn, request)?;
        let session = get_or_create_session(&conn, &visitor, request)?;
        Ok(VisitorSession { visitor, session })
    }
}

fn upsert_visitor(conn: &Connection, request: &SessionRequest<'_>) -> Result<Visitor> {
    let now_str = format_ts(request.occurred_at);
    let existing = conn.query_row(
        "SELECT id, CAST(first_seen_at AS VARCHAR), CAST(last_seen_at AS VARCHAR)
         FROM visitors WHERE tenant_id = ?1 AND anon_id = ?2",
        duckdb::params![request.tenant_id, request.anon_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    );

    match existing {
        Ok((id, first_seen_raw, last_seen_raw)) => {
            let first_seen = parse_ts(&first_seen_raw)
                .unwrap_or(request.occurred_at)
                .min(request.occurred_at);
            let last_seen = parse_ts(&last_seen_raw)
                .unwrap_or(request.occurred_at)
                .max(request.occurred_at);
            conn.execute(
                "UPDATE visitors
                 SET first_seen_at = CAST(?1 AS TIMESTAMP),
                     last_seen_at = CAST(?2 AS TIMESTAMP),
                     last_ip_hash = ?3,
                     last_ua_hash = ?4
                 WHERE id = ?5",
                duckdb::params![
                    format_ts(first_seen),
                    format_ts(last_seen),
                    request.context.ip_hash,
                    request.context.ua_hash,
                    id
                ],
            )?;
            Ok(Visitor {
                id,
                tenant_id: request.tenant_id.to_string(),
                anon_id: request.anon_id.to_string(),
                first_seen_at: first_seen,
                last_seen_at: last_seen,
                last_ip_hash: Some(request.context.ip_hash.clone()),
                last_ua_hash: Some(request.context.ua_hash.clone()),
            })
        }
        Err(duckdb::Error::QueryReturnedNoRows) => {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO visitors
                 (id, tenant_id, anon_id, first_seen_at, last_seen_at, last_ip_hash, last_ua_hash)
                 VALUES (?1, ?2, ?3, CAST(?4 AS TIMESTAMP), CAST(?4 AS TIMESTAMP), ?5, ?6)",
                duckdb::params![
                    id,
                    request.tenant_id,
                    request.anon_id,
                    now_str,
                    request.context.ip_hash,
                    request.context.ua_hash
                ],
            )?;
            Ok(Visitor {
                id,
                tenant_id: request.tenant_id.to_string(),
                anon_id: request.anon_id.to_string(),
                first_seen_at: request.occurred_at,
                last_seen_at: request.occurred_at,
                last_ip_hash: Some(request.context.ip_hash.clone()),
                last_ua_hash: Some(request.context.ua_hash.clone()),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn get_or_create_session(
    conn: &Connection,
    visitor: &Visitor,
    request: &SessionRequest<'_>,
) -> Result<Session> {
    let cutoff = request.occurred_at - Duration::minutes(SESSION_IDLE_MINUTES);
    let existing = conn.query_row(
        "SELECT id, CAST(started_at AS VARCHAR), CAST(last_seen_at AS VARCHAR), entry_path
         FROM sessions
         WHERE visitor_id = ?1
           AND started_at <= CAST(?2 AS TIMESTAMP)
           AND last_seen_at >= CAST(?3 AS TIMESTAMP)
         ORDER BY started_at DESC
         LIMIT 1",
        duckdb::params![visitor.id, format_ts(request.occurred_at), format_ts(cutoff)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    );

    match existing {
        Ok((id, started_raw, last_seen_raw, entry_path)) => {
            let last_seen = parse_ts(&last_seen_raw)
                .unwrap_or(request.occurred_at)
                .max(request.occurred_at);
            conn.execute(
                "UPDATE sessions SET last_seen_at = CAST(?1 AS TIMESTAMP) WHERE id = ?2",
                duckdb::params![format_ts(last_seen), id],
            )?;
            Ok(Session {
                id,
                visitor_id: visitor.id.clone(),
                started_at: parse_ts(&started_raw).unwrap_or(request.occurred_at),
                last_seen_at: last_seen,
                entry_path,
                is_new: false,
            })
        }
        Err(duckdb::Error::QueryReturnedNoRows) => {
            let id = compute_session_id(
                &visitor.id,
                request.path,
                request.occurred_at.timestamp_millis(),
            );
            let now_str = format_ts(request.occurred_at);
            conn.execute(
                "INSERT INTO sessions (id, tenant_id, visitor_id, started_at, last_seen_at, entry_path, referrer)
                 VALUES (?1, ?2, ?3, CAST(?4 AS TIMESTAMP), CAST(?4 AS TIMESTAMP), ?5, ?6)
                 ON CONFLICT (id) DO NOTHING",
                duckdb::params![
                    id,
                    request.tenant_id,
                    visitor.id,
                    now_str,
                    request.path,
                    request.referrer
                ],
            )?;
            Ok(Session {
                id,
                visitor_id: visitor.id.clone(),
                started_at: request.occurred_at,
                last_seen_at: request.occurred_at,
                entry_path: request.path.to_string(),
                is_new: true,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Deterministic session id:
/// `sha256(visitor_id + entry_path + started_at_ms)[0:16]` as hex.
fn compute_session_id(visitor_id: &str, entry_path: &str, started_at_ms: i64) -> String {
    let input = format!("{visitor_id}{entry_path}{started_at_ms}");
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}
