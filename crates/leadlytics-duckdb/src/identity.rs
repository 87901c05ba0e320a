use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use duckdb::Connection;
use tracing::{debug, info};

use leadlytics_core::event::RequestContext;
use leadlytics_core::identity::{
    clamp_confidence, normalize_email, should_upgrade, CapturedLead, ConsentApplier,
    ConsentStatus, Lead, LeadCaptureRequest, LeadIdentity, LinkOutcome, LinkSource,
    DIRECT_LINK_CONFIDENCE, HEURISTIC_LINK_CONFIDENCE,
};

use crate::coerce::{format_ts, parse_ts};
use crate::predicate::SqlParams;
use crate::rejections::{insert_ingest_rejection, LEAD_CAPTURE_ENDPOINT};
use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Record or upgrade the link between a lead and a visitor. The stored
    /// confidence only ever moves up; a weaker or equal link is a no-op.
    pub async fn link_lead_to_visitor(
        &self,
        tenant_id: &str,
        lead_id: &str,
        visitor_id: &str,
        source: LinkSource,
        confidence: f64,
    ) -> Result<LinkOutcome> {
        let conn = self.conn.lock().await;
        link_lead_to_visitor_inner(
            &conn,
            tenant_id,
            lead_id,
            visitor_id,
            source,
            clamp_confidence(confidence),
            Utc::now(),
        )
    }

    /// Fan out weak `same_ip_ua_window` links to every other visitor of the
    /// tenant whose last IP and UA hashes match and who was seen since
    /// `seen_since`. Returns the number of candidate visitors, not the number
    /// of rows changed.
    pub async fn link_heuristic_visitors(
        &self,
        tenant_id: &str,
        lead_id: &str,
        origin_visitor_id: &str,
        ip_hash: &str,
        ua_hash: &str,
        seen_since: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let candidates = link_heuristic_visitors_inner(
            &tx,
            tenant_id,
            lead_id,
            origin_visitor_id,
            ip_hash,
            ua_hash,
            seen_since,
            Utc::now(),
        )?;
        tx.commit()?;
        Ok(candidates)
    }

    /// All links recorded for a lead, strongest first.
    pub async fn lead_identities(&self, lead_id: &str) -> Result<Vec<LeadIdentity>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT lead_id, visitor_id, link_source, confidence, CAST(linked_at AS VARCHAR)
             FROM lead_identities
             WHERE lead_id = ?1
             ORDER BY confidence DESC, visitor_id ASC",
        )?;
        let rows = stmt.query_map(duckdb::params![lead_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut links = Vec::new();
        for row in rows {
            let (lead_id, visitor_id, source, confidence, linked_at) = row?;
            let Some(link_source) = LinkSource::parse(&source) else {
                debug!(link_source = %source, "skipping link with unknown source");
                continue;
            };
            links.push(LeadIdentity {
                lead_id,
                visitor_id,
                link_source,
                confidence,
                linked_at: parse_ts(&linked_at).unwrap_or_else(Utc::now),
            });
        }
        Ok(links)
    }

    /// Capture a lead from a form submission.
    ///
    /// Upserts the lead by normalized email, records an accepted form
    /// submission, links the submitting visitor directly, fans out heuristic
    /// links when a request context is available, and finally hands the lead
    /// to `consent`. All writes share one transaction.
    #[tracing::instrument(skip(self, request, context, consent), fields(tenant_id = %request.tenant_id))]
    pub async fn capture_lead(
        &self,
        request: &LeadCaptureRequest,
        context: Option<&RequestContext>,
        consent: &dyn ConsentApplier,
        default_property_id: &str,
        heuristic_lookback_days: u32,
    ) -> Result<CapturedLead> {
        let email = normalize_email(&request.email)?;
        let captured_at = request.captured_at.unwrap_or_else(Utc::now);
        let property_id = request
            .property_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(default_property_id);

        let captured = {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            let (lead, created) = upsert_lead(
                &tx,
                &request.tenant_id,
                &email,
                captured_at,
                request.consent_status,
            )?;
            insert_form_submission(
                &tx,
                &request.tenant_id,
                property_id,
                Some(&lead.id),
                Some(&request.visitor_id),
                "accepted",
                captured_at,
            )?;
            let direct_link = link_lead_to_visitor_inner(
                &tx,
                &request.tenant_id,
                &lead.id,
                &request.visitor_id,
                LinkSource::FormSubmit,
                DIRECT_LINK_CONFIDENCE,
                captured_at,
            )?;
            let heuristic_candidates = match context {
                Some(ctx) => link_heuristic_visitors_inner(
                    &tx,
                    &request.tenant_id,
                    &lead.id,
                    &request.visitor_id,
                    &ctx.ip_hash,
                    &ctx.ua_hash,
                    captured_at - Duration::days(i64::from(heuristic_lookback_days)),
                    captured_at,
                )?,
                None => 0,
            };
            tx.commit()?;
            CapturedLead {
                lead,
                created,
                direct_link,
                heuristic_candidates,
            }
        };

        info!(
            lead_id = %captured.lead.id,
            created = captured.created,
            heuristic_candidates = captured.heuristic_candidates,
            "lead captured"
        );
        consent
            .apply_consent(&captured.lead, captured.lead.consent_status)
            .await?;
        Ok(captured)
    }

    /// Record a lead capture that failed validation: a `rejected` form
    /// submission plus one lead-capture row in the rejection log, written
    /// together. The ingest rollup counts rejected leads from the log only.
    pub async fn record_rejected_lead(
        &self,
        tenant_id: &str,
        property_id: &str,
        visitor_id: Option<&str>,
        reason: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        insert_form_submission(
            &tx,
            tenant_id,
            property_id,
            None,
            visitor_id,
            "rejected",
            submitted_at,
        )?;
        insert_ingest_rejection(
            &tx,
            LEAD_CAPTURE_ENDPOINT,
            tenant_id,
            property_id,
            reason,
            submitted_at,
        )?;
        tx.commit()?;
        debug!(tenant_id, reason, "rejected lead recorded");
        Ok(())
    }

    pub async fn lead_by_email(&self, tenant_id: &str, email: &str) -> Result<Option<Lead>> {
        let email = normalize_email(email)?;
        let conn = self.conn.lock().await;
        find_lead(&conn, tenant_id, &email)
    }
}

fn link_lead_to_visitor_inner(
    conn: &Connection,
    tenant_id: &str,
    lead_id: &str,
    visitor_id: &str,
    source: LinkSource,
    confidence: f64,
    now: DateTime<Utc>,
) -> Result<LinkOutcome> {
    let existing = conn.query_row(
        "SELECT confidence FROM lead_identities WHERE lead_id = ?1 AND visitor_id = ?2",
        duckdb::params![lead_id, visitor_id],
        |row| row.get::<_, f64>(0),
    );

    match existing {
        Ok(current) if !should_upgrade(current, confidence) => Ok(LinkOutcome::Unchanged),
        Ok(_) => {
            conn.execute(
                "UPDATE lead_identities
                 SET link_source = ?1, confidence = ?2, linked_at = CAST(?3 AS TIMESTAMP)
                 WHERE lead_id = ?4 AND visitor_id = ?5",
                duckdb::params![source.as_str(), confidence, format_ts(now), lead_id, visitor_id],
            )?;
            Ok(LinkOutcome::Upgraded)
        }
        Err(duckdb::Error::QueryReturnedNoRows) => {
            conn.execute(
                "INSERT INTO lead_identities
                 (lead_id, visitor_id, tenant_id, link_source, confidence, linked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, CAST(?6 AS TIMESTAMP))",
                duckdb::params![
                    lead_id,
                    visitor_id,
                    tenant_id,
                    source.as_str(),
                    confidence,
                    format_ts(now)
                ],
            )?;
            Ok(LinkOutcome::Inserted)
        }
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn link_heuristic_visitors_inner(
    conn: &Connection,
    tenant_id: &str,
    lead_id: &str,
    origin_visitor_id: &str,
    ip_hash: &str,
    ua_hash: &str,
    seen_since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize> {
    let candidates = {
        let mut stmt = conn.prepare(
            "SELECT id FROM visitors
             WHERE tenant_id = ?1
               AND last_ip_hash = ?2
               AND last_ua_hash = ?3
               AND id <> ?4
               AND last_seen_at >= CAST(?5 AS TIMESTAMP)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            duckdb::params![tenant_id, ip_hash, ua_hash, origin_visitor_id, format_ts(seen_since)],
            |row| row.get::<_, String>(0),
        )?;
        rows.collect::<duckdb::Result<Vec<String>>>()?
    };
    if candidates.is_empty() {
        return Ok(0);
    }

    let source = LinkSource::SameIpUaWindow.as_str();
    let linked_at = format_ts(now);

    // Existing weaker links are raised in one statement.
    let mut params = SqlParams::new();
    let update_sql = format!(
        "UPDATE lead_identities
         SET link_source = {source}, confidence = {confidence}, linked_at = CAST({linked_at} AS TIMESTAMP)
         WHERE lead_id = {lead} AND confidence < {floor} AND visitor_id IN ({ids})",
        source = params.bind(source.to_string()),
        confidence = params.bind(HEURISTIC_LINK_CONFIDENCE),
        linked_at = params.bind(linked_at.clone()),
        lead = params.bind(lead_id.to_string()),
        floor = params.bind(HEURISTIC_LINK_CONFIDENCE),
        ids = in_list(&candidates, &mut params),
    );
    conn.execute(&update_sql, params.as_refs().as_slice())?;

    // Missing links are created in one statement; existing ones are left
    // to the update above.
    let mut params = SqlParams::new();
    let insert_sql = format!(
        "INSERT INTO lead_identities
         (lead_id, visitor_id, tenant_id, link_source, confidence, linked_at)
         SELECT {lead}, v.id, {tenant}, {source}, {confidence}, CAST({linked_at} AS TIMESTAMP)
         FROM visitors v
         WHERE v.id IN ({ids})
         ON CONFLICT (lead_id, visitor_id) DO NOTHING",
        lead = params.bind(lead_id.to_string()),
        tenant = params.bind(tenant_id.to_string()),
        source = params.bind(source.to_string()),
        confidence = params.bind(HEURISTIC_LINK_CONFIDENCE),
        linked_at = params.bind(linked_at),
        ids = in_list(&candidates, &mut params),
    );
    conn.execute(&insert_sql, params.as_refs().as_slice())?;

    debug!(
        lead_id,
        candidates = candidates.len(),
        "heuristic links applied"
    );
    Ok(candidates.len())
}

fn in_list(ids: &[String], params: &mut SqlParams) -> String {
    ids.iter()
        .map(|id| params.bind(id.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn find_lead(conn: &Connection, tenant_id: &str, email: &str) -> Result<Option<Lead>> {
    let found = conn.query_row(
        "SELECT id, CAST(first_captured_at AS VARCHAR), CAST(last_captured_at AS VARCHAR), consent_status
         FROM leads
         WHERE tenant_id = ?1 AND email_normalized = ?2",
        duckdb::params![tenant_id, email],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    );
    match found {
        Ok((id, first, last, consent)) => {
            let first_captured_at = parse_ts(&first).unwrap_or_else(Utc::now);
            Ok(Some(Lead {
                id,
                tenant_id: tenant_id.to_string(),
                email_normalized: email.to_string(),
                first_captured_at,
                last_captured_at: parse_ts(&last).unwrap_or(first_captured_at),
                consent_status: ConsentStatus::parse(&consent),
            }))
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert or refresh a lead. `first_captured_at` keeps the earliest capture,
/// `last_captured_at` always moves to this capture, and consent is only
/// overwritten when the request carries one.
fn upsert_lead(
    conn: &Connection,
    tenant_id: &str,
    email: &str,
    captured_at: DateTime<Utc>,
    consent: Option<ConsentStatus>,
) -> Result<(Lead, bool)> {
    match find_lead(conn, tenant_id, email)? {
        Some(mut lead) => {
            lead.first_captured_at = lead.first_captured_at.min(captured_at);
            lead.last_captured_at = captured_at;
            if let Some(status) = consent {
                lead.consent_status = status;
            }
            conn.execute(
                "UPDATE leads
                 SET first_captured_at = CAST(?1 AS TIMESTAMP),
                     last_captured_at = CAST(?2 AS TIMESTAMP),
                     consent_status = ?3
                 WHERE id = ?4",
                duckdb::params![
                    format_ts(lead.first_captured_at),
                    format_ts(lead.last_captured_at),
                    lead.consent_status.as_str(),
                    lead.id
                ],
            )?;
            Ok((lead, false))
        }
        None => {
            let lead = Lead {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                email_normalized: email.to_string(),
                first_captured_at: captured_at,
                last_captured_at: captured_at,
                consent_status: consent.unwrap_or_default(),
            };
            conn.execute(
                "INSERT INTO leads
                 (id, tenant_id, email_normalized, first_captured_at, last_captured_at, consent_status)
                 VALUES (?1, ?2, ?3, CAST(?4 AS TIMESTAMP), CAST(?4 AS TIMESTAMP), ?5)",
                duckdb::params![
                    lead.id,
                    lead.tenant_id,
                    lead.email_normalized,
                    format_ts(captured_at),
                    lead.consent_status.as_str()
                ],
            )?;
            Ok((lead, true))
        }
    }
}

fn insert_form_submission(
    conn: &Connection,
    tenant_id: &str,
    property_id: &str,
    lead_id: Option<&str>,
    visitor_id: Option<&str>,
    validation_status: &str,
    submitted_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO form_submissions
         (id, tenant_id, property_id, lead_id, visitor_id, validation_status, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, CAST(?7 AS TIMESTAMP))",
        duckdb::params![
            uuid::Uuid::new_v4().to_string(),
            tenant_id,
            property_id,
            lead_id,
            visitor_id,
            validation_status,
            format_ts(submitted_at)
        ],
    )?;
    Ok(())
}
