//! Numbered-parameter builder and the tenant/property scoping fragments
//! shared by the rollup queries.

use duckdb::types::ToSql;

use leadlytics_core::rollup::RollupScope;

/// Collects bound values and hands out `?N` placeholders in order.
#[derive(Default)]
pub struct SqlParams {
    values: Vec<Box<dyn ToSql + Send + Sync>>,
}

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` and return its placeholder.
    pub fn bind<T: ToSql + Send + Sync + 'static>(&mut self, value: T) -> String {
        self.values.push(Box::new(value));
        format!("?{}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_refs(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v.as_ref() as &dyn ToSql).collect()
    }
}

/// SQL fragments that restrict a query to one rollup scope.
///
/// The tenant-wide default property adds no property predicate at all;
/// every other property filters events directly and attributes leads
/// through their linked visitors' events.
pub struct ScopeFilter<'a> {
    scope: &'a RollupScope,
}

impl<'a> ScopeFilter<'a> {
    pub fn new(scope: &'a RollupScope) -> Self {
        Self { scope }
    }

    /// `alias.tenant_id = ?` only, for tables without a property column.
    pub fn tenant(&self, alias: &str, params: &mut SqlParams) -> String {
        format!(
            "{alias}.tenant_id = {}",
            params.bind(self.scope.tenant_id.clone())
        )
    }

    /// `alias.tenant_id = ?` plus `alias.property_id = ?` when scoped.
    /// Works for any table carrying both columns (events, form submissions,
    /// ingest rejections).
    pub fn rows(&self, alias: &str, params: &mut SqlParams) -> String {
        let mut sql = self.tenant(alias, params);
        if self.scope.property_scoped {
            sql.push_str(&format!(
                " AND {alias}.property_id = {}",
                params.bind(self.scope.property_id.clone())
            ));
        }
        sql
    }

    /// Lead attribution: a lead belongs to a property when any linked
    /// visitor had an event on it at or before the lead's first capture.
    /// Empty for the tenant-wide scope.
    pub fn lead_attribution(&self, lead_alias: &str, params: &mut SqlParams) -> String {
        if !self.scope.property_scoped {
            return String::new();
        }
        let property = params.bind(self.scope.property_id.clone());
        format!(
            " AND EXISTS (
                SELECT 1
                FROM lead_identities attr_li
                JOIN events attr_e ON attr_e.visitor_id = attr_li.visitor_id
                WHERE attr_li.lead_id = {lead_alias}.id
                  AND attr_e.tenant_id = {lead_alias}.tenant_id
                  AND attr_e.property_id = {property}
                  AND attr_e.occurred_at <= {lead_alias}.first_captured_at
            )"
        )
    }

    /// Half-open time window on `column`, bound as timestamp literals.
    pub fn between(
        column: &str,
        start: &str,
        end: &str,
        params: &mut SqlParams,
    ) -> String {
        format!(
            "{column} >= CAST({} AS TIMESTAMP) AND {column} < CAST({} AS TIMESTAMP)",
            params.bind(start.to_string()),
            params.bind(end.to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_wide_scope_has_no_property_predicate() {
        let scope = RollupScope::tenant_wide("t1", "default");
        let filter = ScopeFilter::new(&scope);
        let mut params = SqlParams::new();
        assert_eq!(filter.rows("e", &mut params), "e.tenant_id = ?1");
        assert_eq!(filter.lead_attribution("l", &mut params), "");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn property_scope_filters_rows_and_attributes_leads() {
        let scope = RollupScope::new("t1", "site-a", "default");
        let filter = ScopeFilter::new(&scope);
        let mut params = SqlParams::new();
        assert_eq!(
            filter.rows("e", &mut params),
            "e.tenant_id = ?1 AND e.property_id = ?2"
        );
        let attribution = filter.lead_attribution("l", &mut params);
        assert!(attribution.contains("attr_e.property_id = ?3"));
        assert!(attribution.contains("attr_e.occurred_at <= l.first_captured_at"));
        assert_eq!(params.len(), 3);
        assert_eq!(filter.tenant("l", &mut params), "l.tenant_id = ?4");
    }

    #[test]
    fn placeholders_continue_after_existing_binds() {
        let mut params = SqlParams::new();
        params.bind("x".to_string());
        let window = ScopeFilter::between("e.occurred_at", "2026-01-10 00:00:00", "2026-01-11 00:00:00", &mut params);
        assert_eq!(
            window,
            "e.occurred_at >= CAST(?2 AS TIMESTAMP) AND e.occurred_at < CAST(?3 AS TIMESTAMP)"
        );
    }
}
