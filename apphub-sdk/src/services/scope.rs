//! Row-level tenant scoping.
//!
//! Every predicate built here is pinned to the caller's entity first. A scope
//! claim can only narrow what the entity filter already allows; a scope key
//! with no configured field adds nothing.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::services::context::{ScopeClaim, TenantContext};
use crate::services::error::SdkError;

pub const DEFAULT_ENTITY_FIELD: &str = "entityId";

pub const SCOPE_CUSTOMER: &str = "customer";
pub const SCOPE_CUSTOMERS: &str = "customers";
pub const SCOPE_REGION: &str = "region";
pub const SCOPE_ENTITY_IDS: &str = "entity_ids";

/// Where each scope value lands in the host's data model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopeFilterConfig {
    pub entity_id: String,
    pub customer: Option<String>,
    pub customers: Option<String>,
    pub region: Option<String>,
    pub entity_ids: Option<String>,
    /// Scope-value key to field, for app-defined scope types.
    pub custom: BTreeMap<String, String>,
}

impl Default for ScopeFilterConfig {
    fn default() -> Self {
        Self {
            entity_id: DEFAULT_ENTITY_FIELD.to_string(),
            customer: None,
            customers: None,
            region: None,
            entity_ids: None,
            custom: BTreeMap::new(),
        }
    }
}

impl ScopeFilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_field(mut self, field: impl Into<String>) -> Self {
        self.entity_id = field.into();
        self
    }

    pub fn with_customer(mut self, field: impl Into<String>) -> Self {
        self.customer = Some(field.into());
        self
    }

    pub fn with_customers(mut self, field: impl Into<String>) -> Self {
        self.customers = Some(field.into());
        self
    }

    pub fn with_region(mut self, field: impl Into<String>) -> Self {
        self.region = Some(field.into());
        self
    }

    pub fn with_entity_ids(mut self, field: impl Into<String>) -> Self {
        self.entity_ids = Some(field.into());
        self
    }

    pub fn with_custom(mut self, scope_key: impl Into<String>, field: impl Into<String>) -> Self {
        self.custom.insert(scope_key.into(), field.into());
        self
    }

    /// Reject mappings that are empty or that target the entity field.
    /// Hosts call this once at start-up.
    pub fn validate(&self) -> Result<(), SdkError> {
        if self.entity_id.trim().is_empty() {
            return Err(SdkError::InvalidFormat(
                "scope filter entity field must not be empty".to_string(),
            ));
        }

        let named = [
            (SCOPE_CUSTOMER, self.customer.as_deref()),
            (SCOPE_CUSTOMERS, self.customers.as_deref()),
            (SCOPE_REGION, self.region.as_deref()),
            (SCOPE_ENTITY_IDS, self.entity_ids.as_deref()),
        ];
        let mapped = named
            .into_iter()
            .filter_map(|(key, field)| field.map(|f| (key, f)))
            .chain(self.custom.iter().map(|(k, f)| (k.as_str(), f.as_str())));

        for (key, field) in mapped {
            if key.trim().is_empty() || field.trim().is_empty() {
                return Err(SdkError::InvalidFormat(format!(
                    "scope mapping '{}' -> '{}' has an empty side",
                    key, field
                )));
            }
            if field == self.entity_id {
                return Err(SdkError::InvalidFormat(format!(
                    "scope '{}' must not map onto the entity field '{}'",
                    key, field
                )));
            }
        }
        Ok(())
    }
}

/// A keyed bag of values the scope engine can read, whatever the storage
/// layer's row type is.
pub trait ScopedRecord {
    fn field(&self, name: &str) -> Option<Value>;
}

impl ScopedRecord for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl ScopedRecord for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|o| o.get(name)).cloned()
    }
}

impl ScopedRecord for HashMap<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl ScopedRecord for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl ScopedRecord for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| Value::String(v.clone()))
    }
}

impl<T: ScopedRecord + ?Sized> ScopedRecord for &T {
    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Restriction {
    Equals(Value),
    OneOf(Vec<Value>),
}

impl Restriction {
    fn to_predicate(&self) -> Value {
        match self {
            Restriction::Equals(value) => value.clone(),
            Restriction::OneOf(values) => json!({ "in": values }),
        }
    }

    fn admits(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (Restriction::Equals(expected), Some(actual)) => expected == actual,
            (Restriction::OneOf(allowed), Some(actual)) => allowed.contains(actual),
            (_, None) => false,
        }
    }
}

/// Field restrictions the context's scope implies under `config`. Empty for
/// unrestricted contexts.
fn restrictions(ctx: &TenantContext, config: &ScopeFilterConfig) -> Vec<(String, Restriction)> {
    let scope = match ctx.scope() {
        Some(scope) if !scope.is_full_access() => scope,
        _ => return Vec::new(),
    };

    let value_at = |key: &str| scope.value.get(key).filter(|v| !v.is_null());
    let equals = |field: &Option<String>, key: &str| {
        field
            .as_ref()
            .zip(value_at(key))
            .map(|(f, v)| vec![(f.clone(), Restriction::Equals(v.clone()))])
            .unwrap_or_default()
    };
    let one_of = |field: &Option<String>, key: &str| {
        field
            .as_ref()
            .zip(value_at(key).and_then(Value::as_array))
            .map(|(f, v)| vec![(f.clone(), Restriction::OneOf(v.clone()))])
            .unwrap_or_default()
    };

    match scope.scope_type.as_str() {
        SCOPE_CUSTOMER => equals(&config.customer, "customer_id"),
        SCOPE_CUSTOMERS => one_of(&config.customers, "customer_ids"),
        SCOPE_REGION => equals(&config.region, "region"),
        SCOPE_ENTITY_IDS => one_of(&config.entity_ids, "entity_ids"),
        // Keys missing from the scope value are skipped, not denied.
        _ => config
            .custom
            .iter()
            .filter_map(|(key, field)| {
                value_at(key.as_str()).map(|value| {
                    let restriction = match value {
                        Value::Array(values) => Restriction::OneOf(values.clone()),
                        other => Restriction::Equals(other.clone()),
                    };
                    (field.clone(), restriction)
                })
            })
            .collect(),
    }
}

/// Copy of `where_clause` pinned to the caller's entity and narrowed by its
/// scope. Membership filters use the `{"in": [...]}` shape.
pub fn apply_scope_filter(
    where_clause: &Map<String, Value>,
    ctx: &TenantContext,
    config: &ScopeFilterConfig,
) -> Map<String, Value> {
    let mut scoped = where_clause.clone();

    for (field, restriction) in restrictions(ctx, config) {
        scoped.insert(field, restriction.to_predicate());
    }
    // Written last so no mapping can displace it.
    scoped.insert(
        config.entity_id.clone(),
        Value::String(ctx.entity().id.clone()),
    );
    scoped
}

pub fn has_access_to_record<R>(record: &R, ctx: &TenantContext, config: &ScopeFilterConfig) -> bool
where
    R: ScopedRecord + ?Sized,
{
    match record.field(&config.entity_id) {
        Some(Value::String(entity_id)) if entity_id == ctx.entity().id => {}
        _ => return false,
    }

    restrictions(ctx, config)
        .iter()
        .all(|(field, restriction)| restriction.admits(record.field(field).as_ref()))
}

pub fn filter_records_by_scope<I, R>(
    records: I,
    ctx: &TenantContext,
    config: &ScopeFilterConfig,
) -> Vec<R>
where
    I: IntoIterator<Item = R>,
    R: ScopedRecord,
{
    records
        .into_iter()
        .filter(|record| has_access_to_record(record, ctx, config))
        .collect()
}

pub fn require_access_to_record<R>(
    record: &R,
    ctx: &TenantContext,
    config: &ScopeFilterConfig,
) -> Result<(), SdkError>
where
    R: ScopedRecord + ?Sized,
{
    if has_access_to_record(record, ctx, config) {
        Ok(())
    } else {
        tracing::debug!(
            entity_id = %ctx.entity().id,
            scope_type = ?get_scope_type(ctx),
            "Record outside caller scope"
        );
        Err(SdkError::ScopeAccessDenied)
    }
}

pub fn has_full_access(ctx: &TenantContext) -> bool {
    ctx.scope().map_or(true, ScopeClaim::is_full_access)
}

pub fn get_scope_type(ctx: &TenantContext) -> Option<&str> {
    ctx.scope().map(|s| s.scope_type.as_str())
}

pub fn get_scope_value(ctx: &TenantContext) -> Option<&Value> {
    ctx.scope().map(|s| &s.value)
}

pub fn has_scope_type(ctx: &TenantContext, scope_type: &str) -> bool {
    get_scope_type(ctx) == Some(scope_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::tests::context_with;
    use crate::services::rbac::Role;

    fn scoped(scope_type: &str, value: Value) -> TenantContext {
        context_with(Role::Member, &[], Some(ScopeClaim::new(scope_type, value)))
    }

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_customer_scope_filter() {
        let ctx = scoped("customer", json!({"customer_id": "cust_9"}));
        let config = ScopeFilterConfig::new().with_customer("customerId");

        let filter = apply_scope_filter(&Map::new(), &ctx, &config);

        assert_eq!(
            Value::Object(filter),
            json!({"entityId": "ent_1", "customerId": "cust_9"})
        );
    }

    #[test]
    fn test_membership_scopes() {
        let ctx = scoped("customers", json!({"customer_ids": ["c1", "c2"]}));
        let config = ScopeFilterConfig::new().with_customers("customerId");
        let filter = apply_scope_filter(&as_map(json!({"status": "open"})), &ctx, &config);
        assert_eq!(
            Value::Object(filter),
            json!({"status": "open", "entityId": "ent_1", "customerId": {"in": ["c1", "c2"]}})
        );

        let ctx = scoped("entity_ids", json!({"entity_ids": ["sub_1"]}));
        let config = ScopeFilterConfig::new().with_entity_ids("ownerEntityId");
        let filter = apply_scope_filter(&Map::new(), &ctx, &config);
        assert_eq!(filter["ownerEntityId"], json!({"in": ["sub_1"]}));
        assert_eq!(filter["entityId"], json!("ent_1"));
    }

    #[test]
    fn test_region_scope() {
        let ctx = scoped("region", json!({"region": "eu-west"}));
        let config = ScopeFilterConfig::new().with_region("region");

        let filter = apply_scope_filter(&Map::new(), &ctx, &config);
        assert_eq!(filter["region"], json!("eu-west"));

        let eu = json!({"entityId": "ent_1", "region": "eu-west"});
        let us = json!({"entityId": "ent_1", "region": "us-east"});
        assert!(has_access_to_record(&eu, &ctx, &config));
        assert!(!has_access_to_record(&us, &ctx, &config));
    }

    #[test]
    fn test_entity_field_is_always_forced() {
        let config = ScopeFilterConfig::new()
            .with_customer("entityId")
            .with_custom("team", "entityId");
        let hostile = as_map(json!({"entityId": "ent_other"}));

        for ctx in [
            context_with(Role::Owner, &[], None),
            scoped("full_access", Value::Null),
            scoped("customer", json!({"customer_id": "cust_9"})),
            scoped("team_scope", json!({"team": "t1"})),
        ] {
            let filter = apply_scope_filter(&hostile, &ctx, &config);
            assert_eq!(filter["entityId"], json!("ent_1"));
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let ctx = scoped("customers", json!({"customer_ids": ["c1"]}));
        let config = ScopeFilterConfig::new().with_customers("customerId");

        let once = apply_scope_filter(&as_map(json!({"archived": false})), &ctx, &config);
        let twice = apply_scope_filter(&once, &ctx, &config);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_full_access_depends_only_on_entity() {
        let config = ScopeFilterConfig::new().with_customer("customerId");
        let same_entity = json!({"entityId": "ent_1", "customerId": "anyone"});
        let other_entity = json!({"entityId": "ent_2", "customerId": "anyone"});

        for ctx in [
            context_with(Role::Member, &[], None),
            scoped("full_access", json!({})),
        ] {
            assert!(has_full_access(&ctx));
            assert!(has_access_to_record(&same_entity, &ctx, &config));
            assert!(!has_access_to_record(&other_entity, &ctx, &config));
        }
    }

    #[test]
    fn test_entity_mismatch_denied_before_scope() {
        let ctx = scoped("customer", json!({"customer_id": "cust_9"}));
        let config = ScopeFilterConfig::new().with_customer("customerId");

        let foreign = json!({"entityId": "ent_2", "customerId": "cust_9"});
        let missing_entity = json!({"customerId": "cust_9"});

        assert!(!has_access_to_record(&foreign, &ctx, &config));
        assert!(!has_access_to_record(&missing_entity, &ctx, &config));
        assert!(matches!(
            require_access_to_record(&foreign, &ctx, &config),
            Err(SdkError::ScopeAccessDenied)
        ));
    }

    #[test]
    fn test_unmapped_scope_adds_no_restriction() {
        let ctx = scoped("customer", json!({"customer_id": "cust_9"}));
        let config = ScopeFilterConfig::new();

        let filter = apply_scope_filter(&Map::new(), &ctx, &config);
        assert_eq!(Value::Object(filter), json!({"entityId": "ent_1"}));

        let record = json!({"entityId": "ent_1", "customerId": "cust_1"});
        assert!(has_access_to_record(&record, &ctx, &config));
    }

    #[test]
    fn test_custom_scope_mixes_equality_and_membership() {
        let ctx = scoped("warehouse", json!({"site": "s1", "bays": [1, 2]}));
        let config = ScopeFilterConfig::new()
            .with_custom("site", "siteId")
            .with_custom("bays", "bayNumber");

        let filter = apply_scope_filter(&Map::new(), &ctx, &config);
        assert_eq!(filter["siteId"], json!("s1"));
        assert_eq!(filter["bayNumber"], json!({"in": [1, 2]}));

        let allowed = json!({"entityId": "ent_1", "siteId": "s1", "bayNumber": 2});
        let wrong_bay = json!({"entityId": "ent_1", "siteId": "s1", "bayNumber": 3});
        assert!(has_access_to_record(&allowed, &ctx, &config));
        assert!(!has_access_to_record(&wrong_bay, &ctx, &config));
    }

    /// A custom mapping whose key is absent from the scope value is ignored
    /// for that field (fail open per field). Pinned here so a change to
    /// fail-closed is a visible decision.
    #[test]
    fn test_custom_scope_missing_key_fails_open_per_field() {
        let ctx = scoped("warehouse", json!({"site": "s1"}));
        let config = ScopeFilterConfig::new()
            .with_custom("site", "siteId")
            .with_custom("zone", "zoneId");

        let filter = apply_scope_filter(&Map::new(), &ctx, &config);
        assert!(!filter.contains_key("zoneId"));

        let record = json!({"entityId": "ent_1", "siteId": "s1", "zoneId": "z9"});
        assert!(has_access_to_record(&record, &ctx, &config));
    }

    #[test]
    fn test_filter_records_over_row_types() {
        let ctx = scoped("customer", json!({"customer_id": "cust_9"}));
        let config = ScopeFilterConfig::new().with_customer("customerId");

        let rows: Vec<HashMap<String, String>> = vec![
            [("entityId", "ent_1"), ("customerId", "cust_9")],
            [("entityId", "ent_1"), ("customerId", "cust_1")],
            [("entityId", "ent_2"), ("customerId", "cust_9")],
        ]
        .into_iter()
        .map(|row| row.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        .collect();

        let visible = filter_records_by_scope(&rows, &ctx, &config);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0]["customerId"], "cust_9");
    }

    #[test]
    fn test_scope_accessors() {
        let ctx = scoped("region", json!({"region": "eu"}));

        assert!(!has_full_access(&ctx));
        assert_eq!(get_scope_type(&ctx), Some("region"));
        assert_eq!(get_scope_value(&ctx), Some(&json!({"region": "eu"})));
        assert!(has_scope_type(&ctx, "region"));
        assert!(!has_scope_type(&ctx, "customer"));

        let open = context_with(Role::Member, &[], None);
        assert_eq!(get_scope_type(&open), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(ScopeFilterConfig::new()
            .with_customer("customerId")
            .with_custom("site", "siteId")
            .validate()
            .is_ok());
        assert!(ScopeFilterConfig::new().with_region("").validate().is_err());
        assert!(ScopeFilterConfig::new()
            .with_entity_field("")
            .validate()
            .is_err());

        let parsed: ScopeFilterConfig =
            serde_json::from_value(json!({"customer": "customerId", "entityId": "tenantId"}))
                .unwrap();
        assert_eq!(parsed.entity_id, "tenantId");
        assert_eq!(parsed.customer.as_deref(), Some("customerId"));
    }
}
