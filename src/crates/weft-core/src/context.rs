//! Typed view over the message metadata envelope
//!
//! [`AgentContext`] promotes the recognized cross-cutting metadata keys
//! (identity, tenancy, tracing, locale) to first-class fields while
//! preserving unknown keys verbatim, so context survives round-trips
//! through subsystems that only understand the typed subset.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Metadata key for [`AgentContext::user_id`]
pub const USER_ID_KEY: &str = "userId";
/// Metadata key for [`AgentContext::tenant_id`]
pub const TENANT_ID_KEY: &str = "tenantId";
/// Metadata key for [`AgentContext::session_id`]
pub const SESSION_ID_KEY: &str = "sessionId";
/// Metadata key for [`AgentContext::correlation_id`]
pub const CORRELATION_ID_KEY: &str = "correlationId";
/// Metadata key for [`AgentContext::request_id`]
pub const REQUEST_ID_KEY: &str = "requestId";
/// Metadata key for [`AgentContext::trace_id`]
pub const TRACE_ID_KEY: &str = "traceId";
/// Metadata key for [`AgentContext::span_id`]
pub const SPAN_ID_KEY: &str = "spanId";
/// Metadata key for [`AgentContext::locale`]
pub const LOCALE_KEY: &str = "locale";
/// Metadata key for [`AgentContext::timezone`]
pub const TIMEZONE_KEY: &str = "timezone";
/// Metadata key for [`AgentContext::permissions`]
pub const PERMISSIONS_KEY: &str = "permissions";
/// Metadata key for [`AgentContext::features`]
pub const FEATURES_KEY: &str = "features";

const RECOGNIZED_KEYS: &[&str] = &[
    USER_ID_KEY,
    TENANT_ID_KEY,
    SESSION_ID_KEY,
    CORRELATION_ID_KEY,
    REQUEST_ID_KEY,
    TRACE_ID_KEY,
    SPAN_ID_KEY,
    LOCALE_KEY,
    TIMEZONE_KEY,
    PERMISSIONS_KEY,
    FEATURES_KEY,
];

/// Structured view over recognized metadata keys
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentContext {
    /// Identity for auth/policy decisions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Multi-tenant partitioning key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Grouping within a tenant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Distributed-trace group across one logical workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Granted permissions
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub permissions: BTreeSet<String>,

    /// Enabled feature flags
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,

    /// Unrecognized metadata keys, preserved verbatim
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Build a context from a metadata map
    ///
    /// Recognized keys are promoted to fields; everything else lands in
    /// [`AgentContext::extra`] unchanged.
    pub fn from_metadata(metadata: &HashMap<String, serde_json::Value>) -> Self {
        let as_string = |key: &str| {
            metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let as_set = |key: &str| {
            metadata
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default()
        };

        let extra = metadata
            .iter()
            .filter(|(key, _)| !RECOGNIZED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            user_id: as_string(USER_ID_KEY),
            tenant_id: as_string(TENANT_ID_KEY),
            session_id: as_string(SESSION_ID_KEY),
            correlation_id: as_string(CORRELATION_ID_KEY),
            request_id: as_string(REQUEST_ID_KEY),
            trace_id: as_string(TRACE_ID_KEY),
            span_id: as_string(SPAN_ID_KEY),
            locale: as_string(LOCALE_KEY),
            timezone: as_string(TIMEZONE_KEY),
            permissions: as_set(PERMISSIONS_KEY),
            features: as_set(FEATURES_KEY),
            extra,
        }
    }

    /// Project the context back into a metadata map
    pub fn to_metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut metadata = self.extra.clone();

        let mut put = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                metadata.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        };
        put(USER_ID_KEY, &self.user_id);
        put(TENANT_ID_KEY, &self.tenant_id);
        put(SESSION_ID_KEY, &self.session_id);
        put(CORRELATION_ID_KEY, &self.correlation_id);
        put(REQUEST_ID_KEY, &self.request_id);
        put(TRACE_ID_KEY, &self.trace_id);
        put(SPAN_ID_KEY, &self.span_id);
        put(LOCALE_KEY, &self.locale);
        put(TIMEZONE_KEY, &self.timezone);

        if !self.permissions.is_empty() {
            metadata.insert(
                PERMISSIONS_KEY.to_string(),
                serde_json::json!(self.permissions),
            );
        }
        if !self.features.is_empty() {
            metadata.insert(FEATURES_KEY.to_string(), serde_json::json!(self.features));
        }

        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_metadata_promotes_known_keys() {
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), json!("u1"));
        metadata.insert("tenantId".to_string(), json!("t1"));
        metadata.insert("permissions".to_string(), json!(["read", "write"]));
        metadata.insert("customKey".to_string(), json!({"a": 1}));

        let ctx = AgentContext::from_metadata(&metadata);
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.tenant_id.as_deref(), Some("t1"));
        assert!(ctx.has_permission("read"));
        assert!(!ctx.has_permission("admin"));
        assert_eq!(ctx.extra.get("customKey"), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_metadata_round_trip_preserves_unknown_keys() {
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), json!("u1"));
        metadata.insert("features".to_string(), json!(["beta"]));
        metadata.insert("x-custom".to_string(), json!(42));

        let ctx = AgentContext::from_metadata(&metadata);
        let back = ctx.to_metadata();

        assert_eq!(back.get("userId"), Some(&json!("u1")));
        assert_eq!(back.get("features"), Some(&json!(["beta"])));
        assert_eq!(back.get("x-custom"), Some(&json!(42)));
    }

    #[test]
    fn test_builder() {
        let ctx = AgentContext::new()
            .with_user_id("u1")
            .with_locale("de-DE")
            .with_permission("publish")
            .with_feature("beta");

        assert_eq!(ctx.locale.as_deref(), Some("de-DE"));
        assert!(ctx.has_permission("publish"));
        assert!(ctx.has_feature("beta"));
    }
}
