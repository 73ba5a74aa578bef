//! Versioned event envelope with correlation and causation tracking
//!
//! Every event crossing the integration bus travels inside an
//! [`EventEnvelope`]: a channel name, a semver-versioned event type, the
//! serialized payload, and tracing metadata. Envelope construction is
//! validating — empty fields and malformed versions are rejected up front so
//! that nothing unparseable ever reaches a subscriber or the dead-letter
//! queue.
//!
//! Correlation groups every envelope of one logical workflow; causation
//! points at the direct predecessor. Use [`EventEnvelope::caused_by`] when
//! emitting a follow-up event so both chains stay intact.

use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

static SEMVER_RE: OnceLock<Regex> = OnceLock::new();

fn semver_re() -> &'static Regex {
    SEMVER_RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver regex is valid"))
}

/// Parse a `MAJOR.MINOR.PATCH` string into its numeric parts
pub fn parse_semver(version: &str) -> Result<(u64, u64, u64)> {
    if !semver_re().is_match(version) {
        return Err(EventError::InvalidSchemaVersion(version.to_string()));
    }
    let mut parts = version.split('.').map(str::parse::<u64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => Ok((major, minor, patch)),
        _ => Err(EventError::InvalidSchemaVersion(version.to_string())),
    }
}

/// Cross-cutting metadata carried by every envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    /// Logical producer of the event (component or service name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Multi-tenant partition key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Identity the event was produced on behalf of
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Distributed-trace id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Additional metadata, preserved verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Versioned publish contract for the integration bus
///
/// Construction goes through [`EventEnvelope::new`] which enforces the
/// envelope invariants: `channel_name`, `event_type`, `schema_version`, and
/// `payload` are non-empty, and `schema_version` matches
/// `MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Unique id of this envelope
    pub id: String,

    /// Channel the envelope is published on
    pub channel_name: String,

    /// Logical event type, e.g. `run.completed`
    pub event_type: String,

    /// Schema version of the payload, `MAJOR.MINOR.PATCH`
    pub schema_version: String,

    /// Serialized payload, encoded by the schema's registered serializer
    pub payload: String,

    /// Cross-cutting metadata
    #[serde(default)]
    pub metadata: EventMetadata,

    /// When the envelope was created
    pub timestamp: DateTime<Utc>,

    /// Groups all envelopes of one logical workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// The envelope that directly caused this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl EventEnvelope {
    /// Create a validated envelope
    pub fn new(
        channel_name: impl Into<String>,
        event_type: impl Into<String>,
        schema_version: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Self> {
        let channel_name = channel_name.into();
        let event_type = event_type.into();
        let schema_version = schema_version.into();
        let payload = payload.into();

        if channel_name.is_empty() {
            return Err(EventError::EmptyField("channel_name"));
        }
        if event_type.is_empty() {
            return Err(EventError::EmptyField("event_type"));
        }
        if payload.is_empty() {
            return Err(EventError::EmptyField("payload"));
        }
        parse_semver(&schema_version)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            channel_name,
            event_type,
            schema_version,
            payload,
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
        })
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Chain this envelope onto a predecessor: causation points at the
    /// predecessor's id, correlation carries over (falling back to the
    /// predecessor's own id when it started the chain).
    pub fn caused_by(mut self, parent: &EventEnvelope) -> Self {
        self.causation_id = Some(parent.id.clone());
        self.correlation_id = parent
            .correlation_id
            .clone()
            .or_else(|| Some(parent.id.clone()));
        self
    }

    /// Major component of the schema version
    pub fn schema_major(&self) -> u64 {
        // schema_version was validated at construction
        parse_semver(&self.schema_version).map(|(m, _, _)| m).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_construction() {
        let env = EventEnvelope::new("orders", "order.created", "1.2.3", "{}").unwrap();
        assert_eq!(env.channel_name, "orders");
        assert_eq!(env.schema_version, "1.2.3");
        assert_eq!(env.schema_major(), 1);
        assert!(!env.id.is_empty());
    }

    #[test]
    fn test_envelope_rejects_empty_fields() {
        assert!(matches!(
            EventEnvelope::new("", "t", "1.0.0", "{}"),
            Err(EventError::EmptyField("channel_name"))
        ));
        assert!(matches!(
            EventEnvelope::new("c", "", "1.0.0", "{}"),
            Err(EventError::EmptyField("event_type"))
        ));
        assert!(matches!(
            EventEnvelope::new("c", "t", "1.0.0", ""),
            Err(EventError::EmptyField("payload"))
        ));
    }

    #[test]
    fn test_envelope_rejects_bad_semver() {
        for bad in ["1.0", "v1.0.0", "1.0.0-beta", "1..0", "a.b.c", ""] {
            assert!(
                matches!(
                    EventEnvelope::new("c", "t", bad, "{}"),
                    Err(EventError::InvalidSchemaVersion(_))
                ),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_semver() {
        assert_eq!(parse_semver("10.2.33").unwrap(), (10, 2, 33));
        assert!(parse_semver("1.2").is_err());
    }

    #[test]
    fn test_caused_by_chains_correlation() {
        let root = EventEnvelope::new("c", "a", "1.0.0", "{}").unwrap();
        let second = EventEnvelope::new("c", "b", "1.0.0", "{}")
            .unwrap()
            .caused_by(&root);
        let third = EventEnvelope::new("c", "c", "1.0.0", "{}")
            .unwrap()
            .caused_by(&second);

        assert_eq!(second.causation_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(second.correlation_id.as_deref(), Some(root.id.as_str()));
        // Correlation sticks to the root across the chain.
        assert_eq!(third.correlation_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(third.causation_id.as_deref(), Some(second.id.as_str()));
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let env = EventEnvelope::new("c", "t", "2.0.1", r#"{"k":1}"#)
            .unwrap()
            .with_metadata(EventMetadata::new().with_tenant_id("t1"))
            .with_correlation_id("corr-1");

        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
