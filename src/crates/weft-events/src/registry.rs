//! Schema registry: per-type version tracking and compatibility
//!
//! Publishers register `(event_type, version, serializer)` triples; the
//! registry keeps a latest-version index per type and answers the one
//! question the bus needs at delivery time: *can a subscriber expecting
//! version X decode an envelope carrying version Y?* Two versions are
//! compatible iff their majors match. Migration within a major is an
//! identity re-stamp; migration across majors is an authoring-time concern
//! and fails with [`EventError::IncompatibleSchema`].

use crate::envelope::{parse_semver, EventEnvelope};
use crate::error::{EventError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serializes payloads for one schema version
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<String>;

    fn deserialize(&self, payload: &str) -> Result<serde_json::Value>;
}

/// Default serializer: payloads are JSON text
#[derive(Debug, Clone, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, payload: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// A registered schema version, with its parsed semver components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub event_type: String,
    pub version: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaInfo {
    fn parse(event_type: &str, version: &str) -> Result<Self> {
        let (major, minor, patch) = parse_semver(version)?;
        Ok(Self {
            event_type: event_type.to_string(),
            version: version.to_string(),
            major,
            minor,
            patch,
        })
    }

    /// Two versions are compatible iff their majors match
    pub fn is_compatible_with(&self, other: &SchemaInfo) -> bool {
        self.major == other.major
    }

    fn ordering_key(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

struct Registration {
    info: SchemaInfo,
    serializer: Arc<dyn EventSerializer>,
}

/// Tracks registered schema versions per event type
#[derive(Default)]
pub struct SchemaRegistry {
    // event_type -> version string -> registration
    schemas: RwLock<HashMap<String, HashMap<String, Registration>>>,
    // event_type -> highest registered version
    latest: RwLock<HashMap<String, SchemaInfo>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema version with its payload serializer
    ///
    /// Re-registering the same `(type, version)` replaces the serializer.
    /// The latest-version index is updated whenever the new version orders
    /// higher (major dominates, then minor, then patch).
    pub async fn register(
        &self,
        event_type: &str,
        version: &str,
        serializer: Arc<dyn EventSerializer>,
    ) -> Result<SchemaInfo> {
        let info = SchemaInfo::parse(event_type, version)?;

        let mut schemas = self.schemas.write().await;
        schemas.entry(event_type.to_string()).or_default().insert(
            version.to_string(),
            Registration {
                info: info.clone(),
                serializer,
            },
        );

        let mut latest = self.latest.write().await;
        match latest.get(event_type) {
            Some(current) if current.ordering_key() >= info.ordering_key() => {}
            _ => {
                latest.insert(event_type.to_string(), info.clone());
            }
        }

        Ok(info)
    }

    /// Look up a registered schema version
    pub async fn get(&self, event_type: &str, version: &str) -> Option<SchemaInfo> {
        let schemas = self.schemas.read().await;
        schemas
            .get(event_type)
            .and_then(|versions| versions.get(version))
            .map(|r| r.info.clone())
    }

    /// The serializer registered for a schema version
    pub async fn serializer_for(
        &self,
        event_type: &str,
        version: &str,
    ) -> Result<Arc<dyn EventSerializer>> {
        let schemas = self.schemas.read().await;
        schemas
            .get(event_type)
            .and_then(|versions| versions.get(version))
            .map(|r| r.serializer.clone())
            .ok_or_else(|| EventError::UnknownSchema {
                event_type: event_type.to_string(),
                version: version.to_string(),
            })
    }

    /// The highest registered version for a type
    pub async fn latest_version(&self, event_type: &str) -> Option<SchemaInfo> {
        self.latest.read().await.get(event_type).cloned()
    }

    /// Whether two registered versions of a type can decode one another
    ///
    /// Unregistered versions are never compatible.
    pub async fn is_compatible(&self, event_type: &str, from: &str, to: &str) -> bool {
        let schemas = self.schemas.read().await;
        let Some(versions) = schemas.get(event_type) else {
            return false;
        };
        match (versions.get(from), versions.get(to)) {
            (Some(a), Some(b)) => a.info.is_compatible_with(&b.info),
            _ => false,
        }
    }

    /// Re-stamp an envelope at another version of the same type
    ///
    /// Within a major this is an identity cast; across majors it fails —
    /// real payload migration happens where schemas are authored, not here.
    pub async fn migrate(&self, envelope: &EventEnvelope, to_version: &str) -> Result<EventEnvelope> {
        if !self
            .is_compatible(&envelope.event_type, &envelope.schema_version, to_version)
            .await
        {
            return Err(EventError::IncompatibleSchema {
                event_type: envelope.event_type.clone(),
                from: envelope.schema_version.clone(),
                to: to_version.to_string(),
            });
        }

        let mut migrated = envelope.clone();
        migrated.schema_version = to_version.to_string();
        Ok(migrated)
    }
}
