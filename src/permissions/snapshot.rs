//! Storage form of a resolved permission set.
//!
//! Hash-based containers never cross the storage boundary. A set is flattened into sorted
//! arrays (`enabled_modules`, `[module, key]` pairs) stamped with [`CACHE_VERSION`], and
//! rebuilt from those arrays on load.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::{AccessSource, AppModule, ResolvedPermissionSet};

/// Bump whenever the snapshot shape changes. Entries carrying any other version are dropped.
pub const CACHE_VERSION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionSnapshot {
    pub version: u32,
    pub user_id: Uuid,
    pub dealership_id: Uuid,
    pub source: AccessSource,
    pub enabled_modules: Vec<AppModule>,
    #[schema(value_type = Vec<Vec<String>>, example = json!([["car_wash", "view"]]))]
    pub permissions: Vec<(AppModule, String)>,
    /// Unix milliseconds at which the set was resolved.
    pub cached_at: i64,
}

impl PermissionSnapshot {
    pub fn from_set(set: &ResolvedPermissionSet, cached_at: i64) -> Self {
        let mut enabled_modules: Vec<AppModule> = set.enabled_modules.iter().copied().collect();
        enabled_modules.sort();

        let mut permissions: Vec<(AppModule, String)> = set
            .permissions
            .iter()
            .flat_map(|(module, keys)| keys.iter().map(move |k| (*module, k.clone())))
            .collect();
        permissions.sort();

        Self {
            version: CACHE_VERSION,
            user_id: set.user_id,
            dealership_id: set.dealership_id,
            source: set.source,
            enabled_modules,
            permissions,
            cached_at,
        }
    }

    pub fn into_set(self) -> ResolvedPermissionSet {
        let mut permissions: HashMap<AppModule, HashSet<String>> = HashMap::new();
        for (module, key) in self.permissions {
            permissions.entry(module).or_default().insert(key);
        }

        ResolvedPermissionSet {
            user_id: self.user_id,
            dealership_id: self.dealership_id,
            source: self.source,
            enabled_modules: self.enabled_modules.into_iter().collect(),
            permissions,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("snapshot is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("snapshot version {found} does not match {expected}")]
    StaleVersion { found: u32, expected: u32 },
}

pub fn encode(set: &ResolvedPermissionSet, cached_at: i64) -> Result<String, SnapshotError> {
    serde_json::to_string(&PermissionSnapshot::from_set(set, cached_at))
        .map_err(SnapshotError::Encode)
}

/// Decodes a stored snapshot. Any version other than [`CACHE_VERSION`] is rejected, even
/// when the rest of the payload would parse.
pub fn decode(raw: &str) -> Result<PermissionSnapshot, SnapshotError> {
    #[derive(Deserialize)]
    struct VersionHeader {
        version: u32,
    }

    let header: VersionHeader = serde_json::from_str(raw).map_err(SnapshotError::Malformed)?;
    if header.version != CACHE_VERSION {
        return Err(SnapshotError::StaleVersion {
            found: header.version,
            expected: CACHE_VERSION,
        });
    }

    serde_json::from_str(raw).map_err(SnapshotError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ResolvedPermissionSet {
        let mut set = ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::CustomRole {
                role_id: Uuid::new_v4(),
            },
        );
        set.enabled_modules.insert(AppModule::CarWash);
        set.enabled_modules.insert(AppModule::Stock);
        set.permissions
            .entry(AppModule::CarWash)
            .or_default()
            .extend(["view".to_string(), "create_orders".to_string()]);
        set
    }

    #[test]
    fn test_round_trip_preserves_set() {
        let set = sample_set();
        let raw = encode(&set, 1_700_000_000_000).unwrap();
        let snapshot = decode(&raw).unwrap();
        assert_eq!(snapshot.cached_at, 1_700_000_000_000);
        assert_eq!(snapshot.into_set(), set);
    }

    #[test]
    fn test_round_trip_empty_set() {
        let set = ResolvedPermissionSet::denied(Uuid::new_v4(), Uuid::new_v4(), AccessSource::NoRole);
        let raw = encode(&set, 0).unwrap();
        assert_eq!(decode(&raw).unwrap().into_set(), set);
    }

    #[test]
    fn test_round_trip_every_module() {
        let mut set = ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::CustomRole {
                role_id: Uuid::new_v4(),
            },
        );
        for module in AppModule::ALL {
            set.enabled_modules.insert(module);
            set.permissions
                .entry(module)
                .or_default()
                .extend(["view".to_string(), "edit".to_string(), "admin".to_string()]);
        }
        let raw = encode(&set, 42).unwrap();
        assert_eq!(decode(&raw).unwrap().into_set(), set);
    }

    #[test]
    fn test_permissions_are_stored_as_pairs() {
        let raw = encode(&sample_set(), 0).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let pairs = value["permissions"].as_array().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], serde_json::json!(["car_wash", "create_orders"]));
        assert_eq!(pairs[1], serde_json::json!(["car_wash", "view"]));
        assert_eq!(value["enabled_modules"], serde_json::json!(["car_wash", "stock"]));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let set = sample_set();
        assert_eq!(encode(&set, 7).unwrap(), encode(&set.clone(), 7).unwrap());
    }

    #[test]
    fn test_older_version_is_rejected() {
        let mut snapshot = PermissionSnapshot::from_set(&sample_set(), 0);
        snapshot.version = 3;
        let raw = serde_json::to_string(&snapshot).unwrap();
        assert!(matches!(
            decode(&raw),
            Err(SnapshotError::StaleVersion {
                found: 3,
                expected: CACHE_VERSION
            })
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(decode("not json"), Err(SnapshotError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"version":4,"user_id":"nope"}"#),
            Err(SnapshotError::Malformed(_))
        ));
    }
}
