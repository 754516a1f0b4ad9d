// ABOUTME: Schema version tagging and forward migration of persisted state.
// ABOUTME: States with no migration path are rejected, never guessed at.

use crate::types::standard_phases;
use serde_json::Value;

use super::error::StoreError;

/// Current persisted-state schema version.
///
/// v1 predates the per-deployment phase topology; v2 embeds the `phases`
/// list so persisted deployments survive topology changes.
pub const SCHEMA_VERSION: u32 = 2;

type Migration = fn(Value) -> Result<Value, String>;

/// Registered migration chain: one total, deterministic step per version gap.
const MIGRATIONS: &[(u32, Migration)] = &[(1, migrate_v1_to_v2)];

/// Walk the migration chain from the state's embedded version up to
/// [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns `UnsupportedVersion` when the version is newer than this build
/// or a gap has no registered migration, and `CorruptState` when the
/// payload lacks a readable version tag.
pub fn migrate(deployment_id: &str, mut value: Value) -> Result<Value, StoreError> {
    let found = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::CorruptState {
            deployment_id: deployment_id.to_string(),
            reason: "missing schema_version".to_string(),
        })?;

    if found > u64::from(SCHEMA_VERSION) {
        return Err(StoreError::UnsupportedVersion {
            deployment_id: deployment_id.to_string(),
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let mut version = found as u32;
    while version < SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|(from, _)| *from == version)
            .ok_or_else(|| StoreError::UnsupportedVersion {
                deployment_id: deployment_id.to_string(),
                found,
                supported: SCHEMA_VERSION,
            })?;

        value = (step.1)(value).map_err(|reason| StoreError::CorruptState {
            deployment_id: deployment_id.to_string(),
            reason,
        })?;
        version += 1;

        tracing::debug!(
            deployment = deployment_id,
            from = version - 1,
            to = version,
            "migrated persisted state"
        );
    }

    Ok(value)
}

/// v1 states have no phase topology field; backfill the standard list.
fn migrate_v1_to_v2(mut value: Value) -> Result<Value, String> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| "state payload is not an object".to_string())?;

    if !object.contains_key("phases") {
        let phases = serde_json::to_value(standard_phases()).map_err(|e| e.to_string())?;
        object.insert("phases".to_string(), phases);
    }
    object.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreErrorKind;
    use serde_json::json;

    #[test]
    fn current_version_passes_through() {
        let value = json!({"schema_version": SCHEMA_VERSION, "phase": "assess"});
        let migrated = migrate("dep-1", value.clone()).unwrap();
        assert_eq!(migrated, value);
    }

    #[test]
    fn v1_state_gains_phase_topology() {
        let value = json!({"schema_version": 1, "phase": "assess"});
        let migrated = migrate("dep-1", value).unwrap();
        assert_eq!(migrated["schema_version"], json!(SCHEMA_VERSION));
        assert_eq!(
            migrated["phases"],
            json!(["assess", "construct", "orchestrate", "execute"])
        );
    }

    #[test]
    fn future_version_is_unsupported() {
        let value = json!({"schema_version": SCHEMA_VERSION + 1});
        let err = migrate("dep-1", value).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::UnsupportedVersion);
    }

    #[test]
    fn version_gap_without_migration_is_unsupported() {
        let value = json!({"schema_version": 0});
        let err = migrate("dep-1", value).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::UnsupportedVersion);
    }

    #[test]
    fn missing_version_is_corrupt() {
        let value = json!({"phase": "assess"});
        let err = migrate("dep-1", value).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::CorruptState);
    }
}
