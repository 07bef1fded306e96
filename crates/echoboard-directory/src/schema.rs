//! Lazy config-schema upgrades.
//!
//! # Purpose
//! Stored project configuration carries a schema version and is upgraded on
//! read, not by offline migration. The directory writes the upgraded blob
//! back conditioned on an unchanged concurrency token; when that race is
//! lost the upgrade is simply re-attempted on a later read.
use crate::error::{StoreError, StoreResult};
use serde_json::{Value, json};

pub const CURRENT_CONFIG_SCHEMA_VERSION: i64 = 2;

/// Returns the upgraded config JSON when the stored blob is behind the
/// current schema version, `None` when it is already current.
pub fn upgrade(config_json: &str) -> StoreResult<Option<String>> {
    let mut value: Value = serde_json::from_str(config_json)
        .map_err(|err| StoreError::Integrity(format!("config json does not parse: {err}")))?;
    if !value.is_object() {
        return Err(StoreError::Integrity("config json is not an object".into()));
    }
    let mut version = value
        .get("schemaVersion")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    if version >= CURRENT_CONFIG_SCHEMA_VERSION {
        return Ok(None);
    }
    while version < CURRENT_CONFIG_SCHEMA_VERSION {
        match version {
            1 => upgrade_v1_to_v2(&mut value),
            other => {
                return Err(StoreError::Integrity(format!(
                    "unknown config schema version {other}"
                )));
            }
        }
        version += 1;
    }
    value["schemaVersion"] = json!(version);
    serde_json::to_string(&value)
        .map(Some)
        .map_err(|err| StoreError::Integrity(format!("upgraded config does not serialize: {err}")))
}

// v1 stored `support.express` as a bare enabled flag; v2 made it an object
// carrying the optional emoji whitelist.
fn upgrade_v1_to_v2(value: &mut Value) {
    let Some(categories) = value.get_mut("categories").and_then(Value::as_array_mut) else {
        return;
    };
    for category in categories {
        let Some(support) = category.get_mut("support").and_then(Value::as_object_mut) else {
            continue;
        };
        match support.get("express") {
            Some(Value::Bool(true)) => {
                support.insert("express".to_string(), json!({}));
            }
            Some(Value::Bool(false)) => {
                support.remove("express");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_config_is_left_alone() {
        let json = r#"{"schemaVersion":2,"slug":"acme","categories":[]}"#;
        assert!(upgrade(json).expect("upgrade").is_none());
    }

    #[test]
    fn missing_version_reads_as_v1_and_upgrades() {
        let json = r#"{"slug":"acme","categories":[{"categoryId":"c1","name":"Ideas","support":{"express":true,"fund":false}}]}"#;
        let upgraded = upgrade(json).expect("upgrade").expect("behind");
        let value: Value = serde_json::from_str(&upgraded).expect("parse");
        assert_eq!(value["schemaVersion"], json!(CURRENT_CONFIG_SCHEMA_VERSION));
        assert!(value["categories"][0]["support"]["express"].is_object());
    }

    #[test]
    fn disabled_express_flag_is_dropped() {
        let json = r#"{"schemaVersion":1,"slug":"acme","categories":[{"categoryId":"c1","name":"Ideas","support":{"express":false,"fund":true}}]}"#;
        let upgraded = upgrade(json).expect("upgrade").expect("behind");
        let value: Value = serde_json::from_str(&upgraded).expect("parse");
        assert!(value["categories"][0]["support"].get("express").is_none());
    }

    #[test]
    fn unknown_version_is_an_integrity_error() {
        let err = upgrade(r#"{"schemaVersion":0}"#).expect_err("unknown version");
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[test]
    fn malformed_json_is_an_integrity_error() {
        let err = upgrade("not json").expect_err("malformed");
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
