use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppKeyError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("app info has no appKeys object")]
    MissingAppKeys,
    #[error("app key {0} does not map to a non-negative integer")]
    InvalidIndex(String),
    #[error("app message must be a JSON object")]
    NotAnObject,
}

/// Names a watch app declared for its message keys, and their numeric ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppKeyMap {
    keys: HashMap<String, u32>,
}

/// Result of mapping a page message onto numeric watch keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub message: JsonMap<String, Value>,
    /// Keys that were neither declared nor numeric.
    pub discarded: Vec<String>,
}

impl AppKeyMap {
    /// Read the `appKeys` object out of an app's `appinfo.json`.
    pub fn from_app_info(app_info: &str) -> Result<Self, AppKeyError> {
        let info: Value = serde_json::from_str(app_info)?;
        let keys = info.get("appKeys").ok_or(AppKeyError::MissingAppKeys)?;
        Self::from_keys(keys)
    }

    pub fn from_keys(keys: &Value) -> Result<Self, AppKeyError> {
        let object = keys.as_object().ok_or(AppKeyError::MissingAppKeys)?;
        let keys = object
            .iter()
            .map(|(name, index)| {
                index
                    .as_u64()
                    .and_then(|index| u32::try_from(index).ok())
                    .map(|index| (name.clone(), index))
                    .ok_or_else(|| AppKeyError::InvalidIndex(name.clone()))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { keys })
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.keys.get(name).copied()
    }

    /// Rewrite a serialized page message for the watch. Declared names become
    /// their numeric id, keys that already are integers pass through, the
    /// rest is dropped.
    pub fn translate(&self, payload: &str) -> Result<Translation, AppKeyError> {
        let Value::Object(input) = serde_json::from_str::<Value>(payload)? else {
            return Err(AppKeyError::NotAnObject);
        };

        let mut message = JsonMap::new();
        let mut discarded = Vec::new();
        for (key, value) in input {
            if let Some(index) = self.index_of(&key) {
                message.insert(index.to_string(), value);
            } else if is_integer_key(&key) {
                message.insert(key, value);
            } else {
                tracing::warn!(
                    target: "appkeys",
                    key = %key,
                    "discarded key, not declared by the app and not an integer"
                );
                discarded.push(key);
            }
        }

        Ok(Translation { message, discarded })
    }
}

fn is_integer_key(key: &str) -> bool {
    key.parse::<i32>()
        .map(|parsed| parsed.to_string() == key)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn keys() -> AppKeyMap {
        AppKeyMap::from_app_info(
            r#"{"uuid": "x", "appKeys": {"KEY_COLOR": 0, "KEY_UNITS": 7}}"#,
        )
        .unwrap()
    }

    #[test]
    fn maps_declared_names() {
        let translation = keys()
            .translate(r#"{"KEY_COLOR": "red", "KEY_UNITS": 1}"#)
            .unwrap();
        assert_eq!(translation.message.get("0"), Some(&json!("red")));
        assert_eq!(translation.message.get("7"), Some(&json!(1)));
        assert!(translation.discarded.is_empty());
    }

    #[test]
    fn keeps_integer_keys_and_drops_unknown() {
        let translation = keys()
            .translate(r#"{"12": true, "007": 1, "nope": 2}"#)
            .unwrap();
        assert_eq!(translation.message.get("12"), Some(&json!(true)));
        assert_eq!(translation.message.len(), 1);
        let mut discarded = translation.discarded;
        discarded.sort();
        assert_eq!(discarded, vec!["007".to_string(), "nope".to_string()]);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            keys().translate("[1, 2]"),
            Err(AppKeyError::NotAnObject)
        ));
        assert!(matches!(
            AppKeyMap::from_app_info(r#"{"uuid": "x"}"#),
            Err(AppKeyError::MissingAppKeys)
        ));
        assert!(matches!(
            AppKeyMap::from_keys(&json!({"KEY": -1})),
            Err(AppKeyError::InvalidIndex(_))
        ));
    }
}
