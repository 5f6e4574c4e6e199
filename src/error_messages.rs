//! Controller error id to description lookup
//!
//! Loaded from a JSON array of `{ "id": 22, "en": { "description": "..." } }` entries.

use crate::{Mg400Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct Entry {
    id: i64,
    en: Localized,
}

#[derive(Debug, Deserialize)]
struct Localized {
    description: String,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorMessages {
    messages: HashMap<i64, String>,
}

impl ErrorMessages {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Mg400Error::Config(format!("Failed to read error table {}: {}", path.display(), e))
        })?;
        let messages = Self::from_json(&contents)?;
        info!("Loaded {} error messages from {}", messages.len(), path.display());
        Ok(messages)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let entries: Vec<Entry> = serde_json::from_str(contents)?;
        let mut messages = HashMap::with_capacity(entries.len());
        for entry in entries {
            debug!("Error {}: {}", entry.id, entry.en.description);
            messages.insert(entry.id, entry.en.description);
        }
        Ok(Self { messages })
    }

    pub fn lookup(&self, id: i64) -> Result<&str> {
        self.messages
            .get(&id)
            .map(String::as_str)
            .ok_or(Mg400Error::UnknownErrorId(id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"[
        { "id": 22, "en": { "description": "Hand-guided teaching failed" } },
        { "id": 69, "en": { "description": "Joint position deviation too large" }, "zh": {} }
    ]"#;

    #[test]
    fn test_lookup() {
        let messages = ErrorMessages::from_json(TABLE).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.lookup(22).unwrap(), "Hand-guided teaching failed");
        assert!(matches!(messages.lookup(1), Err(Mg400Error::UnknownErrorId(1))));
    }

    #[test]
    fn test_malformed_table() {
        assert!(matches!(
            ErrorMessages::from_json(r#"[{ "id": 1 }]"#),
            Err(Mg400Error::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ErrorMessages::load_from_path("/nonexistent/errors.json").unwrap_err();
        assert!(matches!(err, Mg400Error::Config(_)));
    }

    #[test]
    fn test_shipped_table_loads() {
        let messages =
            ErrorMessages::load_from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/config/error_messages.json")).unwrap();
        assert!(!messages.is_empty());
        assert!(messages.lookup(69).is_ok());
    }
}
