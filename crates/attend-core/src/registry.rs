//! Identity registry: classifier id -> display name.
//!
//! Produced by the offline training step as `labels.json`, a JSON object
//! with stringified ids as keys. Loaded once and read-only afterwards.

use crate::types::IdentityId;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry file not found: {0}; run the training step first")]
    NotFound(String),
    #[error("failed to read registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed registry JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("registry key is not an integer id: {0:?}")]
    InvalidId(String),
    #[error("registry id {0} appears more than once")]
    DuplicateId(IdentityId),
    #[error("registry contains no identities")]
    Empty,
}

/// Immutable mapping from classifier id to person name.
///
/// Names are not required to be unique; two ids with the same name merge at
/// the name level when attendance is tallied.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    names: BTreeMap<IdentityId, String>,
}

impl IdentityRegistry {
    /// Load a `{"0": "Alice", "1": "Bob"}` registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RegistryError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            identities = registry.len(),
            "loaded identity registry"
        );
        Ok(registry)
    }

    /// Parse the JSON object form.
    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let entries: HashMap<String, String> = serde_json::from_str(raw)?;
        let mut names = BTreeMap::new();
        for (key, name) in entries {
            let id = key
                .trim()
                .parse::<IdentityId>()
                .map_err(|_| RegistryError::InvalidId(key.clone()))?;
            if names.insert(id, name).is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
        }
        if names.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { names })
    }

    /// Positional registry: the first name gets id 0, the next id 1, and so on.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .enumerate()
            .map(|(i, n)| (i as IdentityId, n.into()))
            .collect();
        Self { names }
    }

    pub fn name(&self, id: IdentityId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: IdentityId) -> bool {
        self.names.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Entries ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (IdentityId, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }
}
