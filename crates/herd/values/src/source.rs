//! Config sources: where layered values come from

use crate::error::{Result, SourceError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage class of a named source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Plain-text content
    ConfigMap,
    /// Base64-encoded content
    Secret,
}

impl SourceKind {
    fn dir_name(&self) -> &'static str {
        match self {
            SourceKind::ConfigMap => "configmaps",
            SourceKind::Secret => "secrets",
        }
    }

    /// Turn stored bytes into document text
    pub fn decode(&self, raw: &[u8]) -> Result<String> {
        let bytes = match self {
            SourceKind::ConfigMap => raw.to_vec(),
            SourceKind::Secret => {
                let trimmed: Vec<u8> = raw
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                STANDARD
                    .decode(trimmed)
                    .map_err(|e| SourceError::Decode(e.to_string()))?
            }
        };
        String::from_utf8(bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::ConfigMap => f.write_str("ConfigMap"),
            SourceKind::Secret => f.write_str("Secret"),
        }
    }
}

/// Read access to named, keyed config sources.
///
/// Returns the raw stored bytes; secret content is still encoded.
#[async_trait]
pub trait ConfigSourceProvider: Send + Sync {
    async fn get(&self, kind: SourceKind, namespace: &str, name: &str, key: &str)
        -> Result<Vec<u8>>;
}

/// Parse a YAML values document.
///
/// An empty or null document is an empty map; any other non-map document is
/// an error.
pub fn parse_values(text: &str) -> Result<Map<String, Value>> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value =
        serde_yaml::from_str(text).map_err(|e| SourceError::Parse(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::Array(_) => Err(SourceError::NotAMap("array")),
        Value::String(_) => Err(SourceError::NotAMap("string")),
        Value::Number(_) => Err(SourceError::NotAMap("number")),
        Value::Bool(_) => Err(SourceError::NotAMap("bool")),
    }
}

type SourceKey = (SourceKind, String, String);

/// In-memory config sources for development and testing
#[derive(Clone, Default)]
pub struct InMemoryConfigSource {
    sources: Arc<DashMap<SourceKey, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryConfigSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under a key, creating the source if needed
    pub fn insert_raw(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        raw: impl Into<Vec<u8>>,
    ) {
        self.sources
            .entry((kind, namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), raw.into());
    }

    /// Store a ConfigMap key
    pub fn insert_config_map(&self, namespace: &str, name: &str, key: &str, text: &str) {
        self.insert_raw(SourceKind::ConfigMap, namespace, name, key, text);
    }

    /// Store secret content, encoding it the way the API server returns it
    pub fn insert_secret(&self, namespace: &str, name: &str, key: &str, text: &str) {
        self.insert_raw(SourceKind::Secret, namespace, name, key, STANDARD.encode(text));
    }

    /// Remove a ConfigMap or Secret
    pub fn remove(&self, kind: SourceKind, namespace: &str, name: &str) {
        self.sources
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }

    /// Number of stored ConfigMaps and Secrets
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl ConfigSourceProvider for InMemoryConfigSource {
    async fn get(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        let source = self
            .sources
            .get(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| SourceError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        source
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::MissingKey {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })
    }
}

/// Config sources laid out on disk.
///
/// Layout: `<root>/<namespace>/configmaps/<name>/<key>` and
/// `<root>/<namespace>/secrets/<name>/<key>`. Secret files hold base64.
#[derive(Debug, Clone)]
pub struct DirectoryConfigSource {
    root: PathBuf,
}

impl DirectoryConfigSource {
    /// Read sources under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn source_dir(&self, kind: SourceKind, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(kind.dir_name()).join(name)
    }
}

#[async_trait]
impl ConfigSourceProvider for DirectoryConfigSource {
    async fn get(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        let dir = self.source_dir(kind, namespace, name);

        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SourceError::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::read(dir.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::MissingKey {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
