//! Document store boundary.
//!
//! The store is opaque to the rest of the crate: records go in and come out
//! as [`Document`]s keyed by `(collection, key)`. Like the backend it stands
//! in for, it accepts explicit null and rejects any unset value.
//!
//! [`FsStore`] keeps one pretty-printed JSON file per record under
//! `<root>/<collection>/<key>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::contract::Document;

pub trait DocumentStore: Send + Sync {
    /// Write a full record, replacing any previous one.
    fn put(&self, collection: &str, key: &str, doc: &Document) -> Result<()>;

    /// Read a record. `Ok(None)` when it does not exist.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Every record in a collection, ordered by key.
    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>>;
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        for part in [collection, key] {
            if part.is_empty() || part.contains(['/', '\\']) || part.starts_with('.') {
                bail!("Invalid store key '{}'", part);
            }
        }
        Ok(self.root.join(collection).join(format!("{}.json", key)))
    }
}

impl DocumentStore for FsStore {
    fn put(&self, collection: &str, key: &str, doc: &Document) -> Result<()> {
        let path = self.record_path(collection, key)?;
        let json = doc.to_json(&format!("{}/{}", collection, key))?;

        let dir = self.root.join(collection);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        let content = serde_json::to_string_pretty(&json).context("Failed to serialize record")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write record {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace record {}", path.display()))?;
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let path = self.record_path(collection, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read record {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record {}", path.display()))?;
        Ok(Some(Document::from(value)))
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let dir = self.root.join(collection);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys: Vec<String> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        keys.sort();

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.get(collection, &key)? {
                records.push((key, doc));
            }
        }
        Ok(records)
    }
}
