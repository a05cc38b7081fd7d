//! Persisted dataset name → label file name mapping.
use crate::error::Result;
use crate::io::raw::write_atomic;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// JSON-backed mapping. Every mutation rewrites the file through a temp file
/// and rename, with the write lock held, so readers never see a torn file.
#[derive(Debug)]
pub struct LabelMappingStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl LabelMappingStore {
    /// Load from `path`. A missing or unreadable file yields an empty mapping.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_entries(&path);
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, dataset: &str) -> Option<String> {
        self.entries.read().get(dataset).cloned()
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.entries.read().contains_key(dataset)
    }

    pub fn all(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }

    /// Add or replace the mapping for `dataset`.
    pub fn insert(&self, dataset: &str, label_file: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(dataset.to_string(), label_file.to_string());
        self.persist(&next)?;
        *entries = next;
        info!("label mapping added: {dataset} -> {label_file}");
        Ok(())
    }

    /// Insert several mappings with a single write.
    pub fn extend(&self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.extend(pairs.iter().cloned());
        self.persist(&next)?;
        *entries = next;
        info!("label mappings added: {}", pairs.len());
        Ok(())
    }

    /// Drop the mapping for `dataset`, returning the label file it pointed at.
    pub fn remove(&self, dataset: &str) -> Result<Option<String>> {
        let mut entries = self.entries.write();
        if !entries.contains_key(dataset) {
            return Ok(None);
        }
        let mut next = entries.clone();
        let removed = next.remove(dataset);
        self.persist(&next)?;
        *entries = next;
        info!("label mapping removed for {dataset}");
        Ok(removed)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(entries)
            .map_err(|err| crate::error::SpikeError::invalid_data(&self.path, err.to_string()))?;
        json.push(b'\n');
        write_atomic(&self.path, &json)
    }
}

fn read_entries(path: &Path) -> BTreeMap<String, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            warn!("cannot read label mapping {}: {err}", path.display());
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "label mapping {} is corrupt ({err}); starting empty",
                path.display()
            );
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_or_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = LabelMappingStore::load(dir.path().join("absent.json"));
        assert!(store.all().is_empty());

        let corrupt = dir.path().join("mapping.json");
        fs::write(&corrupt, "{\"a.pt\": ").unwrap();
        let store = LabelMappingStore::load(&corrupt);
        assert!(store.get("a.pt").is_none());
    }

    #[test]
    fn mutations_persist_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("mapping.json");
        let store = LabelMappingStore::load(&path);
        store.insert("a.pt", "a_labels.json").unwrap();
        store.insert("b.bin", "b_spikes.npy").unwrap();
        assert_eq!(store.remove("a.pt").unwrap().as_deref(), Some("a_labels.json"));
        assert_eq!(store.remove("a.pt").unwrap(), None);

        let reloaded = LabelMappingStore::load(&path);
        assert_eq!(reloaded.all().len(), 1);
        assert_eq!(reloaded.get("b.bin").as_deref(), Some("b_spikes.npy"));
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
