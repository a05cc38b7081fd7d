//! Known datasets, the active one, and their label bindings.
use crate::backend::{self, ArrayBackend, BackendKind};
use crate::config::ViewerConfig;
use crate::error::{Result, SpikeError};
use crate::io::{labels::load_label_set, raw};
use crate::labels::{LabelSummary, SpikeLabelSet};
use crate::mapping::LabelMappingStore;
use crate::session::Session;
use crate::window::ServiceSettings;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions accepted as label files by auto-detection.
pub const LABEL_EXTENSIONS: &[&str] = &["json", "npy", "txt"];

/// An opened dataset. Requests hold an `Arc` to one of these for their whole
/// duration, so switching datasets never changes data under a running request.
#[derive(Debug)]
pub struct DatasetDescriptor {
    pub name: String,
    pub backend: Arc<ArrayBackend>,
    pub labels: Option<Arc<SpikeLabelSet>>,
    /// Label file named by the mapping, even if it failed to load.
    pub label_file: Option<String>,
}

impl DatasetDescriptor {
    pub fn num_channels(&self) -> usize {
        self.backend.num_channels()
    }

    pub fn num_timepoints(&self) -> usize {
        self.backend.num_timepoints()
    }

    pub fn label_summary(&self) -> LabelSummary {
        self.labels
            .as_ref()
            .map(|l| l.summary())
            .unwrap_or_else(LabelSummary::unavailable)
    }

    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            name: self.name.clone(),
            channels: self.num_channels(),
            timepoints: self.num_timepoints(),
            backend: self.backend.kind(),
            source: self.backend.source().map(Path::to_path_buf),
            label_file: self.label_file.clone(),
            labels: self.label_summary(),
        }
    }
}

/// Serialisable view of an opened dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub channels: usize,
    pub timepoints: usize,
    pub backend: BackendKind,
    pub source: Option<PathBuf>,
    pub label_file: Option<String>,
    pub labels: LabelSummary,
}

/// One row of [`DatasetRegistry::list_datasets`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    pub size_bytes: u64,
    pub size_formatted: String,
    pub has_labels: bool,
    pub is_current: bool,
    /// (channels, timepoints) when known without opening the file.
    pub shape: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Resident {
        backend: Arc<ArrayBackend>,
        labels: Option<Arc<SpikeLabelSet>>,
    },
}

/// Table of datasets plus the current-dataset pointer.
///
/// Activation, removal and label rebinding are serialised by one mutex;
/// readers only touch the `RwLock`s and never wait on a load.
pub struct DatasetRegistry {
    config: ViewerConfig,
    entries: RwLock<BTreeMap<String, Source>>,
    mappings: LabelMappingStore,
    current: RwLock<Option<Arc<DatasetDescriptor>>>,
    activation: Mutex<()>,
}

impl DatasetRegistry {
    /// Registry over `config`, loading the mapping file and scanning the
    /// datasets folder when it exists.
    pub fn open(config: ViewerConfig) -> Result<Self> {
        let mappings = LabelMappingStore::load(&config.mapping_path);
        let registry = Self {
            config,
            entries: RwLock::new(BTreeMap::new()),
            mappings,
            current: RwLock::new(None),
            activation: Mutex::new(()),
        };
        if registry.config.datasets_dir.is_dir() {
            registry.scan()?;
        }
        Ok(registry)
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Register every recording directly inside `datasets_dir`.
    ///
    /// Sidecar files are skipped. Returns the number of new entries.
    pub fn scan(&self) -> Result<usize> {
        let dir = &self.config.datasets_dir;
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || raw::is_sidecar(&path) || !backend::is_supported(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.push((name.to_string(), path.clone()));
            }
        }
        let mut entries = self.entries.write();
        let mut added = 0;
        for (name, path) in found {
            if !entries.contains_key(&name) {
                entries.insert(name, Source::File(path));
                added += 1;
            }
        }
        info!("scanned {}: {added} new dataset(s)", dir.display());
        Ok(added)
    }

    /// Register a file-backed dataset under `name`.
    pub fn register_file(&self, name: &str, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(SpikeError::not_found("dataset file", path.display().to_string()));
        }
        self.entries
            .write()
            .insert(name.to_string(), Source::File(path.to_path_buf()));
        info!("registered dataset {name} -> {}", path.display());
        Ok(())
    }

    /// Register a resident dataset. Explicit labels win over the mapping.
    pub fn register(&self, name: &str, backend: ArrayBackend, labels: Option<SpikeLabelSet>) {
        self.entries.write().insert(
            name.to_string(),
            Source::Resident {
                backend: Arc::new(backend),
                labels: labels.map(Arc::new),
            },
        );
        info!("registered resident dataset {name}");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn list_datasets(&self) -> Vec<DatasetSummary> {
        let current = self.current();
        let entries = self.entries.read();
        entries
            .iter()
            .map(|(name, source)| {
                let is_current = current.as_ref().map(|c| &c.name == name).unwrap_or(false);
                let (size_bytes, shape, resident_labels) = match source {
                    Source::File(path) => {
                        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                        let shape = current
                            .as_ref()
                            .filter(|_| is_current)
                            .map(|c| c.backend.shape());
                        (size, shape, false)
                    }
                    Source::Resident { backend, labels } => {
                        let (ch, t) = backend.shape();
                        ((ch * t * 2) as u64, Some((ch, t)), labels.is_some())
                    }
                };
                DatasetSummary {
                    name: name.clone(),
                    size_bytes,
                    size_formatted: format_size(size_bytes),
                    has_labels: resident_labels || self.mappings.contains(name),
                    is_current,
                    shape,
                }
            })
            .collect()
    }

    /// Make `name` the current dataset.
    ///
    /// The previous backend is released before the new one opens, so at most
    /// one recording is held by the registry at a time.
    pub fn activate(&self, name: &str) -> Result<Arc<DatasetDescriptor>> {
        let _guard = self.activation.lock();
        let source = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SpikeError::not_found("dataset", name))?;
        if let Some(current) = self.current() {
            if current.name == name {
                return Ok(current);
            }
        }
        if let Some(previous) = self.current.write().take() {
            debug!("released dataset {}", previous.name);
        }
        let descriptor = Arc::new(self.build(name, source)?);
        *self.current.write() = Some(descriptor.clone());
        info!(
            "activated {name}: {} channels x {} samples ({:?}), labels: {}",
            descriptor.num_channels(),
            descriptor.num_timepoints(),
            descriptor.backend.kind(),
            descriptor.labels.is_some()
        );
        Ok(descriptor)
    }

    fn build(&self, name: &str, source: Source) -> Result<DatasetDescriptor> {
        let (backend, resident_labels) = match source {
            Source::File(path) => (Arc::new(backend::open_backend(&path, &self.config)?), None),
            Source::Resident { backend, labels } => (backend, labels),
        };
        let (labels, label_file) = match resident_labels {
            Some(labels) => (Some(labels), None),
            None => self.resolve_labels(name),
        };
        Ok(DatasetDescriptor {
            name: name.to_string(),
            backend,
            labels,
            label_file,
        })
    }

    /// Load the label file mapped to `name`. Failures leave the dataset
    /// without labels rather than failing activation.
    fn resolve_labels(&self, name: &str) -> (Option<Arc<SpikeLabelSet>>, Option<String>) {
        let Some(file) = self.mappings.get(name) else {
            return (None, None);
        };
        let path = self.config.labels_dir.join(&file);
        match load_label_set(&path) {
            Ok(labels) => {
                info!("{name}: loaded {} spike label(s) from {file}", labels.total_count());
                (Some(Arc::new(labels)), Some(file))
            }
            Err(err) => {
                warn!("{name}: label file {file} unusable: {err}");
                (None, Some(file))
            }
        }
    }

    pub fn current(&self) -> Option<Arc<DatasetDescriptor>> {
        self.current.read().clone()
    }

    /// Snapshot of the current dataset for a run of requests.
    pub fn session(&self) -> Result<Session> {
        let descriptor = self
            .current()
            .ok_or_else(|| SpikeError::not_found("active dataset", "none"))?;
        Ok(Session::new(descriptor, ServiceSettings::from(&self.config)))
    }

    /// Forget `name` and its label mapping. Files on disk are left alone.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.activation.lock();
        if self.entries.write().remove(name).is_none() {
            return Err(SpikeError::not_found("dataset", name));
        }
        self.mappings.remove(name)?;
        let mut current = self.current.write();
        if current.as_ref().map(|c| c.name == name).unwrap_or(false) {
            *current = None;
        }
        info!("removed dataset {name}");
        Ok(())
    }

    pub fn label_mappings(&self) -> BTreeMap<String, String> {
        self.mappings.all()
    }

    /// Bind `label_file` (relative to `labels_dir`) to `dataset`.
    pub fn add_label_mapping(&self, dataset: &str, label_file: &str) -> Result<()> {
        let path = self.config.labels_dir.join(label_file);
        if !path.is_file() {
            return Err(SpikeError::not_found("label file", path.display().to_string()));
        }
        self.mappings.insert(dataset, label_file)?;
        self.rebind_if_current(dataset);
        Ok(())
    }

    pub fn remove_label_mapping(&self, dataset: &str) -> Result<()> {
        if self.mappings.remove(dataset)?.is_none() {
            return Err(SpikeError::not_found("label mapping", dataset));
        }
        self.rebind_if_current(dataset);
        Ok(())
    }

    fn rebind_if_current(&self, dataset: &str) {
        let _guard = self.activation.lock();
        let Some(current) = self.current() else {
            return;
        };
        if current.name != dataset {
            return;
        }
        let resident = match self.entries.read().get(dataset) {
            Some(Source::Resident { labels, .. }) => labels.clone(),
            _ => None,
        };
        let (labels, label_file) = match resident {
            Some(labels) => (Some(labels), None),
            None => self.resolve_labels(dataset),
        };
        *self.current.write() = Some(Arc::new(DatasetDescriptor {
            name: current.name.clone(),
            backend: current.backend.clone(),
            labels,
            label_file,
        }));
        info!("rebound labels of current dataset {dataset}");
    }

    /// Pair unmapped datasets with label files by name. Returns the new pairs.
    pub fn auto_detect_mappings(&self) -> Result<Vec<(String, String)>> {
        let dir = &self.config.labels_dir;
        if !dir.is_dir() {
            return Err(SpikeError::not_found("labels folder", dir.display().to_string()));
        }
        let mut label_files: Vec<String> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_extension(p, LABEL_EXTENSIONS))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        label_files.sort();

        let datasets: Vec<String> = self.entries.read().keys().cloned().collect();
        let mappings = self.mappings.all();
        let mut claimed: Vec<(String, String)> = Vec::new();
        for label in &label_files {
            let base = label_base(label);
            if base.is_empty() {
                continue;
            }
            let Some(dataset) = datasets.iter().find(|d| d.starts_with(&base)) else {
                continue;
            };
            if mappings.contains_key(dataset) || claimed.iter().any(|(d, _)| d == dataset) {
                continue;
            }
            info!("auto-detected label mapping {dataset} -> {label}");
            claimed.push((dataset.clone(), label.clone()));
        }
        self.mappings.extend(&claimed)?;
        for (dataset, _) in &claimed {
            self.rebind_if_current(dataset);
        }
        Ok(claimed)
    }

    /// Label availability of the current dataset.
    pub fn label_summary(&self) -> LabelSummary {
        self.current()
            .map(|c| c.label_summary())
            .unwrap_or_else(LabelSummary::unavailable)
    }
}

/// Dataset name prefix a label file is expected to match.
fn label_base(label_file: &str) -> String {
    let stem = Path::new(label_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(label_file);
    stem.replace("_labels", "_data")
        .replace("_spike_times", "")
        .replace("_spikes", "")
        .replace("_times", "")
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Human readable size with two decimals (`1.50 MB`).
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}
