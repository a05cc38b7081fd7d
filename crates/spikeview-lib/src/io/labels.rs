use crate::error::{Result, SpikeError};
use crate::io::{npy, text};
use crate::labels::SpikeLabelSet;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Load a label file, choosing the parser from the extension.
///
/// `.json` arrays are global and objects keyed by channel are per-channel;
/// `.npy` holds a 1-D integer vector; anything else is a newline list.
pub fn load_label_set(path: &Path) -> Result<SpikeLabelSet> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !path.exists() {
        return Err(SpikeError::not_found("label file", path.display().to_string()));
    }
    match ext.as_str() {
        "json" => {
            let raw = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|err| SpikeError::invalid_data(path, err.to_string()))?;
            from_json(&value, path)
        }
        "npy" => Ok(SpikeLabelSet::global(npy::read_indices(path)?)),
        _ => Ok(SpikeLabelSet::global(text::read_event_indices(path)?)),
    }
}

fn from_json(value: &Value, path: &Path) -> Result<SpikeLabelSet> {
    match value {
        Value::Array(items) => Ok(SpikeLabelSet::global(index_list(items, path)?)),
        Value::Object(entries) => {
            let mut map = BTreeMap::new();
            for (key, items) in entries {
                let channel: usize = key.trim().parse().map_err(|_| {
                    SpikeError::invalid_data(path, format!("channel key {key:?} is not an index"))
                })?;
                let items = items.as_array().ok_or_else(|| {
                    SpikeError::invalid_data(path, format!("channel {channel} is not a list"))
                })?;
                map.insert(channel, index_list(items, path)?);
            }
            Ok(SpikeLabelSet::per_channel(map))
        }
        _ => Err(SpikeError::invalid_data(
            path,
            "expected a list of indices or an object of per-channel lists",
        )),
    }
}

fn index_list(items: &[Value], path: &Path) -> Result<Vec<usize>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .or_else(|| {
                    item.as_f64()
                        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                        .map(|f| f as u64)
                })
                .map(|v| v as usize)
                .ok_or_else(|| {
                    SpikeError::invalid_data(path, format!("{item} is not a sample index"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn json_array_is_global_and_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_labels.json");
        fs::write(&path, "[900, 100, 500.0]").unwrap();
        let set = load_label_set(&path).unwrap();
        assert_eq!(set, SpikeLabelSet::Global(vec![100, 500, 900]));
    }

    #[test]
    fn json_object_is_per_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_labels.json");
        fs::write(&path, r#"{"5": [900, 100, 500], "7": []}"#).unwrap();
        let set = load_label_set(&path).unwrap();
        assert_eq!(set.kind(), LabelKind::PerChannel);
        assert_eq!(set.indices_for(5), &[100, 500, 900]);
        assert!(set.indices_for(7).is_empty());
    }

    #[test]
    fn text_fallback_and_bad_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_spikes.txt");
        fs::write(&path, "# t\n30\n10\n").unwrap();
        assert_eq!(load_label_set(&path).unwrap().indices_for(0), &[10, 30]);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "[-3]").unwrap();
        assert_eq!(
            load_label_set(&bad).unwrap_err().kind(),
            crate::error::ErrorKind::InvalidData
        );
        let missing = load_label_set(&dir.path().join("none.json")).unwrap_err();
        assert_eq!(missing.kind(), crate::error::ErrorKind::NotFound);
    }
}
