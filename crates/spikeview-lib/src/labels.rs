//! Precomputed spike label sets.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Spike times supplied from outside the viewer.
///
/// Every sequence is sorted ascending at construction, so lookups can binary
/// search without re-checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpikeLabelSet {
    /// One sequence shared by all channels.
    Global(Vec<usize>),
    /// Independent sequence per channel index.
    PerChannel(BTreeMap<usize, Vec<usize>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Global,
    PerChannel,
}

/// What the caller needs to know about the bound labels without fetching them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSummary {
    pub available: bool,
    pub kind: Option<LabelKind>,
    pub count: usize,
    /// Channels carrying their own labels; empty for a global set.
    pub channels: Vec<usize>,
}

impl LabelSummary {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            kind: None,
            count: 0,
            channels: Vec::new(),
        }
    }
}

impl SpikeLabelSet {
    pub fn global(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        SpikeLabelSet::Global(indices)
    }

    pub fn per_channel(map: BTreeMap<usize, Vec<usize>>) -> Self {
        SpikeLabelSet::PerChannel(
            map.into_iter()
                .map(|(ch, mut idx)| {
                    idx.sort_unstable();
                    (ch, idx)
                })
                .collect(),
        )
    }

    pub fn kind(&self) -> LabelKind {
        match self {
            SpikeLabelSet::Global(_) => LabelKind::Global,
            SpikeLabelSet::PerChannel(_) => LabelKind::PerChannel,
        }
    }

    /// Sorted spike times that apply to `channel`.
    pub fn indices_for(&self, channel: usize) -> &[usize] {
        match self {
            SpikeLabelSet::Global(idx) => idx,
            SpikeLabelSet::PerChannel(map) => map.get(&channel).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn total_count(&self) -> usize {
        match self {
            SpikeLabelSet::Global(idx) => idx.len(),
            SpikeLabelSet::PerChannel(map) => map.values().map(Vec::len).sum(),
        }
    }

    pub fn summary(&self) -> LabelSummary {
        LabelSummary {
            available: true,
            kind: Some(self.kind()),
            count: self.total_count(),
            channels: match self {
                SpikeLabelSet::Global(_) => Vec::new(),
                SpikeLabelSet::PerChannel(map) => map.keys().copied().collect(),
            },
        }
    }
}
