//! Next/previous precomputed spike across a channel selection.
use crate::error::{Result, SpikeError};
use crate::labels::SpikeLabelSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResult {
    pub sample_index: usize,
    /// Size of the deduplicated union the answer was drawn from.
    pub total_spikes: usize,
}

/// Sorted sequences making up the union for `channels`.
fn selection<'a>(labels: &'a SpikeLabelSet, channels: &[usize]) -> Vec<&'a [usize]> {
    match labels {
        SpikeLabelSet::Global(all) => vec![all.as_slice()],
        SpikeLabelSet::PerChannel(_) => channels
            .iter()
            .map(|&ch| labels.indices_for(ch))
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Smallest spike strictly after `current`, wrapping to the first spike.
pub fn next_spike(labels: &SpikeLabelSet, channels: &[usize], current: usize) -> Result<usize> {
    let slices = selection(labels, channels);
    let after = slices
        .iter()
        .filter_map(|s| s.get(s.partition_point(|&t| t <= current)))
        .min();
    after
        .or_else(|| slices.iter().filter_map(|s| s.first()).min())
        .copied()
        .ok_or(SpikeError::NoSpikesAvailable)
}

/// Largest spike strictly before `current`, wrapping to the last spike.
pub fn prev_spike(labels: &SpikeLabelSet, channels: &[usize], current: usize) -> Result<usize> {
    let slices = selection(labels, channels);
    let before = slices
        .iter()
        .filter_map(|s| {
            let idx = s.partition_point(|&t| t < current);
            idx.checked_sub(1).map(|i| &s[i])
        })
        .max();
    before
        .or_else(|| slices.iter().filter_map(|s| s.last()).max())
        .copied()
        .ok_or(SpikeError::NoSpikesAvailable)
}

/// Number of distinct spike times in the union for `channels`.
pub fn count_unique(labels: &SpikeLabelSet, channels: &[usize]) -> usize {
    let slices = selection(labels, channels);
    let mut merged: Vec<usize> = slices.iter().flat_map(|s| s.iter().copied()).collect();
    if slices.len() > 1 {
        merged.sort_unstable();
    }
    merged.dedup();
    merged.len()
}

pub fn navigate(
    labels: Option<&SpikeLabelSet>,
    channels: &[usize],
    current: usize,
    direction: Direction,
) -> Result<NavigationResult> {
    let labels = labels.ok_or(SpikeError::NoSpikesAvailable)?;
    let sample_index = match direction {
        Direction::Next => next_spike(labels, channels, current)?,
        Direction::Prev => prev_spike(labels, channels, current)?,
    };
    Ok(NavigationResult {
        sample_index,
        total_spikes: count_unique(labels, channels),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn per_channel(entries: &[(usize, &[usize])]) -> SpikeLabelSet {
        let map: BTreeMap<usize, Vec<usize>> =
            entries.iter().map(|(ch, idx)| (*ch, idx.to_vec())).collect();
        SpikeLabelSet::per_channel(map)
    }

    #[test]
    fn wraps_at_both_ends() {
        let labels = per_channel(&[(5, &[100, 500, 900])]);
        assert_eq!(next_spike(&labels, &[5], 900).unwrap(), 100);
        assert_eq!(prev_spike(&labels, &[5], 100).unwrap(), 900);
        assert_eq!(next_spike(&labels, &[5], 100).unwrap(), 500);
        assert_eq!(prev_spike(&labels, &[5], 501).unwrap(), 500);
    }

    #[test]
    fn union_spans_selected_channels_only() {
        let labels = per_channel(&[(1, &[10, 300]), (2, &[150, 300]), (3, &[200])]);
        assert_eq!(next_spike(&labels, &[1, 2], 10).unwrap(), 150);
        assert_eq!(prev_spike(&labels, &[1, 2], 300).unwrap(), 150);
        assert_eq!(count_unique(&labels, &[1, 2]), 3);
        let res = navigate(Some(&labels), &[3], 0, Direction::Next).unwrap();
        assert_eq!(res, NavigationResult { sample_index: 200, total_spikes: 1 });
    }

    #[test]
    fn global_labels_ignore_channel_selection() {
        let labels = SpikeLabelSet::global(vec![40, 20]);
        assert_eq!(next_spike(&labels, &[], 20).unwrap(), 40);
        assert_eq!(next_spike(&labels, &[99], 40).unwrap(), 20);
    }

    #[test]
    fn empty_selection_reports_no_spikes() {
        let labels = per_channel(&[(1, &[10])]);
        let err = navigate(Some(&labels), &[4], 0, Direction::Prev).unwrap_err();
        assert!(matches!(err, SpikeError::NoSpikesAvailable));
        let err = navigate(None, &[1], 0, Direction::Next).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoSpikesAvailable);
    }
}
