use crate::labels::SpikeLabelSet;
use crate::signal::{Polarity, SpikeEvent, SpikeSource};

/// Threshold-mode output for one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdDetection {
    /// True where the sample crosses the threshold.
    pub flags: Vec<bool>,
    /// One event per crossing run, located at the run's extremum.
    pub events: Vec<SpikeEvent>,
}

/// Per-sample crossing test.
pub fn crossing_mask(samples: &[f64], threshold: f64, polarity: Polarity) -> Vec<bool> {
    samples
        .iter()
        .map(|&s| polarity.crosses(s, threshold))
        .collect()
}

/// Maximal runs of `true` as half-open `(start, end)` pairs.
pub fn crossing_runs(mask: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut open: Option<usize> = None;
    for (i, &hit) in mask.iter().enumerate() {
        match (hit, open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                runs.push((start, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push((start, mask.len()));
    }
    runs
}

/// Index of the most extreme sample in `[start, end)`; ties keep the first.
fn extremum(samples: &[f64], start: usize, end: usize, polarity: Polarity) -> usize {
    let mut best = start;
    for i in start + 1..end {
        if polarity.is_more_extreme(samples[i], samples[best]) {
            best = i;
        }
    }
    best
}

/// Threshold detection with run coalescing.
///
/// Each run of crossing samples yields one event at the extremum found in
/// the run widened by `half_window` on each side and clamped to the buffer.
/// Sample indices are relative to `samples`.
pub fn detect_threshold(
    samples: &[f64],
    threshold: f64,
    polarity: Polarity,
    channel: usize,
    half_window: usize,
) -> ThresholdDetection {
    let flags = crossing_mask(samples, threshold, polarity);
    let mut peaks: Vec<usize> = crossing_runs(&flags)
        .into_iter()
        .map(|(start, end)| {
            let lo = start.saturating_sub(half_window);
            let hi = end.saturating_add(half_window).min(samples.len());
            extremum(samples, lo, hi, polarity)
        })
        .collect();
    // Neighbouring runs can share a search window and land on the same peak.
    peaks.sort_unstable();
    peaks.dedup();
    let events = peaks
        .into_iter()
        .map(|sample_index| SpikeEvent {
            sample_index,
            channel,
            source: SpikeSource::Threshold,
        })
        .collect();
    ThresholdDetection { flags, events }
}

/// Sub-slice of a sorted sequence falling inside `[start, end)`.
pub fn lookup_range(sorted: &[usize], start: usize, end: usize) -> &[usize] {
    let lo = sorted.partition_point(|&t| t < start);
    let hi = sorted.partition_point(|&t| t < end).max(lo);
    &sorted[lo..hi]
}

/// Precomputed spikes of `channel` inside `[start, end)`, with absolute indices.
pub fn lookup_precomputed(
    labels: &SpikeLabelSet,
    channel: usize,
    start: usize,
    end: usize,
) -> Vec<SpikeEvent> {
    lookup_range(labels.indices_for(channel), start, end)
        .iter()
        .map(|&sample_index| SpikeEvent {
            sample_index,
            channel,
            source: SpikeSource::Precomputed,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spike_train(len: usize, spikes: &[(usize, f64)], seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data: Vec<f64> = (0..len).map(|_| rng.gen_range(-5.0..5.0)).collect();
        for &(at, depth) in spikes {
            for (offset, shape) in [0.3, 0.7, 1.0, 0.6, 0.2].iter().enumerate() {
                if let Some(slot) = data.get_mut(at + offset) {
                    *slot -= depth * shape;
                }
            }
        }
        data
    }

    #[test]
    fn runs_coalesce_into_single_peak() {
        let data = [0.0, -60.0, -90.0, -70.0, 0.0, 0.0, -55.0, 0.0];
        let det = detect_threshold(&data, -50.0, Polarity::Negative, 3, 0);
        let peaks: Vec<usize> = det.events.iter().map(|e| e.sample_index).collect();
        assert_eq!(peaks, vec![2, 6]);
        assert_eq!(det.flags, vec![false, true, true, true, false, false, true, false]);
        assert!(det.events.iter().all(|e| e.channel == 3));
    }

    #[test]
    fn peak_window_extends_past_run_and_clamps() {
        // The run is only index 1 but the true trough sits two samples later.
        let data = [-10.0, -51.0, -40.0, -80.0, -5.0];
        let det = detect_threshold(&data, -50.0, Polarity::Negative, 0, 2);
        assert_eq!(det.events[0].sample_index, 3);
        let edge = detect_threshold(&[-70.0, 0.0], -50.0, Polarity::Negative, 0, 5);
        assert_eq!(edge.events[0].sample_index, 0);
    }

    #[test]
    fn positive_polarity_mirrors_detection() {
        let data = [0.0, 40.0, 75.0, 20.0];
        let det = detect_threshold(&data, 30.0, Polarity::Positive, 0, 1);
        assert_eq!(det.events.len(), 1);
        assert_eq!(det.events[0].sample_index, 2);
        assert!(detect_threshold(&data, 30.0, Polarity::Negative, 0, 1).events.is_empty());
    }

    #[test]
    fn stricter_threshold_never_adds_events() {
        let spikes = [(200, 120.0), (900, 80.0), (1500, 60.0), (2600, 150.0)];
        let data = spike_train(3000, &spikes, 7);
        let mut last = usize::MAX;
        for threshold in [-20.0, -40.0, -55.0, -70.0, -100.0, -140.0, -200.0] {
            let count = detect_threshold(&data, threshold, Polarity::Negative, 0, 5)
                .events
                .len();
            assert!(count <= last, "threshold {threshold} gave {count} > {last}");
            last = count;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn empty_buffer_gives_no_events() {
        let det = detect_threshold(&[], -50.0, Polarity::Negative, 0, 5);
        assert!(det.events.is_empty());
        assert!(det.flags.is_empty());
    }

    #[test]
    fn precomputed_lookup_is_half_open() {
        let labels = SpikeLabelSet::global(vec![100, 500, 900]);
        let hits = lookup_precomputed(&labels, 5, 400, 900);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sample_index, 500);
        assert_eq!(hits[0].source, SpikeSource::Precomputed);
        assert_eq!(lookup_range(&[100, 500, 900], 400, 1000), &[500, 900]);
        assert!(lookup_range(&[100, 500, 900], 901, 400).is_empty());
    }
}
