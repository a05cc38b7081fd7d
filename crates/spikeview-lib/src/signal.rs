use serde::{Deserialize, Serialize};

/// Where a spike time came from. The two sources are never mixed in one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeSource {
    Threshold,
    Precomputed,
}

/// A single spike on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpikeEvent {
    /// Sample index of the peak (threshold mode) or the labelled time (precomputed).
    pub sample_index: usize,
    pub channel: usize,
    pub source: SpikeSource,
}

/// Which side of the threshold counts as a spike.
///
/// `Negative` is the extracellular default: a sample crosses when it is at or
/// below the threshold and the peak is the minimum. `Positive` mirrors both.
/// The threshold value itself is never negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    Negative,
    Positive,
}

impl Polarity {
    pub fn from_invert(invert: bool) -> Self {
        if invert {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }

    #[inline]
    pub fn crosses(self, sample: f64, threshold: f64) -> bool {
        match self {
            Polarity::Negative => sample <= threshold,
            Polarity::Positive => sample >= threshold,
        }
    }

    /// True when `candidate` is strictly further into the spike side than `best`.
    #[inline]
    pub fn is_more_extreme(self, candidate: f64, best: f64) -> bool {
        match self {
            Polarity::Negative => candidate < best,
            Polarity::Positive => candidate > best,
        }
    }
}

/// Half-open range of sample indices along the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRange {
    pub start: usize,
    pub end: usize,
}

impl SampleRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clamp both ends to `[0, total]`, keeping `start <= end`.
    pub fn clamped(&self, total: usize) -> Self {
        let end = self.end.min(total);
        Self {
            start: self.start.min(end),
            end,
        }
    }

    /// Widen by `edge` samples on each side without leaving `[0, total]`.
    pub fn buffered(&self, edge: usize, total: usize) -> Self {
        Self {
            start: self.start.saturating_sub(edge),
            end: self.end.saturating_add(edge).min(total),
        }
    }

    /// Grow toward whichever side has room until the range spans `min_len`
    /// samples, or all of `[0, total]` when the recording is shorter.
    pub fn widened_to(&self, min_len: usize, total: usize) -> Self {
        let missing = min_len.min(total).saturating_sub(self.len());
        let end = self.end.saturating_add(missing).min(total);
        let missing = missing.saturating_sub(end.saturating_sub(self.end));
        Self {
            start: self.start.saturating_sub(missing),
            end,
        }
    }
}
