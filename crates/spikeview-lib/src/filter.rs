//! Zero-phase Butterworth filtering.
//!
//! Designs are cascades of second-order sections obtained by the bilinear
//! transform with frequency prewarping. [`apply`] runs them forward then
//! backward over an odd-extended copy of the input with steady-state initial
//! conditions, so the output has no phase shift and no start-up step.
use crate::error::{Result, SpikeError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Shortest buffer the engine accepts.
pub const MIN_FILTER_SAMPLES: usize = 200;
pub const HIGHPASS_CUTOFF_HZ: f64 = 300.0;
pub const LOWPASS_CUTOFF_HZ: f64 = 3000.0;
pub const DEFAULT_ORDER: usize = 4;
pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 30_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    /// 300 Hz high-pass.
    Highpass,
    /// 3000 Hz low-pass.
    Lowpass,
    /// 300–3000 Hz band-pass, built as the high-pass cascaded with the
    /// low-pass. Each edge is a separate Butterworth of the same order, so
    /// the corners sit slightly apart from a single band-transformed design.
    Bandpass,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub sampling_rate_hz: f64,
    pub order: usize,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::new(FilterKind::None, DEFAULT_SAMPLING_RATE_HZ)
    }
}

impl FilterSpec {
    pub fn new(kind: FilterKind, sampling_rate_hz: f64) -> Self {
        Self {
            kind,
            sampling_rate_hz,
            order: DEFAULT_ORDER,
        }
    }

    pub fn is_active(&self) -> bool {
        self.kind != FilterKind::None
    }

    /// Removes the DC component, so callers may want to restore a baseline.
    pub fn removes_dc(&self) -> bool {
        matches!(self.kind, FilterKind::Highpass | FilterKind::Bandpass)
    }

    /// Second-order sections implementing this filter (empty for `None`).
    pub fn sections(&self) -> Result<Vec<Biquad>> {
        let fs = self.sampling_rate_hz;
        match self.kind {
            FilterKind::None => Ok(Vec::new()),
            FilterKind::Highpass => butterworth(self.order, HIGHPASS_CUTOFF_HZ, fs, Response::High),
            FilterKind::Lowpass => butterworth(self.order, LOWPASS_CUTOFF_HZ, fs, Response::Low),
            FilterKind::Bandpass => {
                let mut sos = butterworth(self.order, HIGHPASS_CUTOFF_HZ, fs, Response::High)?;
                sos.extend(butterworth(self.order, LOWPASS_CUTOFF_HZ, fs, Response::Low)?);
                Ok(sos)
            }
        }
    }
}

/// One second-order section in direct form II transposed, normalised so a0 = 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a1 + self.a2)
    }

    /// State after an infinitely long unit step, i.e. `lfilter_zi`.
    fn step_state(&self) -> [f64; 2] {
        let g = self.dc_gain();
        let z2 = self.b[2] - self.a2 * g;
        let z1 = self.b[1] - self.a1 * g + z2;
        [z1, z2]
    }

    #[inline]
    fn tick(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + z[0];
        z[0] = self.b[1] * x - self.a1 * y + z[1];
        z[1] = self.b[2] * x - self.a2 * y;
        y
    }
}

#[derive(Clone, Copy)]
enum Response {
    Low,
    High,
}

fn butterworth(order: usize, cutoff_hz: f64, fs: f64, response: Response) -> Result<Vec<Biquad>> {
    if order == 0 {
        return Err(SpikeError::InvalidFilter {
            reason: "order must be at least 1".into(),
        });
    }
    let nyquist = fs / 2.0;
    if !(fs.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(SpikeError::InvalidFilter {
            reason: format!("cutoff {cutoff_hz} Hz must lie inside (0, {nyquist}) Hz"),
        });
    }
    let k = (PI * cutoff_hz / fs).tan();
    let k2 = k * k;
    let n = order as f64;
    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for idx in 0..order / 2 {
        let q = 2.0 * ((2 * idx + 1) as f64 * PI / (2.0 * n)).sin();
        let norm = 1.0 / (1.0 + q * k + k2);
        let b = match response {
            Response::Low => {
                let b0 = k2 * norm;
                [b0, 2.0 * b0, b0]
            }
            Response::High => [norm, -2.0 * norm, norm],
        };
        sections.push(Biquad {
            b,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - q * k + k2) * norm,
        });
    }
    if order % 2 == 1 {
        // Real pole left over by odd orders.
        let norm = 1.0 / (1.0 + k);
        let b = match response {
            Response::Low => [k * norm, k * norm, 0.0],
            Response::High => [norm, -norm, 0.0],
        };
        sections.push(Biquad {
            b,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        });
    }
    Ok(sections)
}

/// Run the cascade once over `data`, starting every section from `zi * x0`.
fn sosfilt(sections: &[Biquad], zi: &[[f64; 2]], data: &mut [f64]) {
    let x0 = data.first().copied().unwrap_or(0.0);
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
    for sample in data.iter_mut() {
        let mut v = *sample;
        for (section, z) in sections.iter().zip(state.iter_mut()) {
            v = section.tick(v, z);
        }
        *sample = v;
    }
}

/// Steady-state initial conditions for the whole cascade.
fn cascade_zi(sections: &[Biquad]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sections
        .iter()
        .map(|s| {
            let [z1, z2] = s.step_state();
            let zi = [z1 * scale, z2 * scale];
            scale *= s.dc_gain();
            zi
        })
        .collect()
}

/// Padding length used on each side of the input.
pub fn pad_len(sections: usize) -> usize {
    3 * (2 * sections + 1)
}

/// Forward-backward filtering with odd-extension padding.
pub fn filtfilt(sections: &[Biquad], samples: &[f64]) -> Result<Vec<f64>> {
    if sections.is_empty() {
        return Ok(samples.to_vec());
    }
    let n = samples.len();
    let pad = pad_len(sections.len());
    if n <= pad {
        return Err(SpikeError::InsufficientSamples {
            required: pad + 1,
            actual: n,
        });
    }
    let first = samples[0];
    let last = samples[n - 1];
    let mut ext = Vec::with_capacity(n + 2 * pad);
    ext.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i]));
    ext.extend_from_slice(samples);
    ext.extend((1..=pad).map(|i| 2.0 * last - samples[n - 1 - i]));

    let zi = cascade_zi(sections);
    sosfilt(sections, &zi, &mut ext);
    ext.reverse();
    sosfilt(sections, &zi, &mut ext);
    ext.reverse();
    Ok(ext[pad..pad + n].to_vec())
}

/// Filter `samples` according to `spec`. Output has the input's length.
pub fn apply(samples: &[f64], spec: &FilterSpec) -> Result<Vec<f64>> {
    if !spec.is_active() {
        return Ok(samples.to_vec());
    }
    if samples.len() < MIN_FILTER_SAMPLES {
        return Err(SpikeError::InsufficientSamples {
            required: MIN_FILTER_SAMPLES,
            actual: samples.len(),
        });
    }
    let sections = spec.sections()?;
    filtfilt(&sections, samples)
}

pub fn apply_i16(samples: &[i16], spec: &FilterSpec) -> Result<Vec<f64>> {
    let data: Vec<f64> = samples.iter().map(|&v| f64::from(v)).collect();
    apply(&data, spec)
}
