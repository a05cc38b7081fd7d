//! Windowed access with edge-buffered filtering and spike marking.
use crate::config::ViewerConfig;
use crate::detectors::spikes::{detect_threshold, lookup_precomputed};
use crate::error::{Result, SpikeError};
use crate::filter::{self, FilterKind, FilterSpec, MIN_FILTER_SAMPLES};
use crate::labels::SpikeLabelSet;
use crate::registry::DatasetDescriptor;
use crate::signal::{Polarity, SampleRange, SpikeSource};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectMode {
    #[default]
    None,
    Threshold,
    Precomputed,
}

/// Buffer that threshold detection runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionInput {
    Raw,
    /// Filtered output when a filter ran, raw otherwise.
    #[default]
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    pub filter: FilterKind,
    pub detect: DetectMode,
    /// Threshold for `DetectMode::Threshold`; `None` disables marking.
    pub threshold: Option<f64>,
    /// Detect upward excursions (`>=`, maximum) instead of downward ones.
    pub invert: bool,
    pub detect_on: DetectionInput,
    /// Add the raw window mean back onto high-pass and band-pass output.
    pub restore_baseline: bool,
}

/// One channel of a window response. All sequences cover `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelWindow {
    pub channel: usize,
    pub raw: Vec<i16>,
    pub filtered: Option<Vec<f64>>,
    pub spike_flags: Option<Vec<bool>>,
    /// Spike positions as offsets from `start`.
    pub spike_peaks: Option<Vec<usize>>,
    pub spike_source: Option<SpikeSource>,
    pub start: usize,
    pub end: usize,
    /// A filter was requested but skipped because the window was too short.
    pub degraded: bool,
}

/// Preview waveform around a single spike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeWaveform {
    pub channel: usize,
    pub spike_time: usize,
    pub samples: Vec<f64>,
    pub start: usize,
    pub end: usize,
    pub degraded: bool,
}

/// Numeric knobs of the service, taken from [`ViewerConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSettings {
    pub sampling_rate_hz: f64,
    pub edge_buffer: usize,
    pub max_window_samples: usize,
    pub peak_half_window: usize,
    pub spike_mark_radius: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&ViewerConfig::default())
    }
}

impl From<&ViewerConfig> for ServiceSettings {
    fn from(cfg: &ViewerConfig) -> Self {
        Self {
            sampling_rate_hz: cfg.sampling_rate_hz,
            edge_buffer: cfg.edge_buffer,
            max_window_samples: cfg.max_window_samples,
            peak_half_window: cfg.peak_half_window,
            spike_mark_radius: cfg.spike_mark_radius,
        }
    }
}

/// Stateless window service. Each call reads only from the descriptor it is
/// handed, so results depend on nothing but the arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedSignalService {
    settings: ServiceSettings,
}

impl WindowedSignalService {
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn filter_spec(&self, kind: FilterKind) -> FilterSpec {
        FilterSpec::new(kind, self.settings.sampling_rate_hz)
    }

    /// Serve `[start, end)` for every channel in `channels`.
    ///
    /// The range is clamped to the recording and cut at
    /// `start + max_window_samples`. Duplicate channels collapse; any invalid
    /// channel fails the request.
    pub fn get_window(
        &self,
        dataset: &DatasetDescriptor,
        channels: &[usize],
        start: usize,
        end: usize,
        opts: &WindowOptions,
    ) -> Result<BTreeMap<usize, ChannelWindow>> {
        if start > end {
            return Err(SpikeError::InvalidRange { start, end });
        }
        let backend = &dataset.backend;
        let mut channels = channels.to_vec();
        channels.sort_unstable();
        channels.dedup();
        for &ch in &channels {
            backend.check_channel(ch)?;
        }

        let total = backend.num_timepoints();
        let mut range = SampleRange::new(start, end).clamped(total);
        if range.len() > self.settings.max_window_samples {
            range.end = range.start + self.settings.max_window_samples;
        }
        let labels = match opts.detect {
            DetectMode::Precomputed => Some(
                dataset
                    .labels
                    .as_deref()
                    .ok_or(SpikeError::NoSpikesAvailable)?,
            ),
            _ => None,
        };

        let spec = self.filter_spec(opts.filter);
        let short = spec.is_active() && range.len() < MIN_FILTER_SAMPLES;
        if short {
            warn!(
                "{}: window {}..{} is shorter than {MIN_FILTER_SAMPLES} samples; serving raw",
                dataset.name, range.start, range.end
            );
        }
        let buffered = if spec.is_active() && !short {
            range.buffered(self.settings.edge_buffer, total)
        } else {
            range
        };
        let mut reads = backend.read_window(&channels, buffered.start, buffered.end)?;
        debug!(
            "{}: window {}..{} (read {}..{}) channels={:?} opts={:?}",
            dataset.name, range.start, range.end, buffered.start, buffered.end, channels, opts
        );

        let jobs: Vec<(usize, Vec<i16>)> = channels
            .iter()
            .map(|&ch| (ch, reads.remove(&ch).unwrap_or_default()))
            .collect();
        let windows = jobs
            .into_par_iter()
            .map(|(ch, samples)| {
                self.process_channel(ch, &samples, range, buffered, &spec, short, labels, opts)
                    .map(|w| (ch, w))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(windows.into_iter().collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_channel(
        &self,
        channel: usize,
        buffered_samples: &[i16],
        range: SampleRange,
        buffered: SampleRange,
        spec: &FilterSpec,
        short: bool,
        labels: Option<&SpikeLabelSet>,
        opts: &WindowOptions,
    ) -> Result<ChannelWindow> {
        let offset = range.start - buffered.start;
        let raw = buffered_samples[offset..offset + range.len()].to_vec();
        let mut degraded = short;

        let mut filtered = None;
        if spec.is_active() && !short {
            match filter::apply_i16(buffered_samples, spec) {
                Ok(out) => filtered = Some(out[offset..offset + range.len()].to_vec()),
                Err(SpikeError::InsufficientSamples { .. }) => degraded = true,
                Err(err) => return Err(err),
            }
        }

        let (spike_flags, spike_peaks, spike_source) = match opts.detect {
            DetectMode::None => (None, None, None),
            DetectMode::Threshold => match opts.threshold {
                None => (None, Some(Vec::new()), Some(SpikeSource::Threshold)),
                Some(threshold) => {
                    let input: Vec<f64> = match (&filtered, opts.detect_on) {
                        (Some(f), DetectionInput::Filtered) => f.clone(),
                        _ => raw.iter().map(|&v| f64::from(v)).collect(),
                    };
                    let det = detect_threshold(
                        &input,
                        threshold,
                        Polarity::from_invert(opts.invert),
                        channel,
                        self.settings.peak_half_window,
                    );
                    let peaks = det.events.iter().map(|e| e.sample_index).collect();
                    (Some(det.flags), Some(peaks), Some(SpikeSource::Threshold))
                }
            },
            DetectMode::Precomputed => {
                let events = match labels {
                    Some(labels) => lookup_precomputed(labels, channel, range.start, range.end),
                    None => return Err(SpikeError::NoSpikesAvailable),
                };
                let radius = self.settings.spike_mark_radius;
                let mut flags = vec![false; range.len()];
                let mut peaks = Vec::with_capacity(events.len());
                for event in &events {
                    let at = event.sample_index - range.start;
                    let lo = at.saturating_sub(radius);
                    let hi = (at + radius + 1).min(flags.len());
                    flags[lo..hi].iter_mut().for_each(|f| *f = true);
                    peaks.push(at);
                }
                (Some(flags), Some(peaks), Some(SpikeSource::Precomputed))
            }
        };

        if opts.restore_baseline && spec.removes_dc() && !raw.is_empty() {
            if let Some(out) = filtered.as_mut() {
                let mean = raw.iter().map(|&v| f64::from(v)).sum::<f64>() / raw.len() as f64;
                out.iter_mut().for_each(|v| *v += mean);
            }
        }

        Ok(ChannelWindow {
            channel,
            raw,
            filtered,
            spike_flags,
            spike_peaks,
            spike_source,
            start: range.start,
            end: range.end,
            degraded,
        })
    }

    /// Samples within `half_window` of `spike_time` on one channel.
    ///
    /// The read adds `edge_buffer` samples of context and, near either end of
    /// the recording, borrows from the other side so the filter still sees
    /// `MIN_FILTER_SAMPLES`. Only a recording shorter than that is served raw
    /// with `degraded` set.
    pub fn spike_waveform(
        &self,
        dataset: &DatasetDescriptor,
        channel: usize,
        spike_time: usize,
        half_window: usize,
        kind: FilterKind,
    ) -> Result<SpikeWaveform> {
        let backend = &dataset.backend;
        backend.check_channel(channel)?;
        let total = backend.num_timepoints();
        if spike_time >= total {
            return Err(SpikeError::InvalidRange {
                start: spike_time,
                end: total,
            });
        }
        let range = SampleRange::new(
            spike_time.saturating_sub(half_window),
            spike_time.saturating_add(half_window).saturating_add(1),
        )
        .clamped(total);
        let spec = self.filter_spec(kind);
        let buffered = if spec.is_active() {
            range
                .buffered(self.settings.edge_buffer, total)
                .widened_to(MIN_FILTER_SAMPLES, total)
        } else {
            range
        };
        let samples = backend.read_channel(channel, buffered.start, buffered.end)?;
        let offset = range.start - buffered.start;

        let (samples, degraded) = match filter::apply_i16(&samples, &spec) {
            Ok(out) => (out[offset..offset + range.len()].to_vec(), false),
            Err(SpikeError::InsufficientSamples { .. }) => {
                warn!(
                    "{}: preview around {spike_time} too short to filter; serving raw",
                    dataset.name
                );
                let raw = samples[offset..offset + range.len()]
                    .iter()
                    .map(|&v| f64::from(v))
                    .collect();
                (raw, true)
            }
            Err(err) => return Err(err),
        };
        Ok(SpikeWaveform {
            channel,
            spike_time,
            samples,
            start: range.start,
            end: range.end,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ArrayBackend;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    const CHANNELS: usize = 8;
    const TIMEPOINTS: usize = 6000;

    fn noisy_recording(seed: u64) -> Vec<i16> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..CHANNELS * TIMEPOINTS)
            .map(|i| {
                let t = (i % TIMEPOINTS) as f64;
                let drift = 200.0 * (2.0 * std::f64::consts::PI * 5.0 * t / 30_000.0).sin();
                (drift + rng.gen_range(-40.0..40.0)) as i16
            })
            .collect()
    }

    fn dataset(labels: Option<SpikeLabelSet>) -> DatasetDescriptor {
        let backend = ArrayBackend::from_channel_major(CHANNELS, TIMEPOINTS, noisy_recording(11)).unwrap();
        DatasetDescriptor {
            name: "synthetic".into(),
            backend: Arc::new(backend),
            labels: labels.map(Arc::new),
            label_file: None,
        }
    }

    fn highpass() -> WindowOptions {
        WindowOptions {
            filter: FilterKind::Highpass,
            ..WindowOptions::default()
        }
    }

    #[test]
    fn repeated_requests_are_identical() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let opts = WindowOptions {
            filter: FilterKind::Bandpass,
            detect: DetectMode::Threshold,
            threshold: Some(-30.0),
            ..WindowOptions::default()
        };
        let a = svc.get_window(&ds, &[0, 3, 7], 1000, 3000, &opts).unwrap();
        let b = svc.get_window(&ds, &[7, 0, 3], 1000, 3000, &opts).unwrap();
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn filtered_window_matches_direct_filtering_of_buffered_range() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let win = svc.get_window(&ds, &[2], 1000, 2000, &highpass()).unwrap();
        let filtered = win[&2].filtered.as_ref().unwrap();

        let direct_raw = ds.backend.read_channel(2, 900, 2100).unwrap();
        let spec = FilterSpec::new(FilterKind::Highpass, 30_000.0);
        let direct = filter::apply_i16(&direct_raw, &spec).unwrap();
        assert_eq!(filtered.len(), 1000);
        assert_eq!(filtered.as_slice(), &direct[100..1100]);
    }

    #[test]
    fn unfiltered_raw_matches_backend_read() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let win = svc
            .get_window(&ds, &[4], 123, 4567, &WindowOptions::default())
            .unwrap();
        let direct = ds.backend.read_window(&[4], 123, 4567).unwrap();
        assert_eq!(win[&4].raw, direct[&4]);
        assert!(win[&4].filtered.is_none());
        assert!(!win[&4].degraded);
    }

    #[test]
    fn short_window_degrades_instead_of_failing() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let win = svc.get_window(&ds, &[1], 500, 550, &highpass()).unwrap();
        let ch = &win[&1];
        assert!(ch.degraded);
        assert!(ch.filtered.is_none());
        assert_eq!(ch.raw, ds.backend.read_channel(1, 500, 550).unwrap());
    }

    #[test]
    fn edges_of_recording_are_clamped() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let win = svc.get_window(&ds, &[0], 5800, 9000, &highpass()).unwrap();
        assert_eq!((win[&0].start, win[&0].end), (5800, 6000));
        assert_eq!(win[&0].filtered.as_ref().unwrap().len(), 200);

        let err = svc.get_window(&ds, &[0, 8], 0, 100, &highpass()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfRange);
    }

    #[test]
    fn long_requests_are_capped() {
        let ds = dataset(None);
        let svc = WindowedSignalService::new(ServiceSettings {
            max_window_samples: 1000,
            ..ServiceSettings::default()
        });
        let win = svc.get_window(&ds, &[0], 100, 6000, &WindowOptions::default()).unwrap();
        assert_eq!(win[&0].end, 1100);
        assert_eq!(win[&0].raw.len(), 1000);
    }

    #[test]
    fn missing_threshold_disables_flags() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let opts = WindowOptions {
            detect: DetectMode::Threshold,
            ..WindowOptions::default()
        };
        let win = svc.get_window(&ds, &[0], 0, 400, &opts).unwrap();
        assert!(win[&0].spike_flags.is_none());
        assert_eq!(win[&0].spike_peaks.as_deref(), Some(&[][..]));
    }

    #[test]
    fn precomputed_spikes_are_marked_relative_to_window() {
        let ds = dataset(Some(SpikeLabelSet::global(vec![100, 1002, 1500, 3000])));
        let svc = WindowedSignalService::default();
        let opts = WindowOptions {
            detect: DetectMode::Precomputed,
            ..WindowOptions::default()
        };
        let win = svc.get_window(&ds, &[6], 1000, 2000, &opts).unwrap();
        let ch = &win[&6];
        assert_eq!(ch.spike_peaks.as_deref(), Some(&[2, 500][..]));
        assert_eq!(ch.spike_source, Some(SpikeSource::Precomputed));
        let flags = ch.spike_flags.as_ref().unwrap();
        assert!(flags[0..=7].iter().all(|&f| f));
        assert!(!flags[8]);
        assert!(flags[495..=505].iter().all(|&f| f));
        assert_eq!(flags.iter().filter(|&&f| f).count(), 8 + 11);
    }

    #[test]
    fn precomputed_without_labels_is_an_error() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let opts = WindowOptions {
            detect: DetectMode::Precomputed,
            ..WindowOptions::default()
        };
        let err = svc.get_window(&ds, &[0], 0, 500, &opts).unwrap_err();
        assert!(matches!(err, SpikeError::NoSpikesAvailable));
    }

    #[test]
    fn detection_input_is_selectable() {
        let mut data = vec![0i16; 2 * 1000];
        // Channel 0 rides on a large offset; a spike only stands out after filtering.
        for (t, v) in data[..1000].iter_mut().enumerate() {
            *v = if (500..503).contains(&t) { 400 } else { 1000 };
        }
        let backend = ArrayBackend::from_channel_major(2, 1000, data).unwrap();
        let ds = DatasetDescriptor {
            name: "offset".into(),
            backend: Arc::new(backend),
            labels: None,
            label_file: None,
        };
        let svc = WindowedSignalService::default();
        let mut opts = WindowOptions {
            filter: FilterKind::Highpass,
            detect: DetectMode::Threshold,
            threshold: Some(-200.0),
            detect_on: DetectionInput::Filtered,
            ..WindowOptions::default()
        };
        let on_filtered = svc.get_window(&ds, &[0], 200, 800, &opts).unwrap();
        let peaks = on_filtered[&0].spike_peaks.clone().unwrap();
        assert_eq!(peaks.len(), 1);
        assert!((299..=302).contains(&peaks[0]));

        opts.detect_on = DetectionInput::Raw;
        let on_raw = svc.get_window(&ds, &[0], 200, 800, &opts).unwrap();
        assert!(on_raw[&0].spike_peaks.as_ref().unwrap().is_empty());
    }

    #[test]
    fn baseline_restoration_shifts_highpass_output() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let plain = svc.get_window(&ds, &[3], 1000, 2000, &highpass()).unwrap();
        let restored_opts = WindowOptions {
            restore_baseline: true,
            ..highpass()
        };
        let restored = svc.get_window(&ds, &[3], 1000, 2000, &restored_opts).unwrap();
        let raw = &plain[&3].raw;
        let mean = raw.iter().map(|&v| f64::from(v)).sum::<f64>() / raw.len() as f64;
        let a = plain[&3].filtered.as_ref().unwrap();
        let b = restored[&3].filtered.as_ref().unwrap();
        assert!(a.iter().zip(b).all(|(x, y)| (y - x - mean).abs() < 1e-9));
    }

    #[test]
    fn preview_waveform_is_filtered_even_when_narrow() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();
        let wave = svc.spike_waveform(&ds, 5, 3000, 30, FilterKind::Highpass).unwrap();
        assert_eq!(wave.samples.len(), 61);
        assert_eq!((wave.start, wave.end), (2970, 3031));
        assert!(!wave.degraded);

        let raw = svc.spike_waveform(&ds, 5, 2, 10, FilterKind::None).unwrap();
        assert_eq!((raw.start, raw.end), (0, 13));
        let direct = ds.backend.read_channel(5, 0, 13).unwrap();
        assert_eq!(raw.samples, direct.iter().map(|&v| f64::from(v)).collect::<Vec<_>>());
        assert!(svc.spike_waveform(&ds, 5, TIMEPOINTS, 10, FilterKind::None).is_err());
    }

    #[test]
    fn preview_near_recording_edges_is_still_filtered() {
        let ds = dataset(None);
        let svc = WindowedSignalService::default();

        let head = svc.spike_waveform(&ds, 0, 20, 10, FilterKind::Highpass).unwrap();
        assert_eq!((head.start, head.end), (10, 31));
        assert!(!head.degraded);
        let direct = filter::apply_i16(
            &ds.backend.read_channel(0, 0, 200).unwrap(),
            &FilterSpec::new(FilterKind::Highpass, 30_000.0),
        )
        .unwrap();
        assert_eq!(head.samples, direct[10..31].to_vec());

        let tail = svc
            .spike_waveform(&ds, 0, TIMEPOINTS - 1, 10, FilterKind::Highpass)
            .unwrap();
        assert_eq!((tail.start, tail.end), (TIMEPOINTS - 11, TIMEPOINTS));
        assert_eq!(tail.samples.len(), 11);
        assert!(!tail.degraded);

        let mut settings = *svc.settings();
        settings.edge_buffer = 0;
        let narrow = WindowedSignalService::new(settings)
            .spike_waveform(&ds, 0, 3000, 5, FilterKind::Bandpass)
            .unwrap();
        assert!(!narrow.degraded);
    }
}
