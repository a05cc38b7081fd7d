//! Per-caller context bound to one dataset snapshot.
use crate::error::Result;
use crate::filter::FilterKind;
use crate::navigate::{self, Direction, NavigationResult};
use crate::registry::DatasetDescriptor;
use crate::window::{ChannelWindow, ServiceSettings, SpikeWaveform, WindowOptions, WindowedSignalService};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Holds the dataset that was current when the session was taken. Activating
/// another dataset afterwards does not affect it.
#[derive(Debug, Clone)]
pub struct Session {
    descriptor: Arc<DatasetDescriptor>,
    service: WindowedSignalService,
}

impl Session {
    pub fn new(descriptor: Arc<DatasetDescriptor>, settings: ServiceSettings) -> Self {
        Self {
            descriptor,
            service: WindowedSignalService::new(settings),
        }
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    pub fn get_window(
        &self,
        channels: &[usize],
        start: usize,
        end: usize,
        opts: &WindowOptions,
    ) -> Result<BTreeMap<usize, ChannelWindow>> {
        self.service
            .get_window(&self.descriptor, channels, start, end, opts)
    }

    /// Nearest precomputed spike from `current` across `channels`.
    pub fn navigate(
        &self,
        current: usize,
        direction: Direction,
        channels: &[usize],
    ) -> Result<NavigationResult> {
        for &ch in channels {
            self.descriptor.backend.check_channel(ch)?;
        }
        let result = navigate::navigate(self.descriptor.labels.as_deref(), channels, current, direction)?;
        debug!(
            "{}: {direction:?} from {current} on {channels:?} -> {}",
            self.descriptor.name, result.sample_index
        );
        Ok(result)
    }

    pub fn next_spike(&self, current: usize, channels: &[usize]) -> Result<usize> {
        self.navigate(current, Direction::Next, channels)
            .map(|r| r.sample_index)
    }

    pub fn prev_spike(&self, current: usize, channels: &[usize]) -> Result<usize> {
        self.navigate(current, Direction::Prev, channels)
            .map(|r| r.sample_index)
    }

    pub fn spike_waveform(
        &self,
        channel: usize,
        spike_time: usize,
        half_window: usize,
        filter: FilterKind,
    ) -> Result<SpikeWaveform> {
        self.service
            .spike_waveform(&self.descriptor, channel, spike_time, half_window, filter)
    }
}
