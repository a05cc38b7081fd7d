//! Uniform (channel, time) access over int16 recordings.
//!
//! Two physical representations sit behind [`ArrayBackend`]: a fully
//! resident buffer (always normalised to channel-major at load) and a
//! read-only memory map that keeps whatever axis order the file uses.
use crate::config::{OrientationPolicy, ViewerConfig};
use crate::error::{Result, SpikeError};
use crate::io::{npy, raw};
use crate::signal::SampleRange;
use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions of flat interleaved recordings.
pub const INTERLEAVED_EXTENSIONS: &[&str] = &["bin", "dat", "raw"];
/// Extensions of tensor recordings that may carry a memory-mapped pair.
pub const TENSOR_EXTENSIONS: &[&str] = &["pt", "npy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    FullyLoaded,
    MemoryMapped,
}

/// Order of the two axes in stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Rows are channels.
    ChannelMajor,
    /// Rows are time frames.
    TimeMajor,
}

impl Layout {
    fn flipped(self) -> Self {
        match self {
            Layout::ChannelMajor => Layout::TimeMajor,
            Layout::TimeMajor => Layout::ChannelMajor,
        }
    }

    /// (channels, timepoints) for a stored (rows, cols) array.
    fn logical_shape(self, rows: usize, cols: usize) -> (usize, usize) {
        match self {
            Layout::ChannelMajor => (rows, cols),
            Layout::TimeMajor => (cols, rows),
        }
    }
}

/// Decide which stored axis holds channels.
///
/// Under `Auto` the channel axis must fit under `max_channels` and the other
/// axis must be at least eight times longer. Anything closer is refused.
pub fn resolve_layout(
    rows: usize,
    cols: usize,
    policy: OrientationPolicy,
    max_channels: usize,
) -> Result<Layout> {
    match policy {
        OrientationPolicy::ChannelMajor => Ok(Layout::ChannelMajor),
        OrientationPolicy::TimeMajor => Ok(Layout::TimeMajor),
        OrientationPolicy::Auto => {
            if rows <= max_channels && cols >= rows.saturating_mul(8) {
                Ok(Layout::ChannelMajor)
            } else if cols <= max_channels && rows >= cols.saturating_mul(8) {
                Ok(Layout::TimeMajor)
            } else {
                Err(SpikeError::AmbiguousOrientation { rows, cols })
            }
        }
    }
}

enum Storage {
    /// Channel-major samples.
    Loaded(Vec<i16>),
    Mapped { mmap: Mmap, offset: usize, layout: Layout },
}

/// Read-only accessor over a (channels, timepoints) int16 array.
pub struct ArrayBackend {
    channels: usize,
    timepoints: usize,
    storage: Storage,
    source: Option<PathBuf>,
}

impl fmt::Debug for ArrayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayBackend")
            .field("channels", &self.channels)
            .field("timepoints", &self.timepoints)
            .field("kind", &self.kind())
            .field("layout", &self.layout())
            .field("source", &self.source)
            .finish()
    }
}

impl ArrayBackend {
    /// Resident backend over channel-major samples.
    pub fn from_channel_major(channels: usize, timepoints: usize, data: Vec<i16>) -> Result<Self> {
        Self::from_stored(channels, timepoints, Layout::ChannelMajor, data, None)
    }

    /// Resident backend over a stored array, transposing time-major input.
    pub fn from_stored(
        rows: usize,
        cols: usize,
        layout: Layout,
        data: Vec<i16>,
        source: Option<PathBuf>,
    ) -> Result<Self> {
        let origin = source.clone().unwrap_or_else(|| PathBuf::from("<memory>"));
        let count = check_shape(rows, cols, &origin)?;
        if count != data.len() {
            return Err(SpikeError::invalid_data(
                origin,
                format!("shape ({rows}, {cols}) does not match {} samples", data.len()),
            ));
        }
        let (channels, timepoints) = layout.logical_shape(rows, cols);
        let data = match layout {
            Layout::ChannelMajor => data,
            Layout::TimeMajor => transpose(&data, rows, cols),
        };
        Ok(Self {
            channels,
            timepoints,
            storage: Storage::Loaded(data),
            source,
        })
    }

    /// Map the `_mmap.npy` / `_shape.txt` pair written next to `dataset`.
    pub fn map_pair(dataset: &Path, cfg: &ViewerConfig) -> Result<Self> {
        let (samples_path, shape_path) = raw::sidecar_paths(dataset);
        let (rows, cols) = raw::read_shape_file(&shape_path)?;
        if !samples_path.exists() {
            return Err(SpikeError::unavailable(&samples_path, "sample sidecar is missing"));
        }
        let count = check_shape(rows, cols, &shape_path)?;
        let layout = resolve_layout(rows, cols, cfg.orientation, cfg.max_channels)?;
        let mmap = raw::map_file(&samples_path)?;
        // Tolerate pairs whose sample file kept an NPY header.
        let offset = if mmap.starts_with(b"\x93NUMPY") {
            npy::parse_header(&mmap, &samples_path)?.data_offset
        } else {
            0
        };
        let needed = count
            .checked_mul(2)
            .and_then(|bytes| bytes.checked_add(offset))
            .ok_or_else(|| {
                SpikeError::invalid_data(&samples_path, "header offset overflows the mapping")
            })?;
        if mmap.len() < needed {
            return Err(SpikeError::invalid_data(
                &samples_path,
                format!("holds {} bytes, shape ({rows}, {cols}) needs {needed}", mmap.len()),
            ));
        }
        let (channels, timepoints) = layout.logical_shape(rows, cols);
        Ok(Self {
            channels,
            timepoints,
            storage: Storage::Mapped { mmap, offset, layout },
            source: Some(dataset.to_path_buf()),
        })
    }

    /// Map a flat time-major recording with `channels` samples per frame.
    pub fn map_interleaved(path: &Path, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(SpikeError::invalid_data(path, "interleaved channel count is zero"));
        }
        let mmap = raw::map_file(path)?;
        let frame = channels.checked_mul(2).ok_or_else(|| {
            SpikeError::invalid_data(path, format!("{channels} channels per frame is too many"))
        })?;
        let timepoints = mmap.len() / frame;
        if mmap.len() % frame != 0 {
            warn!(
                "{}: {} trailing bytes do not form a full frame; ignoring them",
                path.display(),
                mmap.len() % frame
            );
        }
        check_shape(timepoints, channels, path)?;
        Ok(Self {
            channels,
            timepoints,
            storage: Storage::Mapped {
                mmap,
                offset: 0,
                layout: Layout::TimeMajor,
            },
            source: Some(path.to_path_buf()),
        })
    }

    /// Load a whole `.npy` tensor into memory.
    pub fn load_npy(path: &Path, cfg: &ViewerConfig) -> Result<Self> {
        let (header, data) = npy::read_i16(path)?;
        let shape = header.row_major_shape();
        if shape.len() != 2 {
            return Err(SpikeError::invalid_data(
                path,
                format!("expected a 2-D recording, found shape {:?}", header.shape),
            ));
        }
        let (rows, cols) = (shape[0], shape[1]);
        check_shape(rows, cols, path)?;
        // Detection runs on the declared shape; Fortran payloads are its transpose.
        let logical = resolve_layout(header.shape[0], header.shape[1], cfg.orientation, cfg.max_channels)?;
        let layout = if header.fortran_order {
            logical.flipped()
        } else {
            logical
        };
        Self::from_stored(rows, cols, layout, data, Some(path.to_path_buf()))
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn num_timepoints(&self) -> usize {
        self.timepoints
    }

    /// (channels, timepoints).
    pub fn shape(&self) -> (usize, usize) {
        (self.channels, self.timepoints)
    }

    pub fn kind(&self) -> BackendKind {
        match self.storage {
            Storage::Loaded(_) => BackendKind::FullyLoaded,
            Storage::Mapped { .. } => BackendKind::MemoryMapped,
        }
    }

    pub fn layout(&self) -> Layout {
        match self.storage {
            Storage::Loaded(_) => Layout::ChannelMajor,
            Storage::Mapped { layout, .. } => layout,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn check_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.channels {
            return Err(SpikeError::ChannelOutOfRange {
                channel,
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// Samples of one channel over `range`, which must already be clamped.
    fn copy_channel(&self, channel: usize, range: SampleRange) -> Vec<i16> {
        let len = range.len();
        match &self.storage {
            Storage::Loaded(data) => {
                let base = channel * self.timepoints;
                data[base + range.start..base + range.end].to_vec()
            }
            Storage::Mapped {
                mmap,
                offset,
                layout: Layout::ChannelMajor,
            } => {
                let begin = offset + (channel * self.timepoints + range.start) * 2;
                let mut out = vec![0i16; len];
                LittleEndian::read_i16_into(&mmap[begin..begin + len * 2], &mut out);
                out
            }
            Storage::Mapped {
                mmap,
                offset,
                layout: Layout::TimeMajor,
            } => (range.start..range.end)
                .map(|t| {
                    let at = offset + (t * self.channels + channel) * 2;
                    LittleEndian::read_i16(&mmap[at..at + 2])
                })
                .collect(),
        }
    }

    /// One channel over `[start, end)`, clamped to the recording.
    pub fn read_channel(&self, channel: usize, start: usize, end: usize) -> Result<Vec<i16>> {
        self.check_channel(channel)?;
        let range = self.clamp_range(start, end)?;
        Ok(self.copy_channel(channel, range))
    }

    /// Samples for each requested channel over `[start, end)`.
    ///
    /// The range is clamped to the recording rather than rejected, so a window
    /// hanging off the end comes back shorter. Any invalid channel fails the
    /// whole read.
    pub fn read_window(
        &self,
        channels: &[usize],
        start: usize,
        end: usize,
    ) -> Result<BTreeMap<usize, Vec<i16>>> {
        for &ch in channels {
            self.check_channel(ch)?;
        }
        let range = self.clamp_range(start, end)?;
        Ok(channels
            .iter()
            .map(|&ch| (ch, self.copy_channel(ch, range)))
            .collect())
    }

    fn clamp_range(&self, start: usize, end: usize) -> Result<SampleRange> {
        if start > end {
            return Err(SpikeError::InvalidRange { start, end });
        }
        Ok(SampleRange::new(start, end).clamped(self.timepoints))
    }

    /// Copy of the whole array in channel-major order.
    pub fn to_channel_major(&self) -> Vec<i16> {
        match &self.storage {
            Storage::Loaded(data) => data.clone(),
            Storage::Mapped { .. } => {
                let all = SampleRange::new(0, self.timepoints);
                let mut out = Vec::with_capacity(self.channels * self.timepoints);
                for ch in 0..self.channels {
                    out.extend(self.copy_channel(ch, all));
                }
                out
            }
        }
    }
}

/// Element count of a stored shape. Shapes come from files, so the byte
/// size must fit in `usize` before anything is sliced with it.
fn check_shape(rows: usize, cols: usize, path: &Path) -> Result<usize> {
    if rows == 0 || cols == 0 {
        return Err(SpikeError::invalid_data(
            path,
            format!("recording shape ({rows}, {cols}) is empty"),
        ));
    }
    rows.checked_mul(cols)
        .filter(|count| count.checked_mul(2).is_some())
        .ok_or_else(|| {
            SpikeError::invalid_data(path, format!("recording shape ({rows}, {cols}) is too large"))
        })
}

fn transpose(data: &[i16], rows: usize, cols: usize) -> Vec<i16> {
    let mut out = vec![0i16; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// True when `path` has an extension the backend knows how to open.
pub fn is_supported(path: &Path) -> bool {
    let ext = extension(path);
    INTERLEAVED_EXTENSIONS.contains(&ext.as_str()) || TENSOR_EXTENSIONS.contains(&ext.as_str())
}

/// Open a recording, preferring the memory-mapped representation.
///
/// Tensor files try their sidecar pair first. When the pair is missing and
/// `full_load_fallback` is set, an `.npy` is loaded whole instead.
pub fn open_backend(path: &Path, cfg: &ViewerConfig) -> Result<ArrayBackend> {
    let ext = extension(path);
    if INTERLEAVED_EXTENSIONS.contains(&ext.as_str()) {
        return ArrayBackend::map_interleaved(path, cfg.interleaved_channels);
    }
    if !TENSOR_EXTENSIONS.contains(&ext.as_str()) {
        return Err(SpikeError::unavailable(path, format!("unsupported format {ext:?}")));
    }
    match ArrayBackend::map_pair(path, cfg) {
        Ok(backend) => Ok(backend),
        Err(SpikeError::BackendUnavailable { reason, .. }) if cfg.full_load_fallback => {
            warn!(
                "{}: memory-mapped pair unusable ({reason}); loading fully",
                path.display()
            );
            load_full(path, &ext, cfg)
        }
        Err(err) => Err(err),
    }
}

fn load_full(path: &Path, ext: &str, cfg: &ViewerConfig) -> Result<ArrayBackend> {
    if ext == "npy" {
        return ArrayBackend::load_npy(path, cfg);
    }
    Err(SpikeError::unavailable(
        path,
        "tensor needs a memory-mapped pair; convert it first",
    ))
}

/// Write a channel-major sidecar pair for `path` so later opens are mapped.
pub fn convert_to_mmap(path: &Path, cfg: &ViewerConfig) -> Result<(PathBuf, PathBuf)> {
    let backend = open_backend(path, cfg)?;
    let (channels, timepoints) = backend.shape();
    let pair = raw::write_sidecar_pair(path, (channels, timepoints), &backend.to_channel_major())?;
    info!(
        "{}: wrote memory-mapped pair ({channels} channels x {timepoints} samples)",
        path.display()
    );
    Ok(pair)
}
