//! Headerless int16 files: the memory-mapped sidecar pair and flat
//! interleaved recordings.
use crate::error::{Result, SpikeError};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Suffix of the flat sample file written next to a tensor dataset.
pub const MMAP_SUFFIX: &str = "_mmap.npy";
/// Suffix of the `rows,cols` descriptor written next to a tensor dataset.
pub const SHAPE_SUFFIX: &str = "_shape.txt";

/// Sample and shape sidecar paths for `dataset` (`X.pt` → `X_mmap.npy`, `X_shape.txt`).
pub fn sidecar_paths(dataset: &Path) -> (PathBuf, PathBuf) {
    let stem = dataset
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = dataset.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{stem}{MMAP_SUFFIX}")),
        dir.join(format!("{stem}{SHAPE_SUFFIX}")),
    )
}

/// True for files that are themselves sidecars rather than datasets.
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(MMAP_SUFFIX) || n.ends_with(SHAPE_SUFFIX))
        .unwrap_or(false)
}

/// Parse `rows,cols`, also accepting the `(rows, cols)` tuple form.
pub fn parse_shape(text: &str, path: &Path) -> Result<(usize, usize)> {
    let cleaned = text.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
    let dims: Vec<&str> = cleaned
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if dims.len() != 2 {
        return Err(SpikeError::invalid_data(
            path,
            format!("expected two dimensions, found {:?}", text.trim()),
        ));
    }
    let parse = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| SpikeError::invalid_data(path, format!("bad dimension {s:?}")))
    };
    Ok((parse(dims[0])?, parse(dims[1])?))
}

/// Read a shape sidecar. A missing file means the mapped backend cannot be used.
pub fn read_shape_file(path: &Path) -> Result<(usize, usize)> {
    if !path.exists() {
        return Err(SpikeError::unavailable(path, "shape sidecar is missing"));
    }
    let text = fs::read_to_string(path)?;
    parse_shape(&text, path)
}

/// Map a file read-only.
pub fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)
        .map_err(|err| SpikeError::unavailable(path, format!("cannot open: {err}")))?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

/// Atomically replace `path` with `bytes` via a sibling temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| SpikeError::Io(err.error))?;
    Ok(())
}

/// Write the sidecar pair for `dataset` holding a channel-major array.
///
/// Samples go first so a reader never sees a shape file without its data.
pub fn write_sidecar_pair(dataset: &Path, shape: (usize, usize), data: &[i16]) -> Result<(PathBuf, PathBuf)> {
    if shape.0 * shape.1 != data.len() {
        return Err(SpikeError::invalid_data(
            dataset,
            format!("shape ({}, {}) does not match {} samples", shape.0, shape.1, data.len()),
        ));
    }
    let (samples_path, shape_path) = sidecar_paths(dataset);
    let mut bytes = vec![0u8; data.len() * 2];
    LittleEndian::write_i16_into(data, &mut bytes);
    write_atomic(&samples_path, &bytes)?;
    write_atomic(&shape_path, format!("{},{}", shape.0, shape.1).as_bytes())?;
    Ok((samples_path, shape_path))
}
