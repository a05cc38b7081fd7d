use crate::error::{Result, SpikeError};
use std::path::Path;

/// Parse newline-delimited sample indices, ignoring blank/comment lines.
///
/// An empty list is valid: a label file may legitimately hold no spikes.
pub fn parse_event_indices(text: &str, path: &Path) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: usize = trimmed.parse().map_err(|_| {
            SpikeError::invalid_data(
                path,
                format!("line {} is not a sample index: {}", idx + 1, trimmed),
            )
        })?;
        out.push(val);
    }
    Ok(out)
}

/// Read event indices from a file.
pub fn read_event_indices(path: &Path) -> Result<Vec<usize>> {
    let text = std::fs::read_to_string(path)?;
    parse_event_indices(&text, path)
}
