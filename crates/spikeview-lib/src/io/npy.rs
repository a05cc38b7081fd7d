//! Minimal reader/writer for NumPy `.npy` files (format versions 1–3).
//!
//! Only little-endian integer payloads are handled: `<i2` recordings and
//! integer spike-index vectors.
use crate::error::{Result, SpikeError};
use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    I16,
    I32,
    I64,
    U16,
    U32,
    U64,
}

impl Dtype {
    fn parse(descr: &str) -> Option<Self> {
        if descr.len() != 3 || !descr.is_ascii() {
            return None;
        }
        let (order, code) = descr.split_at(1);
        if order != "<" && order != "=" && order != "|" {
            return None;
        }
        match code {
            "i2" => Some(Dtype::I16),
            "i4" => Some(Dtype::I32),
            "i8" => Some(Dtype::I64),
            "u2" => Some(Dtype::U16),
            "u4" => Some(Dtype::U32),
            "u8" => Some(Dtype::U64),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Dtype::I16 | Dtype::U16 => 2,
            Dtype::I32 | Dtype::U32 => 4,
            Dtype::I64 | Dtype::U64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub dtype: Dtype,
    pub fortran_order: bool,
    /// Logical shape as declared in the header.
    pub shape: Vec<usize>,
    /// Byte offset of the first element.
    pub data_offset: usize,
}

impl NpyHeader {
    /// `None` when the declared shape does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Shape of the payload when read as a C-ordered array.
    pub fn row_major_shape(&self) -> Vec<usize> {
        if self.fortran_order {
            self.shape.iter().rev().copied().collect()
        } else {
            self.shape.clone()
        }
    }
}

/// Parse the header at the start of `bytes`. `path` is only used in errors.
pub fn parse_header(bytes: &[u8], path: &Path) -> Result<NpyHeader> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(SpikeError::invalid_data(path, "missing NPY magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (LittleEndian::read_u16(&bytes[8..10]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(SpikeError::invalid_data(path, "truncated NPY header"));
            }
            (LittleEndian::read_u32(&bytes[8..12]) as usize, 12)
        }
        other => {
            return Err(SpikeError::invalid_data(
                path,
                format!("unsupported NPY version {other}"),
            ))
        }
    };
    let data_offset = header_start + header_len;
    if bytes.len() < data_offset {
        return Err(SpikeError::invalid_data(path, "truncated NPY header"));
    }
    let text = std::str::from_utf8(&bytes[header_start..data_offset])
        .map_err(|_| SpikeError::invalid_data(path, "NPY header is not text"))?;

    let descr = dict_value(text, "descr")
        .and_then(|rest| quoted(rest))
        .ok_or_else(|| SpikeError::invalid_data(path, "NPY header has no descr"))?;
    let dtype = Dtype::parse(descr).ok_or_else(|| {
        SpikeError::invalid_data(path, format!("unsupported NPY dtype {descr}"))
    })?;
    let fortran_order = dict_value(text, "fortran_order")
        .map(|rest| rest.starts_with("True"))
        .unwrap_or(false);
    let shape_text = dict_value(text, "shape")
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(|| SpikeError::invalid_data(path, "NPY header has no shape"))?;
    let mut shape = Vec::new();
    for dim in shape_text.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        let value = dim.trim_end_matches('L').parse::<usize>().map_err(|_| {
            SpikeError::invalid_data(path, format!("bad NPY shape entry {dim:?}"))
        })?;
        shape.push(value);
    }

    Ok(NpyHeader {
        dtype,
        fortran_order,
        shape,
        data_offset,
    })
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}'");
    let at = header.find(&needle)? + needle.len();
    let rest = header[at..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

fn quoted(rest: &str) -> Option<&str> {
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &rest[1..];
    inner.find(quote).map(|end| &inner[..end])
}

fn payload<'a>(bytes: &'a [u8], header: &NpyHeader, path: &Path) -> Result<&'a [u8]> {
    let needed = header
        .element_count()
        .and_then(|count| count.checked_mul(header.dtype.size()))
        .ok_or_else(|| {
            SpikeError::invalid_data(path, format!("NPY shape {:?} is too large", header.shape))
        })?;
    let available = bytes.len() - header.data_offset;
    if available < needed {
        return Err(SpikeError::invalid_data(
            path,
            format!("NPY payload holds {available} bytes, shape needs {needed}"),
        ));
    }
    Ok(&bytes[header.data_offset..header.data_offset + needed])
}

/// Read an int16 array, returning the header alongside the C-ordered payload.
pub fn read_i16(path: &Path) -> Result<(NpyHeader, Vec<i16>)> {
    let bytes = fs::read(path)?;
    let header = parse_header(&bytes, path)?;
    if header.dtype != Dtype::I16 {
        return Err(SpikeError::invalid_data(
            path,
            format!("expected int16 samples, found {:?}", header.dtype),
        ));
    }
    let raw = payload(&bytes, &header, path)?;
    let mut data = vec![0i16; raw.len() / 2];
    LittleEndian::read_i16_into(raw, &mut data);
    Ok((header, data))
}

/// Read a vector of non-negative integer sample indices.
pub fn read_indices(path: &Path) -> Result<Vec<usize>> {
    let bytes = fs::read(path)?;
    let header = parse_header(&bytes, path)?;
    let non_unit = header.shape.iter().filter(|&&d| d != 1).count();
    if non_unit > 1 {
        return Err(SpikeError::invalid_data(
            path,
            format!("expected a 1-D index array, found shape {:?}", header.shape),
        ));
    }
    let raw = payload(&bytes, &header, path)?;
    let size = header.dtype.size();
    let mut out = Vec::with_capacity(raw.len() / size);
    for chunk in raw.chunks_exact(size) {
        let value: i128 = match header.dtype {
            Dtype::I16 => LittleEndian::read_i16(chunk) as i128,
            Dtype::I32 => LittleEndian::read_i32(chunk) as i128,
            Dtype::I64 => LittleEndian::read_i64(chunk) as i128,
            Dtype::U16 => LittleEndian::read_u16(chunk) as i128,
            Dtype::U32 => LittleEndian::read_u32(chunk) as i128,
            Dtype::U64 => LittleEndian::read_u64(chunk) as i128,
        };
        let index = usize::try_from(value).map_err(|_| {
            SpikeError::invalid_data(path, format!("spike index {value} is not a sample index"))
        })?;
        out.push(index);
    }
    Ok(out)
}

/// Write a C-ordered 2-D int16 array as NPY version 1.0.
pub fn write_i16(path: &Path, shape: (usize, usize), data: &[i16]) -> Result<()> {
    if shape.0.checked_mul(shape.1) != Some(data.len()) {
        return Err(SpikeError::invalid_data(
            path,
            format!(
                "shape ({}, {}) does not match {} samples",
                shape.0,
                shape.1,
                data.len()
            ),
        ));
    }
    let mut header = format!(
        "{{'descr': '<i2', 'fortran_order': False, 'shape': ({}, {}), }}",
        shape.0, shape.1
    );
    // Preamble is 10 bytes; header plus newline pads the total to 64-byte alignment.
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut bytes = Vec::with_capacity(10 + header.len() + data.len() * 2);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    let mut payload = vec![0u8; data.len() * 2];
    LittleEndian::write_i16_into(data, &mut payload);
    bytes.extend_from_slice(&payload);

    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(())
}
