//! Fixed-width binary records between `data_start` and `data_end`.
//!
//! Every binary file in a session has the same body shape: a run of
//! fixed-size records whose field widths come from the header, followed by
//! the closing sentinel. Callers describe one record with a [`RecordLayout`]
//! and get the raw body back as a [`RecordBlock`] that decodes columns on
//! request.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::Array2;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::types::{AxonaError, Result};

/// Sentinel that closes the record body of every binary file.
pub const DATA_END: &[u8; 12] = b"\r\ndata_end\r\n";

/// How the bytes of one field element are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned big-endian integer (spike timestamps)
    BigEndianUnsigned,
    /// Signed big-endian integer (position and input timestamps, coordinates)
    BigEndianSigned,
    /// Signed little-endian integer (waveform and continuous samples)
    LittleEndianSigned,
    /// Opaque bytes (event type tags)
    Bytes,
}

/// One field of a record: `count` elements of `width` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub encoding: Encoding,
    pub width: usize,
    pub count: usize,
}

impl Field {
    fn size(&self) -> Option<usize> {
        self.width.checked_mul(self.count)
    }
}

/// Byte layout of a single record.
///
/// Widths and counts come straight from file headers, so the record size is
/// tracked with checked arithmetic and is `None` once it overflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    fields: Vec<Field>,
    offsets: Vec<usize>,
    size: Option<usize>,
}

impl Default for RecordLayout {
    fn default() -> Self {
        RecordLayout {
            fields: Vec::new(),
            offsets: Vec::new(),
            size: Some(0),
        }
    }
}

impl RecordLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field and returns the layout, builder style.
    pub fn field(mut self, encoding: Encoding, width: usize, count: usize) -> Self {
        let field = Field {
            encoding,
            width,
            count,
        };
        self.offsets.push(self.size.unwrap_or(0));
        self.size = self
            .size
            .zip(field.size())
            .and_then(|(size, added)| size.checked_add(added));
        self.fields.push(field);
        self
    }

    /// Size of one record in bytes, or `None` if it does not fit in `usize`.
    pub fn record_size(&self) -> Option<usize> {
        self.size
    }

    /// Size of one record in bytes, failing with `CorruptFile` on overflow.
    pub fn checked_record_size(&self, path: &Path) -> Result<usize> {
        self.size.ok_or_else(|| AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: "record size overflows".to_string(),
        })
    }

    /// Integer fields must fit in an `i64` and the record must have a size.
    fn validate(&self, path: &Path) -> Result<usize> {
        for field in &self.fields {
            if field.encoding != Encoding::Bytes && !(1..=8).contains(&field.width) {
                return Err(AxonaError::CorruptFile {
                    path: path.to_path_buf(),
                    reason: format!("unsupported {}-byte integer field", field.width),
                });
            }
        }
        self.checked_record_size(path)
    }
}

/// The raw body of a file, split into records by a layout.
#[derive(Debug, Clone)]
pub struct RecordBlock {
    layout: RecordLayout,
    record_size: usize,
    count: usize,
    bytes: Vec<u8>,
}

impl RecordBlock {
    /// Bytes of field `field` in record `record`.
    pub fn raw(&self, record: usize, field: usize) -> &[u8] {
        let desc = self.layout.fields[field];
        let start = record * self.record_size + self.layout.offsets[field];
        &self.bytes[start..start + desc.width * desc.count]
    }

    /// Decodes an integer field of every record.
    ///
    /// # Returns
    ///
    /// Array of shape [num_records, field.count].
    pub fn integers(&self, field: usize) -> Array2<i64> {
        let desc = self.layout.fields[field];
        let width = desc.width;

        Array2::from_shape_fn((self.count, desc.count), |(record, element)| {
            let raw = self.raw(record, field);
            let buf = &raw[element * width..(element + 1) * width];
            decode_integer(desc.encoding, buf)
        })
    }

    /// Decodes a single-element integer field into a flat vector.
    pub fn column(&self, field: usize) -> Vec<i64> {
        let desc = self.layout.fields[field];
        (0..self.count)
            .map(|record| decode_integer(desc.encoding, &self.raw(record, field)[..desc.width]))
            .collect()
    }
}

fn decode_integer(encoding: Encoding, buf: &[u8]) -> i64 {
    match encoding {
        Encoding::BigEndianUnsigned => BigEndian::read_uint(buf, buf.len()) as i64,
        Encoding::BigEndianSigned => BigEndian::read_int(buf, buf.len()),
        Encoding::LittleEndianSigned => LittleEndian::read_int(buf, buf.len()),
        Encoding::Bytes => buf.iter().fold(0i64, |acc, &b| (acc << 8) | b as i64),
    }
}

/// Reads `count` records laid out as `layout`.
///
/// A body shorter than declared is a `TruncatedFile` error.
pub fn read_records<R: Read>(
    reader: &mut R,
    layout: &RecordLayout,
    count: usize,
    path: &Path,
) -> Result<RecordBlock> {
    let record_size = layout.validate(path)?;

    let total = count
        .checked_mul(record_size)
        .ok_or_else(|| AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!("record count {} overflows the body size", count),
        })?;

    // Read through `take` so a bogus header count cannot force a huge allocation
    let mut bytes = Vec::new();
    reader
        .take(total as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| AxonaError::io(path, e))?;

    if bytes.len() != total {
        return Err(AxonaError::TruncatedFile {
            path: path.to_path_buf(),
            what: "record data",
            expected: total as u64,
        });
    }

    Ok(RecordBlock {
        layout: layout.clone(),
        record_size,
        count,
        bytes,
    })
}

/// Reads exactly the closing sentinel and checks it.
pub fn expect_data_end<R: Read>(reader: &mut R, path: &Path) -> Result<()> {
    let mut found = [0u8; DATA_END.len()];
    match reader.read_exact(&mut found) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(AxonaError::TruncatedFile {
                path: path.to_path_buf(),
                what: "closing sentinel",
                expected: DATA_END.len() as u64,
            });
        }
        Err(e) => return Err(AxonaError::io(path, e)),
    }

    if &found != DATA_END {
        return Err(AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!(
                "expected closing sentinel \"{}\", found \"{}\"",
                DATA_END.escape_ascii(),
                found.escape_ascii()
            ),
        });
    }

    Ok(())
}

/// Reads the rest of the file and checks that it is only the sentinel.
///
/// Anything else is logged and reported as `false` instead of failing.
pub fn check_data_end_lenient<R: Read>(reader: &mut R, path: &Path) -> Result<bool> {
    let mut rest = Vec::new();
    reader
        .read_to_end(&mut rest)
        .map_err(|e| AxonaError::io(path, e))?;

    let text: String = rest.iter().map(|&b| b as char).collect();
    if text.trim() == "data_end" {
        return Ok(true);
    }

    log::warn!(
        "Found {} bytes of remaining data before the closing sentinel in {}",
        rest.len(),
        path.display()
    );
    Ok(false)
}

/// Reads `count` records followed by a verified closing sentinel.
pub fn read_sentinel_delimited<R: Read>(
    reader: &mut R,
    layout: &RecordLayout,
    count: usize,
    path: &Path,
) -> Result<RecordBlock> {
    let block = read_records(reader, layout, count, path)?;
    expect_data_end(reader, path)?;
    Ok(block)
}
