//! ASCII header parsing shared by every file of a session.
//!
//! Each file starts with `key value` lines. Binary files end the header with
//! the `data_start` token, after which the record body begins; the `.set`
//! file is header only.

use std::collections::HashMap;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::types::{AxonaError, Result};

/// Token that ends the header of every binary file.
pub const DATA_START: &str = "data_start";

/// A header value, coerced to the most specific type that parses.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    /// Parses a raw value: integer first, then float, then plain text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            HeaderValue::Int(v)
        } else if let Ok(v) = trimmed.parse::<f64>() {
            HeaderValue::Float(v)
        } else {
            HeaderValue::Text(raw.to_string())
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats; text does not.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderValue::Int(v) => write!(f, "{}", v),
            HeaderValue::Float(v) => write!(f, "{}", v),
            HeaderValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered key/value attributes from one file header.
///
/// Keys without a value are kept and map to `None`. A repeated key keeps its
/// first position and takes the last value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderAttributes {
    source: PathBuf,
    entries: Vec<(String, Option<HeaderValue>)>,
    index: HashMap<String, usize>,
}

impl HeaderAttributes {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        HeaderAttributes {
            source: source.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// File the attributes were read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<HeaderValue>) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// The value of `key`, or `None` if the key is absent or has no value.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.index
            .get(key)
            .and_then(|&i| self.entries[i].1.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&HeaderValue>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// The value of `key`, failing if it is absent or empty.
    pub fn require(&self, key: &str) -> Result<&HeaderValue> {
        self.get(key).ok_or_else(|| AxonaError::MissingHeaderKey {
            path: self.source.clone(),
            key: key.to_string(),
        })
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value
            .as_int()
            .ok_or_else(|| self.mismatch(key, "an integer", value))
    }

    pub fn float(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        value
            .as_float()
            .ok_or_else(|| self.mismatch(key, "a number", value))
    }

    pub fn text(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(key, "text", value))
    }

    /// A non-negative integer, as used for counts and byte widths.
    pub fn count(&self, key: &str) -> Result<usize> {
        let v = self.int(key)?;
        usize::try_from(v).map_err(|_| self.mismatch(key, "a non-negative integer", &HeaderValue::Int(v)))
    }

    /// Like [`count`](Self::count), but falls back to `default` when the key
    /// is absent. A present value of the wrong type is still an error.
    pub fn count_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            Some(_) => self.count(key),
            None => Ok(default),
        }
    }

    /// A rate written as `"<number> hz"`, e.g. `timebase 96000 hz`.
    pub fn rate(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        match value {
            HeaderValue::Text(text) => {
                parse_rate(text).ok_or_else(|| self.mismatch(key, "'<number> hz'", value))
            }
            // Some writers drop the unit
            HeaderValue::Int(_) | HeaderValue::Float(_) => {
                value.as_float().ok_or_else(|| self.mismatch(key, "a rate", value))
            }
        }
    }

    /// Like [`rate`](Self::rate), with a fallback for an absent key.
    pub fn rate_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            Some(_) => self.rate(key),
            None => Ok(default),
        }
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &HeaderValue) -> AxonaError {
        AxonaError::TypeMismatch {
            path: self.source.clone(),
            key: key.to_string(),
            expected,
            found: found.to_string(),
        }
    }
}

/// Parses `"<number> hz"` (unit case-insensitive) into a rate in Hz.
pub fn parse_rate(text: &str) -> Option<f64> {
    let mut parts = text.split_whitespace();
    let number = parts.next()?.parse::<f64>().ok()?;
    match parts.next() {
        Some(unit) if unit.eq_ignore_ascii_case("hz") && parts.next().is_none() => Some(number),
        _ => None,
    }
}

/// Parses header text into attributes.
///
/// Every non-empty line is split on its first space into a key and a value.
pub fn parse_attrs(text: &str, source: impl Into<PathBuf>) -> HeaderAttributes {
    let mut attrs = HeaderAttributes::new(source);

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = match line.split_once(' ') {
            Some((key, rest)) => (key, Some(HeaderValue::parse(rest))),
            None => (line, None),
        };
        attrs.insert(key, value);
    }

    attrs
}

/// Reads the header of a binary file one byte at a time.
///
/// Stops right after the `data_start` token so the reader is positioned at
/// the first byte of the record body. Bytes are decoded as Latin-1.
pub fn parse_header_and_leave_cursor<R: Read>(reader: &mut R, path: &Path) -> Result<HeaderAttributes> {
    let sentinel = DATA_START.as_bytes();
    let mut header = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];

    loop {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(AxonaError::UnexpectedEndOfFile {
                    path: path.to_path_buf(),
                    sentinel: DATA_START.to_string(),
                });
            }
            Err(e) => return Err(AxonaError::io(path, e)),
        }

        header.push(byte[0]);
        if header.ends_with(sentinel) {
            break;
        }
    }

    let text: String = header.iter().map(|&b| b as char).collect();
    let attrs = parse_attrs(&text, path);
    log::debug!("Parsed {} header entries from {}", attrs.len(), path.display());

    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn values_take_most_specific_type() {
        let attrs = parse_attrs(
            "num_chans 4\nADC_fullscale_mv 1500.5\ntimebase 96000 hz\ncomments\n",
            "test.set",
        );

        assert_eq!(attrs.get("num_chans"), Some(&HeaderValue::Int(4)));
        assert_eq!(attrs.get("ADC_fullscale_mv"), Some(&HeaderValue::Float(1500.5)));
        assert_eq!(
            attrs.get("timebase"),
            Some(&HeaderValue::Text("96000 hz".to_string()))
        );
        assert!(attrs.contains_key("comments"));
        assert_eq!(attrs.get("comments"), None);
    }

    #[test]
    fn crlf_lines_and_order_are_kept() {
        let attrs = parse_attrs("b 1\r\na 2\r\n\r\nc three\r\n", "x");
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(attrs.text("c").unwrap(), "three");
    }

    #[test]
    fn value_keeps_everything_after_first_space() {
        let attrs = parse_attrs("trial_date Thursday, 31 Oct 2013\n", "x");
        assert_eq!(attrs.text("trial_date").unwrap(), "Thursday, 31 Oct 2013");
    }

    #[test]
    fn header_stops_at_sentinel() {
        let mut bytes = b"num_spikes 2\r\nbytes_per_sample 1\r\ndata_start".to_vec();
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        let mut cursor = Cursor::new(bytes);

        let attrs = parse_header_and_leave_cursor(&mut cursor, Path::new("t.1")).unwrap();
        assert_eq!(attrs.int("num_spikes").unwrap(), 2);
        assert_eq!(attrs.count("bytes_per_sample").unwrap(), 1);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0xAB, 0xCD]);
    }

    #[test]
    fn missing_sentinel_is_unexpected_end_of_file() {
        let mut cursor = Cursor::new(b"num_spikes 2\r\ndata_sta".to_vec());
        let err = parse_header_and_leave_cursor(&mut cursor, Path::new("t.1")).unwrap_err();
        assert!(matches!(err, AxonaError::UnexpectedEndOfFile { .. }));
    }

    #[test]
    fn missing_and_mistyped_keys_fail_loudly() {
        let attrs = parse_attrs("num_chans four\nrate 12\n", "t.1");

        match attrs.int("num_spikes").unwrap_err() {
            AxonaError::MissingHeaderKey { key, path } => {
                assert_eq!(key, "num_spikes");
                assert_eq!(path, PathBuf::from("t.1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            attrs.count("num_chans").unwrap_err(),
            AxonaError::TypeMismatch { .. }
        ));
        // Defaults only cover absent keys
        assert!(attrs.count_or("num_chans", 4).is_err());
        assert_eq!(attrs.count_or("samples_per_spike", 50).unwrap(), 50);
        assert_eq!(attrs.float("rate").unwrap(), 12.0);
    }

    #[test]
    fn rates_parse_with_unit() {
        assert_eq!(parse_rate("96000 hz"), Some(96000.0));
        assert_eq!(parse_rate("4800.0 Hz"), Some(4800.0));
        assert_eq!(parse_rate("50.0"), None);
        assert_eq!(parse_rate("fast hz"), None);

        let attrs = parse_attrs("timebase 50.0 hz\nbad 50 khz\n", "t.pos");
        assert_eq!(attrs.rate("timebase").unwrap(), 50.0);
        assert!(matches!(attrs.rate("bad"), Err(AxonaError::TypeMismatch { .. })));
        assert_eq!(attrs.rate_or("rawrate", 48000.0).unwrap(), 48000.0);
    }
}
