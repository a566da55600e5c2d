use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::header::HeaderAttributes;

/// A single recording channel.
///
/// Axona files carry no per-channel names, so the name is synthesized from the
/// global index, the owning channel group and the position inside that group.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Global index, unique within a session
    pub index: usize,
    /// Synthetic display name
    pub name: String,
    /// Gain read from the `gain_ch_<n>` key of the `.set` file
    pub gain: f64,
}

/// Spikes detected on one channel group (tetrode).
///
/// Waveforms are scaled to microvolts and sign-inverted relative to the raw
/// file contents.
#[derive(Debug, Clone)]
pub struct SpikeTrain {
    /// Spike times (s)
    pub times: Array1<f64>,
    /// Scaled waveforms (μV)
    /// - Shape: [spike_count, channel_count, samples_per_spike]
    pub waveforms: Array3<f64>,
    /// Number of spikes
    pub spike_count: usize,
    /// Number of channels in the group
    pub channel_count: usize,
    /// Number of samples stored per waveform
    pub samples_per_spike: usize,
    /// Waveform sample rate (Hz)
    pub sample_rate: f64,
    /// Header of the spike file
    pub attrs: HeaderAttributes,
}

impl SpikeTrain {
    /// Alias for `spike_count`, named after the header key.
    pub fn num_spikes(&self) -> usize {
        self.spike_count
    }

    /// Alias for `channel_count`, named after the header key.
    pub fn num_chans(&self) -> usize {
        self.channel_count
    }
}

impl fmt::Display for SpikeTrain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Axona spike train: spikes: {}, channels: {}, samples per spike: {}>",
            self.spike_count, self.channel_count, self.samples_per_spike
        )
    }
}

/// A continuous signal decoded from an `.eeg`/`.egf` file.
#[derive(Debug, Clone)]
pub struct AnalogSignal {
    /// Original channel id, resolved through the `.set` reference chain
    pub channel_id: i64,
    /// Scaled samples (μV)
    /// - Shape: [num_samples, num_chans]
    pub signal: Array2<f64>,
    /// Sample rate (Hz)
    pub sample_rate: f64,
    /// Header of the signal file, including `raw_filename` and `channel_id`
    pub attrs: HeaderAttributes,
}

impl AnalogSignal {
    /// The first stored channel as a flat time series.
    ///
    /// Recordings written by DacqUSB store one channel per continuous file,
    /// so this is the whole signal in practice.
    pub fn trace(&self) -> ArrayView1<'_, f64> {
        self.signal.index_axis(Axis(1), 0)
    }

    /// Number of samples (records) in the file.
    pub fn num_samples(&self) -> usize {
        self.signal.nrows()
    }
}

impl fmt::Display for AnalogSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Axona analog signal: channel: {}, shape: {:?}, sample_rate: {} Hz>",
            self.channel_id,
            self.signal.shape(),
            self.sample_rate
        )
    }
}

/// Position tracking data from the `.pos` file.
#[derive(Debug, Clone)]
pub struct TrackingData {
    /// Sample times (s)
    pub times: Array1<f64>,
    /// Coordinates normalized by the arena window span, NaN where the spot
    /// was not detected
    /// - Shape: [num_samples, 2 * tracked_spots]
    /// - Column order: x1, y1, x2, y2, ...
    pub positions: Array2<f64>,
    /// Position sample rate (Hz)
    pub sample_rate: f64,
    /// Number of EEG samples per position sample
    pub eeg_samples_per_position: f64,
    /// Whether bytes other than the closing sentinel followed the declared
    /// records
    pub trailing_data: bool,
    /// Header of the position file
    pub attrs: HeaderAttributes,
}

impl fmt::Display for TrackingData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Axona tracking data: times shape: {:?}, positions shape: {:?}>",
            self.times.shape(),
            self.positions.shape()
        )
    }
}

/// Kind of a digital event in the `.inp` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Digital input (`I`)
    Input,
    /// Digital output (`O`)
    Output,
    /// Keypress (`K`)
    Keypress,
}

impl EventType {
    /// Maps the ASCII tag stored in the file to an event type.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "I" => Some(EventType::Input),
            "O" => Some(EventType::Output),
            "K" => Some(EventType::Keypress),
            _ => None,
        }
    }

    /// The ASCII tag used in the file.
    pub fn tag(&self) -> char {
        match self {
            EventType::Input => 'I',
            EventType::Output => 'O',
            EventType::Keypress => 'K',
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Digital input, output and keypress events from the `.inp` file.
///
/// `values` is left uninterpreted; for keypresses the second byte holds the
/// ASCII code of the key.
#[derive(Debug, Clone)]
pub struct InpEvents {
    /// Session duration (s)
    pub duration: f64,
    /// Event times (s)
    pub times: Array1<f64>,
    /// Event kinds, parallel to `times`
    pub event_types: Vec<EventType>,
    /// Raw value bytes
    /// - Shape: [num_events, bytes_per_value]
    pub values: Array2<i8>,
    /// Header of the input file
    pub attrs: HeaderAttributes,
}

impl InpEvents {
    /// Number of decoded events.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether the file held no events.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl fmt::Display for InpEvents {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Axona inp data: times shape: {:?}>", self.times.shape())
    }
}

/// Cluster assignment for every spike of one channel group.
#[derive(Debug, Clone, PartialEq)]
pub struct CutAssignment {
    /// Channel group the cut belongs to
    pub channel_group_id: usize,
    /// Cluster index per spike
    pub indices: Array1<i64>,
    /// File the assignment was read from
    pub path: PathBuf,
}

impl fmt::Display for CutAssignment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Axona cut data: channel group id: {}, indices shape: {:?}>",
            self.channel_group_id,
            self.indices.shape()
        )
    }
}

/// Errors raised while reading an Axona session.
#[derive(Debug, thiserror::Error)]
pub enum AxonaError {
    /// A required sibling file does not exist
    #[error("missing file: {}", .path.display())]
    MissingFile { path: PathBuf },

    /// The header sentinel was never found
    #[error("hit end of file before '{sentinel}' found in {}", .path.display())]
    UnexpectedEndOfFile { path: PathBuf, sentinel: String },

    /// The binary body is shorter than the header declares
    #[error("{} is truncated: expected {expected} bytes of {what}", .path.display())]
    TruncatedFile {
        path: PathBuf,
        what: &'static str,
        expected: u64,
    },

    /// The closing sentinel (or another structural marker) did not match
    #[error("{} is corrupt: {reason}", .path.display())]
    CorruptFile { path: PathBuf, reason: String },

    /// A required header attribute is absent
    #[error("missing header key '{key}' in {}", .path.display())]
    MissingHeaderKey { path: PathBuf, key: String },

    /// A header attribute is present but has the wrong type or format
    #[error("header key '{key}' in {} should be {expected}, found '{found}'", .path.display())]
    TypeMismatch {
        path: PathBuf,
        key: String,
        expected: &'static str,
        found: String,
    },

    /// A cut file holds a token that is not a cluster index
    #[error("invalid token '{token}' in cut file {}", .path.display())]
    InvalidCutFile { path: PathBuf, token: String },

    /// A cut file does not assign a cluster to every spike
    #[error(
        "cut file {} has {cut_len} indices but channel group {channel_group_id} has {spike_count} spikes",
        .path.display()
    )]
    InconsistentCutFile {
        path: PathBuf,
        channel_group_id: usize,
        cut_len: usize,
        spike_count: usize,
    },

    /// No `<base>.<N>` spike files exist
    #[error("no channel group files found for {}", .base.display())]
    NoChannelGroupFiles { base: PathBuf },

    /// An I/O error occurred while reading a file
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AxonaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AxonaError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AxonaError>;
