//! Decoders for the binary files of a session.

use ndarray::{Array1, Array2, Array3};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Seek};
use std::path::Path;

use crate::gain::{scale_analog_signal, scale_with_gain, GainResolver};
use crate::header::{parse_header_and_leave_cursor, HeaderAttributes, HeaderValue};
use crate::record::{
    check_data_end_lenient, read_records, read_sentinel_delimited, Encoding, RecordLayout, DATA_END,
};
use crate::types::*;

// Defaults applied when a spike file header omits the key
const DEFAULT_BYTES_PER_TIMESTAMP: usize = 4;
const DEFAULT_BYTES_PER_SAMPLE: usize = 1;
const DEFAULT_SAMPLES_PER_SPIKE: usize = 50;
const DEFAULT_TIMEBASE: f64 = 96000.0;
const DEFAULT_RAWRATE: f64 = 48000.0;

/// Spike files repeat each spike's timestamp once per tetrode channel.
pub const TIMESTAMP_STRIDE: usize = 4;

/// Raw coordinate written when a tracked spot was not detected.
pub const MISSING_COORDINATE: i64 = 1023;

// Every position record ends with two pixel counts
const PIXEL_COUNT_FIELDS: usize = 2;
const BYTES_PER_PIXEL_COUNT: usize = 4;

const READ_BUFFER_CAPACITY: usize = 65536;

/// Multiplies two header-derived counts, failing with `CorruptFile` on overflow.
fn checked_count(a: usize, b: usize, what: &str, path: &Path) -> Result<usize> {
    a.checked_mul(b).ok_or_else(|| AxonaError::CorruptFile {
        path: path.to_path_buf(),
        reason: format!("{} overflows ({} x {})", what, a, b),
    })
}

/// Opens a session file with a buffered reader and parses its header.
///
/// The returned reader is positioned at the start of the record body.
pub(crate) fn open_with_header(path: &Path) -> Result<(BufReader<File>, HeaderAttributes)> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AxonaError::MissingFile {
            path: path.to_path_buf(),
        },
        _ => AxonaError::io(path, e),
    })?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);
    let attrs = parse_header_and_leave_cursor(&mut reader, path)?;
    Ok((reader, attrs))
}

/// Decodes the spike file of one channel group.
///
/// # Arguments
///
/// * `path` - The `<base>.<N>` spike file
/// * `channels` - Channels of the group, in file order, providing the gains
/// * `adc_fullscale` - Session-wide ADC full scale (μV)
///
/// Waveforms come back scaled to microvolts and with their sign inverted,
/// since DacqUSB stores spikes with reversed polarity.
pub fn read_spike_train(path: &Path, channels: &[Channel], adc_fullscale: f64) -> Result<SpikeTrain> {
    let (mut reader, attrs) = open_with_header(path)?;

    let bytes_per_timestamp = attrs.count_or("bytes_per_timestamp", DEFAULT_BYTES_PER_TIMESTAMP)?;
    let bytes_per_sample = attrs.count_or("bytes_per_sample", DEFAULT_BYTES_PER_SAMPLE)?;
    let num_spikes = attrs.count("num_spikes")?;
    let num_chans = attrs.count("num_chans")?;
    let samples_per_spike = attrs.count_or("samples_per_spike", DEFAULT_SAMPLES_PER_SPIKE)?;
    let timebase = attrs.rate_or("timebase", DEFAULT_TIMEBASE)?;
    let sample_rate = attrs.rate_or("rawrate", DEFAULT_RAWRATE)?;

    if channels.len() != num_chans {
        return Err(AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!(
                "header declares {} channels but {} were catalogued",
                num_chans,
                channels.len()
            ),
        });
    }

    // One record per (spike, channel): timestamp followed by one waveform
    let layout = RecordLayout::new()
        .field(Encoding::BigEndianUnsigned, bytes_per_timestamp, 1)
        .field(Encoding::LittleEndianSigned, bytes_per_sample, samples_per_spike);
    let record_count = checked_count(num_spikes, num_chans, "spike record count", path)?;
    let block = read_sentinel_delimited(&mut reader, &layout, record_count, path)?;

    let times: Array1<f64> = block
        .column(0)
        .into_iter()
        .step_by(TIMESTAMP_STRIDE)
        .map(|t| t as f64 / timebase)
        .collect();

    let waveforms = block
        .integers(1)
        .mapv(|v| v as f64)
        .into_shape_with_order((num_spikes, num_chans, samples_per_spike))
        .map_err(|e| AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!("cannot reshape waveforms: {}", e),
        })?;

    let gain_matrix = Array3::from_shape_fn(waveforms.raw_dim(), |(_, channel, _)| {
        channels[channel].gain
    });
    let waveforms = -scale_analog_signal(&waveforms, &gain_matrix, adc_fullscale, bytes_per_sample);

    log::debug!(
        "Read {} spikes x {} channels x {} samples from {}",
        num_spikes,
        num_chans,
        samples_per_spike,
        path.display()
    );

    Ok(SpikeTrain {
        times,
        waveforms,
        spike_count: num_spikes,
        channel_count: num_chans,
        samples_per_spike,
        sample_rate,
        attrs,
    })
}

/// Kind of continuous-signal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousKind {
    /// Low-rate EEG (`.eeg`, `.eeg<N>`)
    Eeg,
    /// High-rate EGF (`.egf`, `.egf<N>`)
    Egf,
}

impl ContinuousKind {
    /// Header key holding the sample count.
    pub fn sample_count_key(&self) -> &'static str {
        match self {
            ContinuousKind::Eeg => "num_EEG_samples",
            ContinuousKind::Egf => "num_EGF_samples",
        }
    }
}

/// Classifies a file extension such as `eeg`, `eeg3` or `egf`.
///
/// Returns the kind and the numeric suffix (1 when absent), or `None` for
/// extensions that are not continuous-signal files.
pub fn continuous_kind(extension: &str) -> Option<(ContinuousKind, u32)> {
    let kind = if extension.starts_with("eeg") {
        ContinuousKind::Eeg
    } else if extension.starts_with("egf") {
        ContinuousKind::Egf
    } else {
        return None;
    };

    let suffix = &extension[3..];
    if suffix.is_empty() {
        return Some((kind, 1));
    }
    suffix.parse::<u32>().ok().map(|n| (kind, n))
}

/// Decodes one `.eeg`/`.egf` file.
///
/// # Arguments
///
/// * `path` - The continuous-signal file
/// * `set_attrs` - Master header, used to resolve the channel and its gain
/// * `adc_fullscale` - Session-wide ADC full scale (μV)
pub fn read_analog_signal(path: &Path, set_attrs: &HeaderAttributes, adc_fullscale: f64) -> Result<AnalogSignal> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let (kind, suffix) = continuous_kind(extension).ok_or_else(|| AxonaError::CorruptFile {
        path: path.to_path_buf(),
        reason: format!("'.{}' is not a continuous-signal extension", extension),
    })?;

    let (mut reader, mut attrs) = open_with_header(path)?;

    let sample_count = attrs.count(kind.sample_count_key())?;
    let sample_rate = attrs.rate("sample_rate")?;
    let bytes_per_sample = attrs.count("bytes_per_sample")?;
    let num_chans = attrs.count("num_chans")?;
    if num_chans == 0 {
        return Err(AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: "continuous file declares zero channels".to_string(),
        });
    }

    let layout = RecordLayout::new().field(Encoding::LittleEndianSigned, bytes_per_sample, num_chans);
    let block = read_sentinel_delimited(&mut reader, &layout, sample_count, path)?;
    let data = block.integers(0).mapv(|v| v as f64);

    let (route, gain) = GainResolver::new(set_attrs).gain_for_continuous_signal(suffix)?;
    let signal = scale_with_gain(&data, gain, adc_fullscale, bytes_per_sample);

    attrs.insert(
        "raw_filename",
        Some(HeaderValue::Text(path.to_string_lossy().into_owned())),
    );
    attrs.insert("channel_id", Some(HeaderValue::Int(route.original_channel_id)));

    log::debug!(
        "Read {} samples at {} Hz from {} (channel {})",
        sample_count,
        sample_rate,
        path.display(),
        route.original_channel_id
    );

    Ok(AnalogSignal {
        channel_id: route.original_channel_id,
        signal,
        sample_rate,
        attrs,
    })
}

/// Decodes the `.pos` position file.
///
/// # Arguments
///
/// * `path` - The position file
/// * `tracked_spots` - `tracked_spots` from the master header
///
/// Data left between the last declared record and the closing sentinel is
/// logged and ignored.
pub fn read_tracking(path: &Path, tracked_spots: usize) -> Result<TrackingData> {
    let (mut reader, attrs) = open_with_header(path)?;

    let sample_rate = attrs.rate("sample_rate")?;
    let eeg_samples_per_position = attrs.float("EEG_samples_per_position")?;
    let num_pos_samples = attrs.count("num_pos_samples")?;
    let bytes_per_timestamp = attrs.count("bytes_per_timestamp")?;
    let bytes_per_coord = attrs.count("bytes_per_coord")?;

    // t, x1, y1, x2, y2, ..., numpix1, numpix2
    let coord_count = checked_count(2, tracked_spots, "coordinate count", path)?;
    let layout = RecordLayout::new()
        .field(Encoding::BigEndianSigned, bytes_per_timestamp, 1)
        .field(Encoding::BigEndianSigned, bytes_per_coord, coord_count)
        .field(Encoding::BigEndianSigned, BYTES_PER_PIXEL_COUNT, PIXEL_COUNT_FIELDS);
    let block = read_records(&mut reader, &layout, num_pos_samples, path)?;
    let trailing_data = !check_data_end_lenient(&mut reader, path)?;

    let timebase = attrs.rate("timebase")?;
    let times: Array1<f64> = block
        .column(0)
        .into_iter()
        .map(|t| t as f64 / timebase)
        .collect();

    let x_span = attrs.float("window_max_x")? - attrs.float("window_min_x")?;
    let y_span = attrs.float("window_max_y")? - attrs.float("window_min_y")?;
    let spans = [x_span, y_span];

    let raw = block.integers(1);
    let positions = Array2::from_shape_fn(raw.raw_dim(), |(sample, axis)| {
        let value = raw[[sample, axis]];
        if value == MISSING_COORDINATE {
            f64::NAN
        } else {
            value as f64 / spans[axis % 2]
        }
    });

    log::debug!(
        "Read {} position samples for {} spots from {}",
        num_pos_samples,
        tracked_spots,
        path.display()
    );

    Ok(TrackingData {
        times,
        positions,
        sample_rate,
        eeg_samples_per_position,
        trailing_data,
        attrs,
    })
}

/// Number of event records between the header and the closing sentinel.
///
/// The `num_inp_samples` header key leaves out output events, so the count
/// is taken from the body size instead.
pub fn event_record_count(data_start: u64, file_len: u64, record_size: usize, path: &Path) -> Result<usize> {
    let sentinel_len = DATA_END.len() as u64;
    if file_len < data_start + sentinel_len {
        return Err(AxonaError::TruncatedFile {
            path: path.to_path_buf(),
            what: "closing sentinel",
            expected: sentinel_len,
        });
    }
    if record_size == 0 {
        return Err(AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: "event records have zero size".to_string(),
        });
    }

    let body_len = file_len - sentinel_len - data_start;
    Ok((body_len / record_size as u64) as usize)
}

/// Decodes the `.inp` digital input/output and keypress file.
pub fn read_inp_events(path: &Path) -> Result<InpEvents> {
    let (mut reader, attrs) = open_with_header(path)?;

    let timebase = attrs.rate("timebase")?;
    let duration = attrs.float("duration")?;
    let bytes_per_timestamp = attrs.count("bytes_per_timestamp")?;
    let bytes_per_type = attrs.count("bytes_per_type")?;
    let bytes_per_value = attrs.count("bytes_per_value")?;

    let layout = RecordLayout::new()
        .field(Encoding::BigEndianSigned, bytes_per_timestamp, 1)
        .field(Encoding::Bytes, bytes_per_type, 1)
        .field(Encoding::LittleEndianSigned, 1, bytes_per_value);

    let data_start = reader
        .stream_position()
        .map_err(|e| AxonaError::io(path, e))?;
    let file_len = reader
        .get_ref()
        .metadata()
        .map_err(|e| AxonaError::io(path, e))?
        .len();
    let record_size = layout.checked_record_size(path)?;
    let record_count = event_record_count(data_start, file_len, record_size, path)?;

    if let Some(declared) = attrs.get("num_inp_samples").and_then(HeaderValue::as_int) {
        if declared != record_count as i64 {
            log::debug!(
                "{} declares {} input samples, body holds {} events",
                path.display(),
                declared,
                record_count
            );
        }
    }

    let block = read_sentinel_delimited(&mut reader, &layout, record_count, path)?;

    let times: Array1<f64> = block
        .column(0)
        .into_iter()
        .map(|t| t as f64 / timebase)
        .collect();

    let mut event_types = Vec::with_capacity(record_count);
    for record in 0..record_count {
        let tag: String = block
            .raw(record, 1)
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        let event_type = EventType::from_tag(&tag).ok_or_else(|| AxonaError::CorruptFile {
            path: path.to_path_buf(),
            reason: format!("unknown event type '{}' in record {}", tag, record),
        })?;
        event_types.push(event_type);
    }

    let values = block.integers(2).mapv(|v| v as i8);

    Ok(InpEvents {
        duration,
        times,
        event_types,
        values,
        attrs,
    })
}
