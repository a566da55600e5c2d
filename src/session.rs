use chrono::NaiveDateTime;
use std::cell::OnceCell;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::catalog::{discover_channel_groups, sibling_files, ChannelGroup};
use crate::cut::{discover_cut_files, read_cut_file};
use crate::header::{parse_attrs, HeaderAttributes};
use crate::reader::{continuous_kind, read_analog_signal, read_inp_events, read_tracking};
use crate::types::*;

const TRIAL_DATETIME_FORMAT: &str = "%A, %d %b %Y%H:%M:%S";

/// A recording session: every file sharing one base name.
///
/// Only the `.set` file is read when the session is opened. Everything else
/// is decoded on first access and cached, so repeated access never re-reads
/// a file. A file that fails to decode does not affect the others.
///
/// # Examples
///
/// ```no_run
/// use axona_importer::Session;
///
/// let session = Session::open("path/to/recording.set")?;
/// for group in session.channel_groups()? {
///     let train = group.spike_train()?;
///     println!("group {}: {} spikes", group.channel_group_id, train.spike_count);
/// }
/// # Ok::<(), axona_importer::AxonaError>(())
/// ```
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    base_filename: String,
    attrs: HeaderAttributes,
    adc_fullscale: f64,
    duration: f64,
    tracked_spots: usize,
    start_datetime: Option<NaiveDateTime>,

    channel_groups: OnceCell<Vec<ChannelGroup>>,
    analog_signals: OnceCell<Vec<AnalogSignal>>,
    tracking: OnceCell<TrackingData>,
    inp_events: OnceCell<InpEvents>,
    cuts: OnceCell<Vec<CutAssignment>>,
}

impl Session {
    /// Opens a session from its `.set` file or from its extension-less base path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let set_path = if path.extension().is_some_and(|e| e == "set") {
            path.to_path_buf()
        } else {
            let mut with_extension = OsString::from(path.as_os_str());
            with_extension.push(".set");
            PathBuf::from(with_extension)
        };

        let base_filename = set_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AxonaError::MissingFile {
                path: set_path.clone(),
            })?
            .to_string();
        let dir = match set_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let bytes = fs::read(&set_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AxonaError::MissingFile {
                path: set_path.clone(),
            },
            _ => AxonaError::io(&set_path, e),
        })?;
        let text: String = bytes.iter().map(|&b| b as char).collect();
        let attrs = parse_attrs(&text, &set_path);

        // ADC_fullscale_mv is stored in millivolts
        let adc_fullscale = attrs.float("ADC_fullscale_mv")? * 1000.0;
        let duration = attrs.float("duration")?;
        let tracked_spots = attrs.count("tracked_spots")?;
        let start_datetime = parse_start_datetime(&attrs);

        log::info!(
            "Opened Axona session '{}' ({:.1} s, {} tracked spot{})",
            base_filename,
            duration,
            tracked_spots,
            if tracked_spots != 1 { "s" } else { "" }
        );

        Ok(Session {
            dir,
            base_filename,
            attrs,
            adc_fullscale,
            duration,
            tracked_spots,
            start_datetime,
            channel_groups: OnceCell::new(),
            analog_signals: OnceCell::new(),
            tracking: OnceCell::new(),
            inp_events: OnceCell::new(),
            cuts: OnceCell::new(),
        })
    }

    /// Session name (the shared base file name).
    pub fn session(&self) -> &str {
        &self.base_filename
    }

    /// Directory plus base file name, without extension.
    pub fn base_path(&self) -> PathBuf {
        self.dir.join(&self.base_filename)
    }

    /// Attributes of the `.set` file.
    pub fn attrs(&self) -> &HeaderAttributes {
        &self.attrs
    }

    /// ADC full scale (μV).
    pub fn adc_fullscale(&self) -> f64 {
        self.adc_fullscale
    }

    /// Recording duration (s).
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn tracked_spots_count(&self) -> usize {
        self.tracked_spots
    }

    /// Trial start from `trial_date` and `trial_time`, if both are present.
    pub fn start_datetime(&self) -> Option<NaiveDateTime> {
        self.start_datetime
    }

    /// Every sibling `<base>.*` file followed by every `<base>_<N>.cut` file.
    pub fn related_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = sibling_files(&self.dir, &self.base_filename)?
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        files.extend(
            discover_cut_files(&self.dir, &self.base_filename)?
                .into_iter()
                .map(|(path, _)| path),
        );
        Ok(files)
    }

    /// Channel groups, discovered on first access.
    pub fn channel_groups(&self) -> Result<&[ChannelGroup]> {
        if let Some(groups) = self.channel_groups.get() {
            return Ok(groups);
        }
        let groups = discover_channel_groups(&self.dir, &self.base_filename, &self.attrs, self.adc_fullscale)?;
        Ok(self.channel_groups.get_or_init(|| groups))
    }

    /// Total number of channels across all groups.
    pub fn channel_count(&self) -> Result<usize> {
        Ok(self.channel_groups()?.iter().map(ChannelGroup::channel_count).sum())
    }

    /// The group owning global channel index `channel_id`.
    pub fn channel_group(&self, channel_id: usize) -> Result<Option<&ChannelGroup>> {
        Ok(self
            .channel_groups()?
            .iter()
            .find(|g| g.channels.iter().any(|c| c.index == channel_id)))
    }

    /// The group with id `channel_group_id`.
    pub fn channel_group_by_id(&self, channel_group_id: usize) -> Result<Option<&ChannelGroup>> {
        Ok(self
            .channel_groups()?
            .iter()
            .find(|g| g.channel_group_id == channel_group_id))
    }

    /// Continuous signals from every `.eeg*`/`.egf*` file, in file-name order.
    ///
    /// A file that fails to decode is logged and left out, so the rest stay
    /// readable.
    pub fn analog_signals(&self) -> Result<&[AnalogSignal]> {
        if let Some(signals) = self.analog_signals.get() {
            return Ok(signals);
        }
        let signals = self.read_analog_signals()?;
        Ok(self.analog_signals.get_or_init(|| signals))
    }

    fn read_analog_signals(&self) -> Result<Vec<AnalogSignal>> {
        let mut signals = Vec::new();

        for (path, extension) in sibling_files(&self.dir, &self.base_filename)? {
            if !extension.starts_with("eeg") && !extension.starts_with("egf") {
                continue;
            }
            if continuous_kind(&extension).is_none() {
                log::warn!("Unable to load \"{}\": unknown continuous file suffix", path.display());
                continue;
            }

            match read_analog_signal(&path, &self.attrs, self.adc_fullscale) {
                Ok(signal) => signals.push(signal),
                Err(e) => log::warn!("Unable to load \"{}\": {}", path.display(), e),
            }
        }

        log::info!("Read {} analog signal{}.", signals.len(), if signals.len() != 1 { "s" } else { "" });
        Ok(signals)
    }

    /// Position data from the `.pos` file.
    pub fn tracking(&self) -> Result<&TrackingData> {
        if let Some(tracking) = self.tracking.get() {
            return Ok(tracking);
        }
        let tracking = read_tracking(&self.sibling("pos"), self.tracked_spots)?;
        Ok(self.tracking.get_or_init(|| tracking))
    }

    /// Events from the `.inp` file.
    pub fn inp_events(&self) -> Result<&InpEvents> {
        if let Some(events) = self.inp_events.get() {
            return Ok(events);
        }
        let events = read_inp_events(&self.sibling("inp"))?;
        Ok(self.inp_events.get_or_init(|| events))
    }

    /// Cluster assignments from every `<base>_<N>.cut` file.
    ///
    /// Each cut must hold one index per spike of its channel group, so this
    /// decodes the matching spike trains as well.
    pub fn cuts(&self) -> Result<&[CutAssignment]> {
        if let Some(cuts) = self.cuts.get() {
            return Ok(cuts);
        }
        let cuts = self.read_cuts()?;
        Ok(self.cuts.get_or_init(|| cuts))
    }

    fn read_cuts(&self) -> Result<Vec<CutAssignment>> {
        let files = discover_cut_files(&self.dir, &self.base_filename)?;
        if files.is_empty() {
            let mut pattern = self.base_path().into_os_string();
            pattern.push("_<N>.cut");
            return Err(AxonaError::MissingFile {
                path: PathBuf::from(pattern),
            });
        }

        let mut cuts = Vec::with_capacity(files.len());
        for (path, channel_group_id) in files {
            let cut = read_cut_file(&path, channel_group_id)?;

            match self.channel_group_by_id(channel_group_id)? {
                Some(group) => {
                    let spike_count = group.spike_train()?.spike_count;
                    if cut.indices.len() != spike_count {
                        return Err(AxonaError::InconsistentCutFile {
                            path,
                            channel_group_id,
                            cut_len: cut.indices.len(),
                            spike_count,
                        });
                    }
                }
                None => log::warn!(
                    "Cut file {} has no matching channel group {}",
                    path.display(),
                    channel_group_id
                ),
            }

            cuts.push(cut);
        }

        Ok(cuts)
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base_filename, extension))
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Axona session {}: duration: {} s>", self.base_filename, self.duration)
    }
}

fn parse_start_datetime(attrs: &HeaderAttributes) -> Option<NaiveDateTime> {
    let date = attrs.get("trial_date")?.to_string();
    let time = attrs.get("trial_time")?.to_string();

    match NaiveDateTime::parse_from_str(&format!("{}{}", date, time), TRIAL_DATETIME_FORMAT) {
        Ok(datetime) => Some(datetime),
        Err(e) => {
            log::warn!("Unable to parse trial start '{} {}': {}", date, time, e);
            None
        }
    }
}
