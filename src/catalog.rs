//! Discovery of the per-tetrode spike files of a session.

use std::cell::OnceCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::gain::GainResolver;
use crate::header::HeaderAttributes;
use crate::reader::{open_with_header, read_spike_train};
use crate::types::*;

/// One electrode group and its `<base>.<N>` spike file.
#[derive(Debug, Clone)]
pub struct ChannelGroup {
    /// Group id, one less than the file's numeric extension
    pub channel_group_id: usize,
    /// Spike file backing the group
    pub path: PathBuf,
    /// Channels in file order
    pub channels: Vec<Channel>,
    /// Header of the spike file
    pub attrs: HeaderAttributes,
    adc_fullscale: f64,
    spike_train: OnceCell<SpikeTrain>,
}

impl ChannelGroup {
    /// The group's spikes, decoded on first access.
    pub fn spike_train(&self) -> Result<&SpikeTrain> {
        if let Some(train) = self.spike_train.get() {
            return Ok(train);
        }
        let train = read_spike_train(&self.path, &self.channels, self.adc_fullscale)?;
        Ok(self.spike_train.get_or_init(|| train))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Axona channel_group {}: channel_count: {}>",
            self.channel_group_id,
            self.channels.len()
        )
    }
}

/// Files in `dir` named `<base>.<rest>`, as `(path, rest)` pairs sorted by name.
pub(crate) fn sibling_files(dir: &Path, base: &str) -> Result<Vec<(PathBuf, String)>> {
    let prefix = format!("{}.", base);
    let mut found = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| AxonaError::io(dir, e))? {
        let entry = entry.map_err(|e| AxonaError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(rest) = name.strip_prefix(&prefix) {
            if !rest.is_empty() {
                found.push((entry.path(), rest.to_string()));
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Finds every `<base>.<N>` spike file and assigns global channel indices.
///
/// Groups are ordered by id. Channels are numbered consecutively across
/// groups, each group contributing its own `num_chans`.
pub fn discover_channel_groups(
    dir: &Path,
    base: &str,
    set_attrs: &HeaderAttributes,
    adc_fullscale: f64,
) -> Result<Vec<ChannelGroup>> {
    let mut candidates = Vec::new();
    for (path, extension) in sibling_files(dir, base)? {
        if !extension.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        match extension.parse::<usize>() {
            Ok(n) if n > 0 => candidates.push((n - 1, path)),
            _ => log::warn!(
                "Unable to load channel group \"{}\": invalid group number",
                path.display()
            ),
        }
    }

    if candidates.is_empty() {
        return Err(AxonaError::NoChannelGroupFiles {
            base: dir.join(base),
        });
    }
    candidates.sort();

    let gains = GainResolver::new(set_attrs);
    let mut channel_count = 0;
    let mut groups = Vec::with_capacity(candidates.len());

    for (channel_group_id, path) in candidates {
        let (_, attrs) = open_with_header(&path)?;
        let num_chans = attrs.count("num_chans")?;

        let mut channels = Vec::new();
        for i in 0..num_chans {
            let index = channel_count + i;
            channels.push(Channel {
                index,
                name: format!(
                    "channel_{}_channel_group_{}_internal_{}",
                    index, channel_group_id, i
                ),
                gain: gains.gain(channel_group_id, i)?,
            });
        }
        channel_count += num_chans;

        groups.push(ChannelGroup {
            channel_group_id,
            path,
            channels,
            attrs,
            adc_fullscale,
            spike_train: OnceCell::new(),
        });
    }

    log::info!(
        "Found {} channel group{} with {} channel{}.",
        groups.len(),
        if groups.len() != 1 { "s" } else { "" },
        channel_count,
        if channel_count != 1 { "s" } else { "" }
    );

    Ok(groups)
}
