//! Per-channel gains from the `.set` file and raw-to-microvolt scaling.

use ndarray::{Array, Dimension, Zip};

use crate::header::HeaderAttributes;
use crate::types::{AxonaError, Result};

/// Channels per electrode group assumed by the `gain_ch_<n>` numbering.
pub const CHANNELS_PER_GROUP: usize = 4;

/// Where a continuous-signal file takes its data from.
///
/// DacqUSB routes every `.eeg<N>`/`.egf<N>` slot to a recording channel, and
/// that channel through a reference bank to the channel it was referenced
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousRoute {
    /// File suffix (`.eeg` is suffix 1)
    pub suffix: u32,
    /// Value of `EEG_ch_<suffix>`
    pub final_channel_id: i64,
    /// Value of `mode_ch_<final>`
    pub mode: i64,
    /// Value of `b_in_ch_<final>`
    pub reference_bank: i64,
    /// Value of `ref_<bank>`
    pub original_channel_id: i64,
}

/// Resolves channel gains from the master `.set` header.
#[derive(Debug, Clone, Copy)]
pub struct GainResolver<'a> {
    attrs: &'a HeaderAttributes,
}

impl<'a> GainResolver<'a> {
    pub fn new(attrs: &'a HeaderAttributes) -> Self {
        GainResolver { attrs }
    }

    /// Gain of channel `channel_index` inside group `channel_group_id`.
    pub fn gain(&self, channel_group_id: usize, channel_index: usize) -> Result<f64> {
        let global_channel_index = channel_group_id
            .checked_mul(CHANNELS_PER_GROUP)
            .and_then(|base| base.checked_add(channel_index))
            .ok_or_else(|| AxonaError::CorruptFile {
                path: self.attrs.source().to_path_buf(),
                reason: format!(
                    "channel {} of group {} has no representable global index",
                    channel_index, channel_group_id
                ),
            })?;
        self.attrs.float(&format!("gain_ch_{}", global_channel_index))
    }

    /// Follows `EEG_ch_<suffix>` through the reference chain.
    pub fn continuous_route(&self, suffix: u32) -> Result<ContinuousRoute> {
        let final_channel_id = self.attrs.int(&format!("EEG_ch_{}", suffix))?;
        let mode = self.attrs.int(&format!("mode_ch_{}", final_channel_id))?;
        let reference_bank = self.attrs.int(&format!("b_in_ch_{}", final_channel_id))?;
        let original_channel_id = self.attrs.int(&format!("ref_{}", reference_bank))?;

        Ok(ContinuousRoute {
            suffix,
            final_channel_id,
            mode,
            reference_bank,
            original_channel_id,
        })
    }

    /// Resolves the route of a continuous-signal file and the gain of the
    /// original channel it records.
    pub fn gain_for_continuous_signal(&self, suffix: u32) -> Result<(ContinuousRoute, f64)> {
        let route = self.continuous_route(suffix)?;
        let key = format!("gain_ch_{}", route.original_channel_id);
        let original = usize::try_from(route.original_channel_id).map_err(|_| {
            AxonaError::TypeMismatch {
                path: self.attrs.source().to_path_buf(),
                key: format!("ref_{}", route.reference_bank),
                expected: "a non-negative channel id",
                found: route.original_channel_id.to_string(),
            }
        })?;
        log::debug!("Continuous signal {} uses {}", suffix, key);

        let gain = self.gain(original / CHANNELS_PER_GROUP, original % CHANNELS_PER_GROUP)?;
        Ok((route, gain))
    }
}

/// Converts one raw sample to microvolts.
///
/// With one byte per sample the mapping is
/// `[-128, 127] -> [-1, 127/128] * adc_fullscale / gain`.
pub fn scale_sample(value: f64, gain: f64, adc_fullscale: f64, bytes_per_sample: usize) -> f64 {
    let max_value = 2f64.powi(8 * bytes_per_sample as i32 - 1);
    (value / max_value) * (adc_fullscale / gain)
}

/// Scales an array of raw samples element-wise against a gain array of the
/// same shape.
///
/// # Panics
///
/// Panics if `values` and `gains` differ in shape.
pub fn scale_analog_signal<D: Dimension>(
    values: &Array<f64, D>,
    gains: &Array<f64, D>,
    adc_fullscale: f64,
    bytes_per_sample: usize,
) -> Array<f64, D> {
    Zip::from(values)
        .and(gains)
        .map_collect(|&v, &g| scale_sample(v, g, adc_fullscale, bytes_per_sample))
}

/// Scales an array of raw samples with one gain for every element.
pub fn scale_with_gain<D: Dimension>(
    values: &Array<f64, D>,
    gain: f64,
    adc_fullscale: f64,
    bytes_per_sample: usize,
) -> Array<f64, D> {
    values.mapv(|v| scale_sample(v, gain, adc_fullscale, bytes_per_sample))
}
