//! Per-sample signal partition: raw channel intensities split into
//! methylated/unmethylated/control/SNP vectors according to the manifest.

use anyhow::{
    bail,
    Result,
};
use log::warn;

use crate::data_structs::arrays::Channel;
use crate::data_structs::manifest::{
    Manifest,
    ProbeDesign,
    ProbeKind,
};
use crate::data_structs::sample::Sample;
use crate::error::MethError;
use crate::io::idat::IdatData;

/// Offset in the beta denominator, preventing division by near-zero.
pub const BETA_OFFSET: f64 = 100.0;
/// Offset applied to both channels in the m-value log ratio.
pub const M_OFFSET: f64 = 1.0;
/// M-value emitted when both channels are exactly zero post-correction,
/// keeping matrix shape consistent instead of raising.
pub const M_SENTINEL: f64 = 0.0;

/// One exported control/SNP intensity row.
#[derive(Debug, Clone)]
pub struct ControlRow {
    pub sample_id: String,
    pub address: u32,
    pub name: String,
    pub control_type: String,
    pub mean_grn: f64,
    pub mean_red: f64,
}

/// Methylated/unmethylated signal pairs for one sample, derived by applying
/// the manifest to a pair of raw intensity sets.
///
/// Type I probes read both states from their assigned channel at two
/// addresses; their readings on the *other* channel form the out-of-band
/// pool the background correction is estimated from. Type II probes read
/// methylated from green and unmethylated from red at one address.
///
/// The partition is owned by one sample's processing step and is discarded
/// after beta/m derivation.
#[derive(Debug, Clone)]
pub struct SigSet {
    sample_id: String,

    // cg/ch probes, manifest data-probe order
    meth: Vec<f64>,
    unmeth: Vec<f64>,
    meth_channel: Vec<Channel>,
    unmeth_channel: Vec<Channel>,

    // rs probes, manifest order
    snp_meth: Vec<f64>,
    snp_unmeth: Vec<f64>,
    snp_meth_channel: Vec<Channel>,
    snp_unmeth_channel: Vec<Channel>,

    // control probes, manifest control order
    control_grn: Vec<f64>,
    control_red: Vec<f64>,

    // out-of-band pools (finite values only)
    oob_green: Vec<f64>,
    oob_red: Vec<f64>,

    // pre-correction copies, kept only on request
    raw_meth: Option<Vec<f64>>,
    raw_unmeth: Option<Vec<f64>>,
}

impl SigSet {
    /// Reads both channel files of `sample` and partitions them according
    /// to `manifest`.
    pub fn from_idat_pair(
        sample: &Sample,
        manifest: &Manifest,
        keep_uncorrected: bool,
    ) -> Result<Self> {
        let green = IdatData::read(sample.green_idat(), Channel::Green)?;
        let red = IdatData::read(sample.red_idat(), Channel::Red)?;
        Self::from_idats(sample, &green, &red, manifest, keep_uncorrected)
    }

    /// Partitions already-parsed channel data.
    pub fn from_idats(
        sample: &Sample,
        green: &IdatData,
        red: &IdatData,
        manifest: &Manifest,
        keep_uncorrected: bool,
    ) -> Result<Self> {
        if green.n_probes() != red.n_probes() {
            bail!(MethError::ChannelMismatch {
                sample: sample.sample_id().to_string(),
                green: green.n_probes(),
                red: red.n_probes(),
            });
        }
        if let (Some(g), Some(r)) = (green.barcode(), red.barcode()) {
            if g != r {
                warn!(
                    "{}: channel files carry different barcodes ({} vs {})",
                    sample.sample_id(),
                    g,
                    r
                );
            }
        }

        let green_means = green.mean_by_address();
        let red_means = red.mean_by_address();
        let lookup = |channel: Channel, address: u32| -> f64 {
            let map = match channel {
                Channel::Green => &green_means,
                Channel::Red => &red_means,
            };
            map.get(&address)
                .map(|v| *v as f64)
                .unwrap_or(f64::NAN)
        };

        let mut sigset = Self {
            sample_id: sample.sample_id().to_string(),
            meth: Vec::new(),
            unmeth: Vec::new(),
            meth_channel: Vec::new(),
            unmeth_channel: Vec::new(),
            snp_meth: Vec::new(),
            snp_unmeth: Vec::new(),
            snp_meth_channel: Vec::new(),
            snp_unmeth_channel: Vec::new(),
            control_grn: Vec::with_capacity(manifest.controls().len()),
            control_red: Vec::with_capacity(manifest.controls().len()),
            oob_green: Vec::new(),
            oob_red: Vec::new(),
            raw_meth: None,
            raw_unmeth: None,
        };

        let mut missing = 0usize;
        for probe in manifest.probes() {
            let (meth, unmeth, meth_ch, unmeth_ch) = match probe.design {
                ProbeDesign::TypeI(channel) => {
                    // Both states from the assigned channel, two addresses.
                    let address_b = probe.address_b.unwrap_or(probe.address_a);
                    let meth = lookup(channel, address_b);
                    let unmeth = lookup(channel, probe.address_a);

                    // The opposite channel's readings are out-of-band.
                    let opposite = channel.opposite();
                    for address in [probe.address_a, address_b] {
                        let oob = lookup(opposite, address);
                        if oob.is_finite() {
                            match opposite {
                                Channel::Green => sigset.oob_green.push(oob),
                                Channel::Red => sigset.oob_red.push(oob),
                            }
                        }
                    }
                    (meth, unmeth, channel, channel)
                },
                ProbeDesign::TypeII => {
                    let meth = lookup(Channel::Green, probe.address_a);
                    let unmeth = lookup(Channel::Red, probe.address_a);
                    (meth, unmeth, Channel::Green, Channel::Red)
                },
            };

            if meth.is_nan() || unmeth.is_nan() {
                missing += 1;
            }

            if probe.kind == ProbeKind::Snp {
                sigset.snp_meth.push(meth);
                sigset.snp_unmeth.push(unmeth);
                sigset.snp_meth_channel.push(meth_ch);
                sigset.snp_unmeth_channel.push(unmeth_ch);
            } else {
                sigset.meth.push(meth);
                sigset.unmeth.push(unmeth);
                sigset.meth_channel.push(meth_ch);
                sigset.unmeth_channel.push(unmeth_ch);
            }
        }

        for control in manifest.controls() {
            sigset
                .control_grn
                .push(lookup(Channel::Green, control.address));
            sigset
                .control_red
                .push(lookup(Channel::Red, control.address));
        }

        if missing > 0 {
            warn!(
                "{}: {} probe(s) missing from idat address space",
                sigset.sample_id, missing
            );
        }

        if keep_uncorrected {
            sigset.raw_meth = Some(sigset.meth.clone());
            sigset.raw_unmeth = Some(sigset.unmeth.clone());
        }

        Ok(sigset)
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    /// Number of cg/ch probes in the partition.
    pub fn n_data_probes(&self) -> usize {
        self.meth.len()
    }

    pub fn meth(&self) -> &[f64] {
        &self.meth
    }

    pub fn unmeth(&self) -> &[f64] {
        &self.unmeth
    }

    pub fn raw_meth(&self) -> Option<&[f64]> {
        self.raw_meth.as_deref()
    }

    pub fn raw_unmeth(&self) -> Option<&[f64]> {
        self.raw_unmeth.as_deref()
    }

    pub fn oob(
        &self,
        channel: Channel,
    ) -> &[f64] {
        match channel {
            Channel::Green => &self.oob_green,
            Channel::Red => &self.oob_red,
        }
    }

    /// All finite in-band intensities read from `channel` (data + SNP
    /// probes; controls excluded from background estimation).
    pub fn in_band(
        &self,
        channel: Channel,
    ) -> Vec<f64> {
        let data = self
            .meth
            .iter()
            .zip(self.meth_channel.iter())
            .chain(self.unmeth.iter().zip(self.unmeth_channel.iter()));
        let snps = self
            .snp_meth
            .iter()
            .zip(self.snp_meth_channel.iter())
            .chain(
                self.snp_unmeth
                    .iter()
                    .zip(self.snp_unmeth_channel.iter()),
            );
        data.chain(snps)
            .filter(|(v, ch)| v.is_finite() && **ch == channel)
            .map(|(v, _)| *v)
            .collect()
    }

    /// Applies a per-channel transform to every signal value (data, SNP and
    /// control vectors). NaN entries pass through untouched.
    pub fn apply_channelwise<F>(
        &mut self,
        f: F,
    ) where
        F: Fn(Channel, f64) -> f64, {
        let apply = |values: &mut [f64], channels: &[Channel]| {
            for (v, ch) in values.iter_mut().zip(channels.iter()) {
                if v.is_finite() {
                    *v = f(*ch, *v);
                }
            }
        };
        // Split borrows field-by-field to keep the closure free of &self.
        let Self {
            meth,
            unmeth,
            meth_channel,
            unmeth_channel,
            snp_meth,
            snp_unmeth,
            snp_meth_channel,
            snp_unmeth_channel,
            control_grn,
            control_red,
            ..
        } = self;
        apply(meth, meth_channel);
        apply(unmeth, unmeth_channel);
        apply(snp_meth, snp_meth_channel);
        apply(snp_unmeth, snp_unmeth_channel);
        for v in control_grn.iter_mut() {
            if v.is_finite() {
                *v = f(Channel::Green, *v);
            }
        }
        for v in control_red.iter_mut() {
            if v.is_finite() {
                *v = f(Channel::Red, *v);
            }
        }
    }

    /// Mean of the corrected intensities of the given control probes on one
    /// channel. `None` when no finite values exist.
    pub fn control_mean(
        &self,
        manifest: &Manifest,
        control_types: &[&str],
        channel: Channel,
    ) -> Option<f64> {
        let values = match channel {
            Channel::Green => &self.control_grn,
            Channel::Red => &self.control_red,
        };
        let selected: Vec<f64> = manifest
            .controls()
            .iter()
            .zip(values.iter())
            .filter(|(c, v)| {
                v.is_finite()
                    && control_types
                        .iter()
                        .any(|t| c.control_type.eq_ignore_ascii_case(t))
            })
            .map(|(_, v)| *v)
            .collect();
        if selected.is_empty() {
            None
        } else {
            Some(selected.iter().sum::<f64>() / selected.len() as f64)
        }
    }

    /// Beta-value per cg/ch probe: meth / (meth + unmeth + offset), clamped
    /// into [0, 1]. NaN propagates for missing probes.
    pub fn beta_values(&self) -> Vec<f64> {
        self.meth
            .iter()
            .zip(self.unmeth.iter())
            .map(|(m, u)| beta_value(*m, *u))
            .collect()
    }

    /// M-value per cg/ch probe: log2((meth + 1) / (unmeth + 1)). Exactly
    /// zero on both channels yields the sentinel, never an error.
    pub fn m_values(&self) -> Vec<f64> {
        self.meth
            .iter()
            .zip(self.unmeth.iter())
            .map(|(m, u)| m_value(*m, *u))
            .collect()
    }

    /// Control and SNP intensity rows for the optional control export. SNP
    /// probes report meth under the green column and unmeth under the red
    /// column.
    pub fn control_rows(
        &self,
        manifest: &Manifest,
    ) -> Vec<ControlRow> {
        let mut rows = Vec::with_capacity(self.control_grn.len() + self.snp_meth.len());
        for (control, (grn, red)) in manifest.controls().iter().zip(
            self.control_grn
                .iter()
                .zip(self.control_red.iter()),
        ) {
            rows.push(ControlRow {
                sample_id: self.sample_id.clone(),
                address: control.address,
                name: control.name.clone(),
                control_type: control.control_type.clone(),
                mean_grn: *grn,
                mean_red: *red,
            });
        }

        let snp_probes = manifest
            .probes()
            .iter()
            .filter(|p| p.kind == ProbeKind::Snp);
        for (probe, (meth, unmeth)) in snp_probes.zip(
            self.snp_meth
                .iter()
                .zip(self.snp_unmeth.iter()),
        ) {
            let control_type = match probe.design {
                ProbeDesign::TypeI(_) => "SNP_I",
                ProbeDesign::TypeII => "SNP_II",
            };
            rows.push(ControlRow {
                sample_id: self.sample_id.clone(),
                address: probe.address_a,
                name: probe.name.clone(),
                control_type: control_type.to_string(),
                mean_grn: *meth,
                mean_red: *unmeth,
            });
        }
        rows
    }
}

pub fn beta_value(
    meth: f64,
    unmeth: f64,
) -> f64 {
    let beta = meth / (meth + unmeth + BETA_OFFSET);
    beta.clamp(0.0, 1.0)
}

pub fn m_value(
    meth: f64,
    unmeth: f64,
) -> f64 {
    if meth == 0.0 && unmeth == 0.0 {
        return M_SENTINEL;
    }
    ((meth + M_OFFSET) / (unmeth + M_OFFSET)).log2()
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn beta_is_bounded() {
        assert_approx_eq!(beta_value(0.0, 0.0), 0.0);
        assert_approx_eq!(beta_value(900.0, 0.0), 0.9);
        assert!(beta_value(1e9, 1.0) <= 1.0);
        assert!(beta_value(0.0, 1e9) >= 0.0);
    }

    #[test]
    fn m_value_sentinel_on_double_zero() {
        assert_eq!(m_value(0.0, 0.0), M_SENTINEL);
        assert!(m_value(100.0, 100.0).abs() < 1e-12);
        assert!(m_value(1000.0, 10.0) > 0.0);
        assert!(m_value(10.0, 1000.0) < 0.0);
        assert!(m_value(1.0, 0.0).is_finite());
    }

    #[test]
    fn beta_nan_propagates() {
        assert!(beta_value(f64::NAN, 10.0).is_nan());
    }
}
