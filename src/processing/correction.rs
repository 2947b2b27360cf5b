//! Background and dye-bias correction of raw channel intensities.
//!
//! Background correction is normalize-out-of-band (NOOB): each channel's
//! background distribution is estimated from the probes that interrogate
//! that channel without expecting signal there (the out-of-band pool of the
//! opposite-channel Type I probes), and the in-band intensities are replaced
//! by their expected true signal under a normal-exponential convolution
//! model. Parameters come from a method-of-moments fit on the out-of-band
//! pool; the estimator choice is recorded in DESIGN.md since it materially
//! changes output values.

use anyhow::{
    Context,
    Result,
};
use log::{
    debug,
    warn,
};
use once_cell::sync::Lazy;
use statrs::distribution::{
    Continuous,
    ContinuousCDF,
    Normal,
};

use crate::data_structs::arrays::Channel;
use crate::data_structs::manifest::Manifest;
use crate::data_structs::sample::Sample;
use crate::data_structs::sigset::SigSet;
use crate::utils::{
    mean,
    std_dev,
};

/// Corrected intensities never drop below this floor.
pub const NOOB_FLOOR: f64 = 0.1;
/// Conventional offset added to every background-corrected intensity.
pub const NOOB_OFFSET: f64 = 15.0;
/// Lower bound on the exponential signal mean, guarding against degenerate
/// fits when in-band and out-of-band means nearly coincide.
const MIN_ALPHA: f64 = 10.0;

/// Normal-exponential convolution parameters for one channel.
#[derive(Debug, Clone, Copy)]
pub struct NoobParams {
    /// Background mean (normal component).
    pub mu: f64,
    /// Background standard deviation.
    pub sigma: f64,
    /// Signal mean (exponential component).
    pub alpha: f64,
}

/// Method-of-moments fit: μ and σ from the out-of-band pool, α from the
/// excess of the in-band mean over the background mean.
pub fn estimate_noob_params(
    oob: &[f64],
    in_band_mean: f64,
) -> Option<NoobParams> {
    let finite: Vec<f64> = oob.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let mu = mean(&finite);
    let mut sigma = std_dev(&finite);
    if !(sigma > 0.0) {
        sigma = 1.0;
    }
    let alpha = (in_band_mean - mu).max(MIN_ALPHA);
    Some(NoobParams { mu, sigma, alpha })
}

static STD_NORMAL: Lazy<Normal> =
    Lazy::new(|| Normal::new(0.0, 1.0).expect("standard normal is valid"));

/// Expected true signal given an observed intensity under the
/// normal-exponential model.
pub fn normexp_signal(
    params: &NoobParams,
    x: f64,
) -> f64 {
    let mu_sf = x - params.mu - params.sigma * params.sigma / params.alpha;
    let z = mu_sf / params.sigma;
    let ratio = STD_NORMAL.pdf(z) / STD_NORMAL.cdf(z);
    let signal = if ratio.is_finite() {
        mu_sf + params.sigma * ratio
    } else {
        // cdf underflow far in the left tail; the model's expectation
        // approaches zero there.
        0.0
    };
    signal
}

/// Applies NOOB background correction in place, per channel.
///
/// A channel without an out-of-band pool (a manifest carrying no Type I
/// probes of the opposite channel) is left uncorrected with a warning.
pub fn noob_correct(sigset: &mut SigSet) -> Result<()> {
    let params_for = |channel: Channel, sigset: &SigSet| -> Option<NoobParams> {
        let in_band = sigset.in_band(channel);
        if in_band.is_empty() {
            return None;
        }
        estimate_noob_params(sigset.oob(channel), mean(&in_band))
    };

    let green = params_for(Channel::Green, sigset);
    let red = params_for(Channel::Red, sigset);

    for (channel, params) in [(Channel::Green, &green), (Channel::Red, &red)] {
        match params {
            Some(p) => {
                debug!(
                    "{}: noob {} background mu={:.2} sigma={:.2} alpha={:.2}",
                    sigset.sample_id(),
                    channel,
                    p.mu,
                    p.sigma,
                    p.alpha
                );
            },
            None => {
                warn!(
                    "{}: no out-of-band probes for channel {}, background left uncorrected",
                    sigset.sample_id(),
                    channel
                );
            },
        }
    }

    sigset.apply_channelwise(|channel, value| {
        let params = match channel {
            Channel::Green => &green,
            Channel::Red => &red,
        };
        match params {
            Some(p) => normexp_signal(p, value).max(NOOB_FLOOR) + NOOB_OFFSET,
            None => value,
        }
    });
    Ok(())
}

/// Linear dye-bias correction: scales both channels so their normalization
/// control means meet at the common midpoint. Applied after background
/// correction, before beta/m derivation.
///
/// Returns whether a correction was applied; manifests without
/// normalization controls are skipped with a warning.
pub fn dye_bias_correct(
    sigset: &mut SigSet,
    manifest: &Manifest,
) -> Result<bool> {
    let grn_mean = sigset.control_mean(manifest, &["NORM_C", "NORM_G"], Channel::Green);
    let red_mean = sigset.control_mean(manifest, &["NORM_A", "NORM_T"], Channel::Red);

    let (grn_mean, red_mean) = match (grn_mean, red_mean) {
        (Some(g), Some(r)) if g > 0.0 && r > 0.0 => (g, r),
        _ => {
            warn!(
                "{}: normalization controls unavailable, dye bias correction skipped",
                sigset.sample_id()
            );
            return Ok(false);
        },
    };

    let reference = (grn_mean + red_mean) / 2.0;
    let green_factor = reference / grn_mean;
    let red_factor = reference / red_mean;
    debug!(
        "{}: dye bias factors green={:.4} red={:.4}",
        sigset.sample_id(),
        green_factor,
        red_factor
    );

    sigset.apply_channelwise(|channel, value| match channel {
        Channel::Green => value * green_factor,
        Channel::Red => value * red_factor,
    });
    Ok(true)
}

/// Full per-sample correction: read, partition, background-correct and
/// optionally dye-bias-correct one sample.
pub fn correct_sample(
    sample: &Sample,
    manifest: &Manifest,
    keep_uncorrected: bool,
    dye_correction: bool,
) -> Result<SigSet> {
    let mut sigset = SigSet::from_idat_pair(sample, manifest, keep_uncorrected)
        .with_context(|| format!("while reading sample {}", sample.sample_id()))?;
    noob_correct(&mut sigset)?;
    if dye_correction {
        dye_bias_correct(&mut sigset, manifest)?;
    }
    Ok(sigset)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn mom_estimation_from_oob_pool() {
        let oob = vec![90.0, 100.0, 110.0];
        let params = estimate_noob_params(&oob, 500.0).unwrap();
        assert_approx_eq!(params.mu, 100.0);
        assert_approx_eq!(params.sigma, 10.0);
        assert_approx_eq!(params.alpha, 400.0);
    }

    #[test]
    fn alpha_floor_guards_degenerate_fit() {
        let oob = vec![90.0, 100.0, 110.0];
        let params = estimate_noob_params(&oob, 100.0).unwrap();
        assert_approx_eq!(params.alpha, 10.0);
    }

    #[test]
    fn estimation_requires_pool() {
        assert!(estimate_noob_params(&[], 100.0).is_none());
        assert!(estimate_noob_params(&[1.0], 100.0).is_none());
        assert!(estimate_noob_params(&[f64::NAN, f64::NAN], 100.0).is_none());
    }

    #[test]
    fn normexp_signal_strips_background() {
        let params = NoobParams {
            mu: 100.0,
            sigma: 10.0,
            alpha: 1000.0,
        };
        // Far above background, the expectation is close to x - mu.
        let corrected = normexp_signal(&params, 2100.0);
        assert!((corrected - 2000.0).abs() < 5.0);
        // Near background, the expectation is small but never negative
        // enough to survive the pipeline floor.
        let near = normexp_signal(&params, 100.0);
        assert!(near < 50.0);
    }

    #[test]
    fn normexp_signal_monotonic() {
        let params = NoobParams {
            mu: 100.0,
            sigma: 20.0,
            alpha: 500.0,
        };
        let mut last = normexp_signal(&params, 0.0);
        for x in (50..3000).step_by(50) {
            let current = normexp_signal(&params, x as f64);
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn deep_left_tail_is_finite() {
        let params = NoobParams {
            mu: 5000.0,
            sigma: 1.0,
            alpha: 10.0,
        };
        let corrected = normexp_signal(&params, 0.0);
        assert!(corrected.is_finite());
        assert!(corrected >= 0.0);
    }

    #[test]
    fn estimator_recovers_simulated_parameters() {
        use rand::prelude::*;
        use rand_distr::{
            Exp,
            Normal as NormalDist,
        };

        let mut rng = StdRng::seed_from_u64(42);
        let background = NormalDist::new(500.0, 50.0).unwrap();
        let signal = Exp::new(1.0 / 1000.0).unwrap();

        let oob: Vec<f64> = (0..5000).map(|_| background.sample(&mut rng)).collect();
        let in_band: Vec<f64> = (0..5000)
            .map(|_| background.sample(&mut rng) + signal.sample(&mut rng))
            .collect();
        let in_band_mean = crate::utils::mean(&in_band);

        let params = estimate_noob_params(&oob, in_band_mean).unwrap();
        assert!((params.mu - 500.0).abs() < 5.0);
        assert!((params.sigma - 50.0).abs() < 5.0);
        assert!((params.alpha - 1000.0).abs() < 100.0);
    }
}
