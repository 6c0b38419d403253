//! Noise-adaptive rupture detection.
//!
//! The deflection is convolved with a short derivative-like kernel, the noise
//! level of the convolved signal beyond the blind window is the spread of its
//! magnitudes after iteratively discarding the largest ones, and every sample
//! whose magnitude exceeds `min_deviation` noise levels is flagged. Flagged
//! samples closer than `see_double` points form one event; each event is
//! placed on the deflection extremum next to it.
//!
//! With the default kernel a rupture on a retraction trace (deflection
//! snapping up after a pull) shows as a large positive response, while the
//! loading ramp before it is negative. `rupture_edges_only` keeps just the
//! runs holding such a response.

use serde::{Deserialize, Serialize};

use crate::analysis::stats::{arg_extremum, convolve_same, running_median, walk_forward};
use crate::config::PeakConfig;
use crate::error::{Error, Result};

/// Which deflection extremum marks a rupture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakPolarity {
    /// Pulling events pull the deflection down (the usual retraction trace).
    #[default]
    Minimum,
    Maximum,
}

impl PeakPolarity {
    pub fn is_minimum(self) -> bool {
        self == PeakPolarity::Minimum
    }

    /// +1 when events point up, −1 when they point down.
    pub fn sign(self) -> f64 {
        match self {
            PeakPolarity::Minimum => -1.0,
            PeakPolarity::Maximum => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Index of the rupture extremum in the curve.
    pub location: usize,
    /// Signed deflection at `location`.
    pub size: f64,
    pub name: String,
}

/// Converged noise statistics of the convolved signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseEstimate {
    /// Standard deviation of the retained magnitudes.
    pub level: f64,
    /// Mean of the retained magnitudes.
    pub mean: f64,
    /// Samples discarded as outliers before the estimate settled.
    pub discarded: usize,
    /// `false` when the `max_cut` budget ran out first.
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakDetection {
    /// Peaks in increasing index order.
    pub peaks: Vec<Peak>,
    /// `None` when nothing remained beyond the blind window.
    pub noise: Option<NoiseEstimate>,
    /// First index considered for events.
    pub cut_index: usize,
}

impl PeakDetection {
    pub fn locations(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.location).collect()
    }

    pub fn sizes(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.size).collect()
    }
}

/// Estimate the noise level of `signal`.
///
/// The estimate works on `|signal|`, or on its positive samples alone with
/// `positive_only`. The largest values are discarded one at a time until the
/// standard deviation of the rest changes by less than `stable_fraction`, or
/// until a `max_cut` fraction is gone; the last value is used either way.
/// `None` when no sample qualifies.
pub fn estimate_noise(
    signal: &[f64],
    positive_only: bool,
    max_cut: f64,
    stable_fraction: f64,
) -> Option<NoiseEstimate> {
    let mut ranked: Vec<f64> = if positive_only {
        signal.iter().copied().filter(|&v| v > 0.0).collect()
    } else {
        signal.iter().map(|v| v.abs()).collect()
    };
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by(|a, b| b.total_cmp(a));

    let mut sum: f64 = ranked.iter().sum();
    let mut sum_sq: f64 = ranked.iter().map(|v| v * v).sum();
    let mut count = ranked.len();
    let sd_of = |sum: f64, sum_sq: f64, count: usize| {
        let m = sum / count as f64;
        (sum_sq / count as f64 - m * m).max(0.0).sqrt()
    };

    let budget = (max_cut * ranked.len() as f64).floor() as usize;
    let mut sd = sd_of(sum, sum_sq, count);
    let mut discarded = 0;
    let mut converged = false;
    while discarded < budget && count > 2 {
        let v = ranked[discarded];
        sum -= v;
        sum_sq -= v * v;
        count -= 1;
        discarded += 1;
        let next = sd_of(sum, sum_sq, count);
        let change = if sd > 0.0 { (sd - next).abs() / sd } else { 0.0 };
        sd = next;
        if change < stable_fraction {
            converged = true;
            break;
        }
    }
    if !converged {
        log::debug!("noise estimate hit max_cut after discarding {discarded} samples");
    }
    Some(NoiseEstimate {
        level: sd,
        mean: sum / count as f64,
        discarded,
        converged,
    })
}

struct Run {
    strongest: usize,
    strength: f64,
    rupture_edge: bool,
}

struct Candidate {
    location: usize,
    size: f64,
    strength: f64,
}

/// Detect rupture events after `contact_index`.
pub fn find_peaks(x: &[f64], y: &[f64], contact_index: usize, cfg: &PeakConfig) -> Result<PeakDetection> {
    let n = y.len();
    if x.len() != n {
        return Err(Error::insufficient(format!("x has {} values but y has {n}", x.len())));
    }
    if contact_index >= n {
        return Err(Error::insufficient(format!(
            "contact index {contact_index} outside curve of {n} points"
        )));
    }

    let smoothed = running_median(y, cfg.median_window);
    let conv = convolve_same(&smoothed, &cfg.convolution_kernel);
    let k = cfg.convolution_kernel.len();
    let valid_end = n.saturating_sub(k.saturating_sub(1 + k / 2));
    let cut = walk_forward(x, contact_index, cfg.blind_window_m);

    if cut >= valid_end {
        log::debug!("nothing beyond the blind window (cut {cut}, {n} points)");
        return Ok(PeakDetection {
            peaks: Vec::new(),
            noise: None,
            cut_index: cut,
        });
    }

    let region = &conv[cut..valid_end];
    let Some(noise) = estimate_noise(region, cfg.positive_only, cfg.max_cut, cfg.stable_fraction) else {
        log::debug!("no positive-going samples beyond index {cut}");
        return Ok(PeakDetection {
            peaks: Vec::new(),
            noise: None,
            cut_index: cut,
        });
    };
    let threshold = cfg.min_deviation * noise.level;
    log::debug!(
        "noise level {:.4e} (mean {:.4e}), threshold {:.4e}",
        noise.level,
        noise.mean,
        threshold
    );

    // Group flagged samples into runs, bridging gaps up to `see_double`.
    let bridge = cfg.see_double.max(1);
    let rupture_sign = -cfg.polarity.sign();
    let mut runs: Vec<Run> = Vec::new();
    let mut last_flag: Option<usize> = None;
    for (offset, &c) in region.iter().enumerate() {
        let i = cut + offset;
        let strength = if cfg.positive_only { c } else { c.abs() };
        if strength <= threshold {
            continue;
        }
        let edge = cfg.positive_only || rupture_sign * c > threshold;
        match (last_flag, runs.last_mut()) {
            (Some(prev), Some(run)) if i - prev <= bridge => {
                if strength > run.strength {
                    run.strongest = i;
                    run.strength = strength;
                }
                run.rupture_edge |= edge;
            }
            _ => runs.push(Run {
                strongest: i,
                strength,
                rupture_edge: edge,
            }),
        }
        last_flag = Some(i);
    }
    if cfg.rupture_edges_only {
        let flagged_runs = runs.len();
        runs.retain(|r| r.rupture_edge);
        if runs.len() < flagged_runs {
            log::debug!("{} runs without a rupture edge ignored", flagged_runs - runs.len());
        }
    }

    let minimum = cfg.polarity.is_minimum();
    let mut candidates: Vec<Candidate> = Vec::with_capacity(runs.len());
    for Run { strongest: raw, strength, .. } in runs {
        let lo = raw.saturating_sub(cfg.refine_window).max(cut);
        let hi = (raw + cfg.refine_window).min(n - 1);
        let Some(location) = arg_extremum(y, lo, hi, minimum) else {
            continue;
        };
        let candidate = Candidate {
            location,
            size: y[location],
            strength,
        };
        // Two runs settling on one extremum are one event.
        match candidates.last_mut() {
            Some(prev) if candidate.location.abs_diff(prev.location) <= cfg.see_double => {
                let more_extreme = if minimum {
                    candidate.size < prev.size
                } else {
                    candidate.size > prev.size
                };
                if more_extreme {
                    prev.location = candidate.location;
                    prev.size = candidate.size;
                }
                prev.strength = prev.strength.max(candidate.strength);
            }
            _ => candidates.push(candidate),
        }
    }

    if valid_end - cut < 2 * cfg.see_double && candidates.len() > 1 {
        if let Some(best) = candidates
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.strength.total_cmp(&b.1.strength))
            .map(|(i, _)| i)
        {
            let keep = candidates.swap_remove(best);
            candidates = vec![keep];
        }
    }

    candidates.sort_by_key(|c| c.location);
    candidates.dedup_by_key(|c| c.location);
    let peaks: Vec<Peak> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| Peak {
            location: c.location,
            size: c.size,
            name: format!("peak{}", i + 1),
        })
        .collect();
    log::debug!("{} peaks beyond index {cut}", peaks.len());

    Ok(PeakDetection {
        peaks,
        noise: Some(noise),
        cut_index: cut,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    fn config(min_deviation: f64) -> PeakConfig {
        PeakConfig {
            blind_window_m: 0.0,
            min_deviation,
            ..PeakConfig::default()
        }
    }

    #[test]
    fn noise_estimate_ignores_outliers() {
        let mut signal = noise(2000, 3);
        for v in signal.iter_mut().step_by(100) {
            *v += 50.0;
        }
        let est = estimate_noise(&signal, false, 0.2, 0.005).unwrap();
        assert!(est.converged);
        // sd of |N(0, 1)| is sqrt(1 - 2/pi)
        let half_normal_sd = (1.0 - 2.0 / std::f64::consts::PI).sqrt();
        assert!((est.level - half_normal_sd).abs() < 0.1, "level {}", est.level);
        assert!((est.mean - 0.8).abs() < 0.1, "mean {}", est.mean);
        assert!(est.discarded >= 20);
    }

    #[test]
    fn noise_estimate_stops_at_max_cut() {
        // Uniform ramp never stabilises within a tiny tolerance.
        let signal: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let est = estimate_noise(&signal, true, 0.1, 1e-9).unwrap();
        assert!(!est.converged);
        // 0 is not positive-going: 99 samples, 9 may go
        assert_eq!(est.discarded, 9);
        assert!(est.level.is_finite());
    }

    #[test]
    fn noise_estimate_needs_a_qualifying_sample() {
        assert!(estimate_noise(&[], false, 0.2, 0.005).is_none());
        assert!(estimate_noise(&[-1.0, -2.0, 0.0], true, 0.2, 0.005).is_none());
        assert!(estimate_noise(&[-1.0, -2.0, 0.0], false, 0.2, 0.005).is_some());
    }

    #[test]
    fn finds_gaussian_dips_in_noise() {
        let n = 2000;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut y = noise(n, 42);
        let centres = [300usize, 700, 1200, 1700];
        for (i, v) in y.iter_mut().enumerate() {
            for &c in &centres {
                let t = i as f64 - c as f64;
                *v -= 20.0 * (-t * t / 32.0).exp();
            }
        }
        let det = find_peaks(&x, &y, 0, &config(9.0)).unwrap();
        let found = det.locations();
        assert_eq!(found.len(), 4, "{found:?}");
        for (got, want) in found.iter().zip(centres) {
            assert!((*got as i64 - want as i64).abs() <= 3, "{got} vs {want}");
        }
        assert_eq!(det.peaks[0].name, "peak1");
        assert!(det.noise.unwrap().converged);
    }

    #[test]
    fn pure_noise_has_no_peaks() {
        let n = 2000;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y = noise(n, 9);
        let det = find_peaks(&x, &y, 0, &config(9.0)).unwrap();
        assert!(det.peaks.is_empty(), "{:?}", det.locations());
        // The default kernel sums ten unit-variance samples.
        let level = det.noise.unwrap().level;
        let expected = (10.0 * (1.0 - 2.0 / std::f64::consts::PI)).sqrt();
        assert!((level - expected).abs() < 0.2, "level {level}");
    }

    #[test]
    fn empty_region_yields_no_peaks() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y = vec![0.0; 50];
        let cfg = PeakConfig {
            blind_window_m: 100.0,
            ..PeakConfig::default()
        };
        let det = find_peaks(&x, &y, 5, &cfg).unwrap();
        assert!(det.peaks.is_empty());
        assert!(det.noise.is_none());
    }

    #[test]
    fn single_step_is_one_peak_after_cut() {
        let n = 400;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut y = noise(n, 5);
        // sawtooth: ramp down then snap back after 250
        for (i, v) in y.iter_mut().enumerate() {
            if (230..=250).contains(&i) {
                *v -= 2.5 * (i - 230) as f64;
            }
        }
        let cfg = PeakConfig {
            blind_window_m: 20.0,
            ..config(9.0)
        };
        let det = find_peaks(&x, &y, 10, &cfg).unwrap();
        assert_eq!(det.cut_index, 31);
        assert_eq!(det.locations().len(), 1, "{:?}", det.locations());
        let loc = det.peaks[0].location;
        assert!((loc as i64 - 250).abs() <= 2, "location {loc}");
        assert!(det.peaks[0].size < -40.0);
        assert!(det.peaks.iter().all(|p| p.location > det.cut_index));
    }

    #[test]
    fn abrupt_drop_is_an_event() {
        let n = 1000;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut y = noise(n, 11);
        for v in &mut y[600..] {
            *v -= 30.0;
        }
        let det = find_peaks(&x, &y, 0, &config(9.0)).unwrap();
        assert_eq!(det.locations().len(), 1, "{:?}", det.locations());
        let loc = det.peaks[0].location;
        assert!((600..=610).contains(&loc), "location {loc}");

        // A drop on a minimum-polarity trace is a loading edge, not a rupture.
        let edges = PeakConfig {
            rupture_edges_only: true,
            ..config(9.0)
        };
        assert!(find_peaks(&x, &y, 0, &edges).unwrap().peaks.is_empty());
        let maxima = PeakConfig {
            polarity: PeakPolarity::Maximum,
            ..edges
        };
        assert_eq!(find_peaks(&x, &y, 0, &maxima).unwrap().locations().len(), 1);
    }

    #[test]
    fn loading_ramp_is_dropped_with_rupture_edges_only() {
        // Steep linear pull from 300 to 360 with no snap back.
        let n = 800;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut y = noise(n, 21);
        for (i, v) in y.iter_mut().enumerate().skip(300) {
            *v -= 3.0 * (i.min(360) - 300) as f64;
        }
        let all = find_peaks(&x, &y, 0, &config(9.0)).unwrap();
        assert!(!all.peaks.is_empty());
        let edges = PeakConfig {
            rupture_edges_only: true,
            ..config(9.0)
        };
        assert!(find_peaks(&x, &y, 0, &edges).unwrap().peaks.is_empty());
    }

    #[test]
    fn positive_only_without_positive_samples_has_no_peaks() {
        let n = 100;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y = vec![0.0; n];
        let cfg = PeakConfig {
            positive_only: true,
            ..config(9.0)
        };
        let det = find_peaks(&x, &y, 0, &cfg).unwrap();
        assert!(det.peaks.is_empty());
        assert!(det.noise.is_none());
    }

    #[test]
    fn short_tail_keeps_only_strongest() {
        // Two rupture edges land in the 7 analysed samples (48..=54), one
        // at each end.
        let n = 60;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut y = vec![0.0; n];
        y[43] = -30.0;
        y[59] = 40.0;
        let cfg = PeakConfig {
            blind_window_m: 47.0,
            see_double: 4,
            refine_window: 0,
            ..config(1.0)
        };
        let det = find_peaks(&x, &y, 0, &cfg).unwrap();
        assert_eq!(det.cut_index, 48);
        assert_eq!(det.locations(), vec![54]);

        let wide = PeakConfig { see_double: 3, ..cfg };
        assert_eq!(find_peaks(&x, &y, 0, &wide).unwrap().locations(), vec![48, 54]);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = find_peaks(&[0.0, 1.0], &[0.0], 0, &PeakConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }
}
