//! Polymer-elasticity fits of single unfolding events.
//!
//! Both models are fitted in linearised parameters `[1/L, 1/P]` (or `[1/L]`
//! with a fixed persistence/Kuhn length), in SI units, on a chunk translated
//! so the contact point sits at the origin and both extension and restoring
//! force grow positive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::lm;
use crate::analysis::peaks::PeakPolarity;
use crate::config::{FitConfig, OptimizerConfig};
use crate::error::{Error, Result};
use crate::geometry::{ParamVector, Sample, Segment};

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.38065e-23;

/// Starting persistence/Kuhn length (m).
const INITIAL_LENGTH: f64 = 0.35e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolymerModel {
    /// Worm-like chain, parameterised by persistence length.
    #[default]
    Wlc,
    /// Freely-jointed chain, parameterised by Kuhn length.
    Fjc,
}

impl fmt::Display for PolymerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolymerModel::Wlc => write!(f, "wlc"),
            PolymerModel::Fjc => write!(f, "fjc"),
        }
    }
}

impl FromStr for PolymerModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wlc" => Ok(PolymerModel::Wlc),
            "fjc" => Ok(PolymerModel::Fjc),
            other => Err(Error::config(format!("unknown polymer model '{other}'"))),
        }
    }
}

/// WLC interpolation formula: force (N) at extension `ext` (m).
///
/// `None` outside the model domain (`ext >= L` or non-positive parameters).
pub fn wlc_force(ext: f64, inv_contour: f64, inv_persistence: f64, kt: f64) -> Option<f64> {
    if inv_contour <= 0.0 || inv_persistence <= 0.0 {
        return None;
    }
    let t = ext * inv_contour;
    if t >= 1.0 {
        return None;
    }
    let q = 1.0 - t;
    Some(kt * inv_persistence / 4.0 * (1.0 / (q * q) - 1.0 + 4.0 * t))
}

/// Langevin function `coth(z) - 1/z`.
pub fn langevin(z: f64) -> f64 {
    if z.abs() < 1e-3 {
        z / 3.0 - z * z * z / 45.0
    } else {
        1.0 / z.tanh() - 1.0 / z
    }
}

/// FJC extension (m) at force `force` (N).
pub fn fjc_extension(force: f64, inv_contour: f64, inv_kuhn: f64, kt: f64) -> Option<f64> {
    if inv_contour <= 0.0 || inv_kuhn <= 0.0 {
        return None;
    }
    Some(langevin(force / (kt * inv_kuhn)) / inv_contour)
}

/// Inverse of [`fjc_extension`] by bisection; `None` at or beyond `L`.
pub fn fjc_force(ext: f64, inv_contour: f64, inv_kuhn: f64, kt: f64) -> Option<f64> {
    if inv_contour <= 0.0 || inv_kuhn <= 0.0 {
        return None;
    }
    let target = ext * inv_contour;
    if !(0.0..1.0).contains(&target) {
        return None;
    }
    let mut hi = 1.0;
    while langevin(hi) < target {
        hi *= 2.0;
        if hi > 1e12 {
            return None;
        }
    }
    let mut lo = 0.0;
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if langevin(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi) * kt * inv_kuhn)
}

/// Fitted polymer model for one peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: PolymerModel,
    /// `[contour_length]` with a fixed persistence/Kuhn length, otherwise
    /// `[contour_length, persistence_length]`, in metres.
    pub params: ParamVector,
    pub fitted_x: Vec<f64>,
    pub fitted_y: Vec<f64>,
}

impl FitResult {
    pub fn contour_length(&self) -> f64 {
        self.params.values[0]
    }

    /// Fitted persistence/Kuhn length, if it was floated.
    pub fn persistence_length(&self) -> Option<f64> {
        self.params.get(1)
    }
}

/// Fits one model with fixed physical settings to any number of windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PolymerFitter {
    pub model: PolymerModel,
    /// Fixed persistence/Kuhn length (m).
    pub fixed_length: Option<f64>,
    pub temperature_k: f64,
    pub polarity: PeakPolarity,
    /// Points past the peak covered by the fitted curve.
    pub lookahead: usize,
    pub optimizer: OptimizerConfig,
}

impl PolymerFitter {
    pub fn from_config(fit: &FitConfig, polarity: PeakPolarity, optimizer: &OptimizerConfig) -> Self {
        Self {
            model: fit.model,
            fixed_length: fit.fixed_length_nm.map(|nm| nm * 1e-9),
            temperature_k: fit.temperature_k,
            polarity,
            lookahead: fit.lookahead_points,
            optimizer: optimizer.clone(),
        }
    }

    fn kt(&self) -> f64 {
        BOLTZMANN * self.temperature_k
    }

    /// Fit the samples in `window` with `contact` as the chain's origin.
    ///
    /// The window end farther from the contact point is taken as the peak.
    pub fn fit(&self, contact: Sample, window: Segment, x: &[f64], y: &[f64]) -> Result<FitResult> {
        let n = x.len();
        if y.len() != n {
            return Err(Error::insufficient(format!("x has {n} values but y has {}", y.len())));
        }
        if window.end >= n || contact.index >= n {
            return Err(Error::insufficient(format!(
                "window {}..={} or contact {} outside curve of {n} points",
                window.start, window.end, contact.index
            )));
        }
        let peak = if window.end.abs_diff(contact.index) >= window.start.abs_diff(contact.index) {
            window.end
        } else {
            window.start
        };
        let direction = (x[peak] - contact.x).signum();
        if x[peak] == contact.x {
            return Err(Error::insufficient("peak and contact point at the same position"));
        }
        let force_sign = self.polarity.sign();

        let mut ext = Vec::with_capacity(window.len());
        let mut force = Vec::with_capacity(window.len());
        for i in (window.start..=window.end).rev() {
            let e = direction * (x[i] - contact.x);
            let f = force_sign * (y[i] - contact.y);
            if e > 0.0 && e.is_finite() && f.is_finite() {
                ext.push(e);
                force.push(f);
            }
        }
        let mut distinct = ext.clone();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(Error::insufficient(format!(
                "{} distinct extensions in fit window {}..={}",
                distinct.len(),
                window.start,
                window.end
            )));
        }

        let max_ext = distinct[distinct.len() - 1];
        let kt = self.kt();
        let inv_contour0 = 1.0 / (1.1 * max_ext);
        let inv_fixed = self.fixed_length.map(|l| 1.0 / l);
        let (p0, scales) = match inv_fixed {
            Some(_) => (vec![inv_contour0], vec![inv_contour0]),
            None => {
                let inv_len0 = 1.0 / INITIAL_LENGTH;
                (vec![inv_contour0, inv_len0], vec![inv_contour0, inv_len0])
            }
        };
        let split = |p: &[f64]| (p[0], inv_fixed.unwrap_or_else(|| p[1]));

        let model = self.model;
        let residuals = |p: &[f64]| -> Option<Vec<f64>> {
            let (inv_l, inv_p) = split(p);
            match model {
                PolymerModel::Wlc => ext
                    .iter()
                    .zip(&force)
                    .map(|(&e, &f)| wlc_force(e, inv_l, inv_p, kt).map(|m| m - f))
                    .collect(),
                PolymerModel::Fjc => ext
                    .iter()
                    .zip(&force)
                    .map(|(&e, &f)| fjc_extension(f, inv_l, inv_p, kt).map(|m| m - e))
                    .collect(),
            }
        };

        let report = lm::least_squares(residuals, &p0, &scales, &self.optimizer)?;
        let (inv_l, inv_p) = split(&report.params);
        let values: Vec<f64> = report.params.iter().map(|v| 1.0 / v).collect();
        let params = match &report.errors {
            Some(errs) => {
                let errors = errs.iter().zip(&values).map(|(e, v)| e * v * v).collect();
                ParamVector::with_errors(values, errors)
            }
            None => ParamVector::new(values),
        };
        log::debug!(
            "{model} fit of {}..={}: L={:.3e} m, P={:.3e} m ({} iterations)",
            window.start,
            window.end,
            1.0 / inv_l,
            1.0 / inv_p,
            report.iterations
        );

        let (lo, hi) = if peak >= contact.index {
            (contact.index, (peak + self.lookahead).min(n - 1))
        } else {
            (peak.saturating_sub(self.lookahead), contact.index)
        };
        let mut fitted_x = Vec::with_capacity(hi - lo + 1);
        let mut fitted_y = Vec::with_capacity(hi - lo + 1);
        for &xi in &x[lo..=hi] {
            let e = direction * (xi - contact.x);
            if e < 0.0 {
                continue;
            }
            let f = match model {
                PolymerModel::Wlc => wlc_force(e, inv_l, inv_p, kt),
                PolymerModel::Fjc => fjc_force(e, inv_l, inv_p, kt),
            };
            if let Some(f) = f {
                fitted_x.push(xi);
                fitted_y.push(contact.y + force_sign * f);
            }
        }

        Ok(FitResult {
            model,
            params,
            fitted_x,
            fitted_y,
        })
    }
}
