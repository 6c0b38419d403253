use serde::{Deserialize, Serialize};

use crate::analysis::contact::ContactAlgorithm;
use crate::analysis::peaks::PeakPolarity;
use crate::analysis::polymer::PolymerModel;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// FeatureConfig – everything one extraction run needs
// ---------------------------------------------------------------------------

/// Typed configuration passed explicitly into the pipeline.
///
/// Lengths carry their unit in the field name. Every field has a default,
/// so a JSON file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub contact: ContactConfig,
    pub peaks: PeakConfig,
    pub fit: FitConfig,
    pub baseline: BaselineConfig,
    pub optimizer: OptimizerConfig,
}

impl FeatureConfig {
    /// Check every field against its valid domain.
    pub fn validate(&self) -> Result<()> {
        self.contact.validate()?;
        self.peaks.validate()?;
        self.fit.validate()?;
        self.baseline.validate()?;
        self.optimizer.validate()
    }
}

fn require(cond: bool, what: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::Configuration(what()))
    }
}

fn finite_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

// ---------------------------------------------------------------------------
// Contact point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub algorithm: ContactAlgorithm,
    /// Baseline-slide: tail chunks with a standard deviation above this are
    /// treated as trigger artifacts and skipped (deflection units).
    pub trigger_std_threshold: f64,
    /// Baseline-slide: a line fit flatter than this counts as baseline
    /// (deflection units per position unit).
    pub baseline_slope_tolerance: f64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            algorithm: ContactAlgorithm::Bilinear,
            trigger_std_threshold: 2e-10,
            baseline_slope_tolerance: 5e-3,
        }
    }
}

impl ContactConfig {
    pub fn validate(&self) -> Result<()> {
        require(finite_positive(self.trigger_std_threshold), || {
            format!("trigger_std_threshold must be > 0, got {}", self.trigger_std_threshold)
        })?;
        require(finite_positive(self.baseline_slope_tolerance), || {
            format!("baseline_slope_tolerance must be > 0, got {}", self.baseline_slope_tolerance)
        })
    }
}

// ---------------------------------------------------------------------------
// Peak detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Running-median pre-filter width in points; 0 or 1 disables it.
    pub median_window: usize,
    pub convolution_kernel: Vec<f64>,
    /// Distance after the contact point in which peaks are ignored (m).
    pub blind_window_m: f64,
    /// Curves with fewer detected peaks yield no features.
    pub min_peaks: usize,
    /// Detection threshold in units of the noise level.
    pub min_deviation: f64,
    /// Largest fraction of the signal discarded while estimating noise.
    pub max_cut: f64,
    /// Candidates closer than this many points are one event.
    pub see_double: usize,
    /// Noise estimation stops once the standard deviation changes by less
    /// than this relative amount between iterations.
    pub stable_fraction: f64,
    /// Only positive-going excursions count as noise outliers and events.
    pub positive_only: bool,
    /// Keep only runs that hold a rupture edge, where the deflection snaps
    /// back against the polarity. Drops threshold crossings of the loading
    /// ramp before a rupture.
    pub rupture_edges_only: bool,
    pub polarity: PeakPolarity,
    /// Half-width (points) of the window searched for the deflection extremum.
    pub refine_window: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            median_window: 1,
            convolution_kernel: vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, -1.0, -1.0, -1.0, -1.0, -1.0],
            blind_window_m: 10e-9,
            min_peaks: 1,
            min_deviation: 9.0,
            max_cut: 0.2,
            see_double: 10,
            stable_fraction: 0.005,
            positive_only: false,
            rupture_edges_only: false,
            polarity: PeakPolarity::Minimum,
            refine_window: 10,
        }
    }
}

impl PeakConfig {
    pub fn validate(&self) -> Result<()> {
        require(!self.convolution_kernel.is_empty(), || "convolution_kernel is empty".into())?;
        require(
            self.convolution_kernel.iter().all(|v| v.is_finite())
                && self.convolution_kernel.iter().any(|v| *v != 0.0),
            || format!("convolution_kernel must be finite and not all zero: {:?}", self.convolution_kernel),
        )?;
        require(self.blind_window_m.is_finite() && self.blind_window_m >= 0.0, || {
            format!("blind_window_m must be >= 0, got {}", self.blind_window_m)
        })?;
        require(finite_positive(self.min_deviation), || {
            format!("min_deviation must be > 0, got {}", self.min_deviation)
        })?;
        require((0.0..1.0).contains(&self.max_cut), || {
            format!("max_cut must be in [0, 1), got {}", self.max_cut)
        })?;
        require(finite_positive(self.stable_fraction), || {
            format!("stable_fraction must be > 0, got {}", self.stable_fraction)
        })
    }
}

// ---------------------------------------------------------------------------
// Polymer fit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub model: PolymerModel,
    /// Fixed persistence (WLC) or Kuhn (FJC) length in nm; `None` floats it.
    pub fixed_length_nm: Option<f64>,
    pub temperature_k: f64,
    /// Fit window length backward from each peak (nm).
    pub auto_fit_distance_nm: f64,
    /// Fit window as a point count; overrides `auto_fit_distance_nm`.
    pub auto_fit_points: Option<usize>,
    /// Points past the fit window covered by the fitted curve.
    pub lookahead_points: usize,
    pub min_persistence_nm: f64,
    pub max_persistence_nm: f64,
    /// Points before the peak used for the loading-rate slope.
    pub slope_span_points: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model: PolymerModel::Wlc,
            fixed_length_nm: None,
            temperature_k: 293.0,
            auto_fit_distance_nm: 40.0,
            auto_fit_points: None,
            lookahead_points: 20,
            min_persistence_nm: 0.05,
            max_persistence_nm: 10.0,
            slope_span_points: 20,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(len) = self.fixed_length_nm {
            require(finite_positive(len), || format!("fixed_length_nm must be > 0, got {len}"))?;
        }
        require(finite_positive(self.temperature_k), || {
            format!("temperature_k must be > 0, got {}", self.temperature_k)
        })?;
        require(finite_positive(self.auto_fit_distance_nm), || {
            format!("auto_fit_distance_nm must be > 0, got {}", self.auto_fit_distance_nm)
        })?;
        if let Some(points) = self.auto_fit_points {
            require(points >= 2, || format!("auto_fit_points must be >= 2, got {points}"))?;
        }
        require(
            self.min_persistence_nm.is_finite()
                && self.min_persistence_nm >= 0.0
                && self.max_persistence_nm.is_finite()
                && self.min_persistence_nm < self.max_persistence_nm,
            || {
                format!(
                    "persistence range must satisfy 0 <= min < max, got [{}, {}]",
                    self.min_persistence_nm, self.max_persistence_nm
                )
            },
        )?;
        require(self.slope_span_points >= 2, || {
            format!("slope_span_points must be >= 2, got {}", self.slope_span_points)
        })
    }
}

// ---------------------------------------------------------------------------
// Force baseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Distance beyond the last peak where the baseline window starts (nm).
    pub auto_right_baseline_nm: f64,
    /// Width of the baseline window from its start (nm).
    pub auto_left_baseline_nm: f64,
    /// Explicit inclusive index bounds; overrides the automatic window.
    pub bounds: Option<[usize; 2]>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            auto_right_baseline_nm: 10.0,
            auto_left_baseline_nm: 20.0,
            bounds: None,
        }
    }
}

impl BaselineConfig {
    pub fn validate(&self) -> Result<()> {
        require(finite_positive(self.auto_right_baseline_nm), || {
            format!("auto_right_baseline_nm must be > 0, got {}", self.auto_right_baseline_nm)
        })?;
        require(finite_positive(self.auto_left_baseline_nm), || {
            format!("auto_left_baseline_nm must be > 0, got {}", self.auto_left_baseline_nm)
        })
    }
}

// ---------------------------------------------------------------------------
// Least-squares optimizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Relative cost reduction below which a step counts as converged.
    pub ftol: f64,
    /// Relative step length below which a step counts as converged.
    pub xtol: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        require(self.max_iterations >= 1, || "max_iterations must be >= 1".into())?;
        require(finite_positive(self.ftol) && finite_positive(self.xtol), || {
            format!("ftol and xtol must be > 0, got {} and {}", self.ftol, self.xtol)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FeatureConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: FeatureConfig = serde_json::from_str(
            r#"{ "peaks": { "min_deviation": 7.0, "rupture_edges_only": true }, "contact": { "algorithm": "baseline_slide" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.peaks.min_deviation, 7.0);
        assert!(cfg.peaks.rupture_edges_only);
        assert_eq!(cfg.peaks.see_double, 10);
        assert_eq!(cfg.contact.algorithm, ContactAlgorithm::BaselineSlide);
        assert_eq!(cfg.fit, FitConfig::default());
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let mut cfg = FeatureConfig::default();
        cfg.peaks.blind_window_m = -1.0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let mut cfg = FeatureConfig::default();
        cfg.fit.min_persistence_nm = 5.0;
        cfg.fit.max_persistence_nm = 1.0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let mut cfg = FeatureConfig::default();
        cfg.peaks.max_cut = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = FeatureConfig::default();
        cfg.fit.auto_fit_points = Some(1);
        assert!(cfg.validate().is_err());

        let mut cfg = FeatureConfig::default();
        cfg.optimizer.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }
}
