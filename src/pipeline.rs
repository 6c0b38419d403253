//! Per-curve feature extraction: contact point → peaks → force baseline →
//! one polymer fit per peak → accepted feature records.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::contact::{find_contact_point, ContactCache, ContactResult};
use crate::analysis::peaks::{find_peaks, NoiseEstimate, Peak};
use crate::analysis::polymer::{FitResult, PolymerFitter};
use crate::analysis::stats::{linear_regression, mean, walk_backward, walk_forward};
use crate::config::FeatureConfig;
use crate::data::model::Curve;
use crate::error::{Error, Result};
use crate::geometry::{Sample, Segment};

/// One accepted rupture event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub curve_id: String,
    /// Peak location in the curve as supplied.
    pub peak_index: usize,
    pub contour_length_nm: f64,
    pub persistence_length_nm: f64,
    pub force_pn: f64,
    /// Loading slope just before the rupture; positive while the chain
    /// is being stretched.
    pub slope_n_per_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceBaseline {
    pub window: Segment,
    /// Mean deflection over `window` (N).
    pub force: f64,
}

/// What happened to one detected peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeakOutcome {
    Accepted { fit: FitResult },
    /// The fit converged but its persistence length is outside the
    /// configured plausible range.
    Implausible { fit: FitResult, persistence_length_nm: f64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakFit {
    pub peak: Peak,
    pub window: Option<Segment>,
    pub outcome: PeakOutcome,
}

/// Every intermediate result of one curve, for plotting and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveAnalysis {
    pub curve_id: String,
    pub contact: ContactResult,
    pub peaks: Vec<Peak>,
    pub noise: Option<NoiseEstimate>,
    /// `None` when too few peaks were found to continue.
    pub baseline: Option<ForceBaseline>,
    pub fits: Vec<PeakFit>,
    pub records: Vec<FeatureRecord>,
}

/// Result of one curve in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveOutcome {
    pub curve_id: String,
    pub result: Result<Vec<FeatureRecord>>,
}

/// Index bookkeeping between the caller's array order and the analysis
/// order, in which position increases with index.
#[derive(Debug, Clone, Copy)]
struct Frame {
    n: usize,
    reversed: bool,
}

impl Frame {
    fn of(x: &[f64]) -> Self {
        let n = x.len();
        Self {
            n,
            reversed: n >= 2 && x[0] > x[n - 1],
        }
    }

    /// Maps indices both ways; the reversal is its own inverse.
    fn index(&self, i: usize) -> usize {
        if self.reversed {
            self.n - 1 - i
        } else {
            i
        }
    }

    fn segment(&self, s: Segment) -> Segment {
        Segment::new(self.index(s.start), self.index(s.end))
    }

    fn peak(&self, p: &Peak) -> Peak {
        Peak {
            location: self.index(p.location),
            ..p.clone()
        }
    }

    fn orient(&self, mut v: Vec<f64>) -> Vec<f64> {
        if self.reversed {
            v.reverse();
        }
        v
    }
}

/// Feature extraction with one validated configuration.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    config: FeatureConfig,
    fitter: PolymerFitter,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let fitter = PolymerFitter::from_config(&config.fit, config.peaks.polarity, &config.optimizer);
        Ok(Self { config, fitter })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Contact point of `curve`, in the curve's own index order.
    pub fn contact_point(&self, curve: &Curve) -> Result<ContactResult> {
        let (x, y) = curve.to_si()?;
        find_contact_point(&x, &y, &self.config.contact, &self.config.optimizer)
    }

    /// Accepted feature records, in increasing peak order.
    pub fn extract(&self, curve: &Curve) -> Result<Vec<FeatureRecord>> {
        Ok(self.run(curve, None)?.records)
    }

    /// Like [`extract`](Self::extract), reusing the contact point cached under
    /// the curve id.
    pub fn extract_cached(&self, curve: &Curve, cache: &mut ContactCache) -> Result<Vec<FeatureRecord>> {
        Ok(self.run(curve, Some(cache))?.records)
    }

    pub fn analyze(&self, curve: &Curve) -> Result<CurveAnalysis> {
        self.run(curve, None)
    }

    /// Extract every curve in parallel. A failing curve is reported in its
    /// outcome and does not affect the others.
    pub fn extract_batch(&self, curves: &[Curve]) -> Vec<CurveOutcome> {
        curves
            .par_iter()
            .map(|curve| {
                let result = self.extract(curve);
                if let Err(e) = &result {
                    log::warn!("curve '{}' skipped: {e}", curve.id);
                }
                CurveOutcome {
                    curve_id: curve.id.clone(),
                    result,
                }
            })
            .collect()
    }

    fn run(&self, curve: &Curve, cache: Option<&mut ContactCache>) -> Result<CurveAnalysis> {
        let (x_si, y_si) = curve.to_si()?;
        let contact = match cache {
            Some(cache) => cache.get_or_try_insert_with(&curve.id, || {
                find_contact_point(&x_si, &y_si, &self.config.contact, &self.config.optimizer)
            })?,
            None => find_contact_point(&x_si, &y_si, &self.config.contact, &self.config.optimizer)?,
        };
        if contact.index >= x_si.len() {
            return Err(Error::insufficient(format!(
                "cached contact index {} outside curve '{}' of {} points",
                contact.index,
                curve.id,
                x_si.len()
            )));
        }

        let frame = Frame::of(&x_si);
        let x = frame.orient(x_si);
        let y = frame.orient(y_si);
        let c = frame.index(contact.index);

        let detection = find_peaks(&x, &y, c, &self.config.peaks)?;
        let mut analysis = CurveAnalysis {
            curve_id: curve.id.clone(),
            contact,
            peaks: detection.peaks.iter().map(|p| frame.peak(p)).collect(),
            noise: detection.noise,
            baseline: None,
            fits: Vec::new(),
            records: Vec::new(),
        };
        let peaks = detection.peaks;
        if peaks.is_empty() || peaks.len() < self.config.peaks.min_peaks {
            log::info!(
                "curve '{}': {} peaks, {} required",
                curve.id,
                peaks.len(),
                self.config.peaks.min_peaks
            );
            return Ok(analysis);
        }

        let baseline = self.force_baseline(&x, &y, &peaks, &frame)?;
        analysis.baseline = Some(ForceBaseline {
            window: frame.segment(baseline.window),
            force: baseline.force,
        });

        for (fit, record) in self.fit_peaks(&curve.id, &x, &y, c, &peaks, baseline.force) {
            if let Some(mut record) = record {
                record.peak_index = frame.index(record.peak_index);
                analysis.records.push(record);
            }
            analysis.fits.push(PeakFit {
                peak: frame.peak(&fit.peak),
                window: fit.window.map(|w| frame.segment(w)),
                outcome: fit.outcome,
            });
        }

        log::info!(
            "curve '{}': {} of {} peaks accepted",
            curve.id,
            analysis.records.len(),
            peaks.len()
        );
        Ok(analysis)
    }

    /// Fit every peak, in analysis order. A peak that cannot be measured is
    /// reported in its outcome and does not affect the others.
    fn fit_peaks(
        &self,
        curve_id: &str,
        x: &[f64],
        y: &[f64],
        c: usize,
        peaks: &[Peak],
        baseline: f64,
    ) -> Vec<(PeakFit, Option<FeatureRecord>)> {
        peaks
            .iter()
            .map(|peak| {
                let (window, outcome) = self.measure(x, y, c, peak, baseline);
                let record = match &outcome {
                    PeakOutcome::Accepted { fit } => Some(self.record(curve_id, x, y, c, peak, baseline, fit)),
                    _ => None,
                };
                let (outcome, record) = match record {
                    Some(Ok(record)) => (outcome, Some(record)),
                    Some(Err(e)) => {
                        log::warn!("curve '{curve_id}' {}: {e}", peak.name);
                        (PeakOutcome::Failed { reason: e.to_string() }, None)
                    }
                    None => (outcome, None),
                };
                let fit = PeakFit {
                    peak: peak.clone(),
                    window,
                    outcome,
                };
                (fit, record)
            })
            .collect()
    }

    /// Force baseline in analysis order. The auto window starts
    /// `auto_right_baseline_nm` past the last peak; when the curve ends
    /// sooner, the samples after the last peak are used.
    fn force_baseline(&self, x: &[f64], y: &[f64], peaks: &[Peak], frame: &Frame) -> Result<ForceBaseline> {
        let n = x.len();
        let cfg = &self.config.baseline;
        let window = match cfg.bounds {
            Some([a, b]) => {
                if a >= n || b >= n {
                    return Err(Error::insufficient(format!(
                        "baseline bounds [{a}, {b}] outside curve of {n} points"
                    )));
                }
                frame.segment(Segment::new(a, b))
            }
            None => {
                let last = peaks.iter().map(|p| p.location).max().unwrap_or(0);
                let start = walk_forward(x, last, cfg.auto_right_baseline_nm * 1e-9);
                if start < n {
                    let end = walk_forward(x, start, cfg.auto_left_baseline_nm * 1e-9);
                    Segment::new(start, end.saturating_sub(1).max(start))
                } else if last + 1 < n {
                    log::debug!(
                        "curve ends within {} nm of the last peak; baseline from the tail",
                        cfg.auto_right_baseline_nm
                    );
                    let tail_start = walk_backward(x, n - 1, cfg.auto_left_baseline_nm * 1e-9, last + 1);
                    Segment::new(tail_start, n - 1)
                } else {
                    return Err(Error::insufficient("no samples after the last peak for a baseline"));
                }
            }
        };
        let force = window
            .slice(y)
            .and_then(mean)
            .ok_or_else(|| Error::insufficient("empty baseline window"))?;
        log::debug!("force baseline {force:.4e} N over {}..={}", window.start, window.end);
        Ok(ForceBaseline { window, force })
    }

    /// Fit one peak. Failures are logged and returned as an outcome.
    fn measure(&self, x: &[f64], y: &[f64], c: usize, peak: &Peak, baseline: f64) -> (Option<Segment>, PeakOutcome) {
        let fit_cfg = &self.config.fit;
        let floor = (c + 1).min(peak.location);
        let start = match fit_cfg.auto_fit_points {
            Some(points) => peak.location.saturating_sub(points - 1).max(floor),
            None => walk_backward(x, peak.location, fit_cfg.auto_fit_distance_nm * 1e-9, floor),
        };
        let window = Segment::new(start, peak.location);
        if window.len() < 2 {
            log::warn!("{} at {}: fit window collapsed", peak.name, peak.location);
            return (
                Some(window),
                PeakOutcome::Failed {
                    reason: "fit window has fewer than 2 points".to_string(),
                },
            );
        }

        let contact = Sample::new(x[c], baseline, c);
        let fit = match self.fitter.fit(contact, window, x, y) {
            Ok(fit) => fit,
            Err(e) => {
                log::warn!("{} at {}: {e}", peak.name, peak.location);
                return (Some(window), PeakOutcome::Failed { reason: e.to_string() });
            }
        };

        let persistence_m = fit
            .persistence_length()
            .or(self.fitter.fixed_length)
            .unwrap_or(f64::NAN);
        let persistence_nm = persistence_m * 1e9;
        let plausible = persistence_nm >= fit_cfg.min_persistence_nm && persistence_nm <= fit_cfg.max_persistence_nm;
        if !plausible {
            log::warn!(
                "{} at {}: persistence length {persistence_nm:.3} nm outside [{}, {}]",
                peak.name,
                peak.location,
                fit_cfg.min_persistence_nm,
                fit_cfg.max_persistence_nm
            );
            return (
                Some(window),
                PeakOutcome::Implausible {
                    fit,
                    persistence_length_nm: persistence_nm,
                },
            );
        }
        (Some(window), PeakOutcome::Accepted { fit })
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        curve_id: &str,
        x: &[f64],
        y: &[f64],
        c: usize,
        peak: &Peak,
        baseline: f64,
        fit: &FitResult,
    ) -> Result<FeatureRecord> {
        let loc = peak.location;
        let lo = loc.saturating_sub(self.config.fit.slope_span_points).max(c);
        let (raw_slope, _) = linear_regression(&x[lo..loc], &y[lo..loc]).ok_or_else(|| {
            Error::insufficient(format!("no samples for the loading slope before {}", peak.name))
        })?;
        let persistence_m = fit
            .persistence_length()
            .or(self.fitter.fixed_length)
            .ok_or_else(|| Error::poor_fit("fit reported no persistence length"))?;
        Ok(FeatureRecord {
            curve_id: curve_id.to_string(),
            peak_index: loc,
            contour_length_nm: fit.contour_length() * 1e9,
            persistence_length_nm: persistence_m * 1e9,
            force_pn: (y[loc] - baseline).abs() * 1e12,
            slope_n_per_m: self.config.peaks.polarity.sign() * raw_slope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{CurveBuilder, Unfolding};

    fn sawtooth_config() -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.peaks.rupture_edges_only = true;
        config
    }

    fn two_event_curve() -> Curve {
        CurveBuilder::new(1500, 0.2e-9)
            .contact_points(500)
            .event(Unfolding::new(100e-9, 0.35e-9, 85e-9))
            .event(Unfolding::new(160e-9, 2e-9, 147e-9))
            .noise(2e-12)
            .seed(17)
            .build("two")
    }

    #[test]
    fn frame_maps_indices_both_ways() {
        let frame = Frame::of(&[3.0, 2.0, 1.0, 0.0]);
        assert!(frame.reversed);
        assert_eq!(frame.index(0), 3);
        assert_eq!(frame.index(frame.index(1)), 1);
        assert_eq!(frame.segment(Segment::new(0, 1)), Segment::new(2, 3));
        assert!(!Frame::of(&[0.0, 1.0]).reversed);
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = FeatureConfig::default();
        config.fit.temperature_k = -1.0;
        assert!(matches!(FeaturePipeline::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn analysis_records_every_peak() {
        let pipeline = FeaturePipeline::new(sawtooth_config()).unwrap();
        let analysis = pipeline.analyze(&two_event_curve()).unwrap();
        assert_eq!(analysis.peaks.len(), 2, "{:?}", analysis.peaks);
        assert_eq!(analysis.fits.len(), 2);
        assert!(analysis.baseline.is_some());
        assert_eq!(analysis.records.len(), 2);
        for r in &analysis.records {
            assert!(r.force_pn > 50.0, "{r:?}");
            assert!(r.slope_n_per_m > 0.0, "{r:?}");
        }
    }

    #[test]
    fn explicit_baseline_bounds_out_of_range() {
        let mut config = sawtooth_config();
        config.baseline.bounds = Some([1400, 5000]);
        let pipeline = FeaturePipeline::new(config).unwrap();
        let err = pipeline.extract(&two_event_curve()).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }

    #[test]
    fn collapsed_fit_window_skips_only_that_peak() {
        let curve = two_event_curve();
        let pipeline = FeaturePipeline::new(sawtooth_config()).unwrap();
        let analysis = pipeline.analyze(&curve).unwrap();
        let c = analysis.contact.index;
        let baseline = analysis.baseline.unwrap().force;

        // A peak right after the contact point has no room for a window.
        let mut peaks = vec![Peak {
            location: c + 1,
            size: curve.y[c + 1],
            name: "early".to_string(),
        }];
        peaks.extend(analysis.peaks.iter().cloned());
        let fits = pipeline.fit_peaks(&curve.id, &curve.x, &curve.y, c, &peaks, baseline);

        assert_eq!(fits.len(), 3);
        let (early, record) = &fits[0];
        assert_eq!(early.window, Some(Segment::new(c + 1, c + 1)));
        assert!(
            matches!(&early.outcome, PeakOutcome::Failed { reason } if reason.contains("fewer than 2")),
            "{:?}",
            early.outcome
        );
        assert!(record.is_none());
        let kept: Vec<&FeatureRecord> = fits.iter().filter_map(|(_, r)| r.as_ref()).collect();
        assert_eq!(kept, analysis.records.iter().collect::<Vec<_>>());
    }

    #[test]
    fn short_tail_baseline_keeps_the_curve() {
        // Cut the curve 3 nm after the second rupture (147 nm, index ~1235).
        let mut curve = two_event_curve();
        curve.x.truncate(1250);
        curve.y.truncate(1250);
        let pipeline = FeaturePipeline::new(sawtooth_config()).unwrap();
        let analysis = pipeline.analyze(&curve).unwrap();

        assert_eq!(analysis.peaks.len(), 2, "{:?}", analysis.peaks);
        let baseline = analysis.baseline.unwrap();
        assert_eq!(baseline.window.end, 1249);
        assert!(baseline.window.start > analysis.peaks[1].location);
        assert!(baseline.force.abs() < 5e-12, "{baseline:?}");
        assert_eq!(analysis.records.len(), 2);
    }

    #[test]
    fn peak_on_the_last_sample_has_no_baseline() {
        let pipeline = FeaturePipeline::new(FeatureConfig::default()).unwrap();
        let x = [0.0, 1e-9, 2e-9];
        let y = [0.0; 3];
        let peaks = [Peak {
            location: 2,
            size: 0.0,
            name: "peak1".to_string(),
        }];
        let frame = Frame::of(&x);
        let err = pipeline.force_baseline(&x, &y, &peaks, &frame).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }
}
