//! Continuous two-regime line fit used to locate the surface contact.
//!
//! Model over the sample index `i`:
//!
//! ```text
//! y(i) = p0 + p1·i                     i <= p2   (contact)
//! y(i) = p0 + p1·p2 + p3·(i − p2)      i >= p2   (non-contact)
//! ```

use crate::analysis::lm;
use crate::analysis::stats::min_max;
use crate::config::OptimizerConfig;
use crate::error::{Error, Result};

/// Smallest curve the segmented fit accepts.
pub const MIN_POINTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilinearFit {
    /// `[p0, p1, p2, p3]`, with `p2` rounded to the kink index.
    pub params: [f64; 4],
    pub kink: usize,
}

impl BilinearFit {
    /// Model value at the kink.
    pub fn kink_value(&self) -> f64 {
        self.params[0] + self.params[1] * self.params[2]
    }
}

fn model(p: &[f64; 4], i: f64) -> f64 {
    if i <= p[2] {
        p[0] + p[1] * i
    } else {
        p[0] + p[1] * p[2] + p[3] * (i - p[2])
    }
}

/// Fit the segmented line to `d`; with `flat_noncontact` the non-contact
/// slope `p3` is held at zero.
///
/// Sanity failures are reported as [`Error::PoorFit`]: the caller may retry
/// with a different window of the curve.
pub fn fit(d: &[f64], flat_noncontact: bool, opts: &OptimizerConfig) -> Result<BilinearFit> {
    let n = d.len();
    if n < MIN_POINTS {
        return Err(Error::insufficient(format!(
            "segmented fit needs at least {MIN_POINTS} points, got {n}"
        )));
    }
    if d.iter().any(|v| !v.is_finite()) {
        return Err(Error::insufficient("non-finite deflection values"));
    }
    let (d_min, d_max) = min_max(d).ok_or_else(|| Error::insufficient("empty curve"))?;
    let range = d_max - d_min;
    if range <= 0.0 {
        return Err(Error::poor_fit("flat curve: no slope in contact"));
    }

    let nf = n as f64;
    let slope_guess = 2.0 * range / nf;
    let guess = [d_min, slope_guess, nf / 2.0, 0.0];
    let scales = [range / 10.0, slope_guess / 10.0, nf / 10.0, slope_guess / 10.0];
    let free = if flat_noncontact { 3 } else { 4 };

    let expand = |p: &[f64]| -> [f64; 4] { [p[0], p[1], p[2], if free == 4 { p[3] } else { 0.0 }] };
    let residuals = |p: &[f64]| -> Option<Vec<f64>> {
        let full = expand(p);
        Some(d.iter().enumerate().map(|(i, &y)| model(&full, i as f64) - y).collect())
    };

    let report = lm::least_squares(residuals, &guess[..free], &scales[..free], opts)?;
    let mut p = expand(&report.params);
    log::debug!(
        "segmented fit: p0={:.4e} p1={:.4e} p2={:.2} p3={:.4e} ({} iterations)",
        p[0],
        p[1],
        p[2],
        p[3],
        report.iterations
    );

    if p[3].abs() > p[1].abs() / 10.0 {
        return Err(Error::poor_fit("slope in non-contact region, or no slope in contact"));
    }
    if p[2] < 0.02 * nf {
        return Err(Error::poor_fit("no kink (need more curve to the left)"));
    }
    if p[2] > 0.98 * nf {
        return Err(Error::poor_fit("no kink (need more curve to the right)"));
    }
    if p[1] < 0.5 * slope_guess {
        return Err(Error::poor_fit(format!(
            "too far from expected contact slope: fitted {:.3e}, expected about {:.3e}",
            p[1], slope_guess
        )));
    }

    let kink = (p[2].round().max(0.0) as usize).min(n - 1);
    p[2] = kink as f64;
    Ok(BilinearFit { params: p, kink })
}
