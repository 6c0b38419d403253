use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::bilinear;
use crate::analysis::stats::{linear_regression, mean, std_dev};
use crate::config::{ContactConfig, OptimizerConfig};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Algorithm selector
// ---------------------------------------------------------------------------

/// Named contact-point algorithms, interchangeable at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactAlgorithm {
    /// Segmented (bilinear) least-squares fit with a flat non-contact region.
    #[default]
    Bilinear,
    /// Legacy heuristic: find a flat baseline in the far half of the curve
    /// and walk in from the start until the deflection crosses it.
    BaselineSlide,
}

impl fmt::Display for ContactAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactAlgorithm::Bilinear => write!(f, "bilinear"),
            ContactAlgorithm::BaselineSlide => write!(f, "baseline_slide"),
        }
    }
}

impl FromStr for ContactAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bilinear" | "fit" => Ok(ContactAlgorithm::Bilinear),
            "baseline_slide" | "baseline-slide" | "legacy" => Ok(ContactAlgorithm::BaselineSlide),
            other => Err(Error::config(format!("unknown contact-point algorithm '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContactResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactResult {
    /// Index of the contact point in the caller's array orientation.
    pub index: usize,
    /// Deflection level at the contact point.
    pub deflection_offset: f64,
    /// Algorithm-specific diagnostics; empty for the legacy heuristic.
    pub algorithm_params: BTreeMap<String, f64>,
}

impl ContactAlgorithm {
    /// Reduce a raw curve to its contact point.
    ///
    /// Curves running right-to-left (`x[0] > x[n-1]`) are reversed first so
    /// the contact region is on the left; curves whose contact region lies
    /// above the far baseline are mirrored. Both transforms are undone in
    /// the returned result.
    pub fn find_contact_point(
        self,
        x: &[f64],
        y: &[f64],
        config: &ContactConfig,
        optimizer: &OptimizerConfig,
    ) -> Result<ContactResult> {
        if x.len() != y.len() {
            return Err(Error::insufficient(format!(
                "x has {} values but y has {}",
                x.len(),
                y.len()
            )));
        }
        let oriented = Oriented::new(x, y)?;
        let found = match self {
            ContactAlgorithm::Bilinear => bilinear_contact(&oriented, optimizer)?,
            ContactAlgorithm::BaselineSlide => baseline_slide_contact(&oriented, config)?,
        };
        let result = ContactResult {
            index: oriented.to_caller_index(found.index),
            deflection_offset: oriented.sign * found.deflection_offset,
            algorithm_params: found.algorithm_params,
        };
        log::debug!(
            "contact point ({self}): index {} offset {:.4e}",
            result.index,
            result.deflection_offset
        );
        Ok(result)
    }
}

/// Convenience wrapper selecting the algorithm from `config`.
pub fn find_contact_point(
    x: &[f64],
    y: &[f64],
    config: &ContactConfig,
    optimizer: &OptimizerConfig,
) -> Result<ContactResult> {
    config.algorithm.find_contact_point(x, y, config, optimizer)
}

// ---------------------------------------------------------------------------
// Canonical orientation: contact on the left, contact deflection below
// the far baseline.
// ---------------------------------------------------------------------------

struct Oriented {
    x: Vec<f64>,
    y: Vec<f64>,
    reversed: bool,
    /// +1 or −1; canonical y = sign · caller y.
    sign: f64,
}

impl Oriented {
    fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n < bilinear::MIN_POINTS {
            return Err(Error::insufficient(format!(
                "contact detection needs at least {} points, got {n}",
                bilinear::MIN_POINTS
            )));
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(Error::insufficient("non-finite samples in curve"));
        }
        let reversed = x[0] > x[n - 1];
        let (mut x, mut y) = (x.to_vec(), y.to_vec());
        if reversed {
            x.reverse();
            y.reverse();
        }
        let edge = (n / 10).max(1);
        let near = mean(&y[..edge]).unwrap_or(0.0);
        let far = mean(&y[n - edge..]).unwrap_or(0.0);
        let sign = if near > far { -1.0 } else { 1.0 };
        if sign < 0.0 {
            y.iter_mut().for_each(|v| *v = -*v);
        }
        Ok(Self { x, y, reversed, sign })
    }

    fn to_caller_index(&self, index: usize) -> usize {
        if self.reversed {
            self.y.len() - 1 - index
        } else {
            index
        }
    }
}

fn bilinear_contact(curve: &Oriented, optimizer: &OptimizerConfig) -> Result<ContactResult> {
    let fit = bilinear::fit(&curve.y, true, optimizer)?;
    let offset = fit.kink_value();
    let mut algorithm_params = BTreeMap::new();
    for (name, value) in ["p0", "p1", "p2", "p3"].iter().zip(fit.params) {
        algorithm_params.insert(name.to_string(), value);
    }
    algorithm_params.insert("offset".to_string(), curve.sign * offset);
    algorithm_params.insert("reversed".to_string(), if curve.reversed { 1.0 } else { 0.0 });
    algorithm_params.insert("mirrored".to_string(), if curve.sign < 0.0 { 1.0 } else { 0.0 });
    Ok(ContactResult {
        index: fit.kink,
        deflection_offset: offset,
        algorithm_params,
    })
}

fn baseline_slide_contact(curve: &Oriented, config: &ContactConfig) -> Result<ContactResult> {
    let (x, y) = (&curve.x, &curve.y);
    let n = y.len();

    // Instrument trigger artifact: slide the tail window back while it is too noisy.
    let tail = (n / 20).max(2);
    let step = (n / 50).max(1);
    let mut end = n;
    loop {
        let sd = std_dev(&y[end - tail..end]).unwrap_or(f64::INFINITY);
        if sd < config.trigger_std_threshold {
            break;
        }
        if end - tail < n / 2 + step {
            return Err(Error::poor_fit(format!(
                "tail noise never drops below {:.3e}: trigger artifact covers the far half",
                config.trigger_std_threshold
            )));
        }
        end -= step;
    }

    // Shrink the far chunk toward the quiet tail until its fit is flat.
    let min_len = (n / 6).max(3);
    let mut begin = n / 2;
    if end <= begin + 1 {
        return Err(Error::insufficient("no far-curve samples left for the baseline"));
    }
    loop {
        let (slope, _) = linear_regression(&x[begin..end], &y[begin..end])
            .ok_or_else(|| Error::poor_fit("degenerate positions in baseline chunk"))?;
        if slope.abs() <= config.baseline_slope_tolerance || end - begin <= min_len {
            break;
        }
        begin = (begin + 10).min(end.saturating_sub(min_len)).max(begin + 1);
    }
    let baseline = mean(&y[begin..end]).ok_or_else(|| Error::insufficient("empty baseline chunk"))?;

    match y.iter().position(|&v| v > baseline) {
        Some(0) => Err(Error::poor_fit("curve starts above the baseline: no contact region")),
        Some(index) => Ok(ContactResult {
            index,
            deflection_offset: baseline,
            algorithm_params: BTreeMap::new(),
        }),
        None => Err(Error::poor_fit("no sample crosses the baseline")),
    }
}

// ---------------------------------------------------------------------------
// ContactCache – explicit, invalidatable cache keyed by curve identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ContactCache {
    entries: HashMap<String, ContactResult>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, curve_id: &str) -> Option<&ContactResult> {
        self.entries.get(curve_id)
    }

    /// Return the cached result for `curve_id`, computing it on a miss.
    /// Failures are not cached.
    pub fn get_or_try_insert_with<F>(&mut self, curve_id: &str, compute: F) -> Result<ContactResult>
    where
        F: FnOnce() -> Result<ContactResult>,
    {
        if let Some(hit) = self.entries.get(curve_id) {
            return Ok(hit.clone());
        }
        let result = compute()?;
        self.entries.insert(curve_id.to_string(), result.clone());
        Ok(result)
    }

    /// Drop the entry for a curve whose data changed.
    pub fn invalidate(&mut self, curve_id: &str) -> Option<ContactResult> {
        self.entries.remove(curve_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
