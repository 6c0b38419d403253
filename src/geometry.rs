use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sample – one point of a data block
// ---------------------------------------------------------------------------

/// One point of a curve together with its index into the owning arrays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub index: usize,
}

impl Sample {
    pub fn new(x: f64, y: f64, index: usize) -> Self {
        Self { x, y, index }
    }

    /// Pick sample `index` out of parallel arrays.
    pub fn at(x: &[f64], y: &[f64], index: usize) -> Option<Self> {
        Some(Self::new(*x.get(index)?, *y.get(index)?, index))
    }
}

// ---------------------------------------------------------------------------
// Segment – inclusive index range over parallel x/y arrays
// ---------------------------------------------------------------------------

/// Inclusive index range `[start, end]`; constructed in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Number of samples covered; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    /// Borrow the segment out of `values`, or `None` if it runs past the end.
    pub fn slice<'a>(&self, values: &'a [f64]) -> Option<&'a [f64]> {
        values.get(self.start..=self.end)
    }
}

// ---------------------------------------------------------------------------
// ParamVector – fitted parameters with optional 1-sigma errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamVector {
    pub values: Vec<f64>,
    /// Same length as `values` when present.
    pub errors: Option<Vec<f64>>,
}

impl ParamVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            errors: None,
        }
    }

    pub fn with_errors(values: Vec<f64>, errors: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), errors.len());
        Self {
            values,
            errors: Some(errors),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.values.get(i).copied()
    }

    pub fn error(&self, i: usize) -> Option<f64> {
        self.errors.as_ref().and_then(|e| e.get(i).copied())
    }
}
