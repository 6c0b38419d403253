//! Small numeric helpers shared by the analysis stages.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some((min, max))
}

/// Ordinary least-squares line through `(x, y)`; returns `(slope, intercept)`.
///
/// `None` with fewer than two points or when all `x` coincide.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mx = mean(&x[..n])?;
    let my = mean(&y[..n])?;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        sxx += dx * dx;
        sxy += dx * (y[i] - my);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}

/// Running median with a centred window of `window` samples; the window
/// shrinks at the edges. A window of 0 or 1 returns the input unchanged.
pub fn running_median(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    let mut buf: Vec<f64> = Vec::with_capacity(window + 1);
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            buf.clear();
            buf.extend_from_slice(&values[lo..hi]);
            buf.sort_by(|a, b| a.total_cmp(b));
            let m = buf.len() / 2;
            if buf.len() % 2 == 1 {
                buf[m]
            } else {
                0.5 * (buf[m - 1] + buf[m])
            }
        })
        .collect()
}

/// Discrete convolution of `signal` with `kernel`, aligned so that output `i`
/// is centred on input `i`. Positions where the kernel does not fit entirely
/// inside the signal are set to zero.
pub fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let k = kernel.len();
    let mut out = vec![0.0; n];
    if k == 0 || n < k {
        return out;
    }
    let half = k / 2;
    for (i, slot) in out.iter_mut().enumerate().take(n - (k - 1 - half)).skip(half) {
        // kernel is flipped: kernel[j] multiplies signal[i + half - j]
        let mut acc = 0.0;
        for (j, &w) in kernel.iter().enumerate() {
            acc += w * signal[i + half - j];
        }
        *slot = acc;
    }
    out
}

/// Walk forward from `start` until `|x[i] - x[start]|` exceeds `distance`.
///
/// Returns that index, or `x.len()` if the curve ends first.
pub fn walk_forward(x: &[f64], start: usize, distance: f64) -> usize {
    let Some(&x0) = x.get(start) else {
        return x.len();
    };
    (start + 1..x.len())
        .find(|&i| (x[i] - x0).abs() > distance)
        .unwrap_or(x.len())
}

/// Walk backward from `start` while `|x[i] - x[start]|` stays within
/// `distance`, never going below `floor`. Returns the last index inside.
pub fn walk_backward(x: &[f64], start: usize, distance: f64, floor: usize) -> usize {
    let Some(&x0) = x.get(start) else {
        return start;
    };
    let mut i = start;
    while i > floor && (x[i - 1] - x0).abs() <= distance {
        i -= 1;
    }
    i
}

/// Index of the smallest (or largest) value of `values[lo..=hi]`.
pub fn arg_extremum(values: &[f64], lo: usize, hi: usize, minimum: bool) -> Option<usize> {
    let hi = hi.min(values.len().checked_sub(1)?);
    if lo > hi {
        return None;
    }
    let mut best = lo;
    for i in lo..=hi {
        let better = if minimum {
            values[i] < values[best]
        } else {
            values[i] > values[best]
        };
        if better {
            best = i;
        }
    }
    Some(best)
}
