//! Deterministic synthetic retraction curves: a linear contact region,
//! sawtooth WLC unfolding events and Gaussian noise.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::analysis::polymer::{wlc_force, BOLTZMANN};
use crate::data::model::Curve;

/// One WLC unfolding event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unfolding {
    /// Contour length (m).
    pub contour_length: f64,
    /// Persistence length (m).
    pub persistence_length: f64,
    /// Extension from the contact point at which the event ruptures (m).
    pub rupture_extension: f64,
}

impl Unfolding {
    pub fn new(contour_length: f64, persistence_length: f64, rupture_extension: f64) -> Self {
        Self {
            contour_length,
            persistence_length,
            rupture_extension,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurveBuilder {
    points: usize,
    step: f64,
    contact_points: usize,
    contact_force: f64,
    temperature_k: f64,
    events: Vec<Unfolding>,
    noise: f64,
    seed: u64,
}

impl CurveBuilder {
    /// `points` samples spaced `step` metres apart.
    pub fn new(points: usize, step: f64) -> Self {
        Self {
            points,
            step,
            contact_points: points / 3,
            contact_force: 2e-9,
            temperature_k: 293.0,
            events: Vec::new(),
            noise: 0.0,
            seed: 0,
        }
    }

    /// Samples pressed into the surface before the contact point.
    pub fn contact_points(mut self, n: usize) -> Self {
        self.contact_points = n;
        self
    }

    /// Force at the first sample, falling linearly to zero at contact (N).
    pub fn contact_force(mut self, force: f64) -> Self {
        self.contact_force = force;
        self
    }

    pub fn temperature(mut self, kelvin: f64) -> Self {
        self.temperature_k = kelvin;
        self
    }

    /// Events must be added in order of increasing rupture extension.
    pub fn event(mut self, event: Unfolding) -> Self {
        self.events.push(event);
        self
    }

    /// Standard deviation of the additive Gaussian noise (N).
    pub fn noise(mut self, sigma: f64) -> Self {
        self.noise = sigma;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Noise-free force at extension `ext` past the contact point; negative
    /// while a chain is pulling on the tip.
    fn clean_force(&self, ext: f64) -> f64 {
        if ext <= 0.0 {
            let span = self.contact_points.max(1) as f64 * self.step;
            return -ext / span * self.contact_force;
        }
        let kt = BOLTZMANN * self.temperature_k;
        self.events
            .iter()
            .find(|e| ext <= e.rupture_extension)
            .and_then(|e| wlc_force(ext, 1.0 / e.contour_length, 1.0 / e.persistence_length, kt))
            .map_or(0.0, |f| -f)
    }

    /// Curve in SI units.
    pub fn build(&self, id: &str) -> Curve {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = Normal::new(0.0, self.noise.max(0.0)).ok();
        let x0 = self.contact_points as f64 * self.step;
        let x: Vec<f64> = (0..self.points).map(|i| i as f64 * self.step).collect();
        let y = x
            .iter()
            .map(|&xi| {
                let jitter = normal.as_ref().map_or(0.0, |n| n.sample(&mut rng));
                self.clean_force(xi - x0) + jitter
            })
            .collect();
        Curve::new(id, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sawtooth() {
        let curve = CurveBuilder::new(600, 1e-9)
            .contact_points(100)
            .event(Unfolding::new(300e-9, 0.4e-9, 250e-9))
            .build("s");
        assert_eq!(curve.len(), 600);
        assert!((curve.y[0] - 2e-9).abs() < 1e-15);
        assert_eq!(curve.y[100], 0.0);
        // either side of the rupture at 350
        assert!(curve.y[349] < -50e-12);
        assert_eq!(curve.y[352], 0.0);
    }

    #[test]
    fn same_seed_same_curve() {
        let b = CurveBuilder::new(100, 1e-9).noise(1e-12).seed(4);
        assert_eq!(b.build("a").y, b.build("a").y);
        assert_ne!(b.build("a").y, b.clone().seed(5).build("a").y);
    }
}
