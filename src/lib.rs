//! Feature extraction for single-molecule force-spectroscopy curves.
//!
//! A curve (piezo position, cantilever force) goes through contact-point
//! detection, noise-adaptive rupture detection and a worm-like-chain (or
//! freely-jointed-chain) fit per rupture. Each accepted rupture becomes a
//! [`FeatureRecord`] with contour length, persistence length, rupture force
//! and loading slope.
//!
//! ```no_run
//! use rusty_force::{FeatureConfig, FeaturePipeline};
//! use rusty_force::data::loader::load_file;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dataset = load_file(std::path::Path::new("curves.parquet"))?;
//! let pipeline = FeaturePipeline::new(FeatureConfig::default())?;
//! for outcome in pipeline.extract_batch(&dataset.curves) {
//!     println!("{}: {:?}", outcome.curve_id, outcome.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod synth;

pub use analysis::contact::{find_contact_point, ContactAlgorithm, ContactCache, ContactResult};
pub use analysis::peaks::{find_peaks, Peak, PeakPolarity};
pub use analysis::polymer::{FitResult, PolymerFitter, PolymerModel};
pub use config::FeatureConfig;
pub use data::model::{Curve, CurveDataset};
pub use error::{Error, Result};
pub use geometry::{ParamVector, Sample, Segment};
pub use pipeline::{CurveAnalysis, CurveOutcome, FeaturePipeline, FeatureRecord};
