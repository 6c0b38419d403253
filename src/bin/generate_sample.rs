use std::path::PathBuf;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rusty_force::data::export::save_curves_parquet;
use rusty_force::data::model::MetadataValue;
use rusty_force::synth::{CurveBuilder, Unfolding};

/// Retraction curves of a tandem-repeat protein: each domain adds a fixed
/// contour-length increment, so ruptures sit at regularly spaced extensions.
fn main() -> Result<()> {
    env_logger::init();
    let output_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_curves.parquet"));

    let mut rng = StdRng::seed_from_u64(42);
    let samples = [("I27", 28.0e-9, 0.4e-9), ("spectrin", 31.0e-9, 0.6e-9)];
    let speeds = [0.5, 1.0, 2.0];

    let mut curves = Vec::new();
    for &(name, increment, persistence) in &samples {
        for &speed in &speeds {
            for repeat in 0..4 {
                let domains = rng.gen_range(2..=5);
                let base = rng.gen_range(40e-9..60e-9);
                let mut builder = CurveBuilder::new(2000, 0.2e-9)
                    .contact_points(400)
                    .contact_force(rng.gen_range(1e-9..3e-9))
                    .noise(rng.gen_range(2e-12..6e-12))
                    .seed(rng.gen());
                for d in 0..domains {
                    let contour = base + increment * d as f64;
                    let rupture = contour * rng.gen_range(0.82..0.9);
                    builder = builder.event(Unfolding::new(contour, persistence, rupture));
                }
                let mut curve = builder.build(&format!("{name}_{speed}_{repeat}"));
                curve.metadata.insert("sample".into(), MetadataValue::Text(name.to_string()));
                curve.metadata.insert("speed_um_s".into(), MetadataValue::Float(speed));
                curve.metadata.insert("domains".into(), MetadataValue::Integer(domains));
                curves.push(curve);
            }
        }
    }

    save_curves_parquet(&curves, &output_path)?;
    println!(
        "Wrote {} force curves ({} points each) to {}",
        curves.len(),
        curves.first().map_or(0, |c| c.len()),
        output_path.display()
    );
    Ok(())
}
