use approx::assert_relative_eq;

use rusty_force::synth::{CurveBuilder, Unfolding};
use rusty_force::{ContactCache, Curve, Error, FeatureConfig, FeaturePipeline};

/// Two unfolding events on a 0.2 nm grid: a stiff one (P = 0.35 nm) rupturing
/// at 85 nm and a floppy one (P = 2 nm) rupturing at 147 nm.
fn two_event_curve(id: &str) -> Curve {
    CurveBuilder::new(1500, 0.2e-9)
        .contact_points(500)
        .event(Unfolding::new(100e-9, 0.35e-9, 85e-9))
        .event(Unfolding::new(160e-9, 2e-9, 147e-9))
        .noise(2e-12)
        .seed(17)
        .build(id)
}

/// Defaults, with threshold crossings of the loading ramps ignored.
fn sawtooth_config() -> FeatureConfig {
    let mut config = FeatureConfig::default();
    config.peaks.rupture_edges_only = true;
    config
}

fn pipeline(config: FeatureConfig) -> FeaturePipeline {
    FeaturePipeline::new(config).unwrap()
}

#[test]
fn implausible_persistence_length_drops_only_that_peak() {
    let mut config = sawtooth_config();
    config.fit.min_persistence_nm = 0.2;
    config.fit.max_persistence_nm = 0.5;
    let analysis = pipeline(config).analyze(&two_event_curve("c")).unwrap();

    assert_eq!(analysis.peaks.len(), 2);
    assert_eq!(analysis.records.len(), 1, "{:?}", analysis.records);
    let kept = &analysis.records[0];
    assert_eq!(kept.peak_index, analysis.peaks[0].location);
    assert_relative_eq!(kept.contour_length_nm, 100.0, max_relative = 0.05);
    assert!((0.2..=0.5).contains(&kept.persistence_length_nm));
    assert!(kept.force_pn > 100.0 && kept.force_pn < 170.0, "{kept:?}");
}

#[test]
fn default_persistence_range_accepts_both_events() {
    let records = pipeline(sawtooth_config())
        .extract(&two_event_curve("c"))
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].peak_index < records[1].peak_index);
    assert_relative_eq!(records[1].contour_length_nm, 160.0, max_relative = 0.05);
    assert!(records[1].persistence_length_nm > 1.0);
}

#[test]
fn extraction_is_idempotent() {
    let curve = two_event_curve("c");
    let p = pipeline(sawtooth_config());
    let first = p.extract(&curve).unwrap();
    let second = p.extract(&curve).unwrap();
    assert_eq!(first, second);
}

#[test]
fn curve_without_events_yields_empty_list() {
    let curve = CurveBuilder::new(1200, 0.2e-9)
        .contact_points(400)
        .noise(2e-12)
        .seed(3)
        .build("flat");
    let records = pipeline(FeatureConfig::default()).extract(&curve).unwrap();
    assert!(records.is_empty());
}

#[test]
fn min_peaks_gates_the_curve() {
    let mut config = sawtooth_config();
    config.peaks.min_peaks = 3;
    let analysis = pipeline(config).analyze(&two_event_curve("c")).unwrap();
    assert_eq!(analysis.peaks.len(), 2);
    assert!(analysis.baseline.is_none());
    assert!(analysis.records.is_empty());
}

#[test]
fn fixed_persistence_length_is_reported() {
    let mut config = sawtooth_config();
    config.fit.fixed_length_nm = Some(0.35);
    let analysis = pipeline(config).analyze(&two_event_curve("c")).unwrap();
    let first = &analysis.records[0];
    assert_relative_eq!(first.persistence_length_nm, 0.35, max_relative = 1e-9);
    assert_relative_eq!(first.contour_length_nm, 100.0, max_relative = 0.05);
}

#[test]
fn reversed_recording_gives_the_same_features() {
    let forward = two_event_curve("c");
    let n = forward.len();
    let mut backward = forward.clone();
    backward.x.reverse();
    backward.y.reverse();

    let p = pipeline(sawtooth_config());
    let a = p.extract(&forward).unwrap();
    let b = p.extract(&backward).unwrap();
    assert_eq!(a.len(), b.len());
    for (fa, fb) in a.iter().zip(&b) {
        assert_eq!(fb.peak_index, n - 1 - fa.peak_index);
        assert_eq!(fa.contour_length_nm, fb.contour_length_nm);
        assert_eq!(fa.force_pn, fb.force_pn);
    }
}

#[test]
fn units_are_rescaled() {
    let si = two_event_curve("c");
    let mut scaled = si.clone().with_units("nm", "pN");
    scaled.x.iter_mut().for_each(|v| *v *= 1e9);
    scaled.y.iter_mut().for_each(|v| *v *= 1e12);

    let p = pipeline(sawtooth_config());
    let a = p.extract(&si).unwrap();
    let b = p.extract(&scaled).unwrap();
    assert_eq!(a.len(), b.len());
    for (fa, fb) in a.iter().zip(&b) {
        assert_eq!(fa.peak_index, fb.peak_index);
        assert_relative_eq!(fa.contour_length_nm, fb.contour_length_nm, max_relative = 1e-3);
    }
}

#[test]
fn contact_cache_is_reused_until_invalidated() {
    let curve = two_event_curve("cached");
    let p = pipeline(sawtooth_config());
    let mut cache = ContactCache::new();

    let first = p.extract_cached(&curve, &mut cache).unwrap();
    assert_eq!(cache.len(), 1);
    let second = p.extract_cached(&curve, &mut cache).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, p.extract(&curve).unwrap());

    assert!(cache.invalidate("cached").is_some());
    assert!(cache.is_empty());
}

#[test]
fn batch_reports_failures_per_curve() {
    let good = two_event_curve("good");
    let bad_unit = two_event_curve("volts").with_units("m", "V");
    let tiny = Curve::new("tiny", vec![0.0, 1e-9, 2e-9], vec![1e-10, 0.0, 0.0]);

    let outcomes = pipeline(sawtooth_config()).extract_batch(&[good, bad_unit, tiny]);
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].curve_id, "good");
    assert_eq!(outcomes[0].result.as_ref().map(|r| r.len()), Ok(2));
    assert!(matches!(outcomes[1].result, Err(Error::Configuration(_))));
    assert!(matches!(outcomes[2].result, Err(Error::InsufficientData(_))));
}
