/// Data layer: curve tables in, feature tables out.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → CurveDataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ CurveDataset  │  Vec<Curve>, metadata column index
///   └──────────────┘
///        │  FeaturePipeline
///        ▼
///   ┌──────────┐
///   │  export   │  FeatureRecord → .csv / .parquet / text table
///   └──────────┘
/// ```

pub mod export;
pub mod loader;
pub mod model;
