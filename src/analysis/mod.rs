/// Numerical core: contact point, rupture events, polymer fits.
///
/// ```text
///   (x, y) in SI units
///        │
///        ▼
///   ┌──────────┐   bilinear ─► lm
///   │ contact   │   baseline slide
///   └──────────┘
///        │ ContactResult
///        ▼
///   ┌──────────┐
///   │  peaks    │  convolution + adaptive noise threshold
///   └──────────┘
///        │ Vec<Peak>
///        ▼
///   ┌──────────┐
///   │ polymer   │  WLC / FJC ─► lm
///   └──────────┘
/// ```

pub mod bilinear;
pub mod contact;
pub mod lm;
pub mod peaks;
pub mod polymer;
pub mod stats;
