//! Remote player interpolation.
//!
//! Samples arrive irregularly; [`PlayerInterpolator`] keeps the two newest per
//! player and blends between them on every render tick.

pub mod interpolator;

pub use interpolator::{
    InterpolatorSettings, LerpFrame, PlayerId, PlayerInterpolator, RemotePlayerState,
    DEFAULT_EXPECTED_DELTA, FLIP_SNAP_THRESHOLD,
};
