//! Continuous models of the measured transfer matrix elements.

mod error;
pub mod interpolate;
pub mod least_squares;
mod model;
pub mod oscillator;
pub mod phase;

pub use error::FitError;
pub use interpolate::{EdgeFit, ExtrapolatingInterpolant, Extrapolation, ExtrapolationKind};
pub use model::{ComponentModel, FitMode, TransferFunction};
pub use oscillator::DampedOscillator;
pub use phase::PhaseUnwrap;
