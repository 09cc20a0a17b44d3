//! Transfer-function construction and charge-step calibration for the
//! levitated microsphere force sensor.
//!
//! Records of drive, response, feedback and demodulated quadrant signals are
//! averaged per active drive axis, reduced to a frequency-keyed 3x3 transfer
//! matrix, calibrated to volts per newton, fitted per matrix element and
//! finally sampled and inverted into a force-from-signal array.

pub mod config;
pub mod fit;
pub mod transfer;
pub mod types;

pub use config::AnalysisConfig;
pub use fit::{ComponentModel, FitError, TransferFunction};
pub use transfer::{CalibrationPipeline, PipelineOutput, Record, TfArray, TransferError};
