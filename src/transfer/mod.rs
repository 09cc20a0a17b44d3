// src/transfer/mod.rs
pub mod averager;
pub mod bins;
pub mod calibrate;
pub mod electrodes;
pub mod error;
pub mod fft;
pub mod freq_map;
pub mod matrix;
pub mod pipeline;
pub mod source;
pub mod tf_array;

pub use averager::{AveragedSpectra, SpectralAverager};
pub use bins::DriveBinDetector;
pub use calibrate::{ChargeCalibration, ChargeStepCalibrator};
pub use electrodes::{ElectrodeMap, TrapField};
pub use error::TransferError;
pub use fft::SpectrumBuilder;
pub use freq_map::FrequencyMap;
pub use matrix::{ComplexMatrix, NoiseShift, TransferMatrices, TransferMatrixBuilder};
pub use pipeline::{CalibrationPipeline, PipelineOutput};
pub use source::{JsonRecordSource, ManualSource, Record, RecordSource};
pub use tf_array::TfArray;
