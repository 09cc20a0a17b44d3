use thiserror::Error;

use crate::fit::FitError;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("{channel} has {actual} channels, expected {expected}")]
    ChannelMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{channel} has {actual} samples, expected {expected}")]
    SampleCountMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f64, actual: f64 },
    #[error("record has no drive power on any axis")]
    NoDrivePower,
    #[error("no records were supplied")]
    NoRecords,
    #[error("no usable drive bins found for drive axis {axis}")]
    NoDriveBins { axis: usize },
    #[error("transfer matrix has no frequency keys")]
    EmptyTransferMatrix,
    #[error("volts-per-newton factor must be finite and non-zero, got {0}")]
    InvalidVoltsPerNewton(f64),
    #[error("channel index {0} is out of range")]
    InvalidChannel(usize),
    #[error("step frequency {requested} Hz is outside the measured keys (nearest {nearest} Hz)")]
    StepFrequencyOutOfRange { requested: f64, nearest: f64 },
    #[error("frequency grid needs at least two points, got {0}")]
    GridTooShort(usize),
    #[error("singular transfer matrix at grid index {index} ({frequency} Hz)")]
    SingularMatrix { index: usize, frequency: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}
