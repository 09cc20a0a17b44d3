use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum FitError {
    #[error("insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("fit did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("implausible resonance parameters: f0 = {resonance_hz} Hz, damping = {damping_hz} Hz")]
    ImplausibleParameters { resonance_hz: f64, damping_hz: f64 },
    #[error("non-finite value encountered while fitting")]
    NonFinite,
    #[error("sample frequencies must be strictly increasing")]
    Unsorted,
    #[error("component ({response}, {drive}) has no model: {reason}")]
    FailedComponent {
        response: usize,
        drive: usize,
        reason: String,
    },
    #[error("component index ({response}, {drive}) is out of range")]
    OutOfRange { response: usize, drive: usize },
}
