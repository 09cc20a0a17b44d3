use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::types::{
    NUM_AXES, NUM_ELECTRODES, ELECTRODE_BACK, ELECTRODE_BOTTOM, ELECTRODE_FRONT, ELECTRODE_LEFT,
    ELECTRODE_RIGHT, ELECTRODE_TOP,
};

/// Field at the trap centre per volt applied to each face electrode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrapField {
    pub front: f64,
    pub back: f64,
    pub right: f64,
    pub left: f64,
    pub top: f64,
    pub bottom: f64,
}

/// Linear projection of the electrode voltages onto the drive axes.
///
/// Superposition holds for the trap electrodes, so the drive seen by the
/// bead along each axis is a weighted sum of electrode voltages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeMap {
    coefficients: [[f64; NUM_ELECTRODES]; NUM_AXES],
}

impl Default for ElectrodeMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl ElectrodeMap {
    /// Electrodes 0..3 already carry the x, y and z drives.
    pub fn identity() -> Self {
        let mut coefficients = [[0.0; NUM_ELECTRODES]; NUM_AXES];
        for (axis, row) in coefficients.iter_mut().enumerate() {
            row[axis] = 1.0;
        }
        Self { coefficients }
    }

    /// Front/back faces drive x, right/left drive y, top/bottom drive z.
    pub fn trap(field: TrapField) -> Self {
        let mut coefficients = [[0.0; NUM_ELECTRODES]; NUM_AXES];
        coefficients[0][ELECTRODE_FRONT] = field.front;
        coefficients[0][ELECTRODE_BACK] = field.back;
        coefficients[1][ELECTRODE_RIGHT] = field.right;
        coefficients[1][ELECTRODE_LEFT] = field.left;
        coefficients[2][ELECTRODE_TOP] = field.top;
        coefficients[2][ELECTRODE_BOTTOM] = field.bottom;
        Self { coefficients }
    }

    pub fn from_coefficients(coefficients: [[f64; NUM_ELECTRODES]; NUM_AXES]) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &[[f64; NUM_ELECTRODES]; NUM_AXES] {
        &self.coefficients
    }

    /// Electrodes x samples in, axes x samples out.
    pub fn project(&self, voltages: ArrayView2<f64>) -> Array2<f64> {
        let matrix = Array2::from_shape_fn((NUM_AXES, NUM_ELECTRODES), |(axis, electrode)| {
            self.coefficients[axis][electrode]
        });
        matrix.dot(&voltages)
    }
}
