// src/types.rs
use serde::{Deserialize, Serialize};

/// Drive electrodes wired to the trap: cantilever, top, bottom, front,
/// back, right, left, shield.
pub const NUM_ELECTRODES: usize = 8;
/// Response and drive axes (x, y, z).
pub const NUM_AXES: usize = 3;
/// Quadrant photodiode carriers plus the backscatter channel.
pub const NUM_QUADRANTS: usize = 5;
/// Right, left, top and bottom sums of neighbouring quadrants.
pub const NUM_SIDES: usize = 4;

/// Coulombs.
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;

// Electrode face indices as wired on the trap.
pub const ELECTRODE_TOP: usize = 1;
pub const ELECTRODE_BOTTOM: usize = 2;
pub const ELECTRODE_FRONT: usize = 3;
pub const ELECTRODE_BACK: usize = 4;
pub const ELECTRODE_RIGHT: usize = 5;
pub const ELECTRODE_LEFT: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; NUM_AXES] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

/// Label for a matrix axis index, falling back to the raw index.
pub fn axis_label(index: usize) -> String {
    Axis::from_index(index)
        .map(|axis| axis.label().to_owned())
        .unwrap_or_else(|| format!("axis {index}"))
}
