use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::Deserialize;

use crate::transfer::TransferError;
use crate::types::{NUM_AXES, NUM_ELECTRODES, NUM_QUADRANTS, NUM_SIDES};

/// One measurement file worth of synchronized samples.
#[derive(Clone, Debug)]
pub struct Record {
    pub sample_rate_hz: f64,
    pub drive: Array2<f64>,     // electrodes x samples
    pub position: Array2<f64>,  // axes x samples
    pub feedback: Array2<f64>,  // axes x samples
    pub amplitude: Array2<f64>, // quadrants x samples
    pub phase: Array2<f64>,     // quadrants x samples
}

impl Record {
    pub fn validate(&self) -> Result<(), TransferError> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(TransferError::InvalidSampleRate);
        }
        let expected = self.num_samples();
        let channels: [(&'static str, &Array2<f64>, usize); 5] = [
            ("drive", &self.drive, NUM_ELECTRODES),
            ("position", &self.position, NUM_AXES),
            ("feedback", &self.feedback, NUM_AXES),
            ("amplitude", &self.amplitude, NUM_QUADRANTS),
            ("phase", &self.phase, NUM_QUADRANTS),
        ];
        for (channel, data, rows) in channels {
            if data.nrows() != rows {
                return Err(TransferError::ChannelMismatch {
                    channel,
                    expected: rows,
                    actual: data.nrows(),
                });
            }
            if data.ncols() != expected {
                return Err(TransferError::SampleCountMismatch {
                    channel,
                    expected,
                    actual: data.ncols(),
                });
            }
        }
        if expected < 2 {
            return Err(TransferError::SampleCountMismatch {
                channel: "position",
                expected: 2,
                actual: expected,
            });
        }
        Ok(())
    }

    pub fn num_samples(&self) -> usize {
        self.position.ncols()
    }

    /// Right, left, top and bottom sums of neighbouring quadrant amplitudes.
    ///
    /// Quadrants are indexed 0 top-right, 1 bottom-right, 2 top-left,
    /// 3 bottom-left when looking at the sensing elements.
    pub fn side_channels(&self) -> Array2<f64> {
        let amp = &self.amplitude;
        let mut sides = Array2::zeros((NUM_SIDES, self.num_samples()));
        for (row, (a, b)) in [(0, 1), (2, 3), (0, 2), (1, 3)].into_iter().enumerate() {
            let sum = &amp.row(a) + &amp.row(b);
            sides.row_mut(row).assign(&sum);
        }
        sides
    }
}

/// On-disk layout: every channel group as a list of rows.
#[derive(Clone, Debug, Deserialize)]
pub struct RecordFile {
    pub sample_rate_hz: f64,
    pub drive: Vec<Vec<f64>>,
    pub position: Vec<Vec<f64>>,
    pub feedback: Vec<Vec<f64>>,
    pub amplitude: Vec<Vec<f64>>,
    pub phase: Vec<Vec<f64>>,
}

impl TryFrom<RecordFile> for Record {
    type Error = TransferError;

    fn try_from(file: RecordFile) -> Result<Self, Self::Error> {
        let record = Record {
            sample_rate_hz: file.sample_rate_hz,
            drive: rows_to_array("drive", file.drive)?,
            position: rows_to_array("position", file.position)?,
            feedback: rows_to_array("feedback", file.feedback)?,
            amplitude: rows_to_array("amplitude", file.amplitude)?,
            phase: rows_to_array("phase", file.phase)?,
        };
        record.validate()?;
        Ok(record)
    }
}

fn rows_to_array(channel: &'static str, rows: Vec<Vec<f64>>) -> Result<Array2<f64>, TransferError> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(ragged) = rows.iter().find(|row| row.len() != ncols) {
        return Err(TransferError::SampleCountMismatch {
            channel,
            expected: ncols,
            actual: ragged.len(),
        });
    }
    let nrows = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|_| TransferError::SampleCountMismatch {
        channel,
        expected: ncols,
        actual: 0,
    })
}

/// Something that can yield records on demand.
pub trait RecordSource {
    fn next_record(&mut self) -> Result<Option<Record>, TransferError>;
}

/// In-memory source useful for tests and scripted analyses.
pub struct ManualSource {
    queue: VecDeque<Record>,
}

impl ManualSource {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            queue: records.into_iter().collect(),
        }
    }
}

impl RecordSource for ManualSource {
    fn next_record(&mut self) -> Result<Option<Record>, TransferError> {
        Ok(self.queue.pop_front())
    }
}

/// Reads a JSON array of [`RecordFile`]s up front and hands them out in order.
pub struct JsonRecordSource {
    queue: VecDeque<RecordFile>,
}

impl JsonRecordSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TransferError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, TransferError> {
        let files: Vec<RecordFile> = serde_json::from_str(text)?;
        Ok(Self {
            queue: files.into_iter().collect(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl RecordSource for JsonRecordSource {
    fn next_record(&mut self) -> Result<Option<Record>, TransferError> {
        self.queue.pop_front().map(Record::try_from).transpose()
    }
}
