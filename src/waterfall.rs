//! Rolling time-frequency buffer behind the live waterfall.
//!
//! Rows are traces, columns are frequency bins. Row 0 is always the oldest
//! trace still retained and row `depth - 1` the newest. The buffer starts out
//! full of zero rows and every push evicts the oldest row, so it always holds
//! exactly `depth` rows.

use std::sync::Arc;

use crate::{
    errors::{PipelineError, Result},
    FrequencyAxis, Trace,
};

#[derive(Debug, Clone)]
pub struct WaterfallBuffer {
    axis: Arc<FrequencyAxis>,
    depth: usize,
    // depth * bins, row-major, in physical (ring) order
    data: Vec<f64>,
    // Physical row holding the oldest trace
    head: usize,
    pushes: usize,
}

impl WaterfallBuffer {
    pub fn new(depth: usize, axis: Arc<FrequencyAxis>) -> Result<Self> {
        if depth == 0 {
            return Err(PipelineError::InvalidDepth);
        }
        Ok(Self {
            data: vec![0.0; depth * axis.len()],
            axis,
            depth,
            head: 0,
            pushes: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bins(&self) -> usize {
        self.axis.len()
    }

    pub fn axis(&self) -> &Arc<FrequencyAxis> {
        &self.axis
    }

    /// Total number of traces ever pushed
    pub fn pushes(&self) -> usize {
        self.pushes
    }

    /// How many rows hold real traces rather than the initial zeros
    pub fn filled(&self) -> usize {
        self.pushes.min(self.depth)
    }

    /// Evict the oldest row and append `trace` as the newest
    pub fn push(&mut self, trace: &Trace) -> Result<()> {
        let bins = self.bins();
        PipelineError::check_len(bins, trace.len())?;
        let start = self.head * bins;
        self.data[start..start + bins].copy_from_slice(trace.as_slice());
        self.head = (self.head + 1) % self.depth;
        self.pushes += 1;
        Ok(())
    }

    /// Row `i` in time order (0 = oldest). Panics if `i >= depth`.
    pub fn row(&self, i: usize) -> &[f64] {
        assert!(i < self.depth, "row {i} out of range for depth {}", self.depth);
        let bins = self.bins();
        let phys = (self.head + i) % self.depth;
        &self.data[phys * bins..(phys + 1) * bins]
    }

    pub fn latest(&self) -> &[f64] {
        self.row(self.depth - 1)
    }

    /// Rows from oldest to newest
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.depth).map(move |i| self.row(i))
    }

    /// Copy the buffer out in time order, so it can be saved or drawn while
    /// this one keeps scrolling
    pub fn snapshot(&self) -> WaterfallSnapshot {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.rows() {
            data.extend_from_slice(row);
        }
        WaterfallSnapshot {
            axis: self.axis.clone(),
            rows: self.depth,
            data,
        }
    }
}

/// A time-ordered, contiguous copy of a [`WaterfallBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallSnapshot {
    axis: Arc<FrequencyAxis>,
    rows: usize,
    data: Vec<f64>,
}

impl WaterfallSnapshot {
    /// Rebuild a snapshot from row-major samples, e.g. read back from disk
    pub(crate) fn from_rows(axis: Arc<FrequencyAxis>, rows: usize, data: Vec<f64>) -> Result<Self> {
        PipelineError::check_len(rows * axis.len(), data.len())?;
        Ok(Self { axis, rows, data })
    }

    pub fn axis(&self) -> &Arc<FrequencyAxis> {
        &self.axis
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.axis.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let cols = self.cols();
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Row-major samples, oldest row first
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// (min, max) over all finite samples, for color scaling
    pub fn level_range(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
