//! Acquisition and derived-measurement pipeline for a swept spectrum analyzer.
//!
//! Raw sweeps come off an [`port::InstrumentPort`] through a
//! [`capture::TraceAcquirer`], and are turned into averaged traces, a rolling
//! waterfall, or a Y-factor noise temperature estimate.

use std::ops::Index;

pub mod args;
pub mod average;
pub mod capture;
pub mod config;
pub mod errors;
pub mod exfil;
pub mod monitoring;
pub mod port;
pub mod record;
pub mod scpi;
pub mod session;
pub mod waterfall;
pub mod yfactor;

/// Frequencies (Hz) of each bin of a sweep, shared by every trace of that sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyAxis {
    freqs: Vec<f64>,
}

impl FrequencyAxis {
    /// Reconstruct the axis as `n` evenly spaced points from `start` to `stop` (inclusive).
    ///
    /// This assumes the instrument's bins are uniformly spaced, which is never verified
    /// against the instrument.
    pub fn linspace(start: f64, stop: f64, n: usize) -> Self {
        let freqs = match n {
            0 => vec![],
            1 => vec![start],
            _ => {
                let step = (stop - start) / (n - 1) as f64;
                (0..n)
                    .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                    .collect()
            }
        };
        Self { freqs }
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.freqs
    }

    pub fn start(&self) -> Option<f64> {
        self.freqs.first().copied()
    }

    pub fn stop(&self) -> Option<f64> {
        self.freqs.last().copied()
    }
}

impl From<Vec<f64>> for FrequencyAxis {
    fn from(freqs: Vec<f64>) -> Self {
        Self { freqs }
    }
}

impl Index<usize> for FrequencyAxis {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.freqs[index]
    }
}

/// Amplitudes (dBm) of one sweep, index aligned with a [`FrequencyAxis`]
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    samples: Vec<f64>,
}

impl Trace {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    /// Index and level of the strongest bin, ignoring NaN
    pub fn peak(&self) -> Option<(usize, f64)> {
        self.samples
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .fold(None, |best, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
    }
}

impl From<Vec<f64>> for Trace {
    fn from(samples: Vec<f64>) -> Self {
        Self::new(samples)
    }
}

impl Index<usize> for Trace {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.samples[index]
    }
}

#[inline]
pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

#[inline]
pub fn ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}

/// dBm to linear power in mW
#[inline]
pub fn dbm_to_mw(dbm: f64) -> f64 {
    db_to_ratio(dbm)
}

/// Linear power in mW to dBm
#[inline]
pub fn mw_to_dbm(mw: f64) -> f64 {
    ratio_to_db(mw)
}
