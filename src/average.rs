//! Combining repeated sweeps into one mean trace.
//!
//! The caller always picks the domain the mean is taken in:
//!
//! - [`AveragingDomain::Dbm`] takes the arithmetic mean of the dBm values. This is
//!   what plain averaged display traces have always used, and saved measurements
//!   rely on it, even though it underestimates the mean power of noise.
//! - [`AveragingDomain::Linear`] converts every bin to mW, averages, and converts
//!   back to dBm. Anything that derives a power ratio (Y-factor) must use this.

use std::fmt;

use crate::{
    dbm_to_mw,
    errors::{PipelineError, Result},
    mw_to_dbm, Trace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragingDomain {
    Dbm,
    Linear,
}

impl fmt::Display for AveragingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AveragingDomain::Dbm => f.write_str("dBm"),
            AveragingDomain::Linear => f.write_str("linear"),
        }
    }
}

/// A mean trace (in dBm) and how many sweeps went into it
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedTrace {
    trace: Trace,
    sample_count: usize,
    domain: AveragingDomain,
}

impl AveragedTrace {
    /// A single sweep, as an average of one
    pub fn single(trace: Trace, domain: AveragingDomain) -> Self {
        Self {
            trace,
            sample_count: 1,
            domain,
        }
    }

    /// A mean over `sample_count` sweeps (at least one)
    pub fn with_count(trace: Trace, sample_count: usize, domain: AveragingDomain) -> Self {
        Self {
            trace,
            sample_count: sample_count.max(1),
            domain,
        }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn domain(&self) -> AveragingDomain {
        self.domain
    }

    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }
}

/// Running sum over traces fed one at a time, so an averaging loop never
/// has to hold every sweep in memory
#[derive(Debug)]
pub struct Accumulator {
    domain: AveragingDomain,
    // Kept so that an average of identical traces comes back bit-for-bit
    first: Option<Trace>,
    identical: bool,
    sums: Vec<f64>,
    count: usize,
}

impl Accumulator {
    pub fn new(domain: AveragingDomain) -> Self {
        Self {
            domain,
            first: None,
            identical: true,
            sums: vec![],
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn add(&mut self, samples: &[f64]) {
        match self.domain {
            AveragingDomain::Dbm => {
                for (acc, x) in self.sums.iter_mut().zip(samples) {
                    *acc += x
                }
            }
            AveragingDomain::Linear => {
                for (acc, x) in self.sums.iter_mut().zip(samples) {
                    *acc += dbm_to_mw(*x)
                }
            }
        }
    }

    pub fn push(&mut self, trace: &Trace) -> Result<()> {
        if self.count == 0 {
            self.sums = vec![0.0; trace.len()];
            self.first = Some(trace.clone());
        } else {
            PipelineError::check_len(self.sums.len(), trace.len())?;
            self.identical = self.identical && self.first.as_ref() == Some(trace);
        }
        self.add(trace.as_slice());
        self.count += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<AveragedTrace> {
        let domain = self.domain;
        match (self.count, self.first) {
            (0, _) | (_, None) => Err(PipelineError::NoTraces),
            (n, Some(first)) if self.identical => Ok(AveragedTrace::with_count(first, n, domain)),
            (n, Some(_)) => {
                let mean = self.sums.into_iter().map(|s| s / n as f64);
                let samples = match domain {
                    AveragingDomain::Dbm => mean.collect(),
                    AveragingDomain::Linear => mean.map(mw_to_dbm).collect(),
                };
                Ok(AveragedTrace::with_count(Trace::new(samples), n, domain))
            }
        }
    }
}

/// Average `traces` in the given domain. All traces must have the same number of bins.
pub fn accumulate<'a, I>(traces: I, domain: AveragingDomain) -> Result<AveragedTrace>
where
    I: IntoIterator<Item = &'a Trace>,
{
    let mut acc = Accumulator::new(domain);
    for trace in traces {
        acc.push(trace)?;
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_identical_traces() {
        let trace = Trace::new(vec![-90.1, -85.3, -40.0, 0.7]);
        for domain in [AveragingDomain::Dbm, AveragingDomain::Linear] {
            for n in 1..=7 {
                let traces = vec![trace.clone(); n];
                let avg = accumulate(&traces, domain).unwrap();
                assert_eq!(avg.sample_count(), n);
                assert_eq!(avg.trace(), &trace);
            }
        }
    }

    #[test]
    fn test_one_differing_trace_averages() {
        let a = Trace::new(vec![-90.1, 0.7]);
        let b = Trace::new(vec![-90.1, 0.8]);
        let avg = accumulate([&a, &a, &b], AveragingDomain::Dbm).unwrap();
        assert!(close(avg.trace().as_slice(), &[-90.1, (0.7 + 0.7 + 0.8) / 3.0]));
        assert_eq!(avg.sample_count(), 3);
    }

    #[test]
    fn test_single_is_untouched() {
        let trace = Trace::new(vec![-93.123456789, 1e-300]);
        let avg = accumulate([&trace], AveragingDomain::Linear).unwrap();
        assert_eq!(avg.trace(), &trace);
        assert_eq!(avg.sample_count(), 1);
    }

    #[test]
    fn test_linear_of_equal_values() {
        let traces = [Trace::new(vec![0.0]), Trace::new(vec![0.0])];
        let avg = accumulate(&traces, AveragingDomain::Linear).unwrap();
        assert!(avg.trace()[0].abs() < 1e-12);
    }

    #[test]
    fn test_domains_differ() {
        let traces = [Trace::new(vec![0.0]), Trace::new(vec![10.0])];
        let log = accumulate(&traces, AveragingDomain::Dbm).unwrap();
        let lin = accumulate(&traces, AveragingDomain::Linear).unwrap();
        assert!((log.trace()[0] - 5.0).abs() < 1e-12);
        // 10 log10((1 + 10) / 2)
        assert!((lin.trace()[0] - 7.403_626_894_942_439).abs() < 1e-9);
        assert!((log.trace()[0] - lin.trace()[0]).abs() > 1.0);
        assert_eq!(lin.domain(), AveragingDomain::Linear);
    }

    #[test]
    fn test_order_independent() {
        let a = Trace::new(vec![-70.0, -60.0]);
        let b = Trace::new(vec![-75.0, -50.0]);
        let c = Trace::new(vec![-72.5, -65.0]);
        let abc = accumulate([&a, &b, &c], AveragingDomain::Linear).unwrap();
        let cba = accumulate([&c, &b, &a], AveragingDomain::Linear).unwrap();
        assert!(close(abc.trace().as_slice(), cba.trace().as_slice()));
    }

    #[test]
    fn test_shape_mismatch() {
        let traces = [Trace::new(vec![0.0; 3]), Trace::new(vec![0.0; 2])];
        assert!(matches!(
            accumulate(&traces, AveragingDomain::Dbm),
            Err(PipelineError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
        let traces = [
            Trace::new(vec![0.0; 3]),
            Trace::new(vec![0.0; 3]),
            Trace::new(vec![0.0; 4]),
        ];
        assert!(accumulate(&traces, AveragingDomain::Linear).is_err());
    }

    #[test]
    fn test_empty() {
        assert!(matches!(
            accumulate(std::iter::empty(), AveragingDomain::Dbm),
            Err(PipelineError::NoTraces)
        ));
    }
}
