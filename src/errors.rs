//! Error types for every layer of the pipeline

use std::{fmt, io};

use thiserror::Error;

/// Failures talking to the instrument
#[derive(Error, Debug)]
pub enum PortError {
    #[error("instrument I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("malformed reply to `{command}`: {reply:?}")]
    MalformedReply { command: String, reply: String },

    /// A sweep was triggered while the previous one had not been read back yet
    #[error("a sweep is already in flight")]
    SweepInFlight,

    #[error("no completed sweep to read samples from")]
    NoSweep,

    #[error("instrument fault: {0}")]
    Fault(String),
}

impl PortError {
    /// Map a socket error onto a timeout when that's what it was
    pub fn from_io(err: io::Error, waiting_for: &str) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                PortError::Timeout(waiting_for.to_owned())
            }
            _ => PortError::Io(err),
        }
    }
}

pub type PortResult<T> = std::result::Result<T, PortError>;

/// Which part of a measurement an acquisition belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Identify,
    Single,
    Average,
    Hot,
    Cold,
    Waterfall,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configure => "configuration",
            Stage::Identify => "identification",
            Stage::Single => "single trace",
            Stage::Average => "averaging",
            Stage::Hot => "hot load",
            Stage::Cold => "cold load",
            Stage::Waterfall => "waterfall",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The instrument failed mid-measurement; nothing partial is returned
    #[error("acquisition failed during {stage} (trace {index}): {source}")]
    Acquisition {
        stage: Stage,
        index: usize,
        #[source]
        source: PortError,
    },

    #[error("shape mismatch: expected {expected} bins, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("no traces to combine")]
    NoTraces,

    #[error("no frequency axis has been established yet")]
    AxisUnavailable,

    #[error("waterfall depth must be at least 1")]
    InvalidDepth,

    #[error("temperature must be a positive number of kelvin, got {0}")]
    InvalidTemperature(f64),

    #[error("cancelled after {completed} traces")]
    Cancelled { completed: usize },
}

impl PipelineError {
    /// Tag a port failure with where in the measurement it happened
    pub fn acquisition(stage: Stage, index: usize) -> impl FnOnce(PortError) -> Self {
        move |source| PipelineError::Acquisition {
            stage,
            index,
            source,
        }
    }

    pub fn check_len(expected: usize, actual: usize) -> std::result::Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(PipelineError::ShapeMismatch { expected, actual })
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("could not parse frequency {0:?} (expected e.g. `375MHz`)")]
    BadFrequency(String),

    #[error("stop frequency {stop} Hz is below start frequency {start} Hz")]
    InvertedSpan { start: f64, stop: f64 },

    #[error("averaging count must be at least 1")]
    ZeroAverages,

    #[error("no instrument given, use --resource or --simulate")]
    NoInstrument,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("measurement file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("bad measurement archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("bad measurement metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed measurement file: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_error_names_step() {
        let err = PipelineError::acquisition(Stage::Cold, 3)(PortError::Timeout("sweep".into()));
        let msg = err.to_string();
        assert!(msg.contains("cold load"));
        assert!(msg.contains("trace 3"));
        assert!(msg.contains("sweep"));
    }

    #[test]
    fn test_check_len() {
        assert!(PipelineError::check_len(4, 4).is_ok());
        assert!(matches!(
            PipelineError::check_len(4, 3),
            Err(PipelineError::ShapeMismatch {
                expected: 4,
                actual: 3
            })
        ));
        let res: PortResult<()> = Err(PortError::NoSweep);
        assert!(res.is_err());
    }

    #[test]
    fn test_timeout_mapping() {
        let err = PortError::from_io(io::Error::from(io::ErrorKind::TimedOut), "trace data");
        assert!(matches!(err, PortError::Timeout(ref what) if what == "trace data"));
        let err = PortError::from_io(io::Error::from(io::ErrorKind::BrokenPipe), "trace data");
        assert!(matches!(err, PortError::Io(_)));
    }
}
