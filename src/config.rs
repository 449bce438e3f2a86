//! The validated sweep settings bundle handed to the pipeline

use crate::errors::ConfigError;

pub const DEFAULT_FSTART: &str = "375MHz";
pub const DEFAULT_FSTOP: &str = "500MHz";
pub const DEFAULT_RBW: &str = "10kHz";
pub const DEFAULT_N_AVG: u32 = 4;
pub const DEFAULT_T_HOT: f64 = 295.0;
pub const DEFAULT_T_COLD: f64 = 77.0;
pub const DEFAULT_WATERFALL_DEPTH: usize = 100;
pub const DEFAULT_TICK_MS: u64 = 200;

/// A frequency as the operator typed it (sent verbatim to the instrument) plus its value in Hz
#[derive(Debug, Clone, PartialEq)]
pub struct Frequency {
    text: String,
    hz: f64,
}

impl Frequency {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let text = s.trim();
        let bad = || ConfigError::BadFrequency(s.to_owned());
        let lower = text.to_ascii_lowercase();
        let (number, scale) = [("ghz", 1e9), ("mhz", 1e6), ("khz", 1e3), ("hz", 1.0)]
            .iter()
            .find_map(|(unit, scale)| lower.strip_suffix(unit).map(|n| (n, *scale)))
            .unwrap_or((lower.as_str(), 1.0));
        let value: f64 = number.trim().parse().map_err(|_| bad())?;
        if !value.is_finite() || value < 0.0 {
            return Err(bad());
        }
        Ok(Self {
            text: text.to_owned(),
            hz: value * scale,
        })
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Everything the instrument needs to be configured for a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    pub fstart: Frequency,
    pub fstop: Frequency,
    pub rbw: Frequency,
    /// `None` leaves the instrument's preamp alone
    pub preamp: Option<bool>,
    /// `None` leaves the instrument's input attenuation alone
    pub attenuation_db: Option<f64>,
    pub n_avg: Option<u32>,
}

impl SweepSettings {
    pub fn new(
        fstart: &str,
        fstop: &str,
        rbw: &str,
        preamp: Option<bool>,
        attenuation_db: Option<f64>,
        n_avg: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let fstart = Frequency::parse(fstart)?;
        let fstop = Frequency::parse(fstop)?;
        let rbw = Frequency::parse(rbw)?;
        if fstop.hz() < fstart.hz() {
            return Err(ConfigError::InvertedSpan {
                start: fstart.hz(),
                stop: fstop.hz(),
            });
        }
        if n_avg == Some(0) {
            return Err(ConfigError::ZeroAverages);
        }
        Ok(Self {
            fstart,
            fstop,
            rbw,
            preamp,
            attenuation_db,
            n_avg,
        })
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            fstart: Frequency {
                text: DEFAULT_FSTART.to_owned(),
                hz: 375e6,
            },
            fstop: Frequency {
                text: DEFAULT_FSTOP.to_owned(),
                hz: 500e6,
            },
            rbw: Frequency {
                text: DEFAULT_RBW.to_owned(),
                hz: 10e3,
            },
            preamp: None,
            attenuation_db: None,
            n_avg: None,
        }
    }
}
