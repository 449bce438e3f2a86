//! The instrument seam: anything that can be configured, swept, and read back.
//!
//! Every method takes `&mut self`, so a port can only ever be driven by one
//! owner at a time. Ports also track their own sweep state and refuse to
//! trigger a new sweep while the previous one has not been read back.

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
    config::SweepSettings,
    errors::{PortError, PortResult},
    mw_to_dbm,
};

/// Boltzmann's constant, J/K
const BOLTZMANN: f64 = 1.380_649e-23;

/// Which noise load is connected to the receiver input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseLoad {
    Hot,
    Cold,
}

/// Where a port is in its sweep cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    #[default]
    Idle,
    /// Triggered, samples not yet read back
    Armed,
}

impl SweepState {
    /// Move to `Armed`, refusing if a sweep is still pending
    pub fn arm(&mut self) -> PortResult<()> {
        match self {
            SweepState::Idle => {
                *self = SweepState::Armed;
                Ok(())
            }
            SweepState::Armed => Err(PortError::SweepInFlight),
        }
    }

    /// Move back to `Idle`, refusing if nothing was triggered
    pub fn disarm(&mut self) -> PortResult<()> {
        match self {
            SweepState::Armed => {
                *self = SweepState::Idle;
                Ok(())
            }
            SweepState::Idle => Err(PortError::NoSweep),
        }
    }
}

pub trait InstrumentPort {
    /// Apply span, resolution bandwidth and (when set) preamp and attenuation
    fn configure(&mut self, settings: &SweepSettings) -> PortResult<()>;

    /// Start a sweep and block until the instrument reports it finished
    fn trigger_and_wait(&mut self) -> PortResult<()>;

    /// Amplitudes (dBm) of the last completed sweep
    fn read_samples(&mut self) -> PortResult<Vec<f64>>;

    fn query_identity(&mut self) -> PortResult<String>;

    /// Switch the noise source between loads, for instruments that drive one.
    ///
    /// Returns `false` when the operator has to swap the load by hand.
    fn select_load(&mut self, _load: NoiseLoad) -> PortResult<bool> {
        Ok(false)
    }
}

impl<P: InstrumentPort + ?Sized> InstrumentPort for Box<P> {
    fn configure(&mut self, settings: &SweepSettings) -> PortResult<()> {
        (**self).configure(settings)
    }

    fn trigger_and_wait(&mut self) -> PortResult<()> {
        (**self).trigger_and_wait()
    }

    fn read_samples(&mut self) -> PortResult<Vec<f64>> {
        (**self).read_samples()
    }

    fn query_identity(&mut self) -> PortResult<String> {
        (**self).query_identity()
    }

    fn select_load(&mut self, load: NoiseLoad) -> PortResult<bool> {
        (**self).select_load(load)
    }
}

/// A software stand-in for a spectrum analyzer looking at a noise source.
///
/// Each bin reads the thermal noise power `k (T_load + T_rx) B` in the
/// configured resolution bandwidth, plus receiver gain and uniform jitter.
#[derive(Debug)]
pub struct SimulatedAnalyzer {
    points: usize,
    receiver_temp_k: f64,
    hot_temp_k: f64,
    cold_temp_k: f64,
    gain_db: f64,
    jitter_db: f64,
    fail_after: Option<usize>,
    load: NoiseLoad,
    rbw_hz: f64,
    preamp: bool,
    attenuation_db: f64,
    sweeps: usize,
    state: SweepState,
    rng: StdRng,
}

impl SimulatedAnalyzer {
    pub const IDENTITY: &'static str = "SLURPER,SIM-SA,0,1.0";

    pub fn new(points: usize) -> Self {
        Self {
            points,
            receiver_temp_k: 100.0,
            hot_temp_k: 295.0,
            cold_temp_k: 77.0,
            gain_db: 0.0,
            jitter_db: 0.5,
            fail_after: None,
            load: NoiseLoad::Hot,
            rbw_hz: 10e3,
            preamp: false,
            attenuation_db: 0.0,
            sweeps: 0,
            state: SweepState::Idle,
            rng: StdRng::seed_from_u64(0x5a),
        }
    }

    /// Noise temperature of the simulated receiver itself
    pub fn receiver_temp(mut self, kelvin: f64) -> Self {
        self.receiver_temp_k = kelvin;
        self
    }

    /// Physical temperatures of the hot and cold loads
    pub fn load_temps(mut self, hot_k: f64, cold_k: f64) -> Self {
        self.hot_temp_k = hot_k;
        self.cold_temp_k = cold_k;
        self
    }

    /// Peak-to-peak/2 of the uniform jitter added to every bin
    pub fn jitter(mut self, db: f64) -> Self {
        self.jitter_db = db;
        self
    }

    /// Make every sweep after the first `sweeps` fail with a timeout
    pub fn fail_after(mut self, sweeps: usize) -> Self {
        self.fail_after = Some(sweeps);
        self
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    fn level_dbm(&self) -> f64 {
        let load_k = match self.load {
            NoiseLoad::Hot => self.hot_temp_k,
            NoiseLoad::Cold => self.cold_temp_k,
        };
        let watts = BOLTZMANN * (load_k + self.receiver_temp_k) * self.rbw_hz;
        let preamp_db = if self.preamp { 20.0 } else { 0.0 };
        mw_to_dbm(watts * 1e3) + self.gain_db + preamp_db - self.attenuation_db
    }
}

impl InstrumentPort for SimulatedAnalyzer {
    fn configure(&mut self, settings: &SweepSettings) -> PortResult<()> {
        self.rbw_hz = settings.rbw.hz();
        if let Some(preamp) = settings.preamp {
            self.preamp = preamp;
        }
        if let Some(att) = settings.attenuation_db {
            self.attenuation_db = att;
        }
        debug!(rbw = self.rbw_hz, "Simulated analyzer configured");
        Ok(())
    }

    fn trigger_and_wait(&mut self) -> PortResult<()> {
        if matches!(self.fail_after, Some(n) if self.sweeps >= n) {
            return Err(PortError::Timeout("sweep completion".to_owned()));
        }
        self.state.arm()?;
        self.sweeps += 1;
        Ok(())
    }

    fn read_samples(&mut self) -> PortResult<Vec<f64>> {
        self.state.disarm()?;
        let level = self.level_dbm();
        let jitter = self.jitter_db;
        Ok((0..self.points)
            .map(|_| level + jitter * (2.0 * self.rng.gen::<f64>() - 1.0))
            .collect())
    }

    fn query_identity(&mut self) -> PortResult<String> {
        Ok(Self::IDENTITY.to_owned())
    }

    fn select_load(&mut self, load: NoiseLoad) -> PortResult<bool> {
        self.load = load;
        Ok(true)
    }
}
