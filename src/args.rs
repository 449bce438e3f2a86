//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    config::{
        SweepSettings, DEFAULT_FSTART, DEFAULT_FSTOP, DEFAULT_N_AVG, DEFAULT_RBW, DEFAULT_T_COLD,
        DEFAULT_T_HOT, DEFAULT_TICK_MS, DEFAULT_WATERFALL_DEPTH,
    },
    errors::ConfigError,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub mode: Mode,
    /// Start frequency, with units (e.g. 375MHz)
    #[clap(long, default_value = DEFAULT_FSTART)]
    pub fstart: String,
    /// Stop frequency, with units
    #[clap(long, default_value = DEFAULT_FSTOP)]
    pub fstop: String,
    /// Resolution bandwidth, with units
    #[clap(long, default_value = DEFAULT_RBW)]
    pub rbw: String,
    /// Preamp state (on/off). Left as is when not given.
    #[clap(long, value_parser = on_off)]
    pub preamp: Option<bool>,
    /// Input attenuation in dB. Left as is when not given.
    #[clap(long)]
    pub attenuation: Option<f64>,
    /// SCPI-over-TCP address of the analyzer (host:port)
    #[clap(short, long)]
    pub resource: Option<String>,
    /// Use the built-in simulated analyzer instead of real hardware
    #[clap(long, conflicts_with = "resource")]
    pub simulate: bool,
    /// Number of points the simulated analyzer returns per sweep
    #[clap(long, default_value_t = 1001)]
    pub points: usize,
    /// Save the result as <timestamp>_<OUTPUT>.npz
    #[clap(short, long)]
    pub output: Option<String>,
    /// Directory to save results in
    #[clap(long, default_value = ".")]
    pub dir: PathBuf,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Mode {
    /// Acquire a single trace
    Single,
    /// Acquire several traces and average them (in dBm)
    Average {
        /// Number of traces to average
        #[clap(short, long, default_value_t = DEFAULT_N_AVG)]
        #[clap(value_parser = clap::value_parser!(u32).range(1..))]
        n_avg: u32,
    },
    /// Live scrolling waterfall, until interrupted
    Waterfall {
        /// Number of traces kept
        #[clap(long, default_value_t = DEFAULT_WATERFALL_DEPTH)]
        depth: usize,
        /// Milliseconds between sweeps
        #[clap(long, default_value_t = DEFAULT_TICK_MS)]
        interval_ms: u64,
        /// Stop after this many traces
        #[clap(long)]
        max_traces: Option<usize>,
    },
    /// Y-factor system noise temperature (and noise figure, given the ENR)
    Yfactor {
        /// Hot load temperature in kelvin
        #[clap(long, default_value_t = DEFAULT_T_HOT)]
        t_hot: f64,
        /// Cold load temperature in kelvin
        #[clap(long, default_value_t = DEFAULT_T_COLD)]
        t_cold: f64,
        /// Excess noise ratio of the noise source in dB
        #[clap(long)]
        enr: Option<f64>,
        /// Traces averaged per load
        #[clap(short, long, default_value_t = DEFAULT_N_AVG)]
        #[clap(value_parser = clap::value_parser!(u32).range(1..))]
        n_avg: u32,
    },
    /// Show a measurement saved earlier, no instrument needed
    Read {
        /// Saved archive (the .npz extension may be left off)
        file: PathBuf,
    },
}

/// Where sweeps come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instrument {
    Scpi(String),
    /// Built-in simulator returning this many points per sweep
    Simulated(usize),
}

impl Args {
    pub fn instrument(&self) -> Result<Instrument, ConfigError> {
        match (&self.resource, self.simulate) {
            (Some(addr), _) => Ok(Instrument::Scpi(addr.clone())),
            (None, true) => Ok(Instrument::Simulated(self.points)),
            (None, false) => Err(ConfigError::NoInstrument),
        }
    }

    /// Validate the sweep options into the settings bundle for the pipeline
    pub fn sweep_settings(&self) -> Result<SweepSettings, ConfigError> {
        let n_avg = match self.mode {
            Mode::Average { n_avg } | Mode::Yfactor { n_avg, .. } => Some(n_avg),
            _ => None,
        };
        SweepSettings::new(
            &self.fstart,
            &self.fstop,
            &self.rbw,
            self.preamp,
            self.attenuation,
            n_avg,
        )
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn on_off(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(format!("expected on or off, got {s:?}")),
    }
}
