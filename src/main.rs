use std::{
    io::{self, BufRead, Write},
    path::Path,
    thread,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Sender;
use sa_slurper::{
    args::{convert_filter, Args, Instrument, Mode},
    errors::PipelineError,
    exfil,
    monitoring::{frame_channel, log_frames, publish, DisplayFrame},
    port::{InstrumentPort, NoiseLoad, SimulatedAnalyzer},
    record::MeasurementRecord,
    scpi::ScpiAnalyzer,
    session::{CancelToken, Session, WaterfallPlan, YFactorPlan},
};
use tracing::{info, warn};

/// Block until the operator has swapped the noise source
fn prompt_for_load(load: NoiseLoad, cancel: &CancelToken) -> sa_slurper::errors::Result<()> {
    let which = match load {
        NoiseLoad::Hot => "HOT",
        NoiseLoad::Cold => "COLD",
    };
    print!("Connect {which} noise source and press Enter...");
    if let Err(e) = io::stdout().flush() {
        warn!("Could not flush the load prompt: {e}");
    }
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line);
    if cancel.is_cancelled() || !matches!(read, Ok(n) if n > 0) {
        return Err(PipelineError::Cancelled { completed: 0 });
    }
    Ok(())
}

fn run<P: InstrumentPort>(
    session: &mut Session<P>,
    mode: &Mode,
    cancel: &CancelToken,
    frames: &Sender<DisplayFrame>,
) -> sa_slurper::errors::Result<MeasurementRecord> {
    let n_avg = session.settings().n_avg.unwrap_or(1) as usize;
    match *mode {
        Mode::Single => session.single(),
        Mode::Average { .. } => session.averaged(n_avg),
        Mode::Waterfall {
            depth,
            interval_ms,
            max_traces,
        } => {
            let plan = WaterfallPlan {
                depth,
                interval: Duration::from_millis(interval_ms),
                max_traces,
            };
            session.waterfall(&plan, Some(frames))
        }
        Mode::Yfactor { t_hot, t_cold, enr, .. } => {
            let plan = YFactorPlan {
                t_hot,
                t_cold,
                enr_db: enr,
                n_avg,
            };
            session.yfactor(&plan, |load| prompt_for_load(load, cancel))
        }
        Mode::Read { .. } => Err(PipelineError::NoTraces),
    }
}

/// Open the instrument and take one measurement
fn measure(
    args: &Args,
    cancel: &CancelToken,
    frames: &Sender<DisplayFrame>,
) -> anyhow::Result<MeasurementRecord> {
    let settings = args.sweep_settings().context("Invalid sweep settings")?;
    let port: Box<dyn InstrumentPort> = match args.instrument()? {
        Instrument::Scpi(addr) => Box::new(
            ScpiAnalyzer::connect(&addr)
                .with_context(|| format!("Failed to connect to instrument at {addr}"))?,
        ),
        Instrument::Simulated(points) => {
            info!("Using simulated analyzer");
            let sim = SimulatedAnalyzer::new(points);
            match args.mode {
                Mode::Yfactor { t_hot, t_cold, .. } => Box::new(sim.load_temps(t_hot, t_cold)),
                _ => Box::new(sim),
            }
        }
    };
    let mut session = Session::open(port, settings, cancel.clone())
        .context("Failed to set up the instrument")?;
    run(&mut session, &args.mode, cancel, frames).context("Measurement failed")
}

/// Load a saved measurement and print its metadata
fn read_saved(file: &Path) -> anyhow::Result<MeasurementRecord> {
    let path = exfil::npz_path(file);
    let record =
        exfil::load(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    info!("--- Metadata ---");
    for line in record.metadata().summary_lines() {
        info!("{line}");
    }
    Ok(record)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let cancel = CancelToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping after the current sweep...");
        c.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    // Everything drawn goes through here
    let (sender, receiver) = frame_channel();
    let monitor = thread::spawn(move || log_frames(receiver));

    let (record, frame) = match &args.mode {
        Mode::Read { file } => {
            let record = read_saved(file)?;
            let frame = DisplayFrame::loaded(&record);
            (record, frame)
        }
        _ => {
            let record = measure(&args, &cancel, &sender)?;
            let frame = DisplayFrame::from_record(&record);
            (record, frame)
        }
    };
    if !publish(&sender, frame) {
        warn!("Display busy, final frame dropped");
    }
    drop(sender);
    if monitor.join().is_err() {
        warn!("Frame logger thread panicked");
    }

    if let Some(name) = &args.output {
        exfil::save(&record, name, &args.dir).context("Failed to save measurement")?;
    }
    Ok(())
}
