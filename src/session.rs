//! Measurement sessions: the loops that drive the instrument.
//!
//! Everything runs on the calling thread, one blocking sweep at a time.
//! Cancellation is only ever observed between sweeps, never during one.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::{
    average::{Accumulator, AveragedTrace, AveragingDomain},
    capture::TraceAcquirer,
    config::SweepSettings,
    errors::{PipelineError, Result, Stage},
    monitoring::{publish, DisplayFields, DisplayFrame},
    port::{InstrumentPort, NoiseLoad},
    record::MeasurementRecord,
    waterfall::WaterfallBuffer,
    yfactor, FrequencyAxis,
};

/// Shared stop flag, set from a signal handler or another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YFactorPlan {
    pub t_hot: f64,
    pub t_cold: f64,
    pub enr_db: Option<f64>,
    /// Sweeps averaged (in linear power) per load
    pub n_avg: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallPlan {
    pub depth: usize,
    pub interval: Duration,
    /// Stop on our own after this many traces; `None` runs until cancelled
    pub max_traces: Option<usize>,
}

/// Exclusive use of one instrument for a series of measurements
pub struct Session<P> {
    acquirer: TraceAcquirer<P>,
    instrument: String,
    cancel: CancelToken,
}

impl<P: InstrumentPort> Session<P> {
    /// Configure the instrument and read its identity
    pub fn open(port: P, settings: SweepSettings, cancel: CancelToken) -> Result<Self> {
        let mut acquirer = TraceAcquirer::new(port, settings);
        acquirer.configure()?;
        let instrument = acquirer.identity()?;
        info!(%instrument, "Connected");
        Ok(Self {
            acquirer,
            instrument,
            cancel,
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn settings(&self) -> &SweepSettings {
        self.acquirer.settings()
    }

    pub fn into_port(self) -> P {
        self.acquirer.into_port()
    }

    /// Average `n` sweeps, the first of which (re)derives the axis
    fn average(
        &mut self,
        n: usize,
        domain: AveragingDomain,
        stage: Stage,
    ) -> Result<(Arc<FrequencyAxis>, AveragedTrace)> {
        if n == 0 {
            return Err(PipelineError::NoTraces);
        }
        self.acquirer.set_stage(stage);
        let mut acc = Accumulator::new(domain);
        let (axis, first) = self.acquirer.acquire()?;
        acc.push(&first)?;
        info!("{stage}: trace 1/{n}");
        while acc.count() < n {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    completed: acc.count(),
                });
            }
            let trace = self.acquirer.acquire_fast()?;
            acc.push(&trace)?;
            info!("{stage}: trace {}/{n}", acc.count());
        }
        Ok((axis, acc.finish()?))
    }

    pub fn single(&mut self) -> Result<MeasurementRecord> {
        self.acquirer.set_stage(Stage::Single);
        let (axis, trace) = self.acquirer.acquire()?;
        Ok(MeasurementRecord::trace(
            &self.instrument,
            self.acquirer.settings(),
            axis,
            AveragedTrace::single(trace, AveragingDomain::Dbm),
        ))
    }

    /// Display averaging, done in dBm like it always has been
    pub fn averaged(&mut self, n: usize) -> Result<MeasurementRecord> {
        info!("Acquiring {n} traces for averaging");
        let (axis, avg) = self.average(n, AveragingDomain::Dbm, Stage::Average)?;
        Ok(MeasurementRecord::trace(
            &self.instrument,
            self.acquirer.settings(),
            axis,
            avg,
        ))
    }

    fn load(
        &mut self,
        load: NoiseLoad,
        stage: Stage,
        manual: &mut impl FnMut(NoiseLoad) -> Result<()>,
    ) -> Result<()> {
        let switched = self
            .acquirer
            .port_mut()
            .select_load(load)
            .map_err(PipelineError::acquisition(stage, 0))?;
        if switched {
            debug!(?load, "Noise source switched by instrument");
            Ok(())
        } else {
            manual(load)
        }
    }

    /// Hot then cold load, each averaged in linear power, then the Y-factor estimate.
    ///
    /// `manual` is called before each load when the instrument can't switch the noise
    /// source itself, so the operator can swap it.
    pub fn yfactor(
        &mut self,
        plan: &YFactorPlan,
        mut manual: impl FnMut(NoiseLoad) -> Result<()>,
    ) -> Result<MeasurementRecord> {
        yfactor::check_temperature(plan.t_hot)?;
        yfactor::check_temperature(plan.t_cold)?;
        if plan.n_avg == 0 {
            return Err(PipelineError::NoTraces);
        }
        self.load(NoiseLoad::Hot, Stage::Hot, &mut manual)?;
        let (hot_axis, hot) = self.average(plan.n_avg, AveragingDomain::Linear, Stage::Hot)?;
        info!("Hot measurement complete: {} points acquired", hot.len());

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                completed: plan.n_avg,
            });
        }
        self.load(NoiseLoad::Cold, Stage::Cold, &mut manual)?;
        let (cold_axis, cold) = self.average(plan.n_avg, AveragingDomain::Linear, Stage::Cold)?;
        info!("Cold measurement complete: {} points acquired", cold.len());

        // Both axes come from the same settings, so only the bin counts can differ
        PipelineError::check_len(hot_axis.len(), cold_axis.len())?;
        let result = yfactor::estimate(&hot, &cold, plan.t_hot, plan.t_cold, plan.enr_db)?;
        info!(
            "Mean Y-factor {:.3}, mean T_sys {:.1} K, T_sys range {:.1} - {:.1} K",
            result.y_summary.mean,
            result.t_sys_summary.mean,
            result.t_sys_summary.min,
            result.t_sys_summary.max
        );
        Ok(MeasurementRecord::yfactor(
            &self.instrument,
            self.acquirer.settings(),
            hot_axis,
            hot,
            cold,
            result,
        ))
    }

    /// The live waterfall: on every tick, sweep once, scroll the buffer, and offer
    /// a copy to the renderer.
    ///
    /// Ticks that come due while a sweep is still running collapse into one, so
    /// sweeps never overlap. Runs until cancelled or `max_traces` is reached and
    /// returns whatever the buffer holds at that point.
    pub fn waterfall(
        &mut self,
        plan: &WaterfallPlan,
        frames: Option<&Sender<DisplayFrame>>,
    ) -> Result<MeasurementRecord> {
        self.acquirer.set_stage(Stage::Waterfall);
        let (axis, first) = self.acquirer.acquire()?;
        let mut buffer = WaterfallBuffer::new(plan.depth, axis)?;
        buffer.push(&first)?;
        let fields = DisplayFields::traces(self.acquirer.settings(), plan.depth);
        let ticker = crossbeam_channel::tick(plan.interval);
        info!("Starting live waterfall, interrupt to stop");

        loop {
            if let Some(tx) = frames {
                if !tx.is_full() {
                    publish(tx, DisplayFrame::waterfall(buffer.snapshot(), fields.clone()));
                }
            }
            if self.cancel.is_cancelled() || plan.max_traces.map_or(false, |m| buffer.pushes() >= m)
            {
                break;
            }
            // The tick channel never disconnects
            let _ = ticker.recv();
            if self.cancel.is_cancelled() {
                break;
            }
            let trace = self.acquirer.acquire_fast()?;
            buffer.push(&trace)?;
        }
        debug!(traces = buffer.pushes(), "Waterfall stopped");
        Ok(MeasurementRecord::waterfall(
            &self.instrument,
            self.acquirer.settings(),
            buffer.snapshot(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capture::tests::ScriptedPort,
        errors::PortError,
        monitoring::{frame_channel, FrameData},
        port::SimulatedAnalyzer,
        record::{MeasurementKind, RecordData},
    };

    fn session<P: InstrumentPort>(port: P) -> Session<P> {
        let settings = SweepSettings::new("100Hz", "200Hz", "1Hz", None, None, None).unwrap();
        Session::open(port, settings, CancelToken::new()).unwrap()
    }

    fn trace_of(rec: &MeasurementRecord) -> &[f64] {
        match rec.data() {
            RecordData::Trace(t) => t.as_slice(),
            other => panic!("not a trace: {other:?}"),
        }
    }

    #[test]
    fn test_averaged_in_dbm() {
        let mut s = session(ScriptedPort::with(vec![vec![0.0, -10.0], vec![10.0, -20.0]]));
        assert_eq!(s.instrument(), "ACME,SA-1,42,0.1");
        let rec = s.averaged(2).unwrap();
        assert_eq!(trace_of(&rec), &[5.0, -15.0]);
        assert_eq!(rec.kind(), MeasurementKind::AveragedTrace);
        assert_eq!(rec.axis().as_slice(), &[100.0, 200.0]);
    }

    #[test]
    fn test_failed_sweep_aborts_average() {
        let mut port = ScriptedPort::with(vec![vec![0.0], vec![0.0]]);
        port.sweeps
            .push_back(Err(PortError::Timeout("sweep completion".into())));
        port.sweeps.push_back(Ok(vec![0.0]));
        let mut s = session(port);
        match s.averaged(4) {
            Err(PipelineError::Acquisition { stage, index, .. }) => {
                assert_eq!(stage, Stage::Average);
                assert_eq!(index, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancel_between_sweeps() {
        let mut s = session(ScriptedPort::with(vec![vec![0.0]; 8]));
        s.cancel.cancel();
        assert!(matches!(
            s.averaged(8),
            Err(PipelineError::Cancelled { completed: 1 })
        ));
    }

    #[test]
    fn test_single() {
        let mut s = session(ScriptedPort::with(vec![vec![-3.0, -4.0, -5.0]]));
        let rec = s.single().unwrap();
        assert_eq!(rec.kind(), MeasurementKind::SingleTrace);
        assert_eq!(trace_of(&rec), &[-3.0, -4.0, -5.0]);
    }

    #[test]
    fn test_yfactor_recovers_receiver_temperature() {
        let sim = SimulatedAnalyzer::new(16).receiver_temp(150.0).jitter(0.0);
        let mut s = session(sim);
        let plan = YFactorPlan {
            t_hot: 295.0,
            t_cold: 77.0,
            enr_db: None,
            n_avg: 3,
        };
        let rec = s
            .yfactor(&plan, |_| panic!("simulator switches its own loads"))
            .unwrap();
        assert_eq!(rec.kind(), MeasurementKind::YfactorNoiseTemperature);
        match rec.data() {
            RecordData::YFactor { result, .. } => {
                assert_eq!(result.len(), 16);
                assert!((result.t_sys_summary.mean - 150.0).abs() < 1e-6);
                assert_eq!(result.hot_averages, 3);
            }
            other => panic!("not a y-factor: {other:?}"),
        }
        assert_eq!(s.into_port().sweeps(), 6);
    }

    #[test]
    fn test_yfactor_with_other_load_temps() {
        let sim = SimulatedAnalyzer::new(4)
            .receiver_temp(60.0)
            .load_temps(400.0, 20.0)
            .jitter(0.0);
        let mut s = session(sim);
        let plan = YFactorPlan {
            t_hot: 400.0,
            t_cold: 20.0,
            enr_db: None,
            n_avg: 1,
        };
        let rec = s.yfactor(&plan, |_| Ok(())).unwrap();
        match rec.data() {
            RecordData::YFactor { result, .. } => {
                assert!((result.t_sys_summary.mean - 60.0).abs() < 1e-6);
                assert!(result.degenerate_bins().is_empty());
            }
            other => panic!("not a y-factor: {other:?}"),
        }
    }

    #[test]
    fn test_yfactor_manual_swap() {
        let mut s = session(ScriptedPort::with(vec![vec![10.0], vec![0.0]]));
        let mut asked = vec![];
        let plan = YFactorPlan {
            t_hot: 295.0,
            t_cold: 77.0,
            enr_db: Some(15.0),
            n_avg: 1,
        };
        let rec = s
            .yfactor(&plan, |load| {
                asked.push(load);
                Ok(())
            })
            .unwrap();
        assert_eq!(asked, vec![NoiseLoad::Hot, NoiseLoad::Cold]);
        assert_eq!(rec.kind(), MeasurementKind::YfactorNoiseFigure);
        match rec.data() {
            RecordData::YFactor { result, .. } => {
                assert!((result.t_sys[0] + 52.777_777_8).abs() < 1e-4)
            }
            other => panic!("not a y-factor: {other:?}"),
        }
    }

    #[test]
    fn test_yfactor_cold_failure_names_cold() {
        let mut s = session(ScriptedPort::with(vec![vec![10.0]]));
        let plan = YFactorPlan {
            t_hot: 295.0,
            t_cold: 77.0,
            enr_db: None,
            n_avg: 1,
        };
        match s.yfactor(&plan, |_| Ok(())) {
            Err(PipelineError::Acquisition { stage, index, .. }) => {
                assert_eq!(stage, Stage::Cold);
                assert_eq!(index, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_waterfall_runs_to_limit() {
        let sweeps = (0..6).map(|i| vec![i as f64, -(i as f64)]).collect();
        let mut s = session(ScriptedPort::with(sweeps));
        let (tx, rx) = frame_channel();
        let plan = WaterfallPlan {
            depth: 3,
            interval: Duration::from_millis(1),
            max_traces: Some(5),
        };
        let rec = s.waterfall(&plan, Some(&tx)).unwrap();
        assert_eq!(rec.metadata().n_traces, Some(3));
        match rec.data() {
            RecordData::Waterfall(snap) => {
                assert_eq!(snap.as_slice(), &[2.0, -2.0, 3.0, -3.0, 4.0, -4.0]);
            }
            other => panic!("not a waterfall: {other:?}"),
        }
        let first = rx.try_recv().unwrap();
        assert!(matches!(first.data, FrameData::Waterfall(_)));
        assert!(first.title.starts_with("Live Spectrum Waterfall"));
    }

    #[test]
    fn test_waterfall_stops_when_cancelled() {
        let mut s = session(ScriptedPort::with(vec![vec![1.0]; 2]));
        s.cancel.cancel();
        let plan = WaterfallPlan {
            depth: 4,
            interval: Duration::from_millis(1),
            max_traces: None,
        };
        let rec = s.waterfall(&plan, None).unwrap();
        match rec.data() {
            RecordData::Waterfall(snap) => {
                assert_eq!(snap.as_slice(), &[0.0, 0.0, 0.0, 1.0]);
            }
            other => panic!("not a waterfall: {other:?}"),
        }
    }

    #[test]
    fn test_cancel_during_average() {
        let cancel = CancelToken::new();
        let mut port = ScriptedPort::with(vec![vec![0.0]; 8]);
        port.cancel_during = Some((3, cancel.clone()));
        let settings = SweepSettings::new("100Hz", "200Hz", "1Hz", None, None, None).unwrap();
        let mut s = Session::open(port, settings, cancel).unwrap();
        assert!(matches!(
            s.averaged(8),
            Err(PipelineError::Cancelled { completed: 3 })
        ));
        assert_eq!(s.into_port().sweeps.len(), 5);
    }

    #[test]
    fn test_waterfall_cancelled_mid_run() {
        let cancel = CancelToken::new();
        let mut port = ScriptedPort::with((1..=8).map(|i| vec![i as f64]).collect());
        port.cancel_during = Some((3, cancel.clone()));
        let settings = SweepSettings::new("100Hz", "200Hz", "1Hz", None, None, None).unwrap();
        let mut s = Session::open(port, settings, cancel).unwrap();
        let plan = WaterfallPlan {
            depth: 4,
            interval: Duration::from_millis(1),
            max_traces: None,
        };
        let rec = s.waterfall(&plan, None).unwrap();
        match rec.data() {
            RecordData::Waterfall(snap) => {
                // Newest row last, and it is the sweep that was in flight
                assert_eq!(snap.as_slice(), &[0.0, 1.0, 2.0, 3.0]);
                assert_eq!(snap.row(3), &[3.0]);
            }
            other => panic!("not a waterfall: {other:?}"),
        }
        assert_eq!(s.into_port().sweeps.len(), 5);
    }

    #[test]
    fn test_yfactor_rejects_bad_plan_before_sweeping() {
        let bad = [
            YFactorPlan {
                t_hot: -5.0,
                t_cold: 77.0,
                enr_db: None,
                n_avg: 2,
            },
            YFactorPlan {
                t_hot: 295.0,
                t_cold: f64::NAN,
                enr_db: None,
                n_avg: 2,
            },
        ];
        for plan in bad {
            let mut s = session(SimulatedAnalyzer::new(4));
            assert!(matches!(
                s.yfactor(&plan, |_| Ok(())),
                Err(PipelineError::InvalidTemperature(_))
            ));
            assert_eq!(s.into_port().sweeps(), 0);
        }
        let plan = YFactorPlan {
            t_hot: 295.0,
            t_cold: 77.0,
            enr_db: None,
            n_avg: 0,
        };
        let mut s = session(SimulatedAnalyzer::new(4));
        assert!(matches!(
            s.yfactor(&plan, |_| panic!("no load switch expected")),
            Err(PipelineError::NoTraces)
        ));
        assert_eq!(s.into_port().sweeps(), 0);
    }

    #[test]
    fn test_waterfall_aborts_on_failure() {
        let mut s = session(ScriptedPort::with(vec![vec![1.0]; 2]));
        let plan = WaterfallPlan {
            depth: 4,
            interval: Duration::from_millis(1),
            max_traces: None,
        };
        assert!(matches!(
            s.waterfall(&plan, None),
            Err(PipelineError::Acquisition {
                stage: Stage::Waterfall,
                index: 3,
                ..
            })
        ));
    }
}
