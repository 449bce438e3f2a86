//! This module contains all the acquisition logic

// One sweep at a time: trigger, block until the instrument says it's done,
// read the amplitudes back. The frequency axis is never queried per bin, it's
// rebuilt from the configured span and the number of samples we got back.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    config::SweepSettings,
    errors::{PipelineError, Result, Stage},
    port::InstrumentPort,
    FrequencyAxis, Trace,
};

pub struct TraceAcquirer<P> {
    port: P,
    settings: SweepSettings,
    axis: Option<Arc<FrequencyAxis>>,
    stage: Stage,
    // 1-based index of the last sweep attempted in the current stage
    index: usize,
}

impl<P: InstrumentPort> TraceAcquirer<P> {
    /// Wrap a port that will be swept with `settings`. Nothing is sent until [`Self::configure`].
    pub fn new(port: P, settings: SweepSettings) -> Self {
        Self {
            port,
            settings,
            axis: None,
            stage: Stage::Single,
            index: 0,
        }
    }

    /// Push the sweep settings to the instrument. Any previously derived axis is dropped.
    pub fn configure(&mut self) -> Result<()> {
        self.axis = None;
        self.port
            .configure(&self.settings)
            .map_err(PipelineError::acquisition(Stage::Configure, 0))?;
        debug!(
            fstart = self.settings.fstart.as_str(),
            fstop = self.settings.fstop.as_str(),
            rbw = self.settings.rbw.as_str(),
            "Instrument configured"
        );
        Ok(())
    }

    pub fn identity(&mut self) -> Result<String> {
        self.port
            .query_identity()
            .map(|id| id.trim().to_owned())
            .map_err(PipelineError::acquisition(Stage::Identify, 0))
    }

    /// Label subsequent acquisitions (for error reports) and restart the trace count
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.index = 0;
    }

    fn sweep(&mut self) -> Result<Vec<f64>> {
        self.index += 1;
        let (stage, index) = (self.stage, self.index);
        self.port
            .trigger_and_wait()
            .map_err(PipelineError::acquisition(stage, index))?;
        let samples = self
            .port
            .read_samples()
            .map_err(PipelineError::acquisition(stage, index))?;
        trace!(%stage, index, bins = samples.len(), "Sweep complete");
        Ok(samples)
    }

    /// Sweep once and return the trace along with its (re)constructed frequency axis
    pub fn acquire(&mut self) -> Result<(Arc<FrequencyAxis>, Trace)> {
        let samples = self.sweep()?;
        let axis = match &self.axis {
            Some(axis) if axis.len() == samples.len() => axis.clone(),
            _ => {
                let axis = Arc::new(FrequencyAxis::linspace(
                    self.settings.fstart.hz(),
                    self.settings.fstop.hz(),
                    samples.len(),
                ));
                self.axis = Some(axis.clone());
                axis
            }
        };
        Ok((axis, Trace::new(samples)))
    }

    /// Sweep once, reusing the axis from the last [`Self::acquire`]
    pub fn acquire_fast(&mut self) -> Result<Trace> {
        let expected = self
            .axis
            .as_ref()
            .map(|a| a.len())
            .ok_or(PipelineError::AxisUnavailable)?;
        let samples = self.sweep()?;
        PipelineError::check_len(expected, samples.len())?;
        Ok(Trace::new(samples))
    }

    pub fn axis(&self) -> Option<&Arc<FrequencyAxis>> {
        self.axis.as_ref()
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }
}
