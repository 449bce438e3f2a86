//! In this module, we implement the hand-off to whatever draws the measurements.
//! The pipeline pushes copies of its data into a bounded channel and never
//! waits on the other end: if the renderer is behind, frames get dropped.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{info, trace};

use crate::{
    config::SweepSettings,
    record::{MeasurementKind, MeasurementRecord, RecordData},
    waterfall::WaterfallSnapshot,
    yfactor::Summary,
    FrequencyAxis, Trace,
};

/// How many frames may queue up for the renderer before new ones are dropped
pub const FRAME_BACKLOG: usize = 4;

/// Display-only strings shown alongside a plot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFields {
    pub preamp: String,
    pub attenuation: String,
    /// `Averages: n` or `Traces: n`, when there's a count worth showing
    pub count: Option<String>,
}

impl DisplayFields {
    pub fn new(preamp: Option<bool>, attenuation_db: Option<f64>, count: Option<String>) -> Self {
        let preamp = match preamp {
            Some(true) => "Preamp: ON".to_owned(),
            Some(false) => "Preamp: OFF".to_owned(),
            None => "Preamp: N/A".to_owned(),
        };
        let attenuation = match attenuation_db {
            Some(att) => format!("Att: {att:?} dB"),
            None => "Att: N/A".to_owned(),
        };
        Self {
            preamp,
            attenuation,
            count,
        }
    }

    pub fn traces(settings: &SweepSettings, n_traces: usize) -> Self {
        Self::new(
            settings.preamp,
            settings.attenuation_db,
            Some(format!("Traces: {n_traces}")),
        )
    }

    /// `Preamp: ON, Att: 10.0 dB, Averages: 4`
    pub fn joined(&self) -> String {
        let mut parts = vec![self.preamp.as_str(), self.attenuation.as_str()];
        if let Some(count) = &self.count {
            parts.push(count);
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Trace(Trace),
    Waterfall(WaterfallSnapshot),
    YFactor {
        hot: Trace,
        cold: Trace,
        y: Vec<f64>,
        t_sys: Vec<f64>,
        t_sys_summary: Summary,
    },
}

/// Everything a renderer needs for one redraw. Owns its data.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub title: String,
    pub axis: Arc<FrequencyAxis>,
    pub data: FrameData,
    pub fields: DisplayFields,
}

impl DisplayFrame {
    pub fn trace(axis: Arc<FrequencyAxis>, trace: Trace, fields: DisplayFields) -> Self {
        Self {
            title: format!("Spectrum Trace ({})", fields.joined()),
            axis,
            data: FrameData::Trace(trace),
            fields,
        }
    }

    pub fn waterfall(snapshot: WaterfallSnapshot, fields: DisplayFields) -> Self {
        Self {
            title: format!("Live Spectrum Waterfall ({})", fields.joined()),
            axis: snapshot.axis().clone(),
            data: FrameData::Waterfall(snapshot),
            fields,
        }
    }

    /// Copy a finished record into a frame
    pub fn from_record(record: &MeasurementRecord) -> Self {
        let meta = record.metadata();
        let axis = record.axis().clone();
        match record.data() {
            RecordData::Trace(trace) => {
                let n = (meta.measurement_type == MeasurementKind::AveragedTrace)
                    .then_some(meta.n_avg);
                let fields = DisplayFields::new(
                    meta.preamp,
                    meta.attenuation,
                    n.map(|n| format!("Averages: {n}")),
                );
                Self::trace(axis, trace.clone(), fields)
            }
            RecordData::Waterfall(snapshot) => {
                let fields = DisplayFields::new(
                    meta.preamp,
                    meta.attenuation,
                    Some(format!("Traces: {}", snapshot.rows())),
                );
                Self::waterfall(snapshot.clone(), fields)
            }
            RecordData::YFactor { hot, cold, result } => {
                let fields = DisplayFields::new(meta.preamp, meta.attenuation, None);
                Self {
                    title: format!(
                        "Y-Factor Noise Temperature Measurement ({})",
                        fields.joined()
                    ),
                    axis,
                    data: FrameData::YFactor {
                        hot: hot.clone(),
                        cold: cold.clone(),
                        y: result.y.clone(),
                        t_sys: result.t_sys.clone(),
                        t_sys_summary: result.t_sys_summary,
                    },
                    fields,
                }
            }
        }
    }

    /// A record read back from disk, titled `Loaded <kind> (...)`
    pub fn loaded(record: &MeasurementRecord) -> Self {
        let meta = record.metadata();
        let count = match record.data() {
            RecordData::Waterfall(snapshot) => Some(format!("Traces: {}", snapshot.rows())),
            _ => (meta.n_avg > 1).then(|| format!("Avg: {}", meta.n_avg)),
        };
        let mut details = vec![];
        if let Some(preamp) = meta.preamp {
            details.push(format!("Preamp: {}", if preamp { "ON" } else { "OFF" }));
        }
        if let Some(att) = meta.attenuation {
            details.push(format!("Att: {att:?} dB"));
        }
        details.extend(count);

        let mut frame = Self::from_record(record);
        frame.title = if details.is_empty() {
            format!("Loaded {}", meta.measurement_type)
        } else {
            format!("Loaded {} ({})", meta.measurement_type, details.join(", "))
        };
        frame
    }
}

pub fn frame_channel() -> (Sender<DisplayFrame>, Receiver<DisplayFrame>) {
    crossbeam_channel::bounded(FRAME_BACKLOG)
}

/// Offer a frame to the renderer without blocking. Returns whether it was taken.
pub fn publish(sender: &Sender<DisplayFrame>, frame: DisplayFrame) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            trace!("Renderer busy, dropping frame");
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Renderer stand-in: log a one-line summary of every frame until the senders go away
pub fn log_frames(receiver: Receiver<DisplayFrame>) {
    for frame in receiver {
        let lo = frame.axis.start().unwrap_or_default() / 1e6;
        let hi = frame.axis.stop().unwrap_or_default() / 1e6;
        match &frame.data {
            FrameData::Trace(trace) => {
                if let Some((bin, level)) = trace.peak() {
                    info!(
                        "{} | {lo:.3}-{hi:.3} MHz | peak {level:.2} dBm @ {:.4} MHz",
                        frame.title,
                        frame.axis[bin] / 1e6
                    );
                }
            }
            FrameData::Waterfall(snapshot) => {
                let latest = Trace::new(snapshot.row(snapshot.rows() - 1).to_vec());
                if let (Some((bin, level)), Some((min, max))) =
                    (latest.peak(), snapshot.level_range())
                {
                    info!(
                        "{} | newest peak {level:.2} dBm @ {:.4} MHz | range {min:.1}..{max:.1} dBm",
                        frame.title,
                        frame.axis[bin] / 1e6
                    );
                }
            }
            FrameData::YFactor { t_sys_summary, .. } => {
                info!(
                    "{} | {lo:.3}-{hi:.3} MHz | T_sys {:.1} ± {:.1} K (min {:.1}, max {:.1})",
                    frame.title,
                    t_sys_summary.mean,
                    t_sys_summary.std,
                    t_sys_summary.min,
                    t_sys_summary.max
                );
            }
        }
    }
}
