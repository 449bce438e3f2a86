//! Finished measurements, as handed to persistence and rendering

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    average::AveragedTrace, config::SweepSettings, waterfall::WaterfallSnapshot,
    yfactor::YFactorResult, FrequencyAxis, Trace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    SingleTrace,
    AveragedTrace,
    Waterfall,
    YfactorNoiseTemperature,
    YfactorNoiseFigure,
}

/// Local time at seconds resolution, with `:` swapped for `-` so it's safe in file names
pub fn file_timestamp(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Provenance of a measurement, fixed at the moment it's finalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMetadata {
    pub instrument: String,
    pub freq_start: String,
    pub freq_stop: String,
    pub rbw: String,
    pub preamp: Option<bool>,
    pub attenuation: Option<f64>,
    pub measurement_type: MeasurementKind,
    pub n_avg: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_traces: Option<usize>,
    pub timestamp: String,
    /// Kind-specific fields that don't have a slot of their own
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl MeasurementMetadata {
    fn new(
        instrument: &str,
        settings: &SweepSettings,
        kind: MeasurementKind,
        n_avg: usize,
        at: &DateTime<Local>,
    ) -> Self {
        Self {
            instrument: instrument.to_owned(),
            freq_start: settings.fstart.as_str().to_owned(),
            freq_stop: settings.fstop.as_str().to_owned(),
            rbw: settings.rbw.as_str().to_owned(),
            preamp: settings.preamp,
            attenuation: settings.attenuation_db,
            measurement_type: kind,
            n_avg,
            n_traces: None,
            timestamp: file_timestamp(at),
            extra: BTreeMap::new(),
        }
    }
}

impl fmt::Display for MeasurementKind {
    /// `single_trace` as `Single Trace`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeasurementKind::SingleTrace => "Single Trace",
            MeasurementKind::AveragedTrace => "Averaged Trace",
            MeasurementKind::Waterfall => "Waterfall",
            MeasurementKind::YfactorNoiseTemperature => "Yfactor Noise Temperature",
            MeasurementKind::YfactorNoiseFigure => "Yfactor Noise Figure",
        })
    }
}

impl MeasurementMetadata {
    /// Human readable listing, the fixed fields first and then every extra
    pub fn summary_lines(&self) -> Vec<String> {
        let or_na = |v: Option<String>| v.unwrap_or_else(|| "N/A".to_owned());
        let mut lines = vec![
            format!("Instrument: {}", self.instrument),
            format!("Measurement Type: {}", self.measurement_type),
            format!("Frequency Range: {} to {}", self.freq_start, self.freq_stop),
            format!("Resolution Bandwidth: {}", self.rbw),
            format!(
                "Preamp: {}",
                or_na(self.preamp.map(|p| if p { "ON" } else { "OFF" }.to_owned()))
            ),
            format!(
                "Attenuation: {} dB",
                or_na(self.attenuation.map(|a| format!("{a:?}")))
            ),
            format!("Number of Averages: {}", self.n_avg),
        ];
        if let Some(n) = self.n_traces {
            lines.push(format!("Waterfall Traces: {n}"));
        }
        lines.push(format!("Timestamp: {}", self.timestamp));
        lines.extend(self.extra.iter().map(|(k, v)| format!("  {k}: {v}")));
        lines
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Trace(Trace),
    Waterfall(WaterfallSnapshot),
    YFactor {
        hot: Trace,
        cold: Trace,
        result: YFactorResult,
    },
}

/// Axis, data and metadata of one measurement. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    axis: Arc<FrequencyAxis>,
    data: RecordData,
    metadata: MeasurementMetadata,
}

impl MeasurementRecord {
    /// A single or averaged trace. Averages of one are recorded as `single_trace`.
    pub fn trace(
        instrument: &str,
        settings: &SweepSettings,
        axis: Arc<FrequencyAxis>,
        trace: AveragedTrace,
    ) -> Self {
        let n = trace.sample_count();
        let kind = if n > 1 {
            MeasurementKind::AveragedTrace
        } else {
            MeasurementKind::SingleTrace
        };
        let mut metadata = MeasurementMetadata::new(instrument, settings, kind, n, &Local::now());
        if n > 1 {
            metadata
                .extra
                .insert("averaging_domain".to_owned(), trace.domain().to_string());
        }
        Self {
            axis,
            data: RecordData::Trace(trace.into_trace()),
            metadata,
        }
    }

    pub fn waterfall(instrument: &str, settings: &SweepSettings, snapshot: WaterfallSnapshot) -> Self {
        let mut metadata = MeasurementMetadata::new(
            instrument,
            settings,
            MeasurementKind::Waterfall,
            1,
            &Local::now(),
        );
        metadata.n_traces = Some(snapshot.rows());
        Self {
            axis: snapshot.axis().clone(),
            data: RecordData::Waterfall(snapshot),
            metadata,
        }
    }

    pub fn yfactor(
        instrument: &str,
        settings: &SweepSettings,
        axis: Arc<FrequencyAxis>,
        hot: AveragedTrace,
        cold: AveragedTrace,
        result: YFactorResult,
    ) -> Self {
        let kind = if result.noise_figure.is_some() {
            MeasurementKind::YfactorNoiseFigure
        } else {
            MeasurementKind::YfactorNoiseTemperature
        };
        let mut metadata =
            MeasurementMetadata::new(instrument, settings, kind, hot.sample_count(), &Local::now());
        let mut put = |k: &str, v: f64| {
            metadata.extra.insert(k.to_owned(), v.to_string());
        };
        put("t_hot_kelvin", result.t_hot);
        put("t_cold_kelvin", result.t_cold);
        put("mean_yfactor", result.y_summary.mean);
        put("std_yfactor", result.y_summary.std);
        put("mean_tsys_kelvin", result.t_sys_summary.mean);
        put("std_tsys_kelvin", result.t_sys_summary.std);
        put("min_tsys_kelvin", result.t_sys_summary.min);
        put("max_tsys_kelvin", result.t_sys_summary.max);
        if let Some(nf) = &result.noise_figure {
            put("enr_db", nf.enr_db);
            put("mean_nf_db", nf.summary_db.mean);
            put("std_nf_db", nf.summary_db.std);
            put("min_nf_db", nf.summary_db.min);
            put("max_nf_db", nf.summary_db.max);
        }
        metadata
            .extra
            .insert("n_avg_cold".to_owned(), cold.sample_count().to_string());
        Self {
            axis,
            data: RecordData::YFactor {
                hot: hot.into_trace(),
                cold: cold.into_trace(),
                result,
            },
            metadata,
        }
    }

    /// Reassemble a record read back from disk
    pub(crate) fn from_parts(
        axis: Arc<FrequencyAxis>,
        data: RecordData,
        metadata: MeasurementMetadata,
    ) -> Self {
        Self {
            axis,
            data,
            metadata,
        }
    }

    pub fn axis(&self) -> &Arc<FrequencyAxis> {
        &self.axis
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn metadata(&self) -> &MeasurementMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> MeasurementKind {
        self.metadata.measurement_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        average::{accumulate, AveragingDomain},
        waterfall::WaterfallBuffer,
        yfactor::estimate,
    };
    use chrono::TimeZone;

    fn settings() -> SweepSettings {
        SweepSettings::new("375MHz", "500MHz", "10kHz", Some(false), Some(10.0), Some(4)).unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        let t = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(file_timestamp(&t), "2024-03-09T07-05-01");
    }

    #[test]
    fn test_kind_follows_average_count() {
        let axis = Arc::new(FrequencyAxis::linspace(0.0, 1.0, 2));
        let t = Trace::new(vec![-1.0, -2.0]);
        let single = accumulate([&t], AveragingDomain::Dbm).unwrap();
        let rec = MeasurementRecord::trace("SA", &settings(), axis.clone(), single);
        assert_eq!(rec.kind(), MeasurementKind::SingleTrace);
        assert_eq!(rec.metadata().n_avg, 1);
        assert!(rec.metadata().extra.is_empty());

        let avg = accumulate([&t, &t, &t], AveragingDomain::Dbm).unwrap();
        let rec = MeasurementRecord::trace("SA", &settings(), axis, avg);
        assert_eq!(rec.kind(), MeasurementKind::AveragedTrace);
        assert_eq!(rec.metadata().n_avg, 3);
        assert_eq!(rec.metadata().extra["averaging_domain"], "dBm");
        assert_eq!(rec.metadata().freq_start, "375MHz");
        assert_eq!(rec.metadata().attenuation, Some(10.0));
    }

    #[test]
    fn test_waterfall_records_depth() {
        let axis = Arc::new(FrequencyAxis::linspace(0.0, 1.0, 3));
        let wf = WaterfallBuffer::new(7, axis).unwrap();
        let rec = MeasurementRecord::waterfall("SA", &settings(), wf.snapshot());
        assert_eq!(rec.metadata().n_traces, Some(7));
        assert_eq!(rec.metadata().n_avg, 1);
    }

    #[test]
    fn test_yfactor_metadata() {
        let axis = Arc::new(FrequencyAxis::linspace(0.0, 1.0, 1));
        let hot = AveragedTrace::single(Trace::new(vec![10.0]), AveragingDomain::Linear);
        let cold = AveragedTrace::single(Trace::new(vec![0.0]), AveragingDomain::Linear);
        let res = estimate(&hot, &cold, 295.0, 77.0, Some(15.0)).unwrap();
        let rec = MeasurementRecord::yfactor("SA", &settings(), axis, hot, cold, res);
        assert_eq!(rec.kind(), MeasurementKind::YfactorNoiseFigure);
        let extra = &rec.metadata().extra;
        assert_eq!(extra["t_hot_kelvin"], "295");
        assert_eq!(extra["enr_db"], "15");
        assert!(extra.contains_key("mean_tsys_kelvin"));
    }

    #[test]
    fn test_summary_lines() {
        let axis = Arc::new(FrequencyAxis::linspace(0.0, 1.0, 2));
        let t = Trace::new(vec![-1.0, -2.0]);
        let avg = accumulate([&t, &t], AveragingDomain::Dbm).unwrap();
        let rec = MeasurementRecord::trace("ACME,SA", &settings(), axis, avg);
        let lines = rec.metadata().summary_lines();
        assert_eq!(lines[0], "Instrument: ACME,SA");
        assert_eq!(lines[1], "Measurement Type: Averaged Trace");
        assert_eq!(lines[2], "Frequency Range: 375MHz to 500MHz");
        assert_eq!(lines[4], "Preamp: OFF");
        assert_eq!(lines[5], "Attenuation: 10.0 dB");
        assert_eq!(lines[6], "Number of Averages: 2");
        assert!(lines[7].starts_with("Timestamp: "));
        assert_eq!(lines[8], "  averaging_domain: dBm");
    }

    #[test]
    fn test_metadata_json_shape() {
        let axis = Arc::new(FrequencyAxis::linspace(0.0, 1.0, 1));
        let t = AveragedTrace::single(Trace::new(vec![0.0]), AveragingDomain::Dbm);
        let rec = MeasurementRecord::trace("ACME", &settings(), axis, t);
        let json = serde_json::to_value(rec.metadata()).unwrap();
        assert_eq!(json["measurement_type"], "single_trace");
        assert_eq!(json["preamp"], false);
        assert!(json.get("n_traces").is_none());
        let back: MeasurementMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(&back, rec.metadata());
    }
}
