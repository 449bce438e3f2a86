//! Y-factor noise temperature and noise figure.
//!
//! With the receiver looking at a hot load and then a cold load,
//!
//! ```text
//! Y     = P_hot / P_cold                      (linear power)
//! T_sys = (T_hot - Y * T_cold) / (Y - 1)
//! NF    = ENR / (Y - 1)                       (linear, when the source ENR is known)
//! ```
//!
//! Nothing here papers over bad bins. A bin with `Y == 1` divides by zero and
//! comes out as `±inf`/`NaN`; a cold load hotter than the receiver makes `T_sys`
//! negative. Those values are part of the result, and [`YFactorResult::degenerate_bins`]
//! points at them.

use tracing::warn;

use crate::{
    average::{AveragedTrace, AveragingDomain},
    db_to_ratio, dbm_to_mw,
    errors::{PipelineError, Result},
    ratio_to_db,
};

/// Mean, population standard deviation, min and max over all bins.
///
/// A single NaN anywhere makes every field NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() || values.iter().any(|v| v.is_nan()) {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Why a bin's result can't be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    /// Hot and cold read the same power, `T_sys` divided by zero
    UnityGain,
    /// `T_sys` came out non-finite for another reason (e.g. a zero cold reading)
    NonFinite,
    NegativeTemperature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseFigure {
    pub enr_db: f64,
    pub linear: Vec<f64>,
    pub db: Vec<f64>,
    pub summary_db: Summary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YFactorResult {
    pub t_hot: f64,
    pub t_cold: f64,
    /// Hot/cold linear power ratio per bin
    pub y: Vec<f64>,
    /// System noise temperature per bin, kelvin
    pub t_sys: Vec<f64>,
    pub noise_figure: Option<NoiseFigure>,
    pub y_summary: Summary,
    pub t_sys_summary: Summary,
    pub hot_averages: usize,
    pub cold_averages: usize,
}

impl YFactorResult {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Every bin whose temperature is infinite, NaN or negative
    pub fn degenerate_bins(&self) -> Vec<(usize, Degeneracy)> {
        self.y
            .iter()
            .zip(&self.t_sys)
            .enumerate()
            .filter_map(|(i, (&y, &t))| {
                if y == 1.0 {
                    Some((i, Degeneracy::UnityGain))
                } else if !t.is_finite() {
                    Some((i, Degeneracy::NonFinite))
                } else if t < 0.0 {
                    Some((i, Degeneracy::NegativeTemperature))
                } else {
                    None
                }
            })
            .collect()
    }
}

pub(crate) fn check_temperature(kelvin: f64) -> Result<()> {
    if kelvin.is_finite() && kelvin > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidTemperature(kelvin))
    }
}

/// Estimate system noise temperature (and noise figure when `enr_db` is given)
/// from hot and cold load traces of the same sweep
pub fn estimate(
    hot: &AveragedTrace,
    cold: &AveragedTrace,
    t_hot: f64,
    t_cold: f64,
    enr_db: Option<f64>,
) -> Result<YFactorResult> {
    check_temperature(t_hot)?;
    check_temperature(t_cold)?;
    PipelineError::check_len(hot.len(), cold.len())?;
    if t_hot <= t_cold {
        warn!(t_hot, t_cold, "Hot load is not hotter than the cold load");
    }
    for avg in [hot, cold] {
        if avg.domain() == AveragingDomain::Dbm && avg.sample_count() > 1 {
            warn!("Y-factor fed a dBm-domain average, power ratios will be biased");
        }
    }

    let y: Vec<f64> = hot
        .trace()
        .as_slice()
        .iter()
        .zip(cold.trace().as_slice())
        .map(|(&h, &c)| dbm_to_mw(h) / dbm_to_mw(c))
        .collect();
    let t_sys: Vec<f64> = y
        .iter()
        .map(|&y| (t_hot - y * t_cold) / (y - 1.0))
        .collect();
    let noise_figure = enr_db.map(|enr_db| {
        let enr = db_to_ratio(enr_db);
        let linear: Vec<f64> = y.iter().map(|&y| enr / (y - 1.0)).collect();
        let db: Vec<f64> = linear.iter().map(|&nf| ratio_to_db(nf)).collect();
        NoiseFigure {
            enr_db,
            summary_db: Summary::of(&db),
            linear,
            db,
        }
    });

    let result = YFactorResult {
        t_hot,
        t_cold,
        y_summary: Summary::of(&y),
        t_sys_summary: Summary::of(&t_sys),
        y,
        t_sys,
        noise_figure,
        hot_averages: hot.sample_count(),
        cold_averages: cold.sample_count(),
    };
    let bad = result.degenerate_bins();
    if !bad.is_empty() {
        warn!(
            bins = bad.len(),
            first = bad[0].0,
            "Y-factor result has degenerate bins"
        );
    }
    Ok(result)
}
