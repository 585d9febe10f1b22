use crate::shot::Shot;
use crate::units::{Length, LengthUnit};
use serde::{Deserialize, Serialize};

/// Which measured distance is scored against the target
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum CompareDistance {
    #[default]
    Carry,
    Total,
}

fn measured(shot: &Shot, compare: CompareDistance) -> Length {
    match compare {
        CompareDistance::Carry => shot.carry_distance,
        CompareDistance::Total => shot.total_distance,
    }
}

/// `|measured - target|`, expressed in the target's unit
pub fn absolute_deviation(shot: &Shot, compare: CompareDistance) -> Length {
    let target = shot.target_distance;
    (measured(shot, compare).to(target.unit) - target).abs()
}

/// Absolute deviation as a fraction of the target; `None` for a zero target
pub fn relative_deviation(shot: &Shot, compare: CompareDistance) -> Option<f64> {
    let target = shot.target_distance;
    if target.is_zero() {
        return None;
    }
    Some(absolute_deviation(shot, compare).value / target.value.abs())
}

pub fn absolute_deviation_sum(shots: &[Shot], compare: CompareDistance, unit: LengthUnit) -> Length {
    shots
        .iter()
        .map(|s| absolute_deviation(s, compare))
        .fold(Length::zero(unit), |acc, d| acc + d)
}

/// Largest absolute deviation. A zero result on an empty slice means "no data yet".
pub fn absolute_deviation_max(shots: &[Shot], compare: CompareDistance, unit: LengthUnit) -> Length {
    shots
        .iter()
        .map(|s| absolute_deviation(s, compare).to(unit))
        .fold(Length::zero(unit), |acc, d| if d > acc { d } else { acc })
}

/// Sum of relative deviations in percent, zero-target shots skipped
pub fn relative_deviation_sum_percent(shots: &[Shot], compare: CompareDistance) -> f64 {
    shots
        .iter()
        .filter_map(|s| relative_deviation(s, compare))
        .sum::<f64>()
        * 100.0
}
