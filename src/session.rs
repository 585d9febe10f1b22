use crate::deviation::{
    absolute_deviation, absolute_deviation_max, relative_deviation_sum_percent, CompareDistance,
};
use crate::drill::DrillRef;
use crate::shot::Shot;
use crate::units::{Length, LengthUnit};
use crate::util::{mean, std_dev};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_NAME_FORMAT: &str = "%y%m%d_%H%M%S";

/// A finished drill. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub player_id: Option<Uuid>,
    pub drill: DrillRef,
    pub shots: Vec<Shot>,
    pub created_at: DateTime<Local>,
}

impl Session {
    pub fn new(player_id: Option<Uuid>, drill: DrillRef, shots: Vec<Shot>) -> Self {
        let created_at = Local::now();
        Self {
            id: Uuid::new_v4(),
            name: created_at.format(SESSION_NAME_FORMAT).to_string(),
            player_id,
            drill,
            shots,
            created_at,
        }
    }

    /// Deviation summary in the drill's own comparison mode and unit
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_shots(&self.shots, self.drill.compare, self.drill.unit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub shots: usize,
    pub mean_absolute_deviation: Length,
    pub max_absolute_deviation: Length,
    pub std_dev_absolute_deviation: Length,
    pub relative_deviation_sum_percent: f64,
}

impl SessionSummary {
    pub fn from_shots(shots: &[Shot], compare: CompareDistance, unit: LengthUnit) -> Self {
        let deviations: Vec<Length> = shots.iter().map(|s| absolute_deviation(s, compare)).collect();

        Self {
            shots: shots.len(),
            mean_absolute_deviation: mean(&deviations, unit).unwrap_or(Length::zero(unit)),
            max_absolute_deviation: absolute_deviation_max(shots, compare, unit),
            std_dev_absolute_deviation: std_dev(&deviations, unit).unwrap_or(Length::zero(unit)),
            relative_deviation_sum_percent: relative_deviation_sum_percent(shots, compare),
        }
    }
}
