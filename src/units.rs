use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

const METERS_PER_YARD: f64 = 0.9144;
const METERS_PER_FOOT: f64 = 0.3048;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    #[strum(serialize = "m")]
    Meters,
    #[strum(serialize = "yd")]
    Yards,
    #[strum(serialize = "ft")]
    Feet,
}

impl LengthUnit {
    /// Long lowercase name, as used in config files and the database
    pub fn name(self) -> &'static str {
        match self {
            LengthUnit::Meters => "meters",
            LengthUnit::Yards => "yards",
            LengthUnit::Feet => "feet",
        }
    }

    fn meters_per_unit(self) -> f64 {
        match self {
            LengthUnit::Meters => 1.0,
            LengthUnit::Yards => METERS_PER_YARD,
            LengthUnit::Feet => METERS_PER_FOOT,
        }
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "meters" => Ok(LengthUnit::Meters),
            "yd" | "yard" | "yards" => Ok(LengthUnit::Yards),
            "ft" | "foot" | "feet" => Ok(LengthUnit::Feet),
            other => Err(format!("unknown length unit '{other}'")),
        }
    }
}

/// A distance that always carries its unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn meters(value: f64) -> Self {
        Self::new(value, LengthUnit::Meters)
    }

    pub fn yards(value: f64) -> Self {
        Self::new(value, LengthUnit::Yards)
    }

    pub fn zero(unit: LengthUnit) -> Self {
        Self::new(0.0, unit)
    }

    pub fn as_meters(&self) -> f64 {
        self.value * self.unit.meters_per_unit()
    }

    /// Same physical length expressed in `unit`
    pub fn to(&self, unit: LengthUnit) -> Self {
        if unit == self.unit {
            return *self;
        }
        Self::new(self.as_meters() / unit.meters_per_unit(), unit)
    }

    pub fn abs(&self) -> Self {
        Self::new(self.value.abs(), self.unit)
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

impl Add for Length {
    type Output = Length;

    fn add(self, rhs: Length) -> Length {
        Length::new(self.value + rhs.to(self.unit).value, self.unit)
    }
}

impl Sub for Length {
    type Output = Length;

    fn sub(self, rhs: Length) -> Length {
        Length::new(self.value - rhs.to(self.unit).value, self.unit)
    }
}

impl PartialEq for Length {
    fn eq(&self, other: &Self) -> bool {
        (self.as_meters() - other.as_meters()).abs() < 1e-9
    }
}

impl PartialOrd for Length {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        self.as_meters().partial_cmp(&other.as_meters())
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} {}", self.value, self.unit)
    }
}
