use crate::error::ShotError;
use crate::units::{Length, LengthUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a raw record came from; decides field names and units
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum RecordFormat {
    /// Flat row of the device's last-shot CSV, distances in meters
    LatestShotCsv,
    /// Entry of a session log's `Shots` array, nested keys flattened with `.`
    SessionLog,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(f64),
}

impl RawValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    fn as_shot_id(&self) -> Option<u64> {
        match self {
            // `as` saturates, so ids past u64 range would collide
            RawValue::Number(n)
                if n.is_finite() && *n >= 1.0 && *n < u64::MAX as f64 && n.fract() == 0.0 =>
            {
                Some(*n as u64)
            }
            RawValue::Number(_) => None,
            RawValue::Text(s) => s.trim().parse::<u64>().ok().filter(|id| *id > 0),
        }
    }
}

/// One shot as delivered by the device, field names and units untouched
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub format: RecordFormat,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(format: RecordFormat) -> Self {
        Self {
            format,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: RawValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Pairs a CSV header row with one data row
    pub fn from_csv_row<'a>(
        headers: impl IntoIterator<Item = &'a str>,
        row: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let fields = headers
            .into_iter()
            .zip(row)
            .map(|(k, v)| (k.trim().to_string(), RawValue::Text(v.trim().to_string())))
            .collect();
        Self {
            format: RecordFormat::LatestShotCsv,
            fields,
        }
    }

    /// Flattens one session-log entry; nested objects become `Parent.Child` keys
    pub fn from_log_entry(entry: &serde_json::Value) -> Self {
        let mut record = Self::new(RecordFormat::SessionLog);
        flatten_into(&mut record.fields, "", entry);
        record
    }

    /// Device id, if present and valid
    pub fn shot_id(&self) -> Option<u64> {
        id_keys(self.format)
            .iter()
            .find_map(|k| self.fields.get(*k))
            .and_then(RawValue::as_shot_id)
    }
}

fn flatten_into(fields: &mut BTreeMap<String, RawValue>, prefix: &str, value: &serde_json::Value) {
    let key = |k: &str| {
        if prefix.is_empty() {
            k.to_string()
        } else {
            format!("{prefix}.{k}")
        }
    };
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten_into(fields, &key(k), v);
            }
        }
        serde_json::Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                fields.insert(prefix.to_string(), RawValue::Number(n));
            }
        }
        serde_json::Value::String(s) => {
            fields.insert(prefix.to_string(), RawValue::Text(s.clone()));
        }
        // arrays, bools and nulls carry nothing a shot needs
        _ => {}
    }
}

fn id_keys(format: RecordFormat) -> &'static [&'static str] {
    match format {
        RecordFormat::LatestShotCsv => &["shot_id"],
        RecordFormat::SessionLog => &["ShotId", "Id", "shot_id"],
    }
}

#[derive(Clone, Copy)]
enum Quantity {
    Carry,
    Total,
    Offline,
}

/// Candidate keys per quantity, with the unit the device uses for each key.
/// `None` means "take the unit from the record's `Units` field, yards if absent".
fn quantity_keys(
    format: RecordFormat,
    quantity: Quantity,
) -> &'static [(&'static str, Option<LengthUnit>)] {
    match (format, quantity) {
        (RecordFormat::LatestShotCsv, Quantity::Carry) => &[("carry_m", Some(LengthUnit::Meters))],
        (RecordFormat::LatestShotCsv, Quantity::Total) => {
            &[("total_distance_m", Some(LengthUnit::Meters))]
        }
        (RecordFormat::LatestShotCsv, Quantity::Offline) => {
            &[("offline_m", Some(LengthUnit::Meters))]
        }
        (RecordFormat::SessionLog, Quantity::Carry) => &[
            ("BallData.Carry", None),
            ("BallData.CarryDistance", None),
            ("carry_m", Some(LengthUnit::Meters)),
        ],
        (RecordFormat::SessionLog, Quantity::Total) => &[
            ("BallData.TotalDistance", None),
            ("BallData.Total", None),
            ("total_distance_m", Some(LengthUnit::Meters)),
        ],
        (RecordFormat::SessionLog, Quantity::Offline) => &[
            ("BallData.Offline", None),
            ("BallData.Lateral", None),
            ("offline_m", Some(LengthUnit::Meters)),
        ],
    }
}

fn log_units(record: &RawRecord) -> LengthUnit {
    match record.fields.get("Units") {
        Some(RawValue::Text(u)) if u.eq_ignore_ascii_case("meters") || u == "m" => {
            LengthUnit::Meters
        }
        Some(RawValue::Text(u)) if u.eq_ignore_ascii_case("feet") || u == "ft" => LengthUnit::Feet,
        _ => LengthUnit::Yards,
    }
}

fn read_quantity(record: &RawRecord, quantity: Quantity) -> Length {
    for (key, unit) in quantity_keys(record.format, quantity) {
        if let Some(value) = record.fields.get(*key) {
            let unit = unit.unwrap_or_else(|| log_units(record));
            match value.as_f64() {
                Some(v) => return Length::new(v, unit).to(LengthUnit::Meters),
                None => debug!(key = *key, ?value, "non-numeric field, defaulting to zero"),
            }
        }
    }
    Length::zero(LengthUnit::Meters)
}

/// Canonical, unit-consistent shot. Distances are stored in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: u64,
    pub carry_distance: Length,
    pub total_distance: Length,
    /// Positive is right of the target line
    pub lateral_offset: Length,
    pub target_distance: Length,
}

impl Shot {
    /// Builds a canonical shot from a raw record. Only a missing or invalid id fails;
    /// other missing numbers become zero meters.
    pub fn normalize(raw: &RawRecord, target_distance: Length) -> Result<Shot, ShotError> {
        let id = raw.shot_id().ok_or_else(|| {
            let keys = id_keys(raw.format).join("/");
            ShotError::MalformedRecord(format!("{} record without a positive {keys}", raw.format))
        })?;

        Ok(Shot {
            id,
            carry_distance: read_quantity(raw, Quantity::Carry),
            total_distance: read_quantity(raw, Quantity::Total),
            lateral_offset: read_quantity(raw, Quantity::Offline),
            target_distance,
        })
    }
}
