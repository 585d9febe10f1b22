use crate::deviation::CompareDistance;
use crate::distance::DistanceGenerator;
use crate::error::DrillError;
use crate::units::{Length, LengthUnit};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Non-owning reference to the drill a session was played with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillRef {
    pub id: Uuid,
    pub name: String,
    pub number_of_shots: usize,
    pub compare: CompareDistance,
    pub unit: LengthUnit,
}

/// A distance strategy plus the number of shots that completes a session
#[derive(Debug, Clone)]
pub struct DrillConfiguration {
    id: Uuid,
    name: String,
    number_of_shots: usize,
    compare: CompareDistance,
    generator: DistanceGenerator,
}

impl DrillConfiguration {
    pub fn new(
        name: impl Into<String>,
        number_of_shots: usize,
        compare: CompareDistance,
        generator: DistanceGenerator,
    ) -> Result<Self, DrillError> {
        if number_of_shots == 0 {
            return Err(DrillError::InvalidConfiguration(
                "a drill needs at least one shot".into(),
            ));
        }
        if generator.number_of_distances() == 0 {
            return Err(DrillError::InvalidConfiguration(
                "generator has no distances".into(),
            ));
        }
        if let Some(capacity) = generator.capacity() {
            if number_of_shots > capacity {
                return Err(DrillError::InvalidConfiguration(format!(
                    "{number_of_shots} shots requested but the generator only serves {capacity}"
                )));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            number_of_shots,
            compare,
            generator,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number_of_shots(&self) -> usize {
        self.number_of_shots
    }

    pub fn compare(&self) -> CompareDistance {
        self.compare
    }

    pub fn unit(&self) -> LengthUnit {
        self.generator.unit()
    }

    pub fn number_of_distances(&self) -> usize {
        self.generator.number_of_distances()
    }

    pub fn next_distance(&mut self, shot_index: usize) -> Result<Length, DrillError> {
        self.generator.next(shot_index)
    }

    pub fn reset(&mut self) {
        self.generator.reset();
    }

    pub fn summary(&self) -> DrillRef {
        DrillRef {
            id: self.id,
            name: self.name.clone(),
            number_of_shots: self.number_of_shots,
            compare: self.compare,
            unit: self.unit(),
        }
    }
}
