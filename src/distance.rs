use crate::error::DrillError;
use crate::units::{Length, LengthUnit};
use include_dir::{include_dir, Dir};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

static TABLE_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/tables");

/// Upper bound on the distances a fixed range may expand to
pub const MAX_FIXED_DISTANCES: usize = 1000;

/// A named list of target distances shipped with the binary
#[derive(Deserialize, Clone, Debug)]
pub struct DistanceTable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub unit: LengthUnit,
    pub distances: Vec<f64>,
}

impl DistanceTable {
    pub fn load(name: &str) -> Result<Self, DrillError> {
        let file = TABLE_DIR
            .get_file(format!("{name}.json"))
            .ok_or_else(|| DrillError::UnknownTable(name.to_string()))?;
        let contents = file
            .contents_utf8()
            .ok_or_else(|| DrillError::UnknownTable(name.to_string()))?;
        serde_json::from_str(contents)
            .map_err(|e| DrillError::InvalidConfiguration(format!("table '{name}': {e}")))
    }

    pub fn names() -> Vec<String> {
        TABLE_DIR
            .files()
            .filter(|f| f.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|f| f.path().file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .sorted()
            .collect()
    }

    pub fn lengths(&self) -> Vec<Length> {
        self.distances
            .iter()
            .map(|&d| Length::new(d, self.unit))
            .collect()
    }
}

/// Deterministic list `min, min+step, ..., <= max`, each value repeated
/// `shots_per_distance` times.
#[derive(Debug, Clone)]
pub struct FixedRange {
    distances: Vec<Length>,
    shots_per_distance: usize,
    unit: LengthUnit,
}

impl FixedRange {
    pub fn new(
        min: f64,
        max: f64,
        step: f64,
        shots_per_distance: usize,
        unit: LengthUnit,
    ) -> Result<Self, DrillError> {
        let invalid = || {
            DrillError::InvalidConfiguration(format!(
                "fixed range {min}..={max} step {step} x{shots_per_distance}"
            ))
        };
        if !(min.is_finite() && max.is_finite() && step.is_finite())
            || step <= 0.0
            || min > max
            || shots_per_distance == 0
        {
            return Err(invalid());
        }
        // small epsilon so fractional steps still land on `max`
        let count = ((max - min) / step + 1e-9).floor() + 1.0;
        if !count.is_finite() || count > MAX_FIXED_DISTANCES as f64 {
            return Err(invalid());
        }
        let distances = (0..count as usize)
            .map(|i| Length::new(min + i as f64 * step, unit))
            .collect();
        Ok(Self {
            distances,
            shots_per_distance,
            unit,
        })
    }

    fn next(&self, shot_index: usize) -> Result<Length, DrillError> {
        self.distances
            .get(shot_index / self.shots_per_distance)
            .copied()
            .ok_or(DrillError::GeneratorExhausted {
                index: shot_index,
                capacity: self.capacity(),
            })
    }

    fn capacity(&self) -> usize {
        self.distances.len() * self.shots_per_distance
    }
}

/// Lazily drawn, cached sequence of candidates. One epoch lasts until `reset`.
#[derive(Debug, Clone)]
struct Deck {
    candidates: Vec<Length>,
    with_replacement: bool,
    sequence: Vec<Length>,
    remaining: Vec<Length>,
    rng: StdRng,
    seed: Option<u64>,
    epoch: u64,
}

impl Deck {
    fn new(candidates: Vec<Length>, with_replacement: bool, seed: Option<u64>) -> Self {
        Self {
            candidates,
            with_replacement,
            sequence: Vec::new(),
            remaining: Vec::new(),
            rng: Self::rng_for(seed, 0),
            seed,
            epoch: 0,
        }
    }

    fn rng_for(seed: Option<u64>, epoch: u64) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch)),
            None => StdRng::from_entropy(),
        }
    }

    fn draw(&mut self) -> Option<Length> {
        if self.with_replacement {
            return self.candidates.choose(&mut self.rng).copied();
        }
        if self.remaining.is_empty() {
            self.remaining = self.candidates.clone();
            self.remaining.shuffle(&mut self.rng);
        }
        self.remaining.pop()
    }

    fn get(&mut self, shot_index: usize) -> Result<Length, DrillError> {
        while self.sequence.len() <= shot_index {
            let next = self.draw().ok_or(DrillError::GeneratorExhausted {
                index: shot_index,
                capacity: 0,
            })?;
            self.sequence.push(next);
        }
        Ok(self.sequence[shot_index])
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.sequence.clear();
        self.remaining.clear();
        self.rng = Self::rng_for(self.seed, self.epoch);
    }
}

/// Uniform draws from a candidate set, optionally without replacement
#[derive(Debug, Clone)]
pub struct RandomUniform {
    deck: Deck,
    unit: LengthUnit,
}

impl RandomUniform {
    pub fn new(candidates: Vec<Length>, with_replacement: bool) -> Result<Self, DrillError> {
        Self::build(candidates, with_replacement, None)
    }

    pub fn with_seed(
        candidates: Vec<Length>,
        with_replacement: bool,
        seed: u64,
    ) -> Result<Self, DrillError> {
        Self::build(candidates, with_replacement, Some(seed))
    }

    fn build(
        candidates: Vec<Length>,
        with_replacement: bool,
        seed: Option<u64>,
    ) -> Result<Self, DrillError> {
        let unit = candidates
            .first()
            .map(|c| c.unit)
            .ok_or_else(|| DrillError::InvalidConfiguration("empty candidate set".into()))?;
        let candidates = candidates.into_iter().map(|c| c.to(unit)).collect();
        Ok(Self {
            deck: Deck::new(candidates, with_replacement, seed),
            unit,
        })
    }
}

/// Each pass over the table is one shuffled permutation of it
#[derive(Debug, Clone)]
pub struct RandomFromFixedList {
    table: String,
    deck: Deck,
    unit: LengthUnit,
}

impl RandomFromFixedList {
    pub fn new(table: &DistanceTable) -> Result<Self, DrillError> {
        Self::build(table, None)
    }

    pub fn with_seed(table: &DistanceTable, seed: u64) -> Result<Self, DrillError> {
        Self::build(table, Some(seed))
    }

    fn build(table: &DistanceTable, seed: Option<u64>) -> Result<Self, DrillError> {
        if table.distances.is_empty() {
            return Err(DrillError::InvalidConfiguration(format!(
                "table '{}' has no distances",
                table.name
            )));
        }
        Ok(Self {
            table: table.name.clone(),
            deck: Deck::new(table.lengths(), false, seed),
            unit: table.unit,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }
}

/// Target distance strategies
#[derive(Debug, Clone)]
pub enum DistanceGenerator {
    FixedRange(FixedRange),
    RandomUniform(RandomUniform),
    RandomFromFixedList(RandomFromFixedList),
}

impl DistanceGenerator {
    /// Target for the shot at `shot_index`; stable for the same index until `reset`.
    pub fn next(&mut self, shot_index: usize) -> Result<Length, DrillError> {
        match self {
            DistanceGenerator::FixedRange(g) => g.next(shot_index),
            DistanceGenerator::RandomUniform(g) => g.deck.get(shot_index),
            DistanceGenerator::RandomFromFixedList(g) => g.deck.get(shot_index),
        }
    }

    pub fn number_of_distances(&self) -> usize {
        match self {
            DistanceGenerator::FixedRange(g) => g.distances.len(),
            DistanceGenerator::RandomUniform(g) => g.deck.candidates.len(),
            DistanceGenerator::RandomFromFixedList(g) => g.deck.candidates.len(),
        }
    }

    /// Number of shots the generator can serve, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        match self {
            DistanceGenerator::FixedRange(g) => Some(g.capacity()),
            DistanceGenerator::RandomUniform(_) | DistanceGenerator::RandomFromFixedList(_) => {
                None
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            DistanceGenerator::FixedRange(_) => {}
            DistanceGenerator::RandomUniform(g) => g.deck.reset(),
            DistanceGenerator::RandomFromFixedList(g) => g.deck.reset(),
        }
    }

    pub fn unit(&self) -> LengthUnit {
        match self {
            DistanceGenerator::FixedRange(g) => g.unit,
            DistanceGenerator::RandomUniform(g) => g.unit,
            DistanceGenerator::RandomFromFixedList(g) => g.unit,
        }
    }
}

/// Serializable description of a generator, as stored in config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSpec {
    Fixed {
        min: f64,
        max: f64,
        #[serde(default = "default_step")]
        step: f64,
        #[serde(default = "default_shots_per_distance")]
        shots_per_distance: usize,
    },
    Random {
        min: f64,
        max: f64,
        #[serde(default = "default_step")]
        step: f64,
        #[serde(default)]
        with_replacement: bool,
    },
    Table {
        name: String,
    },
}

fn default_step() -> f64 {
    10.0
}

fn default_shots_per_distance() -> usize {
    1
}

impl Default for GeneratorSpec {
    fn default() -> Self {
        GeneratorSpec::Table { name: "bgv".into() }
    }
}

impl GeneratorSpec {
    /// `unit` applies to range-based specs; tables carry their own unit.
    pub fn build(&self, unit: LengthUnit, seed: Option<u64>) -> Result<DistanceGenerator, DrillError> {
        match self {
            GeneratorSpec::Fixed {
                min,
                max,
                step,
                shots_per_distance,
            } => Ok(DistanceGenerator::FixedRange(FixedRange::new(
                *min,
                *max,
                *step,
                *shots_per_distance,
                unit,
            )?)),
            GeneratorSpec::Random {
                min,
                max,
                step,
                with_replacement,
            } => {
                let candidates = FixedRange::new(*min, *max, *step, 1, unit)?.distances;
                let g = match seed {
                    Some(seed) => RandomUniform::with_seed(candidates, *with_replacement, seed)?,
                    None => RandomUniform::new(candidates, *with_replacement)?,
                };
                Ok(DistanceGenerator::RandomUniform(g))
            }
            GeneratorSpec::Table { name } => {
                let table = DistanceTable::load(name)?;
                let g = match seed {
                    Some(seed) => RandomFromFixedList::with_seed(&table, seed)?,
                    None => RandomFromFixedList::new(&table)?,
                };
                Ok(DistanceGenerator::RandomFromFixedList(g))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn fixed(min: f64, max: f64, per: usize) -> DistanceGenerator {
        DistanceGenerator::FixedRange(FixedRange::new(min, max, 10.0, per, LengthUnit::Meters).unwrap())
    }

    #[test]
    fn test_fixed_range_two_shots_per_distance() {
        let mut g = fixed(10.0, 80.0, 2);
        assert_eq!(g.next(0).unwrap(), Length::meters(10.0));
        assert_eq!(g.next(1).unwrap(), Length::meters(10.0));
        assert_eq!(g.next(2).unwrap(), Length::meters(20.0));
        assert_eq!(g.next(15).unwrap(), Length::meters(80.0));
        assert_eq!(g.number_of_distances(), 8);
        assert_eq!(g.capacity(), Some(16));
    }

    #[test]
    fn test_fixed_range_exhausted() {
        let mut g = fixed(10.0, 30.0, 1);
        assert_matches!(
            g.next(3),
            Err(DrillError::GeneratorExhausted { index: 3, capacity: 3 })
        );
    }

    #[test]
    fn test_fixed_range_reset_reproduces_sequence() {
        let mut g = fixed(10.0, 80.0, 1);
        let before: Vec<Length> = (0..8).map(|i| g.next(i).unwrap()).collect();
        g.reset();
        let after: Vec<Length> = (0..8).map(|i| g.next(i).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fixed_range_rejects_bad_params() {
        assert!(FixedRange::new(10.0, 80.0, 0.0, 1, LengthUnit::Meters).is_err());
        assert!(FixedRange::new(90.0, 80.0, 10.0, 1, LengthUnit::Meters).is_err());
        assert!(FixedRange::new(10.0, 80.0, 10.0, 0, LengthUnit::Meters).is_err());
    }

    #[test]
    fn test_fixed_range_rejects_unbounded_ranges() {
        let m = LengthUnit::Meters;
        assert_matches!(FixedRange::new(10.0, f64::INFINITY, 10.0, 1, m), Err(DrillError::InvalidConfiguration(_)));
        assert_matches!(FixedRange::new(f64::NAN, 80.0, 10.0, 1, m), Err(DrillError::InvalidConfiguration(_)));
        assert_matches!(FixedRange::new(10.0, 80.0, f64::NAN, 1, m), Err(DrillError::InvalidConfiguration(_)));
        assert_matches!(FixedRange::new(10.0, 1e300, 10.0, 1, m), Err(DrillError::InvalidConfiguration(_)));
        // step below float precision at `min`
        assert_matches!(FixedRange::new(1e16, 1e16 + 40.0, 1.0, 1, m), Ok(_));
        assert_matches!(FixedRange::new(1e16, 1e20, 1.0, 1, m), Err(DrillError::InvalidConfiguration(_)));

        let spec: GeneratorSpec = serde_json::from_str(r#"{"kind":"fixed","min":10,"max":1e300}"#).unwrap();
        assert_matches!(spec.build(m, None), Err(DrillError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_fixed_range_fractional_steps_do_not_drift() {
        let mut g = DistanceGenerator::FixedRange(FixedRange::new(0.1, 0.3, 0.1, 1, LengthUnit::Meters).unwrap());
        assert_eq!(g.number_of_distances(), 3);
        assert_eq!(g.next(2).unwrap().value, 0.1 + 2.0 * 0.1);
        let mut g = DistanceGenerator::FixedRange(FixedRange::new(0.0, 1.0, 0.1, 1, LengthUnit::Meters).unwrap());
        assert_eq!(g.number_of_distances(), 11);
        assert_eq!(g.next(10).unwrap().value, 1.0);
    }

    #[test]
    fn test_random_same_index_same_value_within_epoch() {
        let candidates = vec![Length::meters(10.0), Length::meters(20.0), Length::meters(30.0)];
        let mut g = DistanceGenerator::RandomUniform(RandomUniform::with_seed(candidates, true, 7).unwrap());
        let first: Vec<Length> = (0..10).map(|i| g.next(i).unwrap()).collect();
        let again: Vec<Length> = (0..10).rev().map(|i| g.next(i).unwrap()).collect();
        let again: Vec<Length> = again.into_iter().rev().collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_random_without_replacement_covers_every_candidate_per_pass() {
        let candidates: Vec<Length> = (1..=5).map(|d| Length::meters(d as f64 * 10.0)).collect();
        let mut g =
            DistanceGenerator::RandomUniform(RandomUniform::with_seed(candidates, false, 3).unwrap());
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for i in 0..10 {
            *counts.entry(g.next(i).unwrap().value as i64).or_default() += 1;
        }
        assert_eq!(counts.len(), 5);
        assert!(counts.values().all(|&c| c == 2));
    }

    #[test]
    fn test_random_reset_stays_within_candidates() {
        let candidates = vec![Length::yards(50.0), Length::yards(60.0)];
        let mut g =
            DistanceGenerator::RandomUniform(RandomUniform::new(candidates.clone(), true).unwrap());
        g.next(4).unwrap();
        g.reset();
        for i in 0..6 {
            assert!(candidates.contains(&g.next(i).unwrap()));
        }
        assert_eq!(g.unit(), LengthUnit::Yards);
        assert_eq!(g.capacity(), None);
    }

    #[test]
    fn test_random_rejects_empty_candidates() {
        assert_matches!(
            RandomUniform::new(vec![], true),
            Err(DrillError::InvalidConfiguration(_))
        );
    }

    #[test]
    fn test_table_load_and_names() {
        let names = DistanceTable::names();
        assert!(names.contains(&"bgv".to_string()));
        let table = DistanceTable::load("bgv").unwrap();
        assert_eq!(table.unit, LengthUnit::Meters);
        assert_eq!(table.distances.len(), 18);
        assert_matches!(DistanceTable::load("nope"), Err(DrillError::UnknownTable(_)));
    }

    #[test]
    fn test_table_generator_is_permutation_per_pass() {
        let table = DistanceTable::load("bgv").unwrap();
        let mut g = DistanceGenerator::RandomFromFixedList(RandomFromFixedList::with_seed(&table, 11).unwrap());
        let mut drawn: Vec<f64> = (0..table.distances.len()).map(|i| g.next(i).unwrap().value).collect();
        drawn.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut expected = table.distances.clone();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(drawn, expected);
        assert_eq!(g.number_of_distances(), 18);
    }

    #[test]
    fn test_seeded_reset_starts_new_epoch() {
        let table = DistanceTable::load("bgv").unwrap();
        let mut a = RandomFromFixedList::with_seed(&table, 5).unwrap();
        let mut b = RandomFromFixedList::with_seed(&table, 5).unwrap();
        let first_a: Vec<Length> = (0..18).map(|i| a.deck.get(i).unwrap()).collect();
        let first_b: Vec<Length> = (0..18).map(|i| b.deck.get(i).unwrap()).collect();
        assert_eq!(first_a, first_b);
        a.deck.reset();
        b.deck.reset();
        assert_eq!(a.deck.get(0).unwrap(), b.deck.get(0).unwrap());
    }

    #[test]
    fn test_spec_roundtrip_and_build() {
        let spec = GeneratorSpec::Fixed {
            min: 10.0,
            max: 80.0,
            step: 10.0,
            shots_per_distance: 2,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""kind":"fixed""#));
        let back: GeneratorSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);

        let g = back.build(LengthUnit::Yards, None).unwrap();
        assert_eq!(g.unit(), LengthUnit::Yards);
        assert_eq!(g.capacity(), Some(16));

        let from_default: GeneratorSpec = serde_json::from_str(r#"{"kind":"random","min":20,"max":60}"#).unwrap();
        let g = from_default.build(LengthUnit::Meters, Some(1)).unwrap();
        assert_eq!(g.number_of_distances(), 5);
    }
}
