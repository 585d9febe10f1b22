use crate::drill::DrillConfiguration;
use crate::session::Session;
use crate::shot::{RawRecord, Shot};
use crate::store::SessionSink;
use crate::units::Length;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TrackerState {
    /// Waiting for the first full read of the source
    AwaitingBaseline,
    Collecting,
    Complete,
}

/// How a batch was produced by the acquisition layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BatchKind {
    /// Exactly the most recently written record
    LatestOnly,
    /// Everything currently in the source, in source order
    FullRescan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: BatchKind,
    pub records: Vec<RawRecord>,
}

impl Batch {
    pub fn latest(record: RawRecord) -> Self {
        Self {
            kind: BatchKind::LatestOnly,
            records: vec![record],
        }
    }

    pub fn rescan(records: Vec<RawRecord>) -> Self {
        Self {
            kind: BatchKind::FullRescan,
            records,
        }
    }
}

/// What a single batch did to the tracker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub admitted: Vec<u64>,
    pub already_known: usize,
    /// Ids that arrived after the session was full
    pub discarded: Vec<u64>,
    pub malformed: usize,
    pub finalized: Option<Session>,
}

/// Read-only view handed to display collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub state: TrackerState,
    pub known_shots: Vec<Shot>,
    pub pending_target: Option<Length>,
    pub number_of_shots: usize,
    pub source_available: bool,
    /// Bumped on every restart, so merged snapshots still reveal one
    pub restarts: u64,
}

impl TrackerSnapshot {
    pub fn is_complete(&self) -> bool {
        self.state == TrackerState::Complete
    }

    pub fn last_shot(&self) -> Option<&Shot> {
        self.known_shots.last()
    }
}

/// Reconciles a replayed, possibly stale shot source into the shots of the
/// current session: in order, without duplicates, never more than the drill's
/// shot count.
#[derive(Debug)]
pub struct SessionTracker<S: SessionSink> {
    drill: DrillConfiguration,
    player_id: Option<Uuid>,
    state: TrackerState,
    known_shots: Vec<Shot>,
    known_ids: HashSet<u64>,
    baseline_ids: HashSet<u64>,
    pending_target: Option<Length>,
    source_available: bool,
    restarts: u64,
    sink: S,
}

impl<S: SessionSink> SessionTracker<S> {
    pub fn new(mut drill: DrillConfiguration, player_id: Option<Uuid>, sink: S) -> Self {
        let pending_target = first_target(&mut drill);
        Self {
            drill,
            player_id,
            state: TrackerState::AwaitingBaseline,
            known_shots: Vec::new(),
            known_ids: HashSet::new(),
            baseline_ids: HashSet::new(),
            pending_target,
            source_available: true,
            restarts: 0,
            sink,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn known_shots(&self) -> &[Shot] {
        &self.known_shots
    }

    pub fn pending_target(&self) -> Option<Length> {
        self.pending_target
    }

    pub fn baseline_ids(&self) -> &HashSet<u64> {
        &self.baseline_ids
    }

    pub fn drill(&self) -> &DrillConfiguration {
        &self.drill
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_complete(&self) -> bool {
        self.state == TrackerState::Complete
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            state: self.state,
            known_shots: self.known_shots.clone(),
            pending_target: self.pending_target,
            number_of_shots: self.drill.number_of_shots(),
            source_available: self.source_available,
            restarts: self.restarts,
        }
    }

    /// Ids already in the source when acquisition attached. Captured once;
    /// later calls are ignored.
    pub fn capture_baseline(&mut self, ids: impl IntoIterator<Item = u64>) {
        if self.state != TrackerState::AwaitingBaseline {
            warn!(state = %self.state, "baseline already captured, ignoring");
            return;
        }
        self.baseline_ids.extend(ids);
        self.source_available = true;
        self.state = TrackerState::Collecting;
        info!(
            baseline = self.baseline_ids.len(),
            "baseline captured, collecting shots"
        );
    }

    /// The source could not be read. Keeps the current state; before the
    /// baseline this means "loading" indefinitely.
    pub fn mark_source_unavailable(&mut self) {
        if self.source_available {
            warn!(state = %self.state, "shot source unavailable");
        }
        self.source_available = false;
    }

    pub fn on_batch(&mut self, batch: Batch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        if self.state == TrackerState::AwaitingBaseline {
            debug!(records = batch.records.len(), "batch before baseline, ignoring");
            return outcome;
        }
        self.source_available = true;

        let mut records = batch.records;
        match batch.kind {
            BatchKind::LatestOnly => {
                if records.len() > 1 {
                    warn!(
                        records = records.len(),
                        "latest-only batch with several records, keeping the last"
                    );
                    records = records.split_off(records.len() - 1);
                }
            }
            BatchKind::FullRescan => {
                // device ids grow monotonically; a stable sort keeps file order for equal ids
                records.sort_by_key(|r| r.shot_id().unwrap_or(0));
            }
        }

        for record in &records {
            self.admit(record, &mut outcome);
        }
        outcome
    }

    fn admit(&mut self, record: &RawRecord, outcome: &mut BatchOutcome) {
        let id = record.shot_id();
        if let Some(id) = id {
            if self.known_ids.contains(&id) || self.baseline_ids.contains(&id) {
                outcome.already_known += 1;
                return;
            }
        }
        if self.known_shots.len() >= self.drill.number_of_shots() {
            match id {
                Some(id) => {
                    warn!(
                        shot_id = id,
                        "shot executed but number of shots was already reached, ignoring"
                    );
                    outcome.discarded.push(id);
                }
                None => {
                    warn!("record without a valid id after the session was full, skipping");
                    outcome.malformed += 1;
                }
            }
            return;
        }

        let Some(target) = self.pending_target else {
            warn!("no target distance for the next shot, skipping record");
            return;
        };

        let shot = match Shot::normalize(record, target) {
            Ok(shot) => shot,
            Err(e) => {
                warn!(error = %e, "skipping record");
                outcome.malformed += 1;
                return;
            }
        };

        info!(
            shot_id = shot.id,
            carry = %shot.carry_distance,
            target = %shot.target_distance,
            shot = self.known_shots.len() + 1,
            of = self.drill.number_of_shots(),
            "shot admitted"
        );
        self.known_ids.insert(shot.id);
        outcome.admitted.push(shot.id);
        self.known_shots.push(shot);

        if self.known_shots.len() < self.drill.number_of_shots() {
            self.pending_target = match self.drill.next_distance(self.known_shots.len()) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(error = %e, "drill cannot supply the next target");
                    None
                }
            };
        } else {
            outcome.finalized = Some(self.finalize());
        }
    }

    fn finalize(&mut self) -> Session {
        self.pending_target = None;
        self.state = TrackerState::Complete;
        let session = Session::new(
            self.player_id,
            self.drill.summary(),
            self.known_shots.clone(),
        );
        info!(session = %session.name, shots = session.shots.len(), "all shots executed, saving session");
        self.sink.save_session(&session);
        session
    }

    /// Drops the current shots. Their ids join the baseline so they are never
    /// admitted again, and the drill starts a new distance sequence.
    pub fn restart(&mut self) {
        let dropped = self.known_shots.len();
        self.baseline_ids.extend(self.known_ids.drain());
        self.known_shots.clear();
        self.pending_target = first_target(&mut self.drill);
        self.restarts += 1;
        if self.state == TrackerState::Complete {
            self.state = TrackerState::Collecting;
        }
        info!(dropped, baseline = self.baseline_ids.len(), "session restarted");
    }
}

fn first_target(drill: &mut DrillConfiguration) -> Option<Length> {
    drill.reset();
    match drill.next_distance(0) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(error = %e, "drill cannot supply a first target");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviation::CompareDistance;
    use crate::distance::{DistanceGenerator, DistanceTable, FixedRange, RandomFromFixedList};
    use crate::shot::{RawValue, RecordFormat};
    use crate::units::LengthUnit;

    fn fixed_drill(shots: usize, per_distance: usize) -> DrillConfiguration {
        let g = FixedRange::new(10.0, 80.0, 10.0, per_distance, LengthUnit::Meters).unwrap();
        DrillConfiguration::new("ladder", shots, CompareDistance::Carry, DistanceGenerator::FixedRange(g))
            .unwrap()
    }

    fn csv(id: u64, carry: f64) -> RawRecord {
        RawRecord::new(RecordFormat::LatestShotCsv)
            .with("shot_id", RawValue::Text(id.to_string()))
            .with("carry_m", RawValue::Number(carry))
    }

    fn log(id: u64) -> RawRecord {
        RawRecord::new(RecordFormat::SessionLog)
            .with("ShotId", RawValue::Number(id as f64))
            .with("BallData.Carry", RawValue::Number(50.0))
    }

    fn collecting(drill: DrillConfiguration, baseline: &[u64]) -> SessionTracker<Vec<Session>> {
        let mut t = SessionTracker::new(drill, None, Vec::new());
        t.capture_baseline(baseline.iter().copied());
        t
    }

    fn ids(t: &SessionTracker<Vec<Session>>) -> Vec<u64> {
        t.known_shots().iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_starts_awaiting_baseline_with_first_target() {
        let t = SessionTracker::new(fixed_drill(4, 1), None, Vec::new());
        assert_eq!(t.state(), TrackerState::AwaitingBaseline);
        assert_eq!(t.pending_target(), Some(Length::meters(10.0)));
        assert!(t.known_shots().is_empty());
    }

    #[test]
    fn test_batches_before_baseline_are_ignored() {
        let mut t = SessionTracker::new(fixed_drill(4, 1), None, Vec::new());
        let outcome = t.on_batch(Batch::latest(csv(1, 10.0)));
        assert_eq!(outcome, BatchOutcome::default());
        assert!(t.known_shots().is_empty());
    }

    #[test]
    fn test_latest_only_same_record_twice_is_one_shot() {
        let mut t = collecting(fixed_drill(4, 1), &[]);
        let first = t.on_batch(Batch::latest(csv(5, 140.0)));
        let second = t.on_batch(Batch::latest(csv(5, 140.0)));
        assert_eq!(first.admitted, vec![5]);
        assert!(second.admitted.is_empty());
        assert_eq!(second.already_known, 1);
        assert_eq!(ids(&t), vec![5]);
        assert_eq!(t.known_shots()[0].carry_distance, Length::meters(140.0));
    }

    #[test]
    fn test_full_rescan_skips_baseline() {
        let mut t = collecting(fixed_drill(4, 1), &[1, 2, 3]);
        let outcome = t.on_batch(Batch::rescan(vec![log(1), log(2), log(3), log(4)]));
        assert_eq!(outcome.admitted, vec![4]);
        assert_eq!(outcome.already_known, 3);
        assert_eq!(ids(&t), vec![4]);
    }

    #[test]
    fn test_full_rescan_admits_in_id_order() {
        let mut t = collecting(fixed_drill(4, 1), &[]);
        t.on_batch(Batch::rescan(vec![log(9), log(7), log(8)]));
        assert_eq!(ids(&t), vec![7, 8, 9]);
    }

    #[test]
    fn test_targets_are_assigned_sequentially_within_a_batch() {
        let mut t = collecting(fixed_drill(4, 1), &[]);
        t.on_batch(Batch::rescan(vec![log(1), log(2), log(3)]));
        let targets: Vec<Length> = t.known_shots().iter().map(|s| s.target_distance).collect();
        assert_eq!(
            targets,
            vec![Length::meters(10.0), Length::meters(20.0), Length::meters(30.0)]
        );
        assert_eq!(t.pending_target(), Some(Length::meters(40.0)));
    }

    #[test]
    fn test_count_reached_finalizes_and_discards_extra() {
        let mut t = collecting(fixed_drill(3, 1), &[]);
        let outcome = t.on_batch(Batch::rescan(vec![log(1), log(2), log(3), log(4)]));
        assert_eq!(outcome.admitted, vec![1, 2, 3]);
        assert_eq!(outcome.discarded, vec![4]);
        assert_eq!(ids(&t), vec![1, 2, 3]);
        assert_eq!(t.state(), TrackerState::Complete);
        assert_eq!(t.pending_target(), None);

        let session = outcome.finalized.unwrap();
        assert_eq!(session.shots.len(), 3);
        assert_eq!(t.sink().len(), 1);
        assert_eq!(t.sink()[0].id, session.id);
        assert_eq!(t.sink()[0].drill.number_of_shots, 3);
    }

    #[test]
    fn test_shots_after_completion_are_discarded() {
        let mut t = collecting(fixed_drill(1, 1), &[]);
        t.on_batch(Batch::latest(csv(1, 10.0)));
        assert!(t.is_complete());
        let outcome = t.on_batch(Batch::latest(csv(2, 20.0)));
        assert_eq!(outcome.discarded, vec![2]);
        assert_eq!(ids(&t), vec![1]);
        assert_eq!(t.sink().len(), 1);
    }

    #[test]
    fn test_invalid_records_after_completion_count_as_malformed() {
        let mut t = collecting(fixed_drill(1, 1), &[]);
        t.on_batch(Batch::latest(csv(1, 10.0)));
        assert!(t.is_complete());
        let outcome = t.on_batch(Batch::rescan(vec![log(1), bad_log(), log(5)]));
        assert_eq!(outcome.already_known, 1);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.discarded, vec![5]);
        assert_eq!(ids(&t), vec![1]);
    }

    #[test]
    fn test_restart_after_two_of_three() {
        let mut t = collecting(fixed_drill(3, 1), &[]);
        t.on_batch(Batch::latest(csv(11, 10.0)));
        t.on_batch(Batch::latest(csv(12, 20.0)));
        assert_eq!(t.pending_target(), Some(Length::meters(30.0)));

        t.restart();
        assert!(t.known_shots().is_empty());
        assert!(t.baseline_ids().contains(&11));
        assert!(t.baseline_ids().contains(&12));
        assert_eq!(t.pending_target(), Some(Length::meters(10.0)));
        assert_eq!(t.state(), TrackerState::Collecting);
        assert_eq!(t.snapshot().restarts, 1);
    }

    #[test]
    fn test_restart_never_readmits_previous_shots() {
        let mut t = collecting(fixed_drill(3, 1), &[]);
        t.on_batch(Batch::rescan(vec![log(1), log(2)]));
        t.restart();
        t.restart();
        let outcome = t.on_batch(Batch::rescan(vec![log(1), log(2), log(3)]));
        assert_eq!(outcome.admitted, vec![3]);
        t.on_batch(Batch::latest(csv(2, 20.0)));
        assert_eq!(ids(&t), vec![3]);
    }

    #[test]
    fn test_restart_from_complete_collects_again() {
        let mut t = collecting(fixed_drill(1, 1), &[]);
        t.on_batch(Batch::latest(csv(1, 10.0)));
        assert!(t.is_complete());
        t.restart();
        assert_eq!(t.state(), TrackerState::Collecting);
        t.on_batch(Batch::latest(csv(2, 10.0)));
        assert!(t.is_complete());
        assert_eq!(t.sink().len(), 2);
    }

    #[test]
    fn test_restart_resets_random_generator() {
        let table = DistanceTable::load("bgv").unwrap();
        let g = DistanceGenerator::RandomFromFixedList(RandomFromFixedList::with_seed(&table, 42).unwrap());
        let drill = DrillConfiguration::new("bgv", 18, CompareDistance::Carry, g).unwrap();
        let mut t = collecting(drill, &[]);
        t.on_batch(Batch::latest(csv(1, 10.0)));
        t.restart();
        let pending = t.pending_target().unwrap();
        assert!(table.lengths().contains(&pending));
    }

    #[test]
    fn test_malformed_record_is_skipped_without_state_change() {
        let mut t = collecting(fixed_drill(3, 1), &[]);
        let bad = RawRecord::new(RecordFormat::LatestShotCsv).with("carry_m", RawValue::Number(10.0));
        let outcome = t.on_batch(Batch::latest(bad));
        assert_eq!(outcome.malformed, 1);
        assert!(t.known_shots().is_empty());
        assert_eq!(t.state(), TrackerState::Collecting);
        assert_eq!(t.pending_target(), Some(Length::meters(10.0)));

        let outcome = t.on_batch(Batch::rescan(vec![log(1), bad_log(), log(2)]));
        assert_eq!(outcome.admitted, vec![1, 2]);
        assert_eq!(outcome.malformed, 1);
    }

    fn bad_log() -> RawRecord {
        RawRecord::new(RecordFormat::SessionLog).with("ShotId", RawValue::Text("x".into()))
    }

    #[test]
    fn test_no_duplicate_ids_ever() {
        let mut t = collecting(fixed_drill(8, 1), &[]);
        for batch in [
            Batch::rescan(vec![log(1), log(2), log(2)]),
            Batch::latest(csv(2, 1.0)),
            Batch::rescan(vec![log(3), log(1), log(4), log(3)]),
            Batch::latest(csv(4, 1.0)),
        ] {
            t.on_batch(batch);
        }
        let mut seen = HashSet::new();
        assert!(t.known_shots().iter().all(|s| seen.insert(s.id)));
        assert_eq!(ids(&t), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_latest_only_keeps_last_of_oversized_batch() {
        let mut t = collecting(fixed_drill(3, 1), &[]);
        let batch = Batch {
            kind: BatchKind::LatestOnly,
            records: vec![csv(1, 10.0), csv(2, 20.0)],
        };
        assert_eq!(t.on_batch(batch).admitted, vec![2]);
    }

    #[test]
    fn test_baseline_captured_once() {
        let mut t = collecting(fixed_drill(3, 1), &[1]);
        t.capture_baseline([2, 3]);
        assert_eq!(t.baseline_ids().len(), 1);
    }

    #[test]
    fn test_source_unavailable_keeps_awaiting_baseline() {
        let mut t = SessionTracker::new(fixed_drill(3, 1), None, Vec::new());
        t.mark_source_unavailable();
        t.mark_source_unavailable();
        let snap = t.snapshot();
        assert_eq!(snap.state, TrackerState::AwaitingBaseline);
        assert!(!snap.source_available);
        t.capture_baseline([]);
        assert!(t.snapshot().source_available);
    }

    #[test]
    fn test_snapshot_reflects_progress() {
        let player = Uuid::new_v4();
        let mut t = SessionTracker::new(fixed_drill(2, 2), Some(player), Vec::new());
        t.capture_baseline([]);
        t.on_batch(Batch::latest(csv(1, 9.0)));
        let snap = t.snapshot();
        assert_eq!(snap.known_shots.len(), 1);
        assert_eq!(snap.last_shot().map(|s| s.id), Some(1));
        assert_eq!(snap.pending_target, Some(Length::meters(10.0)));
        assert_eq!(snap.number_of_shots, 2);
        assert!(!snap.is_complete());

        t.on_batch(Batch::latest(csv(2, 11.0)));
        assert!(t.snapshot().is_complete());
        assert_eq!(t.sink()[0].player_id, Some(player));
    }
}
