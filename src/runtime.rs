use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::shot::RawRecord;
use crate::source::{read_records, AcquisitionMode};
use crate::store::SessionSink;
use crate::tracker::{Batch, BatchKind, BatchOutcome, SessionTracker, TrackerSnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const WATCH_CHANNEL_CAPACITY: usize = 100;

/// Everything that may change the tracker, in arrival order
#[derive(Clone, Debug)]
pub enum DrillEvent {
    /// Ids present in the source when acquisition attached
    Baseline(Vec<u64>),
    Batch(Batch),
    SourceUnavailable,
    Restart,
    Detach,
}

pub fn event_channel() -> (mpsc::Sender<DrillEvent>, mpsc::Receiver<DrillEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

#[derive(Debug)]
pub enum Step {
    /// Event applied. Non-batch events carry an empty outcome.
    Continue(BatchOutcome),
    /// Detach received or every sender dropped
    Stop,
}

/// Single consumer of drill events and sole owner of the tracker
pub struct Runner<S: SessionSink> {
    tracker: SessionTracker<S>,
    events: mpsc::Receiver<DrillEvent>,
    snapshots: watch::Sender<TrackerSnapshot>,
}

impl<S: SessionSink> Runner<S> {
    pub fn new(tracker: SessionTracker<S>, events: mpsc::Receiver<DrillEvent>) -> Self {
        let (snapshots, _) = watch::channel(tracker.snapshot());
        Self {
            tracker,
            events,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn tracker(&self) -> &SessionTracker<S> {
        &self.tracker
    }

    pub fn apply(&mut self, event: DrillEvent) -> Step {
        let outcome = match event {
            DrillEvent::Baseline(ids) => {
                self.tracker.capture_baseline(ids);
                BatchOutcome::default()
            }
            DrillEvent::Batch(batch) => self.tracker.on_batch(batch),
            DrillEvent::SourceUnavailable => {
                self.tracker.mark_source_unavailable();
                BatchOutcome::default()
            }
            DrillEvent::Restart => {
                self.tracker.restart();
                BatchOutcome::default()
            }
            DrillEvent::Detach => {
                info!("detached from shot source");
                return Step::Stop;
            }
        };
        self.snapshots.send_replace(self.tracker.snapshot());
        Step::Continue(outcome)
    }

    /// Waits for the next event and applies it
    pub async fn step(&mut self) -> Step {
        match self.events.recv().await {
            Some(event) => self.apply(event),
            None => Step::Stop,
        }
    }

    /// Applies events until detached, then hands the tracker back
    pub async fn run(mut self) -> SessionTracker<S> {
        while let Step::Continue(outcome) = self.step().await {
            if let Some(session) = &outcome.finalized {
                debug!(session = %session.name, "session handed to sink");
            }
        }
        self.tracker
    }
}

#[derive(Clone, Debug)]
pub struct AcquisitionConfig {
    pub mode: AcquisitionMode,
    /// Last-shot CSV for latest-only mode, session log directory otherwise
    pub path: PathBuf,
    pub attach_retry: Duration,
}

/// Running acquisition task. Dropping the handle leaves the task running.
pub struct AcquisitionHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl AcquisitionHandle {
    pub fn detach(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts reading the source in the background. The first successful read
/// becomes the baseline; until then `SourceUnavailable` is reported every
/// `attach_retry`.
pub fn attach(config: AcquisitionConfig, events: mpsc::Sender<DrillEvent>) -> AcquisitionHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(acquire(config, events, stop.clone()));
    AcquisitionHandle { stop, task }
}

async fn acquire(config: AcquisitionConfig, events: mpsc::Sender<DrillEvent>, stop: Arc<AtomicBool>) {
    let (baseline, watcher) = loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match attach_once(&config).await {
            Ok(attached) => break attached,
            Err(e) => {
                warn!(error = %e, retry_ms = config.attach_retry.as_millis() as u64, "cannot attach to shot source");
                if events.send(DrillEvent::SourceUnavailable).await.is_err() {
                    return;
                }
                tokio::time::sleep(config.attach_retry).await;
            }
        }
    };

    info!(
        path = %config.path.display(),
        mode = ?config.mode,
        baseline = baseline.len(),
        "attached to shot source"
    );
    if events.send(DrillEvent::Baseline(baseline)).await.is_err() {
        return;
    }

    match (config.mode, watcher) {
        (AcquisitionMode::Polling { interval }, _) => poll(&config, interval, &events, &stop).await,
        (_, Some(watcher)) => follow_changes(&config, watcher, &events, &stop).await,
        (_, None) => warn!("event mode without a file watcher"),
    }
    debug!("acquisition stopped");
}

/// The watcher is started before the baseline read so no change slips
/// between the two.
async fn attach_once(config: &AcquisitionConfig) -> Result<(Vec<u64>, Option<SourceWatcher>), SourceError> {
    let watcher = match config.mode {
        AcquisitionMode::Polling { .. } => None,
        AcquisitionMode::EventLatestOnly | AcquisitionMode::EventFullRescan => {
            Some(SourceWatcher::start(config)?)
        }
    };
    let records = read(config).await?;
    let baseline = match config.mode.batch_kind() {
        // only shots after attachment are ever reported in the single-row file
        BatchKind::LatestOnly => Vec::new(),
        BatchKind::FullRescan => records.iter().filter_map(RawRecord::shot_id).collect(),
    };
    Ok((baseline, watcher))
}

async fn read(config: &AcquisitionConfig) -> Result<Vec<RawRecord>, SourceError> {
    let (mode, path) = (config.mode, config.path.clone());
    tokio::task::spawn_blocking(move || read_records(mode, &path))
        .await
        .map_err(|e| SourceError::Io(e.into()))?
}

/// One read cycle. Returns false once nobody listens for events.
async fn read_and_send(config: &AcquisitionConfig, events: &mpsc::Sender<DrillEvent>) -> bool {
    let event = match read(config).await {
        Ok(records) => DrillEvent::Batch(Batch {
            kind: config.mode.batch_kind(),
            records,
        }),
        Err(SourceError::Parse { path, reason }) => {
            warn!(path = %path.display(), reason = %reason, "unparsable shot source, no new data");
            return true;
        }
        Err(e) => {
            warn!(error = %e, "shot source unavailable");
            DrillEvent::SourceUnavailable
        }
    };
    events.send(event).await.is_ok()
}

async fn poll(
    config: &AcquisitionConfig,
    interval: Duration,
    events: &mpsc::Sender<DrillEvent>,
    stop: &AtomicBool,
) {
    info!(interval_ms = interval.as_millis() as u64, "polling shot source");
    loop {
        if !read_and_send(config, events).await {
            break;
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(interval).await;
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }
}

async fn follow_changes(
    config: &AcquisitionConfig,
    mut watcher: SourceWatcher,
    events: &mpsc::Sender<DrillEvent>,
    stop: &AtomicBool,
) {
    // notifications queue up while a read runs, so reads never overlap
    while watcher.next_change().await.is_some() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if !read_and_send(config, events).await {
            break;
        }
    }
}

/// Filesystem notifications for the shot source, bridged into tokio
struct SourceWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    mode: AcquisitionMode,
    target: PathBuf,
}

impl SourceWatcher {
    fn start(config: &AcquisitionConfig) -> Result<Self, SourceError> {
        let root = watch_root(config.mode, &config.path);
        if !root.is_dir() {
            return Err(SourceError::Unavailable {
                path: root.to_path_buf(),
            });
        }

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res| {
            // notify calls back on its own thread
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        debug!(root = %root.display(), "watching for shot source changes");

        Ok(Self {
            _watcher: watcher,
            rx,
            mode: config.mode,
            target: config.path.clone(),
        })
    }

    /// Resolves on the next create or modify that concerns the source
    async fn next_change(&mut self) -> Option<()> {
        while let Some(res) = self.rx.recv().await {
            match res {
                Ok(event) if self.is_relevant(&event) => return Some(()),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        }
        None
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        event.paths.iter().any(|p| match self.mode {
            AcquisitionMode::EventLatestOnly => p.file_name() == self.target.file_name(),
            AcquisitionMode::EventFullRescan | AcquisitionMode::Polling { .. } => p
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn watch_root(mode: AcquisitionMode, path: &Path) -> &Path {
    match mode {
        AcquisitionMode::EventLatestOnly => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(".")),
        AcquisitionMode::EventFullRescan | AcquisitionMode::Polling { .. } => path,
    }
}
