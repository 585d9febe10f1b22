use std::path::PathBuf;

use anyhow::{Context, Result};
use approachshot::{
    app_dirs::AppDirs,
    config::{Config, ConfigStore, FileConfigStore, ShotsUpdateType},
    deviation::{absolute_deviation, CompareDistance},
    distance::{DistanceTable, GeneratorSpec},
    drill::DrillConfiguration,
    runtime::{attach, event_channel, AcquisitionConfig, DrillEvent, Runner},
    session::SessionSummary,
    store::SessionStore,
    tracker::{SessionTracker, TrackerSnapshot},
    units::LengthUnit,
};
use clap::Parser;
use itertools::Itertools;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

/// approach shot drills fed live from a launch monitor
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Follows a launch monitor's shot output, assigns every new shot a target distance and saves the finished drill. Type `r` + enter to restart the drill, `q` + enter to quit."
)]
pub struct Cli {
    /// config file to load (defaults to the user config location)
    #[clap(long)]
    config: Option<PathBuf>,

    /// write the merged configuration back to the config file
    #[clap(long)]
    save_config: bool,

    /// print the merged configuration as JSON and exit
    #[clap(long)]
    print_config: bool,

    /// list the built-in distance tables and exit
    #[clap(long)]
    list_tables: bool,

    /// list saved sessions and exit
    #[clap(long)]
    list_sessions: bool,

    /// how shots are picked up from the device
    #[clap(short = 'm', long, value_enum)]
    mode: Option<ShotsUpdateType>,

    /// last-shot CSV written by the device
    #[clap(long)]
    last_shot_csv: Option<PathBuf>,

    /// directory of the device's session logs
    #[clap(long)]
    session_dir: Option<PathBuf>,

    /// polling interval in milliseconds
    #[clap(long)]
    polling_interval_ms: Option<u64>,

    /// number of shots in the drill
    #[clap(short = 'n', long)]
    shots: Option<usize>,

    /// unit for ranges and deviations
    #[clap(short = 'u', long, value_enum)]
    unit: Option<LengthUnit>,

    /// measured distance scored against the target
    #[clap(short = 'c', long, value_enum)]
    compare: Option<CompareDistance>,

    /// draw targets from a built-in distance table
    #[clap(short = 't', long, conflicts_with = "fixed")]
    table: Option<String>,

    /// walk targets from MIN to MAX in steps of 10
    #[clap(long, num_args = 2, value_names = ["MIN", "MAX"])]
    fixed: Option<Vec<f64>>,

    /// seed for random target order
    #[clap(long)]
    seed: Option<u64>,

    /// player the sessions are saved for
    #[clap(long)]
    player: Option<Uuid>,

    /// SQLite database for finished sessions
    #[clap(long)]
    database: Option<PathBuf>,
}

impl Cli {
    /// Command-line values take precedence over the config file
    fn merge_into(&self, mut cfg: Config) -> Config {
        if let Some(mode) = self.mode {
            cfg.shots_update_type = mode;
        }
        if let Some(path) = &self.last_shot_csv {
            cfg.last_shot_csv_path = path.clone();
        }
        if let Some(dir) = &self.session_dir {
            cfg.session_json_dir = dir.clone();
        }
        if let Some(ms) = self.polling_interval_ms {
            cfg.polling_interval_ms = ms;
        }
        if let Some(n) = self.shots {
            cfg.number_of_shots = n;
        }
        if let Some(unit) = self.unit {
            cfg.unit = unit;
        }
        if let Some(compare) = self.compare {
            cfg.compare = compare;
        }
        if let Some(name) = &self.table {
            cfg.generator = GeneratorSpec::Table { name: name.clone() };
            cfg.drill_name = name.clone();
        }
        if let Some(&[min, max]) = self.fixed.as_deref() {
            cfg.generator = GeneratorSpec::Fixed {
                min,
                max,
                step: 10.0,
                shots_per_distance: 1,
            };
            cfg.drill_name = format!("{min}-{max}");
        }
        if let Some(db) = &self.database {
            cfg.database_path = Some(db.clone());
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("approachshot=info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_tables {
        for name in DistanceTable::names() {
            let table = DistanceTable::load(&name)?;
            println!(
                "{:<12} {:<3} {:<40} {}",
                table.name,
                table.unit,
                table.description,
                table.distances.iter().join(" ")
            );
        }
        return Ok(());
    }

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };
    let cfg = cli.merge_into(store.load());

    if cli.save_config {
        store
            .save(&cfg)
            .with_context(|| format!("saving config to {}", store.path().display()))?;
        info!(path = %store.path().display(), "config saved");
    }
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let mut sessions = SessionStore::open(cfg.database_path.as_deref()).context("opening session database")?;

    if cli.list_sessions {
        for session in sessions.list_sessions(cli.player)? {
            let summary = session.summary();
            println!(
                "{}  {:<16} {:>2} shots  mean {}  max {}",
                session.name,
                session.drill.name,
                summary.shots,
                summary.mean_absolute_deviation,
                summary.max_absolute_deviation
            );
        }
        return Ok(());
    }

    if let Some(path) = AppDirs::summary_log_path() {
        sessions = sessions.with_summary_log(path);
    }

    let generator = cfg.generator.build(cfg.unit, cli.seed)?;
    let drill = DrillConfiguration::new(cfg.drill_name.clone(), cfg.number_of_shots, cfg.compare, generator)?;
    let tracker = SessionTracker::new(drill, cli.player, sessions);

    run_drill(&cfg, tracker).await
}

async fn run_drill(cfg: &Config, tracker: SessionTracker<SessionStore>) -> Result<()> {
    let (events, rx) = event_channel();
    let runner = Runner::new(tracker, rx);
    let mut snapshots = runner.subscribe();
    let runner_task = tokio::spawn(runner.run());

    let acquisition = attach(
        AcquisitionConfig {
            mode: cfg.acquisition_mode(),
            path: cfg.source_path().to_path_buf(),
            attach_retry: cfg.attach_retry(),
        },
        events.clone(),
    );

    let mut progress = Progress::default();
    progress.render(&snapshots.borrow_and_update(), cfg.compare);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                progress.render(&snapshot, cfg.compare);
            }
            line = lines.next_line(), if stdin_open => {
                match line?.as_deref().map(str::trim) {
                    Some("r") => {
                        events.send(DrillEvent::Restart).await?;
                    }
                    Some("q") => break,
                    // without a terminal only ctrl-c ends the drill
                    None => stdin_open = false,
                    Some("") => {}
                    Some(other) => warn!(command = other, "unknown command, use `r` or `q`"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    acquisition.detach();
    events.send(DrillEvent::Detach).await?;
    let tracker = runner_task.await?;
    info!(
        state = %tracker.state(),
        shots = tracker.known_shots().len(),
        "drill ended"
    );
    Ok(())
}

/// Prints progress lines as snapshots change
#[derive(Default)]
struct Progress {
    printed: usize,
    restarts: u64,
    loading: bool,
    awaiting: bool,
    summarized: bool,
}

impl Progress {
    fn render(&mut self, snapshot: &TrackerSnapshot, compare: CompareDistance) {
        for line in self.lines(snapshot, compare) {
            println!("{line}");
        }
    }

    /// Lines that are new since the previous snapshot
    fn lines(&mut self, snapshot: &TrackerSnapshot, compare: CompareDistance) -> Vec<String> {
        let mut out = Vec::new();
        let loading = !snapshot.source_available;
        if loading && !self.loading {
            out.push("waiting for the launch monitor's output...".to_string());
        }
        self.loading = loading;

        // the watch channel may merge a restart with the shots that follow it
        if snapshot.restarts != self.restarts {
            out.push("-- drill restarted --".to_string());
            self.restarts = snapshot.restarts;
            self.printed = 0;
            self.summarized = false;
            self.awaiting = false;
        }

        for (i, shot) in snapshot.known_shots.iter().enumerate().skip(self.printed) {
            out.push(format!(
                "shot {:>2}/{}  id {:<6} target {}  carry {}  total {}  off {}  deviation {}",
                i + 1,
                snapshot.number_of_shots,
                shot.id,
                shot.target_distance,
                shot.carry_distance.to(shot.target_distance.unit),
                shot.total_distance.to(shot.target_distance.unit),
                shot.lateral_offset.to(shot.target_distance.unit),
                absolute_deviation(shot, compare)
            ));
        }
        if snapshot.known_shots.len() > self.printed {
            self.awaiting = false;
        }
        self.printed = snapshot.known_shots.len();

        if let (Some(target), false) = (snapshot.pending_target, self.awaiting) {
            if !loading {
                out.push(format!("next target: {target}"));
                self.awaiting = true;
            }
        }

        if snapshot.is_complete() && !self.summarized {
            let unit = snapshot
                .last_shot()
                .map(|s| s.target_distance.unit)
                .unwrap_or_default();
            let summary = SessionSummary::from_shots(&snapshot.known_shots, compare, unit);
            out.push(format!(
                "drill complete: mean deviation {}, max {}, std dev {}, relative sum {:.1}%",
                summary.mean_absolute_deviation,
                summary.max_absolute_deviation,
                summary.std_dev_absolute_deviation,
                summary.relative_deviation_sum_percent
            ));
            self.summarized = true;
        }
        out
    }
}
