use crate::app_dirs::AppDirs;
use crate::deviation::CompareDistance;
use crate::drill::DrillRef;
use crate::session::Session;
use crate::shot::Shot;
use crate::units::{Length, LengthUnit};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Receives every finalized session. Fire and forget: the tracker neither
/// waits for nor retries a save; failures are the sink's to report.
pub trait SessionSink {
    fn save_session(&mut self, session: &Session);
}

impl SessionSink for Vec<Session> {
    fn save_session(&mut self, session: &Session) {
        self.push(session.clone());
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        player_id TEXT,
        drill_id TEXT NOT NULL,
        drill_name TEXT NOT NULL,
        number_of_shots INTEGER NOT NULL,
        compare TEXT NOT NULL,
        unit TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS session_shots (
        session_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        shot_id INTEGER NOT NULL,
        carry_m REAL NOT NULL,
        total_m REAL NOT NULL,
        offline_m REAL NOT NULL,
        target_value REAL NOT NULL,
        target_unit TEXT NOT NULL,
        PRIMARY KEY (session_id, seq)
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_player ON sessions(player_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at);
"#;

fn conversion_error(col: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_uuid(row: &Row, col: usize) -> Result<Uuid> {
    let s: String = row.get(col)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(col, e))
}

fn parse_unit(row: &Row, col: usize) -> Result<LengthUnit> {
    let s: String = row.get(col)?;
    s.parse::<LengthUnit>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, "unit".to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_compare(row: &Row, col: usize) -> Result<CompareDistance> {
    let s: String = row.get(col)?;
    match s.as_str() {
        "carry" => Ok(CompareDistance::Carry),
        "total" => Ok(CompareDistance::Total),
        _ => Err(rusqlite::Error::InvalidColumnType(
            col,
            "compare".to_string(),
            rusqlite::types::Type::Text,
        )),
    }
}

/// Fixed-width UTC text, so `ORDER BY created_at` is chronological across offset changes
fn created_at_text(at: &DateTime<Local>) -> String {
    at.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn compare_name(compare: CompareDistance) -> &'static str {
    match compare {
        CompareDistance::Carry => "carry",
        CompareDistance::Total => "total",
    }
}

/// Finished sessions in SQLite, optionally mirrored to a CSV summary log
#[derive(Debug)]
pub struct SessionStore {
    conn: Connection,
    summary_log: Option<PathBuf>,
}

impl SessionStore {
    /// Opens (or creates) the database at `path`, or the default state location
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = path
            .map(Path::to_path_buf)
            .or_else(AppDirs::db_path)
            .unwrap_or_else(|| PathBuf::from("approachshot_sessions.db"));

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }

        Self::init(Connection::open(&db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(SessionStore {
            conn,
            summary_log: None,
        })
    }

    /// Also append a one-line summary per saved session to `path`
    pub fn with_summary_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_log = Some(path.into());
        self
    }

    pub fn insert_session(&mut self, session: &Session) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sessions
            (id, name, player_id, drill_id, drill_name, number_of_shots, compare, unit, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                session.id.to_string(),
                session.name,
                session.player_id.map(|p| p.to_string()),
                session.drill.id.to_string(),
                session.drill.name,
                session.drill.number_of_shots as i64,
                compare_name(session.drill.compare),
                session.drill.unit.name(),
                created_at_text(&session.created_at),
            ],
        )?;

        for (seq, shot) in session.shots.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO session_shots
                (session_id, seq, shot_id, carry_m, total_m, offline_m, target_value, target_unit)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    session.id.to_string(),
                    seq as i64,
                    shot.id as i64,
                    shot.carry_distance.as_meters(),
                    shot.total_distance.as_meters(),
                    shot.lateral_offset.as_meters(),
                    shot.target_distance.value,
                    shot.target_distance.unit.name(),
                ],
            )?;
        }

        tx.commit()
    }

    fn load_shots(&self, session_id: Uuid) -> Result<Vec<Shot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT shot_id, carry_m, total_m, offline_m, target_value, target_unit
            FROM session_shots
            WHERE session_id = ?1
            ORDER BY seq
            "#,
        )?;

        let shots = stmt.query_map([session_id.to_string()], |row| {
            Ok(Shot {
                id: row.get::<_, i64>(0)? as u64,
                carry_distance: Length::meters(row.get(1)?),
                total_distance: Length::meters(row.get(2)?),
                lateral_offset: Length::meters(row.get(3)?),
                target_distance: Length::new(row.get(4)?, parse_unit(row, 5)?),
            })
        })?;

        shots.collect()
    }

    fn session_from_row(row: &Row) -> Result<Session> {
        let created_at: String = row.get(8)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion_error(8, e))?
            .with_timezone(&Local);
        let player_id: Option<String> = row.get(2)?;
        let player_id = player_id
            .map(|p| Uuid::parse_str(&p).map_err(|e| conversion_error(2, e)))
            .transpose()?;

        Ok(Session {
            id: parse_uuid(row, 0)?,
            name: row.get(1)?,
            player_id,
            drill: DrillRef {
                id: parse_uuid(row, 3)?,
                name: row.get(4)?,
                number_of_shots: row.get::<_, i64>(5)? as usize,
                compare: parse_compare(row, 6)?,
                unit: parse_unit(row, 7)?,
            },
            shots: Vec::new(),
            created_at,
        })
    }

    const SESSION_COLUMNS: &'static str =
        "id, name, player_id, drill_id, drill_name, number_of_shots, compare, unit, created_at";

    pub fn load_session(&self, id: Uuid) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", Self::SESSION_COLUMNS);
        let session = self
            .conn
            .query_row(&sql, [id.to_string()], Self::session_from_row)
            .optional()?;

        match session {
            Some(mut session) => {
                session.shots = self.load_shots(session.id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Sessions, most recent first; only one player's when `player` is given
    pub fn list_sessions(&self, player: Option<Uuid>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE ?1 IS NULL OR player_id = ?1 ORDER BY created_at DESC",
            Self::SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let headers = stmt
            .query_map([player.map(|p| p.to_string())], Self::session_from_row)?
            .collect::<Result<Vec<Session>>>()?;

        headers
            .into_iter()
            .map(|mut session| {
                session.shots = self.load_shots(session.id)?;
                Ok(session)
            })
            .collect()
    }

    pub fn delete_session(&mut self, id: Uuid) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM session_shots WHERE session_id = ?1",
            [id.to_string()],
        )?;
        let deleted = tx.execute("DELETE FROM sessions WHERE id = ?1", [id.to_string()])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

impl SessionSink for SessionStore {
    fn save_session(&mut self, session: &Session) {
        match self.insert_session(session) {
            Ok(()) => info!(session = %session.name, "session saved"),
            Err(e) => warn!(session = %session.name, error = %e, "failed to save session"),
        }
        if let Some(path) = &self.summary_log {
            if let Err(e) = append_summary(path, session) {
                warn!(path = %path.display(), error = %e, "failed to append session summary");
            }
        }
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    date: String,
    name: &'a str,
    player: String,
    drill: &'a str,
    shots: usize,
    unit: &'a str,
    mean_abs_deviation: String,
    max_abs_deviation: String,
    relative_deviation_sum_pct: String,
}

const SUMMARY_HEADER: [&str; 9] = [
    "date",
    "name",
    "player",
    "drill",
    "shots",
    "unit",
    "mean_abs_deviation",
    "max_abs_deviation",
    "relative_deviation_sum_pct",
];

/// Appends one row per session; the header is written when the file is new
pub fn append_summary(path: &Path, session: &Session) -> std::result::Result<(), csv::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_header = !path.exists();

    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer.write_record(SUMMARY_HEADER)?;
    }

    let summary = session.summary();
    writer.serialize(SummaryRow {
        date: session.created_at.format("%c").to_string(),
        name: &session.name,
        player: session
            .player_id
            .map_or(String::new(), |p| p.to_string()),
        drill: &session.drill.name,
        shots: summary.shots,
        unit: session.drill.unit.name(),
        mean_abs_deviation: format!("{:.2}", summary.mean_absolute_deviation.value),
        max_abs_deviation: format!("{:.2}", summary.max_absolute_deviation.value),
        relative_deviation_sum_pct: format!("{:.2}", summary.relative_deviation_sum_percent),
    })?;
    writer.flush()?;
    Ok(())
}
