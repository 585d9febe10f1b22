use crate::error::SourceError;
use crate::shot::{RawRecord, RawValue};
use crate::tracker::BatchKind;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// How the acquisition layer learns about new shots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// File-change notifications on the last-shot CSV, one record per read
    EventLatestOnly,
    /// File-change notifications on the session log directory, whole log per read
    EventFullRescan,
    /// Whole session log re-read every `interval`
    Polling { interval: Duration },
}

impl AcquisitionMode {
    pub fn batch_kind(&self) -> BatchKind {
        match self {
            AcquisitionMode::EventLatestOnly => BatchKind::LatestOnly,
            AcquisitionMode::EventFullRescan | AcquisitionMode::Polling { .. } => BatchKind::FullRescan,
        }
    }

    pub fn is_polling(&self) -> bool {
        matches!(self, AcquisitionMode::Polling { .. })
    }
}

fn unavailable_or_io(path: &Path, e: io::Error) -> SourceError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => SourceError::Unavailable {
            path: path.to_path_buf(),
        },
        _ => SourceError::Io(e),
    }
}

/// First data row of the device's last-shot CSV. `Ok(None)` when the file
/// only holds a header.
pub fn read_latest_shot(path: &Path) -> Result<Option<RawRecord>, SourceError> {
    let bytes = fs::read(path).map_err(|e| unavailable_or_io(path, e))?;
    let parse_err = |e: csv::Error| SourceError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers = rdr.headers().map_err(parse_err)?.clone();

    match rdr.records().next() {
        Some(row) => {
            let row = row.map_err(parse_err)?;
            Ok(Some(RawRecord::from_csv_row(headers.iter(), row.iter())))
        }
        None => Ok(None),
    }
}

/// Most recently modified `*.json` file in `dir`
pub fn latest_session_log(dir: &Path) -> Result<Option<PathBuf>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|e| unavailable_or_io(dir, e))?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if latest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Every shot of the current session log, in file order. An empty directory
/// is a session log without shots.
pub fn read_session_log(dir: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let Some(path) = latest_session_log(dir)? else {
        debug!(dir = %dir.display(), "no session log yet");
        return Ok(Vec::new());
    };

    let bytes = fs::read(&path).map_err(|e| unavailable_or_io(&path, e))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    // per-shot `Units` wins over the log-wide one
    let units = value.get("Units").and_then(serde_json::Value::as_str);
    let records = match value.get("Shots") {
        Some(serde_json::Value::Array(shots)) => shots
            .iter()
            .map(|entry| {
                let mut record = RawRecord::from_log_entry(entry);
                if let Some(units) = units {
                    record
                        .fields
                        .entry("Units".to_string())
                        .or_insert_with(|| RawValue::Text(units.to_string()));
                }
                record
            })
            .collect(),
        Some(_) => {
            return Err(SourceError::Parse {
                path,
                reason: "`Shots` is not an array".into(),
            })
        }
        None => Vec::new(),
    };
    debug!(log = %path.display(), records = records.len(), "session log read");
    Ok(records)
}

/// Reads the source the way `mode` expects it
pub fn read_records(mode: AcquisitionMode, path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    match mode {
        AcquisitionMode::EventLatestOnly => Ok(read_latest_shot(path)?.into_iter().collect()),
        AcquisitionMode::EventFullRescan | AcquisitionMode::Polling { .. } => read_session_log(path),
    }
}
