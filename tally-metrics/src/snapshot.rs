use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_common::UnixTimestamp;

use crate::store::{Counters, CurrentMetrics, Gauges, Timers};

/// Configuration of the periodic metrics snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// File to persist live metrics to. Snapshots are disabled when unset.
    pub path: Option<PathBuf>,
    /// Interval between snapshots in milliseconds.
    pub interval: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval: 60_000,
        }
    }
}

impl SnapshotConfig {
    /// Returns the snapshot interval, or `None` if snapshots are disabled.
    pub fn interval(&self) -> Option<Duration> {
        match (&self.path, self.interval) {
            (Some(_), ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

/// An error reading or writing a [`Snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot file could not be read.
    #[error("could not read snapshot {}", .0.display())]
    Read(PathBuf, #[source] io::Error),
    /// The snapshot file could not be written.
    #[error("could not write snapshot {}", .0.display())]
    Write(PathBuf, #[source] io::Error),
    /// The snapshot file does not contain a valid snapshot.
    #[error("invalid snapshot {}", .0.display())]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Live metrics persisted across worker restarts.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    /// Counter totals of the current window.
    pub counters: Counters,
    /// Last written gauge values.
    pub gauges: Gauges,
    /// Timer samples of the current window.
    pub timers: Timers,
    /// Startup time of the worker that wrote the snapshot.
    pub startup_time: UnixTimestamp,
}

impl Snapshot {
    /// Creates a snapshot of the given metrics.
    pub fn new(metrics: CurrentMetrics, startup_time: UnixTimestamp) -> Self {
        Self {
            counters: metrics.counters,
            gauges: metrics.gauges,
            timers: metrics.timers,
            startup_time,
        }
    }

    /// Returns the persisted metrics.
    pub fn into_metrics(self) -> CurrentMetrics {
        CurrentMetrics {
            counters: self.counters,
            timers: self.timers,
            gauges: self.gauges,
        }
    }

    /// Loads a snapshot from `path`. Returns `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(SnapshotError::Read(path.to_owned(), error)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|error| SnapshotError::Parse(path.to_owned(), error))
    }

    /// Writes the snapshot to `path`.
    ///
    /// The data is written to a sibling `.tmp` file first and then renamed over `path`, so readers
    /// never observe a partial snapshot.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let write_error = |error| SnapshotError::Write(path.to_owned(), error);
        let data = serde_json::to_vec(self).map_err(io::Error::from).map_err(write_error)?;
        fs::write(&temp_path, data).map_err(write_error)?;
        fs::rename(&temp_path, path).map_err(write_error)
    }
}
