//! Key-flush sampling: periodic reports of the most frequently received keys.

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Log target name that writes key reports to standard output.
const STDOUT: &str = "stdout";

/// Configuration of the key-flush sampler.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyFlushConfig {
    /// Interval between reports in milliseconds. `0` disables sampling.
    pub interval: u64,
    /// Share of the ranked keys to report, in percent.
    pub percent: f64,
    /// Either `stdout` or the path of a file to append to.
    pub log: String,
}

impl Default for KeyFlushConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            percent: 100.0,
            log: STDOUT.to_owned(),
        }
    }
}

impl KeyFlushConfig {
    /// Returns the sampling interval, or `None` if sampling is disabled.
    pub fn interval(&self) -> Option<Duration> {
        match self.interval {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Returns where reports are written.
    pub fn target(&self) -> KeyFlushTarget {
        if self.log == STDOUT {
            KeyFlushTarget::Stdout
        } else {
            KeyFlushTarget::File(PathBuf::from(&self.log))
        }
    }
}

/// Destination of key-flush reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyFlushTarget {
    /// Standard output of the worker.
    Stdout,
    /// A file opened in append mode for every report.
    File(PathBuf),
}

impl KeyFlushTarget {
    /// Appends the report text to the target.
    pub async fn write(&self, text: &str) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await
            }
            Self::File(path) => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(text.as_bytes()).await?;
                file.flush().await
            }
        }
    }
}

/// Ranks keys by descending frequency and keeps the top `percent`.
///
/// Keys with equal counts keep their first-seen order. The number of keys kept is
/// `ceil(len * percent / 100)`.
pub fn rank_keys(frequencies: IndexMap<String, u64>, percent: f64) -> Vec<(String, u64)> {
    let mut ranked: Vec<_> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = (ranked.len() as f64 * percent / 100.0).ceil().max(0.0) as usize;
    ranked.truncate(keep);
    ranked
}

/// Renders one `<timestamp> <count> <key>` line per ranked key.
pub fn render_key_report(ranked: &[(String, u64)], time: DateTime<Utc>) -> String {
    let timestamp = time.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut text = String::new();
    for (key, count) in ranked {
        writeln!(text, "{timestamp} {count} {key}").ok();
    }
    text
}
