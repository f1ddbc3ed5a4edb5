/// Append-only operations file.
///
/// Every operator-visible action gets one timestamped text line. Reset
/// truncates the file. Logging failures are never allowed to interfere with
/// motion control, so everything here degrades to a warning.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::warn;

#[derive(Debug, Clone)]
pub struct OpsLog {
    path: PathBuf,
}

impl OpsLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line, e.g. `[2025-03-01 14:02:11.482] SEND d`.
    pub fn append(&self, line: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let entry = format!("[{}] {}\n", ts, line);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()));
        if let Err(e) = result {
            warn!(target: "ops_log", "failed to append to {:?}: {}", self.path, e);
        }
    }

    /// Truncate the file (reset).
    pub fn reset(&self) {
        if let Err(e) = std::fs::write(&self.path, b"") {
            warn!(target: "ops_log", "failed to reset {:?}: {}", self.path, e);
        }
    }
}
