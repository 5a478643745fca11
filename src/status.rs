/// Status file: writes the live run view as JSON whenever it changes.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::view::RunView;
use crate::worker::Phase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub phase: Phase,
    #[serde(flatten)]
    pub view: RunView,
    pub last_update: DateTime<Utc>,
}

impl StatusData {
    /// Snapshot the given view for the current process.
    pub fn new(phase: Phase, view: &RunView) -> Self {
        Self {
            pid: std::process::id(),
            phase,
            view: view.clone(),
            last_update: Utc::now(),
        }
    }
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// so readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".keepalive.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Write the view, logging instead of failing. The run must not depend on it.
    pub fn update(&self, phase: Phase, view: &RunView) {
        if let Err(e) = self.write(&StatusData::new(phase, view)) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{FinishReason, RunConfig, WorkerEvent};
    use tempfile::tempdir;

    fn running_view() -> RunView {
        let mut view = RunView::default();
        view.begin(Path::new("/mnt/archive/keepalive.bin"), RunConfig::new(60, 30));
        view.apply(&WorkerEvent::ProbeSucceeded {
            count: 3,
            at: Utc::now(),
        });
        view
    }

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.status");
        let sf = StatusFile::new(path.clone());

        sf.write(&StatusData::new(Phase::Running, &running_view()))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["pid"], std::process::id());
        assert_eq!(parsed["phase"], "running");
        assert_eq!(parsed["status"], "running");
        assert_eq!(parsed["probe_count"], 3);
        assert_eq!(parsed["target"], "/mnt/archive/keepalive.bin");
        assert_eq!(parsed["config"]["interval_secs"], 60);
        assert_eq!(parsed["config"]["max_duration_mins"], 30);
        assert!(parsed["last_probe_at"].is_string());
        assert!(parsed["last_update"].is_string());

        let tmp_path = dir
            .path()
            .join(format!(".keepalive.status.tmp.{}", std::process::id()));
        assert!(
            !tmp_path.exists(),
            "temp file should be cleaned up by rename"
        );
    }

    #[test]
    fn test_update_overwrites_previous_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.status");
        let sf = StatusFile::new(path.clone());

        let mut view = running_view();
        sf.update(Phase::Running, &view);

        view.apply(&WorkerEvent::Finished {
            reason: FinishReason::Stopped,
            probes: 3,
        });
        sf.update(Phase::Finished, &view);

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["phase"], "finished");
        assert_eq!(parsed["status"], "stopped");
        assert_eq!(parsed["finish_reason"], "stopped");
        assert!(parsed["seconds_to_next"].is_null());
    }

    #[test]
    fn test_status_file_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.status");
        let sf = StatusFile::new(path.clone());

        sf.update(Phase::Idle, &RunView::default());
        assert!(path.exists());

        sf.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/keepalive.status"));
        let result = sf.write(&StatusData::new(Phase::Idle, &RunView::default()));
        assert!(matches!(result, Err(StatusError::Write { .. })));

        // update() only logs
        sf.update(Phase::Idle, &RunView::default());
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::Write {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to write temp status file"));
        assert!(msg.contains("no perms"));
    }
}
