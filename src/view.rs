/// Observer-side summary of a run, folded from worker events.
///
/// This is what a front end shows: probe count, run time, countdown,
/// last probe time and the last error.
use crate::worker::{format_elapsed, FinishReason, RunConfig, WorkerEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Coarse status label for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub status: RunStatus,
    pub target: Option<PathBuf>,
    pub config: Option<RunConfig>,
    pub probe_count: u64,
    /// Run time as `HH:MM:SS`.
    pub elapsed: String,
    /// Seconds until the next probe; `None` when not counting down.
    pub seconds_to_next: Option<u64>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl Default for RunView {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            target: None,
            config: None,
            probe_count: 0,
            elapsed: format_elapsed(std::time::Duration::ZERO),
            seconds_to_next: None,
            last_probe_at: None,
            last_error: None,
            finish_reason: None,
        }
    }
}

impl RunView {
    /// Reset for a run that was just started.
    pub fn begin(&mut self, target: &Path, config: RunConfig) {
        *self = Self {
            status: RunStatus::Running,
            target: Some(target.to_path_buf()),
            config: Some(config),
            ..Self::default()
        };
    }

    pub fn apply(&mut self, event: &WorkerEvent) {
        match event {
            WorkerEvent::ProbeSucceeded { count, at } => {
                self.probe_count = *count;
                self.last_probe_at = Some(*at);
            }
            WorkerEvent::CountdownTick {
                elapsed,
                seconds_to_next,
            } => {
                self.elapsed = format_elapsed(*elapsed);
                self.seconds_to_next = Some(*seconds_to_next);
            }
            WorkerEvent::ProbeFailed { message } => {
                self.status = RunStatus::Error;
                self.seconds_to_next = None;
                self.last_error = Some(message.clone());
            }
            WorkerEvent::Finished { reason, probes } => {
                self.status = RunStatus::Stopped;
                self.seconds_to_next = None;
                self.probe_count = *probes;
                self.finish_reason = Some(*reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn running_view() -> RunView {
        let mut view = RunView::default();
        view.begin(Path::new("/mnt/disk/keepalive.bin"), RunConfig::new(60, 0));
        view
    }

    #[test]
    fn test_default_is_idle() {
        let view = RunView::default();
        assert_eq!(view.status, RunStatus::Idle);
        assert_eq!(view.elapsed, "00:00:00");
        assert!(view.target.is_none());
    }

    #[test]
    fn test_begin_resets_previous_run() {
        let mut view = running_view();
        view.apply(&WorkerEvent::ProbeFailed {
            message: "gone".to_string(),
        });
        assert_eq!(view.status, RunStatus::Error);

        view.begin(Path::new("/mnt/other.bin"), RunConfig::new(5, 10));
        assert_eq!(view.status, RunStatus::Running);
        assert_eq!(view.probe_count, 0);
        assert!(view.last_error.is_none());
        assert_eq!(view.config, Some(RunConfig::new(5, 10)));
    }

    #[test]
    fn test_probe_and_tick_update_counters() {
        let mut view = running_view();
        let at = Utc::now();
        view.apply(&WorkerEvent::ProbeSucceeded { count: 7, at });
        view.apply(&WorkerEvent::CountdownTick {
            elapsed: Duration::from_secs(3725),
            seconds_to_next: 42,
        });

        assert_eq!(view.probe_count, 7);
        assert_eq!(view.last_probe_at, Some(at));
        assert_eq!(view.elapsed, "01:02:05");
        assert_eq!(view.seconds_to_next, Some(42));
        assert_eq!(view.status, RunStatus::Running);
    }

    #[test]
    fn test_finished_clears_countdown() {
        let mut view = running_view();
        view.apply(&WorkerEvent::CountdownTick {
            elapsed: Duration::from_secs(1),
            seconds_to_next: 3,
        });
        view.apply(&WorkerEvent::Finished {
            reason: FinishReason::DurationReached,
            probes: 9,
        });

        assert_eq!(view.status, RunStatus::Stopped);
        assert_eq!(view.seconds_to_next, None);
        assert_eq!(view.probe_count, 9);
        assert_eq!(view.finish_reason, Some(FinishReason::DurationReached));
        // Run time stays visible after the run ends
        assert_eq!(view.elapsed, "00:00:01");
    }

    #[test]
    fn test_failure_records_message() {
        let mut view = running_view();
        view.apply(&WorkerEvent::ProbeFailed {
            message: "failed to open /mnt/disk/keepalive.bin".to_string(),
        });
        assert_eq!(view.status, RunStatus::Error);
        assert_eq!(
            view.last_error.as_deref(),
            Some("failed to open /mnt/disk/keepalive.bin")
        );
        assert!(view.finish_reason.is_none());
    }
}
