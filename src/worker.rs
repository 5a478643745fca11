/// Background keep-alive worker.
///
/// A run probes the target once, then counts down `interval_secs` one-second
/// ticks, and repeats until it is stopped, the optional duration limit is
/// exceeded, or a probe fails. Progress is pushed to the observer through an
/// unbounded channel so the loop never waits on the receiving side.
use crate::probe::{ProbeError, ProbeTarget};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Countdown granularity. Also the upper bound on stop latency.
const TICK: Duration = Duration::from_secs(1);

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Stopping,
    Errored,
    Finished,
}

impl Phase {
    /// Whether a run in this phase still has a live task.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::Stopping)
    }

    fn to_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Running => 1,
            Phase::Stopping => 2,
            Phase::Errored => 3,
            Phase::Finished => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Running,
            2 => Phase::Stopping,
            3 => Phase::Errored,
            4 => Phase::Finished,
            _ => Phase::Idle,
        }
    }
}

/// Phase flag shared between the worker handle and its run task.
#[derive(Debug)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase.to_u8()))
    }

    fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, phase: Phase) {
        self.0.store(phase.to_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns false if the phase was something else.
    fn transition(&self, from: Phase, to: Phase) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Timing parameters of a run. Fixed once the run has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    /// Seconds between probes. Must be positive.
    pub interval_secs: u64,
    /// Total run time limit in minutes; 0 runs until stopped.
    pub max_duration_mins: u64,
}

impl RunConfig {
    pub fn new(interval_secs: u64, max_duration_mins: u64) -> Self {
        Self {
            interval_secs,
            max_duration_mins,
        }
    }

    pub fn validate(&self) -> Result<(), StartError> {
        if self.interval_secs == 0 {
            return Err(StartError::InvalidConfig {
                reason: "interval must be greater than 0 seconds".to_string(),
                source: None,
            });
        }
        Ok(())
    }

    /// The duration limit, or `None` when the run is unbounded.
    pub fn max_duration(&self) -> Option<Duration> {
        match self.max_duration_mins {
            0 => None,
            mins => Some(Duration::from_secs(mins.saturating_mul(60))),
        }
    }
}

/// Why a run ended with `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// `stop()` was called.
    Stopped,
    /// Elapsed time passed `max_duration_mins`.
    DurationReached,
}

/// Notifications sent from a run to its observer, in loop order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    ProbeSucceeded {
        count: u64,
        at: DateTime<Utc>,
    },
    CountdownTick {
        #[serde(serialize_with = "serialize_elapsed")]
        elapsed: Duration,
        seconds_to_next: u64,
    },
    /// Terminal event of a run that ended in `Errored`.
    ProbeFailed { message: String },
    /// Terminal event of a run that ended in `Finished`.
    Finished { reason: FinishReason, probes: u64 },
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::ProbeFailed { .. } | WorkerEvent::Finished { .. }
        )
    }
}

/// Render a run time as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn serialize_elapsed<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_elapsed(*elapsed))
}

/// Errors returned synchronously by [`KeepAliveWorker::start`].
#[derive(Debug)]
pub enum StartError {
    /// Bad interval or unusable target path. No run was started.
    InvalidConfig {
        reason: String,
        source: Option<ProbeError>,
    },
    /// The previous run has not terminated yet.
    AlreadyRunning,
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::InvalidConfig { reason, .. } => {
                write!(f, "invalid configuration: {reason}")
            }
            StartError::AlreadyRunning => write!(f, "a keep-alive run is already in progress"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::InvalidConfig {
                source: Some(source),
                ..
            } => Some(source),
            _ => None,
        }
    }
}

impl From<ProbeError> for StartError {
    fn from(e: ProbeError) -> Self {
        StartError::InvalidConfig {
            reason: e.to_string(),
            source: Some(e),
        }
    }
}

/// Owns the current run and the channel its events go out on.
///
/// `start` spawns the run on the current Tokio runtime and must therefore be
/// called from within one.
pub struct KeepAliveWorker {
    events: mpsc::UnboundedSender<WorkerEvent>,
    phase: Arc<PhaseCell>,
    task: Option<JoinHandle<()>>,
}

impl KeepAliveWorker {
    pub fn new(events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            events,
            phase: Arc::new(PhaseCell::new(Phase::Idle)),
            task: None,
        }
    }

    /// Current phase of the latest run (`Idle` before the first one).
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Validate the inputs and start a new run in the background.
    ///
    /// Returns the resolved target path as soon as the run task is spawned; the
    /// phase is `Running` on return. A terminated run (`Finished` or `Errored`)
    /// is replaced without further cleanup.
    pub fn start(
        &mut self,
        target: impl AsRef<Path>,
        config: RunConfig,
    ) -> Result<PathBuf, StartError> {
        if self.phase().is_active() {
            return Err(StartError::AlreadyRunning);
        }
        config.validate()?;
        let target = ProbeTarget::new(target)?;

        tracing::info!(
            path = %target.path().display(),
            interval_secs = config.interval_secs,
            max_duration_mins = config.max_duration_mins,
            "keep-alive run started"
        );

        let resolved = target.path().to_path_buf();
        let phase = Arc::new(PhaseCell::new(Phase::Running));
        let run = Run {
            target,
            config,
            phase: Arc::clone(&phase),
            events: self.events.clone(),
            state: RunState::begin(),
        };

        self.phase = phase;
        self.task = Some(tokio::spawn(run.execute()));
        Ok(resolved)
    }

    /// Ask the current run to stop at its next check point. Never blocks.
    pub fn stop(&self) {
        if self.phase.transition(Phase::Running, Phase::Stopping) {
            tracing::info!("keep-alive stop requested");
        }
    }

    /// Wait for the current run task to terminate.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "keep-alive run task failed");
            }
        }
    }
}

impl Drop for KeepAliveWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-run bookkeeping, only touched by the run task.
struct RunState {
    probe_count: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    last_probe_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn begin() -> Self {
        Self {
            probe_count: 0,
            started: Instant::now(),
            started_at: Utc::now(),
            last_probe_at: None,
        }
    }
}

enum Outcome {
    Stopped,
    DurationReached,
    Failed(ProbeError),
}

struct Run {
    target: ProbeTarget,
    config: RunConfig,
    phase: Arc<PhaseCell>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: RunState,
}

impl Run {
    async fn execute(mut self) {
        let outcome = self.run_loop().await;

        // Phase goes terminal before the terminal event is sent so an observer
        // reacting to the event can start the next run right away.
        let terminal = match outcome {
            Outcome::Failed(e) => {
                tracing::warn!(
                    error = %e,
                    probes = self.state.probe_count,
                    "keep-alive probe failed, run aborted"
                );
                self.phase.set(Phase::Errored);
                WorkerEvent::ProbeFailed {
                    message: e.to_string(),
                }
            }
            Outcome::Stopped => self.finish(FinishReason::Stopped),
            Outcome::DurationReached => self.finish(FinishReason::DurationReached),
        };
        self.emit(terminal);
    }

    fn finish(&self, reason: FinishReason) -> WorkerEvent {
        tracing::info!(
            ?reason,
            probes = self.state.probe_count,
            started_at = %self.state.started_at,
            last_probe_at = ?self.state.last_probe_at,
            "keep-alive run finished"
        );
        self.phase.set(Phase::Finished);
        WorkerEvent::Finished {
            reason,
            probes: self.state.probe_count,
        }
    }

    async fn run_loop(&mut self) -> Outcome {
        loop {
            if self.phase.get() != Phase::Running {
                return Outcome::Stopped;
            }

            if let Err(e) = self.target.probe_async().await {
                return Outcome::Failed(e);
            }
            self.state.probe_count += 1;
            let now = Utc::now();
            self.state.last_probe_at = Some(now);
            tracing::debug!(count = self.state.probe_count, "probe succeeded");
            self.emit(WorkerEvent::ProbeSucceeded {
                count: self.state.probe_count,
                at: now,
            });

            if let Some(limit) = self.config.max_duration() {
                if self.state.started.elapsed() > limit {
                    return Outcome::DurationReached;
                }
            }

            for remaining in (1..=self.config.interval_secs).rev() {
                if self.phase.get() != Phase::Running {
                    return Outcome::Stopped;
                }
                let elapsed = self.state.started.elapsed();
                tracing::trace!(
                    elapsed = %format_elapsed(elapsed),
                    seconds_to_next = remaining,
                    "countdown tick"
                );
                self.emit(WorkerEvent::CountdownTick {
                    elapsed,
                    seconds_to_next: remaining,
                });
                tokio::time::sleep(TICK).await;
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // A closed receiver only means nobody is listening anymore.
        let _ = self.events.send(event);
    }
}
