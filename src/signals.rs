/// Signal handling for graceful shutdown.
///
/// First SIGINT (Ctrl-C) or SIGTERM: stop the run and let it finish its
/// current tick. Second signal within 3s: exit immediately.
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const DOUBLE_SIGNAL_WINDOW: Duration = Duration::from_secs(3);

/// What the front end should do after a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// Ask the worker to stop and wait for its terminal event.
    Graceful,
    /// Exit without waiting.
    Immediate,
}

/// Classifies signals by how close together they arrive.
#[derive(Debug, Default)]
pub struct SignalTracker {
    last: Option<Instant>,
}

impl SignalTracker {
    pub fn on_signal(&mut self, now: Instant) -> ShutdownRequest {
        let request = match self.last {
            Some(prev) if now.saturating_duration_since(prev) <= DOUBLE_SIGNAL_WINDOW => {
                ShutdownRequest::Immediate
            }
            _ => ShutdownRequest::Graceful,
        };
        self.last = Some(now);
        request
    }
}

/// Install SIGINT/SIGTERM listeners and return the stream of shutdown requests.
pub fn install() -> std::io::Result<mpsc::UnboundedReceiver<ShutdownRequest>> {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut tracker = SignalTracker::default();
        loop {
            #[cfg(unix)]
            let received = tokio::select! {
                res = tokio::signal::ctrl_c() => res.is_ok(),
                sig = sigterm.recv() => sig.is_some(),
            };
            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.is_ok();

            if !received {
                tracing::warn!("signal listener closed");
                return;
            }

            let request = tracker.on_signal(Instant::now());
            tracing::info!(?request, "shutdown signal received");
            if tx.send(request).is_err() {
                return;
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_is_graceful() {
        let mut tracker = SignalTracker::default();
        assert_eq!(tracker.on_signal(Instant::now()), ShutdownRequest::Graceful);
    }

    #[test]
    fn test_quick_second_signal_is_immediate() {
        let mut tracker = SignalTracker::default();
        let t0 = Instant::now();
        tracker.on_signal(t0);
        assert_eq!(
            tracker.on_signal(t0 + Duration::from_secs(1)),
            ShutdownRequest::Immediate
        );
    }

    #[test]
    fn test_slow_second_signal_is_graceful_again() {
        let mut tracker = SignalTracker::default();
        let t0 = Instant::now();
        tracker.on_signal(t0);
        assert_eq!(
            tracker.on_signal(t0 + Duration::from_secs(10)),
            ShutdownRequest::Graceful
        );
        // The window restarts from the latest signal
        assert_eq!(
            tracker.on_signal(t0 + Duration::from_secs(12)),
            ShutdownRequest::Immediate
        );
    }
}
