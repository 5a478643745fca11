/// Console rendering of worker events for the foreground front end.
use crate::worker::{format_elapsed, FinishReason, WorkerEvent};
use chrono::Local;

/// One line of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Out(String),
    Err(String),
}

/// Turn an event into a console line. Countdown ticks have no line of their own.
pub fn render(event: &WorkerEvent) -> Option<Line> {
    match event {
        WorkerEvent::ProbeSucceeded { count, at } => Some(Line::Out(format!(
            "probe #{count} at {}",
            at.with_timezone(&Local).format("%H:%M:%S")
        ))),
        WorkerEvent::CountdownTick { .. } => None,
        WorkerEvent::ProbeFailed { message } => {
            Some(Line::Err(format!("probe failed, run aborted: {message}")))
        }
        WorkerEvent::Finished { reason, probes } => {
            let why = match reason {
                FinishReason::Stopped => "stopped",
                FinishReason::DurationReached => "duration limit reached",
            };
            Some(Line::Out(format!("{why} after {probes} probe(s)")))
        }
    }
}

/// Print an event. `quiet` suppresses everything except failures.
pub fn report(event: &WorkerEvent, quiet: bool) {
    if let WorkerEvent::CountdownTick {
        elapsed,
        seconds_to_next,
    } = event
    {
        tracing::debug!(
            runtime = %format_elapsed(*elapsed),
            seconds_to_next,
            "waiting for next probe"
        );
    }

    match render(event) {
        Some(Line::Err(text)) => eprintln!("{text}"),
        Some(Line::Out(text)) if !quiet => println!("{text}"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_probe_line_has_count_and_clock_time() {
        let line = render(&WorkerEvent::ProbeSucceeded {
            count: 12,
            at: Utc::now(),
        });
        match line {
            Some(Line::Out(text)) => {
                assert!(text.starts_with("probe #12 at "), "{text}");
                // HH:MM:SS
                assert_eq!(text.len(), "probe #12 at ".len() + 8);
            }
            other => panic!("unexpected line {other:?}"),
        }
    }

    #[test]
    fn test_tick_renders_nothing() {
        let line = render(&WorkerEvent::CountdownTick {
            elapsed: Duration::from_secs(5),
            seconds_to_next: 55,
        });
        assert!(line.is_none());
    }

    #[test]
    fn test_failure_goes_to_stderr() {
        let line = render(&WorkerEvent::ProbeFailed {
            message: "failed to open /mnt/x: No such file or directory".to_string(),
        });
        assert_eq!(
            line,
            Some(Line::Err(
                "probe failed, run aborted: failed to open /mnt/x: No such file or directory"
                    .to_string()
            ))
        );
    }

    #[test]
    fn test_finished_lines() {
        assert_eq!(
            render(&WorkerEvent::Finished {
                reason: FinishReason::Stopped,
                probes: 2,
            }),
            Some(Line::Out("stopped after 2 probe(s)".to_string()))
        );
        assert_eq!(
            render(&WorkerEvent::Finished {
                reason: FinishReason::DurationReached,
                probes: 31,
            }),
            Some(Line::Out("duration limit reached after 31 probe(s)".to_string()))
        );
    }
}
