//! Replay a JSONL event capture through the sync core.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tether_core::SystemClock;
use tether_settings::TetherSettings;
use tether_store::GraphSnapshot;
use tether_sync::{EventRouter, InboundEvent, RecordingObserver, SessionDispatcher, graph_from_settings};
use tracing::info;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added to the grace period so pending timers have fired.
const GRACE_MARGIN: Duration = Duration::from_millis(50);

/// Outcome of a replay.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Events read from the capture.
    pub events: usize,
    /// Events dropped (duplicate, stale, malformed, unknown type, ...).
    pub dropped: usize,
    /// Canonical records rejected by foreign-key validation.
    pub rejected: usize,
    /// Optimistic records replaced by canonical ones.
    pub reconciled: usize,
    /// Optimistic records purged as orphans.
    pub purged: usize,
    /// Store contents after the replay.
    pub snapshot: GraphSnapshot,
}

/// Read one envelope per non-blank line.
pub fn read_events(path: &Path) -> Result<Vec<InboundEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capture: {}", path.display()))?;
    parse_events(&content)
}

fn parse_events(content: &str) -> Result<Vec<InboundEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", n + 1))
        })
        .collect()
}

/// Route `events` through per-session workers and report the final state.
///
/// With `wait`, the replay sleeps through the grace period so completed
/// sessions have their orphans purged before the snapshot is taken.
pub async fn run(settings: &TetherSettings, events: Vec<InboundEvent>, wait: bool) -> Result<ReplayReport> {
    let graph = Arc::new(graph_from_settings(&settings.sync, Arc::new(SystemClock)));
    let observer = Arc::new(RecordingObserver::new());
    let router = EventRouter::with_observer(graph, settings.sync.clone(), observer.clone());
    let dispatcher = SessionDispatcher::new(router.clone());

    let total = events.len();
    for event in events {
        dispatcher.dispatch(event).await.context("Failed to dispatch event")?;
    }
    if !dispatcher.drain(DRAIN_TIMEOUT).await {
        bail!("session workers did not finish within {DRAIN_TIMEOUT:?}");
    }
    info!(events = total, sessions = router.tracked_sessions(), "capture routed");

    if wait {
        tokio::time::sleep(settings.sync.grace_period() + GRACE_MARGIN).await;
    }
    let _ = dispatcher.shutdown(Duration::ZERO).await;

    Ok(ReplayReport {
        events: total,
        dropped: observer.routing_errors().len(),
        rejected: observer.validation_errors().len(),
        reconciled: observer.reconciliations().len(),
        purged: observer.purges().iter().map(tether_store::PurgeReport::total).sum(),
        snapshot: router.graph().snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CAPTURE: &str = r#"
{"eventId":"e0","sequence":0,"type":"session.created","sessionID":"s1","properties":{"info":{"id":"s1","directory":"/w"}}}
{"eventId":"e2","sequence":2,"type":"message.part.updated","sessionID":"s1","properties":{"part":{"id":"p1","messageID":"m1","type":"text","text":"hi"}}}
{"eventId":"e1","sequence":1,"type":"message.updated","sessionID":"s1","properties":{"info":{"id":"m1","role":"user","sessionID":"s1","createdAt":5}}}
{"eventId":"e1","sequence":1,"type":"message.updated","sessionID":"s1","properties":{"info":{"id":"m1","role":"user","sessionID":"s1","createdAt":5}}}

{"eventId":"e3","sequence":3,"type":"session.idle","sessionID":"s1","properties":{"sessionID":"s1"}}
"#;

    #[test]
    fn parses_lines_skipping_blanks() {
        let events = parse_events(CAPTURE).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].sequence, 2);
    }

    #[test]
    fn reports_line_of_bad_event() {
        let err = parse_events("{\"eventId\":\"e0\"}\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn reads_capture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CAPTURE.as_bytes()).unwrap();
        assert_eq!(read_events(file.path()).unwrap().len(), 5);
        assert!(read_events(Path::new("/nonexistent/capture.jsonl")).is_err());
    }

    #[tokio::test]
    async fn replay_builds_snapshot() {
        let events = parse_events(CAPTURE).unwrap();
        let report = run(&TetherSettings::default(), events, false).await.unwrap();
        assert_eq!(report.events, 5);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.snapshot.messages.len(), 1);
        assert_eq!(report.snapshot.parts.len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["snapshot"]["parts"][0]["id"], "p1");
    }
}
