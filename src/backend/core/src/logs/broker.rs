//! Fan-out of live log lines to many subscribers.
//!
//! All subscribers of one job+stream share the single broadcast channel
//! owned by the aggregator; there is no per-subscriber file watcher.
//! Each subscriber is bounded by the broadcast ring: a subscriber that
//! falls too far behind receives one explicit [`TailEvent::Overflow`]
//! and is then disconnected, so a slow consumer can never stall the
//! writer or the other subscribers, and lines are never silently
//! dropped without notice.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::aggregator::{JobLogs, LogStream};
use crate::error::Result;

/// An event delivered to one tail subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// One log line, in writer order.
    Line(String),
    /// The subscriber lagged past its buffer; the stream ends after this.
    Overflow,
}

/// One subscriber's view of a stream: replay first, then live.
pub struct Subscription {
    replay: std::vec::IntoIter<String>,
    live: broadcast::Receiver<Arc<str>>,
    overflowed: bool,
}

impl Subscription {
    /// Next event, or `None` once the stream is exhausted (writer gone,
    /// or terminated by overflow).
    pub async fn next_event(&mut self) -> Option<TailEvent> {
        if let Some(line) = self.replay.next() {
            return Some(TailEvent::Line(line));
        }
        if self.overflowed {
            return None;
        }
        match self.live.recv().await {
            Ok(line) => Some(TailEvent::Line(line.to_string())),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "log tail subscriber overflowed");
                self.overflowed = true;
                Some(TailEvent::Overflow)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Serves live log tails to concurrent subscribers.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamBroker;

impl StreamBroker {
    pub fn new() -> Self {
        Self
    }

    /// Subscribe to a job's stream. With `from_start`, all existing lines
    /// are replayed before live delivery; otherwise delivery starts at
    /// the current end of the stream.
    pub fn subscribe(
        &self,
        logs: &JobLogs,
        stream: LogStream,
        from_start: bool,
    ) -> Result<Subscription> {
        let cursor = logs.tail(stream)?;
        let replay = if from_start { cursor.replay } else { Vec::new() };
        Ok(Subscription {
            replay: replay.into_iter(),
            live: cursor.live,
            overflowed: false,
        })
    }
}
