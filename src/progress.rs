//! Progress delivery to session observers.
//!
//! The orchestrator pushes a full snapshot after every state change. Sinks
//! must not block the pipeline: a slow or absent observer only loses
//! messages.

use crate::error::ProgressError;
use crate::types::ProgressMessage;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

/// Destination for per-session progress snapshots
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, message: &ProgressMessage) -> Result<(), ProgressError>;

    /// Called once after the terminal snapshot of a session.
    async fn close(&self, session_id: &str);
}

struct Channel {
    sender: broadcast::Sender<ProgressMessage>,
    opened: Instant,
    last: Option<ProgressMessage>,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
            opened: Instant::now(),
            last: None,
        }
    }
}

/// In-process fan-out of progress snapshots, one broadcast channel per session.
///
/// Observers may subscribe before the run starts. Snapshots published while
/// nobody listens are dropped, but the last snapshot of a closed session is
/// kept so a late observer still sees how it ended. Channels for sessions
/// that never start are evicted after `idle_ttl`.
pub struct ProgressHub {
    channels: RwLock<HashMap<String, Channel>>,
    finished: Mutex<VecDeque<(String, ProgressMessage)>>,
    capacity: usize,
    retained: usize,
    idle_ttl: Duration,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            retained: 256,
            idle_ttl: Duration::from_secs(300),
        }
    }

    /// How long a channel may wait for its first snapshot.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Number of closed sessions whose terminal snapshot is kept.
    pub fn with_retained(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }

    /// Receive snapshots for `session_id`, creating its channel if needed.
    ///
    /// A session that already finished yields its terminal snapshot and then
    /// `Closed`.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressMessage> {
        if let Some(terminal) = self.terminal_snapshot(session_id) {
            let (tx, rx) = broadcast::channel(1);
            // The receiver is alive, so this cannot fail.
            let _ = tx.send(terminal);
            return rx;
        }

        self.sweep();
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| Channel::new(self.capacity))
            .sender
            .subscribe()
    }

    /// Drop channels whose session never published, once nobody listens or
    /// `idle_ttl` has passed. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = channels.len();
        let idle_ttl = self.idle_ttl;
        channels.retain(|_, channel| {
            channel.last.is_some()
                || (channel.sender.receiver_count() > 0 && channel.opened.elapsed() < idle_ttl)
        });

        let evicted = before - channels.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle progress channels");
        }
        evicted
    }

    /// Sessions with an open channel.
    pub fn active_sessions(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn terminal_snapshot(&self, session_id: &str) -> Option<ProgressMessage> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, message)| message.clone())
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl ProgressSink for ProgressHub {
    async fn publish(&self, message: &ProgressMessage) -> Result<(), ProgressError> {
        let session_id = message.session_id();
        let sender = {
            let mut channels = self
                .channels
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let channel = channels
                .entry(session_id.to_string())
                .or_insert_with(|| Channel::new(self.capacity));
            channel.last = Some(message.clone());
            channel.sender.clone()
        };

        // No receivers left is not an error for the run.
        if sender.send(message.clone()).is_err() {
            debug!(session_id = %session_id, "No progress observers");
        }
        Ok(())
    }

    async fn close(&self, session_id: &str) {
        let channel = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);

        let Some(terminal) = channel.and_then(|c| c.last) else {
            return;
        };
        if self.retained == 0 {
            return;
        }

        let mut finished = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        finished.retain(|(id, _)| id != session_id);
        if finished.len() >= self.retained {
            finished.pop_front();
        }
        finished.push_back((session_id.to_string(), terminal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingSession, Stage, StageStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_subscriber_receives_snapshots() {
        let hub = ProgressHub::default();
        let mut rx = hub.subscribe("s-1");

        let mut session = ProcessingSession::new("s-1");
        hub.publish(&session.snapshot()).await.unwrap();
        session.start_stage(Stage::Extraction).unwrap();
        hub.publish(&session.snapshot()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().steps()[0].progress, 0);
        assert_eq!(rx.recv().await.unwrap().steps()[0].progress, 50);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let hub = ProgressHub::default();
        let mut rx = hub.subscribe("s-1");
        assert_eq!(hub.active_sessions(), 1);

        hub.close("s-1").await;
        assert_eq!(hub.active_sessions(), 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_publish_without_observers() {
        let hub = ProgressHub::default();
        let session = ProcessingSession::new("nobody");
        assert!(hub.publish(&session.snapshot()).await.is_ok());

        hub.close("nobody").await;
        assert_eq!(hub.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_snapshot() {
        let hub = ProgressHub::default();
        let mut session = ProcessingSession::new("done");
        for stage in Stage::ALL {
            session.start_stage(stage).unwrap();
            hub.publish(&session.snapshot()).await.unwrap();
            session.complete_stage(stage, json!({})).unwrap();
            hub.publish(&session.snapshot()).await.unwrap();
        }
        hub.close("done").await;

        let mut rx = hub.subscribe("done");
        let terminal = rx.recv().await.unwrap();
        assert_eq!(terminal.overall_progress(), 100.0);
        assert!(terminal
            .steps()
            .iter()
            .all(|s| s.status == StageStatus::Complete));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_retained_snapshots_are_bounded() {
        let hub = ProgressHub::default().with_retained(1);
        for id in ["first", "second"] {
            hub.publish(&ProcessingSession::new(id).snapshot())
                .await
                .unwrap();
            hub.close(id).await;
        }

        assert!(hub.terminal_snapshot("first").is_none());
        assert!(hub.terminal_snapshot("second").is_some());
    }

    #[tokio::test]
    async fn test_abandoned_channels_are_evicted() {
        let hub = ProgressHub::default().with_idle_ttl(Duration::from_millis(20));

        // Observer went away before the session started.
        drop(hub.subscribe("dropped"));
        // Observer still waiting on a session that never starts.
        let mut waiting = hub.subscribe("never");
        assert_eq!(hub.active_sessions(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(hub.sweep(), 1);
        assert_eq!(hub.active_sessions(), 0);
        assert!(matches!(
            waiting.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_running_sessions_survive_sweep() {
        let hub = ProgressHub::default().with_idle_ttl(Duration::ZERO);
        let _rx = hub.subscribe("running");
        hub.publish(&ProcessingSession::new("running").snapshot())
            .await
            .unwrap();

        assert_eq!(hub.sweep(), 0);
        assert_eq!(hub.active_sessions(), 1);
    }
}
