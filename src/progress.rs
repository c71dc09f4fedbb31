//! Progress and log reporting from long-running operations.
//!
//! Core operations only see a [`Progress`] handle. The MCP layer forwards the
//! events to the requesting peer as progress and logging notifications.

use tokio::sync::mpsc;

/// Total used for percentage-style progress.
pub const PERCENT: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Step { progress: u32, total: u32 },
    Info(String),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Progress {
    /// Discards every event.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn percent(&self, progress: u32) {
        self.step(progress.min(PERCENT), PERCENT);
    }

    pub fn step(&self, progress: u32, total: u32) {
        self.send(ProgressEvent::Step { progress, total });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Info(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Error(message.into()));
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the request finished; nothing to report to.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (progress, mut rx) = Progress::channel();
        progress.percent(10);
        progress.info("connecting");
        progress.percent(250);
        progress.error("failed");

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Step { progress: 10, total: 100 });
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Info("connecting".to_string()));
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Step { progress: 100, total: 100 });
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Error("failed".to_string()));
    }

    #[test]
    fn noop_and_closed_receivers_are_silent() {
        Progress::noop().info("ignored");

        let (progress, rx) = Progress::channel();
        drop(rx);
        progress.percent(50);
    }
}
