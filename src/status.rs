//! Status surface: the connectivity / queue-depth banner.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Online,
    Offline,
    Syncing,
    Pending,
    /// A capture or replay problem, already phrased for the user
    Notice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub pending: usize,
}

impl Status {
    pub fn text(&self) -> String {
        match &self.kind {
            StatusKind::Online => "Online".to_string(),
            StatusKind::Offline => "Offline: changes saved locally".to_string(),
            StatusKind::Syncing => "Syncing offline data...".to_string(),
            StatusKind::Pending => format!("{} pending", self.pending),
            StatusKind::Notice(message) => message.clone(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[derive(Clone)]
pub struct StatusSurface {
    tx: Arc<watch::Sender<Status>>,
}

impl StatusSurface {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Status {
            kind: StatusKind::Online,
            pending: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Status {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn set(&self, kind: StatusKind, pending: usize) {
        let status = Status { kind, pending };
        tracing::debug!("Status: {} ({} pending)", status, pending);
        self.tx.send_replace(status);
    }

    /// Resting state after a transition or a finished sync pass.
    pub fn settle(&self, online: bool, pending: usize) {
        let kind = if !online {
            StatusKind::Offline
        } else if pending > 0 {
            StatusKind::Pending
        } else {
            StatusKind::Online
        };
        self.set(kind, pending);
    }

    pub fn notice(&self, message: impl Into<String>, pending: usize) {
        self.set(StatusKind::Notice(message.into()), pending);
    }
}

impl Default for StatusSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_texts() {
        let status = |kind, pending| Status { kind, pending }.text();
        assert_eq!(status(StatusKind::Online, 0), "Online");
        assert_eq!(
            status(StatusKind::Offline, 2),
            "Offline: changes saved locally"
        );
        assert_eq!(status(StatusKind::Syncing, 2), "Syncing offline data...");
        assert_eq!(status(StatusKind::Pending, 3), "3 pending");
    }

    #[test]
    fn test_settle() {
        let surface = StatusSurface::new();

        surface.settle(true, 0);
        assert_eq!(surface.current().kind, StatusKind::Online);

        surface.settle(true, 4);
        assert_eq!(surface.current().text(), "4 pending");

        surface.settle(false, 4);
        assert_eq!(surface.current().kind, StatusKind::Offline);
        assert_eq!(surface.current().pending, 4);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let surface = StatusSurface::new();
        let mut rx = surface.subscribe();

        surface.set(StatusKind::Syncing, 1);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().kind, StatusKind::Syncing);
    }
}
