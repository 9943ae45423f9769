//! Durable request records plus live notifications.
//!
//! Every request inserts a status-0 placeholder before any upstream work and
//! finalises it exactly once. UI listeners (out-of-scope transport) subscribe
//! to the broadcast seam; sends are fire-and-forget.

use crate::db::{DbActorHandle, UsageDraft, UsageFinal};
use crate::error::ProxyError;
use tokio::sync::broadcast;
use tracing::warn;

/// Event published after a log row changes.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub log_id: i64,
    pub user_id: i64,
    pub status_code: i64,
}

#[derive(Clone)]
pub struct UsageLogger {
    db: DbActorHandle,
    events: broadcast::Sender<UsageEvent>,
}

impl UsageLogger {
    pub fn new(db: DbActorHandle) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { db, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.events.subscribe()
    }

    /// Insert the in-flight placeholder so minute-window accounting sees the
    /// request immediately.
    pub async fn record_placeholder(&self, draft: UsageDraft) -> Result<i64, ProxyError> {
        let user_id = draft.user_id;
        let log_id = self.db.insert_usage(draft).await?;
        let _ = self.events.send(UsageEvent {
            log_id,
            user_id,
            status_code: 0,
        });
        Ok(log_id)
    }

    /// Transition the placeholder to its final state. Safe to call from
    /// inside a streaming body; the DB actor holds its own connection.
    pub async fn finalize(&self, user_id: i64, fin: UsageFinal) -> Result<(), ProxyError> {
        let log_id = fin.id;
        let status_code = fin.status_code;
        self.db.finalize_usage(fin).await?;
        let _ = self.events.send(UsageEvent {
            log_id,
            user_id,
            status_code,
        });
        Ok(())
    }

    /// Best-effort finalisation for paths that must not propagate errors
    /// (stream teardown, client disconnect). A failed attempt leaves the row
    /// at status 0, which is treated as orphaned.
    pub async fn finalize_best_effort(&self, user_id: i64, fin: UsageFinal) {
        if let Err(e) = self.finalize(user_id, fin).await {
            warn!("usage-log finalisation failed (row stays in-flight): {e}");
        }
    }
}
