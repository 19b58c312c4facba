use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// NoticeChange
///
/// A mutation of the notice collection. Subscribers re-run their query on
/// every change, so the payload only says what happened to which notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum NoticeChange {
    Submitted(Uuid),
    Edited(Uuid),
    Approved(Uuid),
    Rejected(Uuid),
}

const FEED_CAPACITY: usize = 256;

/// NoticeFeed
///
/// In-process fan-out of notice changes to the live query streams. A slow
/// subscriber that lags behind only misses intermediate changes; its next
/// snapshot is still complete.
#[derive(Clone)]
pub struct NoticeFeed {
    tx: broadcast::Sender<NoticeChange>,
}

impl Default for NoticeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: NoticeChange) {
        // No receivers is not an error: nobody is watching right now.
        let receivers = self.tx.send(change).unwrap_or(0);
        tracing::debug!(?change, receivers, "notice change published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoticeChange> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let feed = NoticeFeed::new();
        let mut rx = feed.subscribe();
        let id = Uuid::new_v4();

        feed.publish(NoticeChange::Approved(id));
        assert_eq!(rx.recv().await.unwrap(), NoticeChange::Approved(id));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        NoticeFeed::new().publish(NoticeChange::Submitted(Uuid::new_v4()));
    }
}
