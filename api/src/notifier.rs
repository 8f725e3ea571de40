//! Best-effort notification delivery.
//!
//! Producers enqueue onto a bounded channel and move on; a background task
//! persists each notification and announces the recipient's new unread count
//! to any open notification streams.

use askboard_shared::NotificationKind;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{db, notifications, DbPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub kind: NotificationKind,
    pub message: String,
    pub related_question_id: Option<i64>,
    pub related_answer_id: Option<i64>,
}

/// A recipient's unread count changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadChanged {
    pub recipient_id: i64,
    pub unread_count: i64,
}

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Notifier {
    queue: mpsc::Sender<NewNotification>,
    changes: broadcast::Sender<UnreadChanged>,
}

impl Notifier {
    /// Starts the consumer task. It exits once every `Notifier` clone is dropped
    /// and the queue has drained.
    pub fn spawn(pool: DbPool, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let handle = tokio::spawn(run(pool, rx, changes.clone()));
        (Self { queue, changes }, handle)
    }

    /// Notifier without a consumer; the receiver sees every dispatch.
    #[cfg(test)]
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<NewNotification>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        (Self { queue, changes }, rx)
    }

    /// Enqueues without waiting. A full or closed queue drops the notification.
    pub fn dispatch(&self, notification: NewNotification) {
        if let Err(err) = self.queue.try_send(notification) {
            let (reason, dropped) = match err {
                mpsc::error::TrySendError::Full(n) => ("queue full", n),
                mpsc::error::TrySendError::Closed(n) => ("queue closed", n),
            };
            tracing::warn!(
                recipient_id = dropped.recipient_id,
                kind = %dropped.kind,
                reason,
                "dropping notification"
            );
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnreadChanged> {
        self.changes.subscribe()
    }

    /// Announces a count computed outside the consumer (mark-read, delete).
    pub fn publish_unread(&self, recipient_id: i64, unread_count: i64) {
        // No subscribers is the common case.
        let _ = self.changes.send(UnreadChanged {
            recipient_id,
            unread_count,
        });
    }
}

async fn run(
    pool: DbPool,
    mut rx: mpsc::Receiver<NewNotification>,
    changes: broadcast::Sender<UnreadChanged>,
) {
    while let Some(notification) = rx.recv().await {
        let recipient_id = notification.recipient_id;
        let kind = notification.kind;
        let stored = db::with_conn(&pool, move |conn| {
            notifications::insert(conn, &notification)?;
            notifications::unread_count(conn, recipient_id)
        })
        .await;

        match stored {
            Ok(unread_count) => {
                tracing::debug!(recipient_id, %kind, "notification stored");
                let _ = changes.send(UnreadChanged {
                    recipient_id,
                    unread_count,
                });
            }
            Err(err) => {
                tracing::error!(recipient_id, %kind, error = %err, "failed to store notification");
            }
        }
    }
    tracing::debug!("notification queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_user, test_pool};
    use askboard_shared::Role;

    fn note(recipient_id: i64) -> NewNotification {
        NewNotification {
            recipient_id,
            sender_id: None,
            kind: NotificationKind::System,
            message: "hello".into(),
            related_question_id: None,
            related_answer_id: None,
        }
    }

    #[tokio::test]
    async fn consumer_persists_and_announces() {
        let pool = test_pool();
        let recipient = insert_user(&pool.get().unwrap(), "ann", Role::User);

        let (notifier, handle) = Notifier::spawn(pool.clone(), 4);
        let mut changes = notifier.subscribe();
        notifier.dispatch(note(recipient));
        notifier.dispatch(note(recipient));
        drop(notifier);
        handle.await.unwrap();

        let count = notifications::unread_count(&pool.get().unwrap(), recipient).unwrap();
        assert_eq!(count, 2);

        let first = changes.recv().await.unwrap();
        let second = changes.recv().await.unwrap();
        assert_eq!(first.recipient_id, recipient);
        assert_eq!(second.unread_count, 2);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::detached(1);
        notifier.dispatch(note(1));
        notifier.dispatch(note(2));

        assert_eq!(rx.recv().await.unwrap().recipient_id, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn store_failure_does_not_stop_consumer() {
        let pool = test_pool();
        let recipient = insert_user(&pool.get().unwrap(), "bea", Role::User);

        let (notifier, handle) = Notifier::spawn(pool.clone(), 4);
        // Unknown recipient violates the foreign key.
        notifier.dispatch(note(9_999));
        notifier.dispatch(note(recipient));
        drop(notifier);
        handle.await.unwrap();

        let count = notifications::unread_count(&pool.get().unwrap(), recipient).unwrap();
        assert_eq!(count, 1);
    }
}
