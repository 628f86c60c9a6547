//! Stream subscriber feeding a controller's event loop

use std::sync::Arc;

use async_trait::async_trait;
use sdk::event::Event;
use tokio::sync::mpsc;
use tracing::debug;

use crate::stream::Subscriber;

/// Inbox buffer size. A full inbox only slows this controller's delivery.
pub const INBOX_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub enum InboxMessage {
    Event(Arc<Event>),
    Closed,
}

/// Forwards every delivered event into a bounded channel
pub struct Inbox {
    tx: mpsc::Sender<InboxMessage>,
}

impl Inbox {
    pub fn channel() -> (Self, mpsc::Receiver<InboxMessage>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Subscriber for Inbox {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        // A controller that already exited has nothing left to learn
        if self.tx.send(InboxMessage::Event(event)).await.is_err() {
            debug!("Controller inbox dropped; discarding event");
        }
        Ok(())
    }

    async fn on_closed(&self) {
        let _ = self.tx.send(InboxMessage::Closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sdk::event::NewEvent;

    #[tokio::test]
    async fn test_forwards_events_then_closed() {
        let (inbox, mut rx) = Inbox::channel();
        let event = Arc::new(Event::seal(NewEvent::user_message("root", "hi"), 1, Utc::now()).unwrap());
        inbox.on_event(event).await.unwrap();
        inbox.on_closed().await;

        assert!(matches!(rx.recv().await, Some(InboxMessage::Event(e)) if e.id == 1));
        assert!(matches!(rx.recv().await, Some(InboxMessage::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_not_an_error() {
        let (inbox, rx) = Inbox::channel();
        drop(rx);
        let event = Arc::new(Event::seal(NewEvent::user_message("root", "hi"), 1, Utc::now()).unwrap());
        assert!(inbox.on_event(event).await.is_ok());
    }
}
