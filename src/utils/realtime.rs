use std::convert::Infallible;

use actix_web::web::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::model::notification::Notification;

/// Payload pushed to connected clients when a notification is created.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(skip)]
    pub user_id: u64,
    pub id: u64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationEvent {
    fn from(n: &Notification) -> Self {
        NotificationEvent {
            user_id: n.user_id,
            id: n.id,
            title: n.title.clone(),
            message: n.message.clone(),
            kind: n.notification_type.clone(),
            category: n.category.clone(),
            created_at: n.created_at,
        }
    }
}

/// Fan-out point between notification writers and SSE subscribers.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<NotificationEvent>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Best effort: nobody listening is not an error.
    pub fn publish(&self, event: NotificationEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No realtime subscribers connected");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Server-sent event frames for one user's notifications.
    pub fn stream_for(&self, user_id: u64) -> impl Stream<Item = Result<Bytes, Infallible>> + 'static {
        let rx = self.sender.subscribe();

        let events = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.user_id == user_id => {
                        let frame = sse_frame(&event);
                        return Some((Ok(frame), rx));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "Realtime subscriber lagged behind");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::once(async { Ok(Bytes::from_static(b": connected\n\n")) }).chain(events)
    }
}

fn sse_frame(event: &NotificationEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: newNotification\ndata: {data}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user_id: u64, id: u64) -> NotificationEvent {
        NotificationEvent {
            user_id,
            id,
            title: "Leave Approved".into(),
            message: "Your leave request has been approved".into(),
            kind: "success".into(),
            category: "leave_approval".into(),
            created_at: Utc::now(),
        }
    }

    #[actix_web::test]
    async fn subscribers_only_receive_their_own_events() {
        let hub = NotificationHub::new(16);
        let mut stream = Box::pin(hub.stream_for(2));
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(event(1, 10));
        hub.publish(event(2, 11));

        let hello = stream.next().await.unwrap().unwrap();
        assert_eq!(&hello[..], b": connected\n\n");

        let frame = stream.next().await.unwrap().unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: newNotification\n"));
        assert!(text.contains("\"id\":11"));
        assert!(!text.contains("userId"));
    }

    #[test]
    fn publishing_without_listeners_is_fine() {
        let hub = NotificationHub::new(4);
        hub.publish(event(1, 1));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
