use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{SessionId, User};

pub const CHANNEL_CAPACITY: usize = 64;

/// Messages exchanged between tabs of the same application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMessage {
    RequestSession,
    ResponseSession {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        user: User,
    },
    Logout,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    origin: Uuid,
    message: SessionMessage,
}

impl Delivery {
    pub fn new(origin: Uuid, message: SessionMessage) -> Self {
        Self { origin, message }
    }
}

/// Tab-to-tab pub/sub. Posting is best-effort and a tab never receives its
/// own messages.
pub trait SessionChannel: Send + Sync {
    fn post(&self, message: SessionMessage);
    fn subscribe(&self) -> SessionSubscription;
}

/// Receiving end of a [`SessionChannel`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    origin: Uuid,
    rx: broadcast::Receiver<Delivery>,
}

impl SessionSubscription {
    pub fn new(origin: Uuid, rx: broadcast::Receiver<Delivery>) -> Self {
        Self { origin, rx }
    }

    /// Next message from another tab; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        loop {
            match self.rx.recv().await {
                Ok(delivery) if delivery.origin == self.origin => continue,
                Ok(delivery) => return Some(delivery.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session channel lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Named in-process channels that tabs connect to, standing in for the
/// browser's broadcast channel.
#[derive(Debug)]
pub struct BroadcastHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Delivery>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Joins `name` as a new tab.
    pub fn connect(&self, name: &str) -> TabChannel {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        TabChannel {
            name: name.to_string(),
            origin: Uuid::new_v4(),
            sender,
        }
    }

    /// Live subscriptions on `name`, across all tabs.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// One tab's endpoint on a hub channel.
#[derive(Debug, Clone)]
pub struct TabChannel {
    name: String,
    origin: Uuid,
    sender: broadcast::Sender<Delivery>,
}

impl TabChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl SessionChannel for TabChannel {
    fn post(&self, message: SessionMessage) {
        let delivery = Delivery {
            origin: self.origin,
            message,
        };
        if self.sender.send(delivery).is_err() {
            tracing::debug!(channel = %self.name, "no listeners on session channel");
        }
    }

    fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.origin, self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use std::time::Duration;

    #[test]
    fn test_wire_format() {
        let request = serde_json::to_value(SessionMessage::RequestSession).unwrap();
        assert_eq!(request, serde_json::json!({ "type": "REQUEST_SESSION" }));

        let response = SessionMessage::ResponseSession {
            session_id: SessionId::new("demo-session:1:x"),
            user: User::new(UserId::new("1").unwrap(), "Kim"),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "RESPONSE_SESSION",
                "sessionId": "demo-session:1:x",
                "user": { "id": "1", "name": "Kim" }
            })
        );
        let back: SessionMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);

        let logout: SessionMessage =
            serde_json::from_str(r#"{"type":"LOGOUT"}"#).unwrap();
        assert_eq!(logout, SessionMessage::Logout);
    }

    #[tokio::test]
    async fn test_tab_does_not_hear_itself() {
        let hub = BroadcastHub::new();
        let a = hub.connect("auth-session");
        let b = hub.connect("auth-session");
        let mut a_sub = a.subscribe();
        let mut b_sub = b.subscribe();

        a.post(SessionMessage::RequestSession);
        assert_eq!(b_sub.recv().await, Some(SessionMessage::RequestSession));

        let own = tokio::time::timeout(Duration::from_millis(20), a_sub.recv()).await;
        assert!(own.is_err());
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_name() {
        let hub = BroadcastHub::new();
        let a = hub.connect("auth-session");
        let other = hub.connect("other");
        let mut sub = other.subscribe();
        a.post(SessionMessage::Logout);
        let heard = tokio::time::timeout(Duration::from_millis(20), sub.recv()).await;
        assert!(heard.is_err());
    }

    #[test]
    fn test_subscriber_count_tracks_drops() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.subscriber_count("auth-session"), 0);

        let a = hub.connect("auth-session");
        let first = a.subscribe();
        let second = hub.connect("auth-session").subscribe();
        assert_eq!(hub.subscriber_count("auth-session"), 2);
        assert_eq!(a.subscriber_count(), 2);

        drop(first);
        drop(second);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(hub.subscriber_count("other"), 0);
    }

    #[test]
    fn test_post_without_listeners_is_fine() {
        let hub = BroadcastHub::new();
        hub.connect("auth-session").post(SessionMessage::Logout);
    }
}
