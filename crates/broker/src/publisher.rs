//! JSON record publisher for the broker channel.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::debug;

use super::error::ChannelError;

/// Publishes serializable payloads as UTF-8 JSON at QoS 1.
///
/// Holds a clone of the connection kernel's link flag and refuses to queue
/// while the link is down, so callers get an immediate failure they can
/// spool on instead of a publish that sits in the client queue.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl Publisher {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }

    /// Current link state as last reported by the connection kernel.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Serializes `payload` and publishes it on `topic`.
    ///
    /// # Errors
    ///
    /// `NotConnected` when the link is down, `Serialization` when the
    /// payload cannot be encoded, `ClientTransfer` when the client queue
    /// rejects the publish.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &(impl Serialize + ?Sized),
    ) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let body = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await?;

        debug!("Published record to topic {}", topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::MqttOptions;
    use serde_json::json;

    use super::*;

    fn test_publisher(connected: bool) -> (Publisher, rumqttc::EventLoop) {
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("test-publisher", "localhost", 1883), 10);
        (
            Publisher::new(client, Arc::new(AtomicBool::new(connected))),
            event_loop,
        )
    }

    #[tokio::test]
    async fn test_publish_refused_while_down() {
        let (publisher, _event_loop) = test_publisher(false);
        let result = publisher.publish("device/prof", &json!({"k": 1})).await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn test_publish_queues_while_up() {
        // The event loop is never polled, but queueing alone must succeed.
        let (publisher, _event_loop) = test_publisher(true);
        let result = publisher.publish("device/prof", &json!({"k": 1})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_is_connected_tracks_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let (client, _event_loop) =
            AsyncClient::new(MqttOptions::new("test-flag", "localhost", 1883), 10);
        let publisher = Publisher::new(client, flag.clone());

        assert!(!publisher.is_connected());
        flag.store(true, Ordering::Release);
        assert!(publisher.is_connected());
    }
}
