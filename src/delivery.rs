//! Produce-or-spool delivery core.
//!
//! The core holds at most one live channel for the whole process. It is
//! either up (bootstrap succeeded, a sink and topic assignment exist) or
//! down (bootstrap failed); there is no reconnection at this layer.
//!
//! Every `produce` call follows the same ladder: try the live send, replay
//! the spooled backlog after a success, append to the spool on failure.
//! A failed spool append is the terminal tier; the record is lost and the
//! outcome says so. No path in this module panics or returns an error to
//! the host.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use petrel_broker::{Channel, Publisher, TopicMap};

use crate::{
    enrich::Record,
    spool::{Spool, SpoolError},
};

/// Transport seam for the delivery core.
///
/// The broker publisher implements this in production; tests substitute
/// recording or failing mocks.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        payload: &(dyn erased_serde::Serialize + Send + Sync),
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Adapts the broker publisher to the delivery core's sink seam.
pub struct BrokerSink {
    publisher: Publisher,
}

impl BrokerSink {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

#[async_trait::async_trait]
impl RecordSink for BrokerSink {
    async fn send(
        &self,
        topic: &str,
        payload: &(dyn erased_serde::Serialize + Send + Sync),
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.publisher.publish(topic, payload).await?;
        Ok(())
    }
}

/// Outcome of a single produce call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered live; any spooled backlog was replayed.
    Sent,
    /// Live send failed; the record was appended to the spool.
    Spooled,
    /// Channel is down and spooling while down is disabled.
    Dropped,
    /// Both the live send and the spool append failed; the record is lost.
    SpoolFailed,
}

/// A working channel: sink plus the topic assignment it serves.
pub struct LiveChannel {
    pub sink: Arc<dyn RecordSink>,
    pub topics: TopicMap,
}

/// The produce-or-spool state machine.
pub struct DeliveryCore {
    channel: Option<LiveChannel>,
    spool: Mutex<Spool>,
    spool_when_down: bool,
}

impl DeliveryCore {
    /// Creates a core. `channel: None` means delivery stays disabled for
    /// the life of the process.
    pub fn new(channel: Option<LiveChannel>, spool: Spool, spool_when_down: bool) -> Self {
        Self {
            channel,
            spool: Mutex::new(spool),
            spool_when_down,
        }
    }

    pub fn is_up(&self) -> bool {
        self.channel.is_some()
    }

    /// Sends one record on `channel`, falling back to the spool.
    pub async fn produce(&self, record: &Record, channel: Channel) -> DeliveryOutcome {
        let live = match &self.channel {
            Some(live) => live,
            None => {
                if self.spool_when_down {
                    return match self.spool_record(record).await {
                        Ok(()) => DeliveryOutcome::Spooled,
                        Err(e) => {
                            warn!("Spool append failed, record {} lost: {}", record.id, e);
                            DeliveryOutcome::SpoolFailed
                        }
                    };
                }
                debug!("Channel down, dropping record {}", record.id);
                return DeliveryOutcome::Dropped;
            }
        };

        let topic = live.topics.topic(channel);
        match live.sink.send(topic, record).await {
            Ok(()) => {
                self.replay(live).await;
                DeliveryOutcome::Sent
            }
            Err(e) => {
                warn!("Live send failed, spooling record {}: {}", record.id, e);
                match self.spool_record(record).await {
                    Ok(()) => DeliveryOutcome::Spooled,
                    Err(spool_err) => {
                        warn!(
                            "Spool append failed, record {} lost: {}",
                            record.id, spool_err
                        );
                        DeliveryOutcome::SpoolFailed
                    }
                }
            }
        }
    }

    async fn spool_record(&self, record: &Record) -> Result<(), SpoolError> {
        let spool = self.spool.lock().await;
        spool.append(record).await
    }

    /// Replays every spooled record oldest-first, then truncates.
    ///
    /// The spool lock is held across the whole read-send-truncate pass so
    /// a concurrent append cannot land between the read and the truncate.
    /// Individual send failures are logged and swallowed; the truncation
    /// happens regardless, so a replayed record is forwarded at most once.
    async fn replay(&self, live: &LiveChannel) {
        let spool = self.spool.lock().await;

        let records = match spool.read_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Unable to read spool, skipping replay: {}", e);
                return;
            }
        };

        if records.is_empty() {
            return;
        }

        info!("Replaying {} spooled record(s)", records.len());
        for value in &records {
            let channel = if value.get("stackTrace").is_some() {
                Channel::Event
            } else {
                Channel::Monitoring
            };
            let topic = live.topics.topic(channel);
            if let Err(e) = live.sink.send(topic, value).await {
                warn!("Replay send failed, record dropped: {}", e);
            }
        }

        if let Err(e) = spool.truncate().await {
            warn!("Failed to truncate spool after replay: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::{json, Map};
    use tempfile::TempDir;

    use super::*;
    use crate::{enrich::Enricher, identity::Identity};

    /// Sink that records every send and can be switched to fail.
    struct MockSink {
        sent: std::sync::Mutex<Vec<(String, Value)>>,
        failing: AtomicBool,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: std::sync::Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Release);
        }

        fn sent(&self) -> Vec<(String, Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RecordSink for MockSink {
        async fn send(
            &self,
            topic: &str,
            payload: &(dyn erased_serde::Serialize + Send + Sync),
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.failing.load(Ordering::Acquire) {
                return Err("broker unavailable".into());
            }
            let value = serde_json::to_value(payload)?;
            self.sent.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }
    }

    struct NoIp;

    #[async_trait::async_trait]
    impl crate::enrich::IpSource for NoIp {
        async fn public_ip(&self) -> Option<String> {
            None
        }
    }

    fn topics() -> TopicMap {
        TopicMap {
            monitoring: "t/prof".into(),
            event: "t/events".into(),
            log: "t/logs".into(),
        }
    }

    fn enricher() -> Enricher {
        Enricher::new("test-app", Identity::default(), Box::new(NoIp))
    }

    fn core_with(
        dir: &TempDir,
        sink: Arc<MockSink>,
        spool_when_down: bool,
        up: bool,
    ) -> DeliveryCore {
        let channel = up.then(|| LiveChannel {
            sink: sink as Arc<dyn RecordSink>,
            topics: topics(),
        });
        DeliveryCore::new(
            channel,
            Spool::new(dir.path().join("local.txt")),
            spool_when_down,
        )
    }

    async fn spool_line_count(core: &DeliveryCore) -> usize {
        core.spool.lock().await.read_all().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_live_send_reaches_requested_topic() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);

        let record = enricher().metric(Map::new()).await;
        let outcome = core.produce(&record, Channel::Monitoring).await;

        assert_eq!(outcome, DeliveryOutcome::Sent);
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "t/prof");
    }

    #[tokio::test]
    async fn test_channel_down_drops_without_touching_spool() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, false);

        let record = enricher().metric(Map::new()).await;
        let outcome = core.produce(&record, Channel::Monitoring).await;

        assert_eq!(outcome, DeliveryOutcome::Dropped);
        assert!(sink.sent().is_empty());
        assert_eq!(spool_line_count(&core).await, 0);
    }

    #[tokio::test]
    async fn test_channel_down_spools_when_configured() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), true, false);

        let record = enricher().metric(Map::new()).await;
        let outcome = core.produce(&record, Channel::Monitoring).await;

        assert_eq!(outcome, DeliveryOutcome::Spooled);
        assert_eq!(spool_line_count(&core).await, 1);
    }

    #[tokio::test]
    async fn test_failed_send_spools_record() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);
        sink.set_failing(true);

        let record = enricher().metric(Map::new()).await;
        let outcome = core.produce(&record, Channel::Monitoring).await;

        assert_eq!(outcome, DeliveryOutcome::Spooled);
        assert_eq!(spool_line_count(&core).await, 1);
    }

    #[tokio::test]
    async fn test_replay_routes_by_record_shape() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);
        let enricher = enricher();

        // Fail two sends so one event and one metric land in the spool
        sink.set_failing(true);
        let event = enricher.event(json!("trace"), Map::new()).await;
        core.produce(&event, Channel::Event).await;
        let metric = enricher.metric(Map::new()).await;
        core.produce(&metric, Channel::Monitoring).await;

        // Next successful send drains the backlog
        sink.set_failing(false);
        let fresh = enricher.metric(Map::new()).await;
        let outcome = core.produce(&fresh, Channel::Monitoring).await;
        assert_eq!(outcome, DeliveryOutcome::Sent);

        let sent = sink.sent();
        // Fresh record first, then the replayed backlog oldest-first
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "t/prof");
        assert_eq!(sent[1].0, "t/events");
        assert_eq!(sent[1].1["id"], json!(event.id.to_string()));
        assert_eq!(sent[2].0, "t/prof");
        assert_eq!(sent[2].1["id"], json!(metric.id.to_string()));

        assert_eq!(spool_line_count(&core).await, 0);
    }

    #[tokio::test]
    async fn test_replay_preserves_append_order() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);
        let enricher = enricher();

        sink.set_failing(true);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let record = enricher.metric(Map::new()).await;
            ids.push(record.id.to_string());
            core.produce(&record, Channel::Monitoring).await;
        }

        sink.set_failing(false);
        core.produce(&enricher.metric(Map::new()).await, Channel::Monitoring)
            .await;

        let replayed: Vec<String> = sink.sent()[1..]
            .iter()
            .map(|(_, value)| value["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(replayed, ids);
    }

    #[tokio::test]
    async fn test_empty_spool_replay_is_noop() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);

        let record = enricher().metric(Map::new()).await;
        assert_eq!(
            core.produce(&record, Channel::Monitoring).await,
            DeliveryOutcome::Sent
        );
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(spool_line_count(&core).await, 0);
    }

    #[tokio::test]
    async fn test_spool_empty_after_replay_of_many() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);
        let enricher = enricher();

        sink.set_failing(true);
        for _ in 0..10 {
            core.produce(&enricher.metric(Map::new()).await, Channel::Monitoring)
                .await;
        }
        assert_eq!(spool_line_count(&core).await, 10);

        sink.set_failing(false);
        core.produce(&enricher.metric(Map::new()).await, Channel::Monitoring)
            .await;
        assert_eq!(spool_line_count(&core).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_spooling_keeps_every_line_intact() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        sink.set_failing(true);
        let core = Arc::new(core_with(&dir, sink.clone(), false, true));
        let enricher = Arc::new(enricher());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let core = core.clone();
            let enricher = enricher.clone();
            handles.push(tokio::spawn(async move {
                let record = enricher.metric(Map::new()).await;
                core.produce(&record, Channel::Monitoring).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), DeliveryOutcome::Spooled);
        }

        // Every line parses back; none were interleaved or torn
        assert_eq!(spool_line_count(&core).await, 32);
    }

    #[tokio::test]
    async fn test_end_to_end_fail_then_recover() {
        let dir = TempDir::new().unwrap();
        let sink = MockSink::new();
        let core = core_with(&dir, sink.clone(), false, true);
        let enricher = enricher();

        sink.set_failing(true);
        let lost = enricher.event(json!("trace"), Map::new()).await;
        assert_eq!(
            core.produce(&lost, Channel::Event).await,
            DeliveryOutcome::Spooled
        );

        sink.set_failing(false);
        let fresh = enricher.metric(Map::new()).await;
        assert_eq!(
            core.produce(&fresh, Channel::Monitoring).await,
            DeliveryOutcome::Sent
        );

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        // The spooled event came back on the event channel
        assert_eq!(sent[1].0, "t/events");
        assert_eq!(spool_line_count(&core).await, 0);
    }
}
