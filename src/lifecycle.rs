//! Start/stop lifecycle for background tasks.
//!
//! A `Runner` wraps a `Task` and enforces at-most-once start semantics:
//! starting twice or stopping before starting is an error, never a silent
//! no-op. The `Reporter` is the one production task, emitting a metric
//! record on a fixed interval until stopped.

use std::{sync::Arc, time::Duration};

use serde_json::Map;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use petrel_broker::Channel;

use crate::{
    delivery::{DeliveryCore, DeliveryOutcome},
    enrich::Enricher,
};

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("Task is already running")]
    AlreadyStarted,

    #[error("Task was never started")]
    NotStarted,
}

/// A unit of background work with explicit setup and teardown.
#[async_trait::async_trait]
pub trait Task: Send {
    async fn setup(&mut self);
    async fn teardown(&mut self);
}

/// Enforces start-once/stop-once around a task.
pub struct Runner<T: Task> {
    task: T,
    running: bool,
}

impl<T: Task> Runner<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.running {
            return Err(LifecycleError::AlreadyStarted);
        }
        self.task.setup().await;
        self.running = true;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), LifecycleError> {
        if !self.running {
            return Err(LifecycleError::NotStarted);
        }
        self.task.teardown().await;
        self.running = false;
        Ok(())
    }
}

/// Callback invoked when a periodic report could neither be sent nor
/// spooled.
pub type FailureHook = Arc<dyn Fn(DeliveryOutcome) + Send + Sync>;

/// Periodic metric reporter.
///
/// On each tick it builds a fresh metric record and hands it to the
/// delivery core. Delivery failures are the core's business; the reporter
/// only surfaces the terminal `SpoolFailed` case through the optional hook.
pub struct Reporter {
    core: Arc<DeliveryCore>,
    enricher: Arc<Enricher>,
    interval: Duration,
    on_failure: Option<FailureHook>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn new(core: Arc<DeliveryCore>, enricher: Arc<Enricher>, interval: Duration) -> Self {
        Self {
            core,
            enricher,
            interval,
            on_failure: None,
            cancel: None,
            handle: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }
}

#[async_trait::async_trait]
impl Task for Reporter {
    async fn setup(&mut self) {
        let cancel = CancellationToken::new();
        let core = self.core.clone();
        let enricher = self.enricher.clone();
        let interval = self.interval;
        let on_failure = self.on_failure.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the first
            // report lands one full interval after startup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Reporter loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let record = enricher.metric(Map::new()).await;
                        let outcome = core.produce(&record, Channel::Monitoring).await;
                        if outcome == DeliveryOutcome::SpoolFailed {
                            warn!("Periodic report lost");
                            if let Some(hook) = &on_failure {
                                hook(outcome);
                            }
                        }
                    }
                }
            }
        });

        self.cancel = Some(cancel);
        self.handle = Some(handle);
        info!("Reporter started, interval {:?}", self.interval);
    }

    async fn teardown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Reporter loop panicked: {}", e);
            }
        }
        info!("Reporter stopped");
    }
}
