//! Connection kernel: drives the MQTT event loop and tracks link state.
//!
//! The kernel owns the rumqttc event loop and exposes link state as a shared
//! atomic flag. The delivery layer consults that flag before publishing and
//! never waits for reconnection; the kernel itself keeps polling through
//! transient errors with a capped exponential delay and exits on fatal ones.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use super::error::ChannelError;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Drives the MQTT event loop on a single tokio task.
///
/// The client can be cloned and used from other tasks; the kernel itself
/// must not be shared.
pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    is_connected: Arc<AtomicBool>,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl ConnectionKernel {
    pub fn new(client: AsyncClient, event_loop: EventLoop, cancel: CancellationToken) -> Self {
        Self {
            client,
            event_loop,
            is_connected: Arc::new(AtomicBool::new(false)),
            retry_delay: INITIAL_RETRY_DELAY,
            cancel,
        }
    }

    /// Gets the shared connected flag.
    ///
    /// Publishers hold a clone of this flag and check it before queueing,
    /// so a down link is detected without waiting on the client.
    pub fn is_connected(&self) -> Arc<AtomicBool> {
        self.is_connected.clone()
    }

    /// Runs the event loop until cancellation or a fatal error.
    ///
    /// Transient errors lower the connected flag, wait out a capped
    /// exponential delay, and keep polling. Fatal errors (TLS failures,
    /// rejected credentials) end the kernel; the channel then stays down
    /// for the rest of the process.
    pub async fn run(&mut self) -> Result<(), ChannelError> {
        info!("Starting broker event loop...");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, closing broker connection...");
                    self.is_connected.store(false, Ordering::Release);
                    // Best-effort DISCONNECT; the socket closes either way.
                    if let Err(e) = self.client.disconnect().await {
                        warn!("Error sending disconnect packet: {:?}", e);
                    }
                    return Ok(());
                }

                event = self.event_loop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            self.is_connected.store(false, Ordering::Release);

                            if is_fatal_error(&e) {
                                error!("Fatal broker connection error: {e}");
                                return Err(ChannelError::from(e));
                            }

                            let delay = self.next_retry_delay();
                            warn!(
                                "Broker connection error, retrying in {:.1}s: {e}",
                                delay.as_secs_f64()
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                info!("Broker connection established");
                self.is_connected.store(true, Ordering::Release);
                self.retry_delay = INITIAL_RETRY_DELAY;
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.is_connected.store(false, Ordering::Release);
            }
            Event::Incoming(packet) => {
                trace!("Incoming packet: {:?}", packet);
            }
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
    }

    /// Returns the current retry delay and doubles it up to the cap.
    fn next_retry_delay(&mut self) -> Duration {
        let delay = self.retry_delay;
        self.retry_delay = (self.retry_delay * 2).min(MAX_RETRY_DELAY);
        delay
    }
}

/// Classifies connection errors into fatal and retryable.
///
/// Fatal means reconnecting cannot help: broken TLS material, protocol
/// violations, rejected credentials. Everything network-shaped is assumed
/// temporary.
fn is_fatal_error(err: &ConnectionError) -> bool {
    match err {
        ConnectionError::Tls(_) => true,
        ConnectionError::MqttState(_) => true,
        ConnectionError::NotConnAck(_) => true,
        ConnectionError::RequestsDone => true,

        ConnectionError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::AddrInUse
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::InvalidInput
                | std::io::ErrorKind::InvalidData
        ),

        ConnectionError::ConnectionRefused(code) => matches!(
            code,
            ConnectReturnCode::RefusedProtocolVersion
                | ConnectReturnCode::BadClientId
                | ConnectReturnCode::BadUserNamePassword
                | ConnectReturnCode::NotAuthorized
        ),

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => false,

        #[allow(unreachable_patterns)]
        _ => false,
    }
}
