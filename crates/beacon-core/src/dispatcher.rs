//! Dispatcher loop
//!
//! One thread owns every registry mutation and every outbound send made
//! during handler execution. Each iteration waits on ingress for at most
//! one service interval, drains whatever arrived, and runs the reaper
//! when its period has elapsed. Shutdown is a shared flag observed once
//! per interval; there is no other cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_protocol::clock;
use tracing::{debug, info, warn};

use crate::handlers::SignalServer;
use crate::ingress::{IngressEntry, IngressEvent, IngressQueue};

/// Longest one iteration may wait on ingress
pub const SERVICE_INTERVAL: Duration = Duration::from_millis(50);

/// Minimum spacing between reaper passes, seconds
pub const REAP_INTERVAL_SECS: u64 = 10;

/// Queue residency above this is worth flagging
const SLOW_DRAIN_MS: u64 = 1_000;

/// Stop signal shared between the dispatcher and whoever installs
/// shutdown handling
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// A flag in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request dispatcher exit
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The single consumer of the ingress queue
pub struct Dispatcher {
    server: SignalServer,
    ingress: Arc<IngressQueue>,
    shutdown: ShutdownFlag,
    last_reap_secs: u64,
}

impl Dispatcher {
    /// Wire the fabric to its queue and stop flag
    pub fn new(server: SignalServer, ingress: Arc<IngressQueue>, shutdown: ShutdownFlag) -> Self {
        Self {
            server,
            ingress,
            shutdown,
            last_reap_secs: clock::now_secs(),
        }
    }

    /// Run until the stop flag is observed
    pub fn run(&mut self) {
        info!("dispatcher started");
        while !self.shutdown.is_triggered() {
            if let Some(entry) = self.ingress.pop_timeout(SERVICE_INTERVAL) {
                self.dispatch(entry);
                // Drain everything that queued up behind it
                while let Some(entry) = self.ingress.try_pop() {
                    self.dispatch(entry);
                }
            }
            self.maybe_reap(clock::now_secs());
        }
        info!(
            clients = self.server.clients().active_count(),
            rooms = self.server.rooms().active_count(),
            "dispatcher stopped"
        );
    }

    fn dispatch(&mut self, entry: IngressEntry) {
        let waited = clock::now_millis().saturating_sub(entry.enqueued_ms);
        if waited > SLOW_DRAIN_MS {
            warn!(waited_ms = waited, "ingress entry sat in queue");
        }
        let now = clock::now_secs();
        match entry.event {
            IngressEvent::Accepted(handle) => self.server.on_accepted(handle, now),
            IngressEvent::Frame(handle, envelope) => self.server.on_frame(&handle, envelope, now),
            IngressEvent::Closed(handle) => self.server.on_closed(&handle, now),
        }
    }

    /// Run the reaper when its period has elapsed
    fn maybe_reap(&mut self, now: u64) {
        if now.saturating_sub(self.last_reap_secs) < REAP_INTERVAL_SECS {
            return;
        }
        debug!("reaper pass");
        self.server.reap(now);
        self.last_reap_secs = now;
    }

    /// Fabric view, for tests and monitors running on this thread
    pub fn server(&self) -> &SignalServer {
        &self.server
    }
}
