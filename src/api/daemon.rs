//! Daemon main loop
//!
//! [`Daemon`] owns the transport and the forward queue and drives the
//! routing state in a single loop:
//!
//! 1. receive, waiting at most until the next scheduled transmission
//! 2. process the received records
//! 3. send everything that is due
//! 4. keep a gateway selected
//! 5. once per purge interval, purge and dump the tables
//!
//! The routing state sits behind one `parking_lot` mutex, shared with any
//! number of [`RoutingHandle`]s. The lock is never held across an await.

use super::config::DaemonConfig;
use super::status::{gateway_list, originator_table, GatewayStatus, OriginatorStatus};
use crate::error::{Error, Result};
use crate::network::{
    Clock, JitterSource, LoggingRouteTable, LoggingTunnel, RouteTable, SystemClock, Transport,
    TunnelControl,
};
use crate::routing::{ForwardQueue, RoutingState};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Built, no routes installed yet
    Created,
    /// Static routes installed, OGMs scheduled
    Running,
    /// Tearing down routes
    Stopping,
    /// Every route removed
    Stopped,
}

/// Counters kept by the main loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonStats {
    /// Datagrams received
    pub datagrams: u64,
    /// Datagrams rejected as malformed
    pub malformed: u64,
    /// Queue entries transmitted
    pub transmissions: u64,
    /// Purge sweeps run
    pub purges: u64,
}

/// Builder for [`Daemon`]
///
/// Collaborators not set explicitly default to the logging route table and
/// tunnel, the tokio-based clock and an entropy-seeded RNG.
///
/// # Examples
///
/// ```no_run
/// use batmand::api::{DaemonBuilder, DaemonConfig, InterfaceConfig};
/// use batmand::network::UdpTransport;
/// use std::net::Ipv4Addr;
///
/// # async fn example() -> batmand::Result<()> {
/// let config = DaemonConfig::new(vec![InterfaceConfig::new(
///     "wlan0",
///     Ipv4Addr::new(10, 0, 0, 1),
///     24,
/// )]);
/// let transport = UdpTransport::bind(&config.batman_interfaces(), config.port).await?;
/// let mut daemon = DaemonBuilder::new(config).build(transport)?;
///
/// daemon.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct DaemonBuilder {
    config: DaemonConfig,
    route_table: Option<Box<dyn RouteTable>>,
    tunnel: Option<Box<dyn TunnelControl>>,
    clock: Option<Arc<dyn Clock>>,
    jitter: Option<Box<dyn JitterSource>>,
}

impl DaemonBuilder {
    /// Builder for `config`.
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            route_table: None,
            tunnel: None,
            clock: None,
            jitter: None,
        }
    }

    /// Install routes through `table`
    pub fn with_route_table(mut self, table: impl RouteTable + 'static) -> Self {
        self.route_table = Some(Box::new(table));
        self
    }

    /// Reach gateways through `tunnel`
    pub fn with_tunnel(mut self, tunnel: impl TunnelControl + 'static) -> Self {
        self.tunnel = Some(Box::new(tunnel));
        self
    }

    /// Read time from `clock`
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Draw send-time jitter from `jitter`
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Some(Box::new(jitter));
        self
    }

    /// Validate the configuration and build the daemon around `transport`.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the configuration is unusable.
    pub fn build<T: Transport>(self, transport: T) -> Result<Daemon<T>> {
        self.config.validate()?;

        let tables = self.config.tables;
        let route_table = self
            .route_table
            .unwrap_or_else(|| Box::new(LoggingRouteTable::new()));
        let tunnel = self
            .tunnel
            .unwrap_or_else(|| Box::new(LoggingTunnel::new(tables.tunnel)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let jitter = self
            .jitter
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()));

        let state = RoutingState::new(
            self.config.routing_settings(),
            self.config.batman_interfaces(),
            route_table,
            tunnel,
        );

        Ok(Daemon {
            state: Arc::new(Mutex::new(state)),
            queue: ForwardQueue::new(),
            transport,
            clock,
            jitter,
            abort: Arc::new(AtomicBool::new(false)),
            lifecycle: DaemonState::Created,
            next_purge: 0,
            stats: DaemonStats::default(),
        })
    }
}

/// A running routing daemon
pub struct Daemon<T: Transport> {
    state: Arc<Mutex<RoutingState>>,
    queue: ForwardQueue,
    transport: T,
    clock: Arc<dyn Clock>,
    jitter: Box<dyn JitterSource>,
    abort: Arc<AtomicBool>,
    lifecycle: DaemonState,
    next_purge: u64,
    stats: DaemonStats,
}

impl<T: Transport> Daemon<T> {
    // ========================================================================
    // Lifecycle Methods
    // ========================================================================

    /// Install the static routes and schedule the first own OGM on every
    /// interface.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon was already started.
    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle != DaemonState::Created {
            return Err(Error::InvalidState(format!(
                "cannot start a daemon in state {:?}",
                self.lifecycle
            )));
        }

        let now = self.clock.now_ms();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.start();
        for if_index in 0..state.interfaces().len() {
            self.queue
                .schedule_own(state, if_index, now, self.jitter.as_mut());
        }
        self.next_purge = now + state.settings().purge_interval_ms;
        tracing::info!(
            interfaces = state.interfaces().len(),
            primary = %state.interfaces()[0].address,
            "daemon started"
        );

        self.lifecycle = DaemonState::Running;
        Ok(())
    }

    /// Run one loop iteration.
    pub async fn tick(&mut self) {
        let now = self.clock.now_ms();
        let wait = self
            .queue
            .next_send_time()
            .unwrap_or(self.next_purge)
            .min(self.next_purge)
            .saturating_sub(now);

        let received = self.transport.recv(Duration::from_millis(wait)).await;

        let now = self.clock.now_ms();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match received {
            Ok(Some(datagram)) => {
                self.stats.datagrams += 1;
                if let Err(e) = state.receive_datagram(&mut self.queue, &datagram, now) {
                    self.stats.malformed += 1;
                    tracing::debug!(
                        neighbor = %datagram.neighbor,
                        if_index = datagram.if_index,
                        error = %e,
                        "drop malformed datagram"
                    );
                }
            },
            Ok(None) => {},
            Err(e) => tracing::warn!(error = %e, "receive failed"),
        }

        self.stats.transmissions += self.queue.flush_due(
            state,
            &mut self.transport,
            self.jitter.as_mut(),
            now,
        ) as u64;

        state.maintain_gateway(now);

        if now >= self.next_purge {
            state.purge(now);
            state.log_tables();
            self.stats.purges += 1;
            self.next_purge = now + state.settings().purge_interval_ms;
        }
    }

    /// Start if needed, then loop until shutdown is requested, then tear
    /// everything down.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon was already stopped.
    pub async fn run(&mut self) -> Result<()> {
        if self.lifecycle == DaemonState::Created {
            self.start()?;
        }
        if self.lifecycle != DaemonState::Running {
            return Err(Error::InvalidState(format!(
                "cannot run a daemon in state {:?}",
                self.lifecycle
            )));
        }

        while !self.abort.load(Ordering::SeqCst) {
            self.tick().await;
        }

        self.shutdown();
        Ok(())
    }

    /// Delete every route, stop the tunnel and drop pending transmissions.
    ///
    /// Does nothing unless the daemon is running.
    pub fn shutdown(&mut self) {
        if self.lifecycle != DaemonState::Running {
            return;
        }
        self.lifecycle = DaemonState::Stopping;
        tracing::info!("shutting down");

        let now = self.clock.now_ms();
        self.state.lock().shutdown(now);
        self.queue.clear();

        self.lifecycle = DaemonState::Stopped;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state
    pub fn lifecycle(&self) -> DaemonState {
        self.lifecycle
    }

    /// Main loop counters
    pub fn stats(&self) -> DaemonStats {
        self.stats
    }

    /// Pending transmissions
    pub fn queue(&self) -> &ForwardQueue {
        &self.queue
    }

    /// A handle to the shared routing state
    pub fn handle(&self) -> RoutingHandle {
        RoutingHandle {
            state: Arc::clone(&self.state),
            abort: Arc::clone(&self.abort),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Cloneable access to a daemon's routing state from other tasks
#[derive(Clone)]
pub struct RoutingHandle {
    state: Arc<Mutex<RoutingState>>,
    abort: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl RoutingHandle {
    /// Run `f` with the routing state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&RoutingState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Snapshot of the originator table
    pub fn originators(&self) -> Vec<OriginatorStatus> {
        originator_table(&self.state.lock())
    }

    /// Snapshot of the gateway list
    pub fn gateways(&self) -> Vec<GatewayStatus> {
        gateway_list(&self.state.lock())
    }

    /// Gateway the tunnel currently runs to
    pub fn current_gateway(&self) -> Option<Ipv4Addr> {
        self.state.lock().gateways().current()
    }

    /// Report that the tunnel to `gateway` broke
    pub fn report_gateway_failure(&self, gateway: Ipv4Addr) {
        let now = self.clock.now_ms();
        self.state.lock().report_gateway_failure(gateway, now);
    }

    /// Ask the main loop to stop after the current iteration
    pub fn request_shutdown(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}
