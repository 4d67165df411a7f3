//! Collaborators that only log
//!
//! Used by the daemon binary: kernel route and tunnel integration live
//! outside this crate, so route decisions are reported through `tracing`.

use super::{RouteAction, RouteSpec, RouteTable, TunnelControl};
use crate::error::{NetworkError, RouteError};
use std::net::Ipv4Addr;

/// Route table that logs each mutation at info level
#[derive(Debug, Default)]
pub struct LoggingRouteTable {
    mutations: u64,
}

impl LoggingRouteTable {
    /// New logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations logged so far.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }
}

impl RouteTable for LoggingRouteTable {
    fn add_del_route(&mut self, route: &RouteSpec, action: RouteAction) -> Result<(), RouteError> {
        self.mutations += 1;
        tracing::info!(%action, route = %route, "route");
        Ok(())
    }
}

/// Tunnel collaborator that logs session changes
///
/// Reports the default route it would install into `table` while a session
/// is up.
#[derive(Debug)]
pub struct LoggingTunnel {
    table: u8,
    active: Option<Ipv4Addr>,
}

impl LoggingTunnel {
    /// Idle tunnel routing through `table`.
    pub fn new(table: u8) -> Self {
        Self { table, active: None }
    }

    /// Gateway of the running session.
    pub fn active(&self) -> Option<Ipv4Addr> {
        self.active
    }
}

impl TunnelControl for LoggingTunnel {
    fn start(&mut self, gateway: Ipv4Addr, gwflags: u8) -> Result<(), NetworkError> {
        let (down, up) = crate::routing::gateway_speeds(gwflags);
        tracing::info!(
            %gateway,
            gwflags,
            down_kbit = down,
            up_kbit = up,
            table = self.table,
            "gateway tunnel started, default route via tunnel"
        );
        self.active = Some(gateway);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(gateway) = self.active.take() {
            tracing::info!(%gateway, table = self.table, "gateway tunnel stopped");
        }
    }
}
