//! SSH tunnel seam
//!
//! The tunnel itself is supplied by the host application through
//! [`TunnelOpener`]. The session forwards the database target through it and
//! closes it when the session ends.

use async_trait::async_trait;
use std::net::SocketAddr;

use crate::config::SshTunnelConfig;
use crate::error::{Error, Result};

/// Where the tunnel forwards to
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// Bastion settings
    pub ssh: SshTunnelConfig,
    /// Database host as seen from the bastion
    pub remote_host: String,
    /// Database port as seen from the bastion
    pub remote_port: u16,
}

/// An open tunnel
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local address forwarding to the remote database
    fn local_addr(&self) -> SocketAddr;

    /// Stop forwarding
    async fn close(&mut self) -> Result<()>;
}

/// Opens tunnels for a session
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    /// Open a tunnel for `request`
    async fn open(&self, request: &TunnelRequest) -> Result<Box<dyn Tunnel>>;
}

/// Fails every request, used when no opener was supplied
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTunnel;

#[async_trait]
impl TunnelOpener for NoTunnel {
    async fn open(&self, request: &TunnelRequest) -> Result<Box<dyn Tunnel>> {
        Err(Error::tunnel(format!(
            "ssh_tunnel is enabled for {}:{} but no tunnel opener is configured",
            request.remote_host, request.remote_port
        )))
    }
}
