use crate::models::{ConnectionSpec, ForwardTarget};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream carried by one multiplexed channel
pub trait ChannelIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> ChannelIo for T {}

pub type BoxedChannel = Pin<Box<dyn ChannelIo>>;

/// An authenticated connection to a gateway that can open channels to
/// services behind it.
///
/// Channel opens may be issued concurrently from many relay tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a "direct-tcpip" channel to `target`, announcing `originator`
    /// as the address of the local peer.
    async fn open_direct_tcpip(
        &self,
        target: &ForwardTarget,
        originator: SocketAddr,
    ) -> Result<BoxedChannel>;

    /// Close the transport. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Human readable gateway description, e.g. `user@host:22`
    fn gateway(&self) -> String;
}

/// Opens and authenticates transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<dyn Transport>>;
}
