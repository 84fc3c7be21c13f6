use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk moved in one step, per direction
pub const RELAY_CHUNK_SIZE: usize = 8192;

/// Traffic statistics shared by every relay of one forwarding server
#[derive(Debug, Clone)]
pub struct TrafficCounter {
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl Default for TrafficCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self {
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// (local → remote, remote → local)
    pub fn get_stats(&self) -> (u64, u64) {
        (
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count a relay as active until the returned guard is dropped
    pub fn track_connection(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }
}

pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bytes moved by one finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    LocalClosed,
    RemoteClosed,
}

/// Pump bytes between a local socket and a channel until either side
/// closes or fails, then close both.
///
/// Both read halves are polled together so a quiet side never blocks the
/// other. I/O errors end the relay exactly like an orderly close.
pub async fn relay<L, R>(local: L, remote: R, counter: &TrafficCounter) -> (RelayStats, RelayEnd)
where
    L: AsyncRead + AsyncWrite + Send,
    R: AsyncRead + AsyncWrite + Send,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let mut local_buf = vec![0u8; RELAY_CHUNK_SIZE];
    let mut remote_buf = vec![0u8; RELAY_CHUNK_SIZE];
    let mut stats = RelayStats::default();

    let end = loop {
        tokio::select! {
            result = local_read.read(&mut local_buf) => {
                match result {
                    Ok(0) => break RelayEnd::LocalClosed,
                    Ok(n) => {
                        if let Err(e) = remote_write.write_all(&local_buf[..n]).await {
                            tracing::debug!("Channel write error: {}", e);
                            break RelayEnd::RemoteClosed;
                        }
                        stats.bytes_sent += n as u64;
                        counter.add_sent(n as u64);
                    }
                    Err(e) => {
                        tracing::debug!("Local read error: {}", e);
                        break RelayEnd::LocalClosed;
                    }
                }
            }
            result = remote_read.read(&mut remote_buf) => {
                match result {
                    Ok(0) => break RelayEnd::RemoteClosed,
                    Ok(n) => {
                        if let Err(e) = local_write.write_all(&remote_buf[..n]).await {
                            tracing::debug!("Local write error: {}", e);
                            break RelayEnd::LocalClosed;
                        }
                        stats.bytes_received += n as u64;
                        counter.add_received(n as u64);
                    }
                    Err(e) => {
                        tracing::debug!("Channel read error: {}", e);
                        break RelayEnd::RemoteClosed;
                    }
                }
            }
        }
    };

    // Close both ends; failures here change nothing for the caller
    let _ = remote_write.shutdown().await;
    let _ = local_write.shutdown().await;

    (stats, end)
}
