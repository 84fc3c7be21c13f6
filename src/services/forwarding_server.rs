use crate::models::ForwardTarget;
use crate::services::relay_service::{relay, TrafficCounter};
use crate::services::transport::Transport;
use crate::utils::error::{Result, TunnelError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Local listener that forwards every accepted connection through a
/// transport channel to a fixed target.
pub struct ForwardingServer {
    pub id: uuid::Uuid,
    local_addr: SocketAddr,
    target: ForwardTarget,
    traffic_counter: TrafficCounter,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ForwardingServer {
    /// Bind `bind_address:listen_port` and start accepting in the background
    pub async fn start(
        bind_address: &str,
        listen_port: u16,
        transport: Arc<dyn Transport>,
        target: ForwardTarget,
    ) -> Result<Self> {
        let bind_addr = format!("{}:{}", bind_address, listen_port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TunnelError::PortInUse(listen_port)
            } else {
                TunnelError::Bind(format!("{}: {}", bind_addr, e))
            }
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Forwarding {} → {} via {}", local_addr, target, transport.gateway());

        let traffic_counter = TrafficCounter::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Self::accept_loop(
            listener,
            transport,
            target.clone(),
            traffic_counter.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            id: uuid::Uuid::new_v4(),
            local_addr,
            target,
            traffic_counter,
            shutdown_tx,
            task: Some(task),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        transport: Arc<dyn Transport>,
        target: ForwardTarget,
        traffic_counter: TrafficCounter,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((local_stream, peer_addr)) => {
                            tracing::debug!("Accepted connection from {}", peer_addr);
                            sessions.spawn(Self::handle_connection(
                                Arc::clone(&transport),
                                target.clone(),
                                local_stream,
                                peer_addr,
                                traffic_counter.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!("Accept error: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        drop(listener);

        let open = sessions.len();
        // Aborting a relay drops its socket and channel, closing both ends
        sessions.shutdown().await;
        tracing::debug!("Forwarding to {} stopped, closed {} relay(s)", target, open);
    }

    async fn handle_connection(
        transport: Arc<dyn Transport>,
        target: ForwardTarget,
        local_stream: TcpStream,
        peer_addr: SocketAddr,
        traffic_counter: TrafficCounter,
    ) {
        let channel = match transport.open_direct_tcpip(&target, peer_addr).await {
            Ok(channel) => channel,
            Err(e) => {
                // Dropping the stream closes the local connection
                tracing::debug!("Incoming request from {} to {} failed: {}", peer_addr, target, e);
                return;
            }
        };

        let _active = traffic_counter.track_connection();
        tracing::debug!("Tunnel open {} → {}", peer_addr, target);

        let (stats, end) = relay(local_stream, channel, &traffic_counter).await;
        tracing::debug!(
            "Tunnel closed from {} ({:?}, {} bytes sent, {} bytes received)",
            peer_addr,
            end,
            stats.bytes_sent,
            stats.bytes_received
        );
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.target
    }

    pub fn get_traffic_stats(&self) -> (u64, u64) {
        self.traffic_counter.get_stats()
    }

    pub fn active_connections(&self) -> usize {
        self.traffic_counter.active_connections()
    }

    /// Stop accepting and close every relay.
    ///
    /// Returns once the listener is released. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::warn!("Forwarding task for {} ended abnormally: {}", self.local_addr, e);
            }
        }

        tracing::info!("Stopped forwarding on {}", self.local_addr);
    }

    /// Check if the accept loop is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ForwardingServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::BoxedChannel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport whose channels are always refused
    struct RefusingTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn open_direct_tcpip(
            &self,
            target: &ForwardTarget,
            _originator: SocketAddr,
        ) -> Result<BoxedChannel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TunnelError::ChannelOpen(format!("{} administratively prohibited", target)))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn gateway(&self) -> String {
            "test@refusing:22".to_string()
        }
    }

    #[tokio::test]
    async fn test_refused_channel_closes_local_connection() {
        use tokio::io::AsyncReadExt;

        let transport = Arc::new(RefusingTransport { attempts: AtomicUsize::new(0) });
        let mut server = ForwardingServer::start(
            "127.0.0.1",
            0,
            transport.clone(),
            ForwardTarget::new("db.internal", 5432),
        )
        .await
        .unwrap();

        for _ in 0..2 {
            let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
            let mut buf = [0u8; 16];
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .expect("connection should be closed")
                .unwrap_or(0);
            assert_eq!(n, 0);
        }

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert!(server.is_running());

        server.shutdown().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let transport = Arc::new(RefusingTransport { attempts: AtomicUsize::new(0) });
        let mut server =
            ForwardingServer::start("127.0.0.1", 0, transport, ForwardTarget::new("db", 1))
                .await
                .unwrap();

        server.shutdown().await;
        server.shutdown().await;
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_port_in_use() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let transport = Arc::new(RefusingTransport { attempts: AtomicUsize::new(0) });
        let result =
            ForwardingServer::start("127.0.0.1", port, transport, ForwardTarget::new("db", 1)).await;

        assert!(matches!(result, Err(TunnelError::PortInUse(p)) if p == port));
    }
}
