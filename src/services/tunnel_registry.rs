use crate::models::{ConnectionSpec, DatabaseRecord, ForwardTarget, TunnelStatus};
use crate::services::config_service::TunnelSettings;
use crate::services::forwarding_server::ForwardingServer;
use crate::services::ssh_service::SshConnector;
use crate::services::transport::{Connector, Transport};
use crate::utils::error::{Result, TunnelError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Failure reported by the application's connection pool
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No pooled connection exists for the key; treated as success
    #[error("no pooled connection for {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// The application's database connection pool.
///
/// Pooled connections to a tunnelled database are useless once the tunnel
/// is gone, so they are closed before teardown.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn close(&self, key: &str) -> std::result::Result<(), PoolError>;
}

/// Pool for applications that keep no pooled connections
#[derive(Debug, Default, Clone)]
pub struct NoPool;

#[async_trait]
impl ConnectionPool for NoPool {
    async fn close(&self, _key: &str) -> std::result::Result<(), PoolError> {
        Ok(())
    }
}

/// Everything needed to start one tunnel
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub key: String,
    pub spec: ConnectionSpec,
    pub target: ForwardTarget,
    pub listen_port: u16,
}

impl TunnelRequest {
    pub fn new(
        key: impl Into<String>,
        spec: ConnectionSpec,
        target: ForwardTarget,
        listen_port: u16,
    ) -> Self {
        Self {
            key: key.into(),
            spec,
            target,
            listen_port,
        }
    }

    /// Build a request from a database record.
    ///
    /// `PORT` is used both as the local listening port and the target port.
    pub fn from_record(key: &str, record: &DatabaseRecord, settings: &TunnelSettings) -> Result<Self> {
        let endpoints = record.validate(key)?;

        let mut spec = ConnectionSpec::new(endpoints.gateway_host)
            .with_agent(settings.use_agent)
            .with_host_key_policy(settings.host_key_policy)
            .with_connect_timeout(Duration::from_secs(settings.connect_timeout_seconds));
        spec.gateway_port = record.tunnel_port;
        spec.username = record.tunnel_user.clone();
        spec.password = record.tunnel_password.clone();
        spec.identity_files = record.identity_files();
        spec.known_hosts_path = settings.known_hosts_path.clone();

        if settings.use_ssh_config {
            spec = spec.with_ssh_config(settings.ssh_config_path.clone());
        }

        Ok(Self::new(key, spec, endpoints.target, endpoints.listen_port))
    }
}

/// A running tunnel: the transport and the server forwarding through it
struct ActiveTunnel {
    id: uuid::Uuid,
    transport: Arc<dyn Transport>,
    server: ForwardingServer,
    target: ForwardTarget,
    started_at: DateTime<Utc>,
}

impl ActiveTunnel {
    fn to_status(&self, key: &str) -> TunnelStatus {
        let (bytes_sent, bytes_received) = self.server.get_traffic_stats();

        TunnelStatus {
            id: self.id,
            key: key.to_string(),
            gateway: self.transport.gateway(),
            target: self.target.clone(),
            local_addr: self.server.local_addr(),
            started_at: self.started_at,
            active_connections: self.server.active_connections(),
            bytes_sent,
            bytes_received,
        }
    }
}

/// Per-key slot; holding its lock serializes start/stop for that key
type Slot = Arc<Mutex<Option<ActiveTunnel>>>;

/// Process-wide map from a key (database alias) to its active tunnel.
///
/// At most one tunnel exists per key. `start` and `stop` for the same key
/// are mutually exclusive; different keys never wait on each other.
pub struct TunnelRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    connector: Arc<dyn Connector>,
    pool: Arc<dyn ConnectionPool>,
    bind_address: String,
}

impl TunnelRegistry {
    /// Create a registry with custom collaborators
    pub fn new(connector: Arc<dyn Connector>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            connector,
            pool,
            bind_address: "0.0.0.0".to_string(),
        }
    }

    /// Registry that connects over SSH and has no connection pool
    pub fn with_ssh() -> Self {
        Self::new(Arc::new(SshConnector), Arc::new(NoPool))
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    async fn existing_slot(&self, key: &str) -> Option<Slot> {
        self.slots.read().await.get(key).cloned()
    }

    /// Start a tunnel for `key`.
    ///
    /// No-op for an empty key or when the key already has a tunnel.
    pub async fn start(
        &self,
        key: &str,
        spec: ConnectionSpec,
        target: ForwardTarget,
        listen_port: u16,
    ) -> Result<()> {
        if key.trim().is_empty() {
            tracing::debug!("Ignoring tunnel start without a key");
            return Ok(());
        }

        if target.remote_host.trim().is_empty() {
            return Err(TunnelError::MissingField {
                key: key.to_string(),
                field: "REMOTE_HOST",
            });
        }
        if spec.gateway_host.trim().is_empty() {
            return Err(TunnelError::MissingField {
                key: key.to_string(),
                field: "TUNNEL_HOST",
            });
        }

        let slot = self.slot(key).await;
        let mut entry = slot.lock().await;

        if entry.is_some() {
            tracing::debug!("Tunnel for {} is already running", key);
            return Ok(());
        }

        let transport = self.connector.connect(&spec).await?;

        let server = match ForwardingServer::start(
            &self.bind_address,
            listen_port,
            Arc::clone(&transport),
            target.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::warn!("Failed to close transport for {}: {}", key, close_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Tunnel {} started: {} → {} → {}",
            key,
            server.local_addr(),
            transport.gateway(),
            target
        );

        *entry = Some(ActiveTunnel {
            id: server.id,
            transport,
            server,
            target,
            started_at: Utc::now(),
        });

        Ok(())
    }

    /// Start a tunnel from a prepared request
    pub async fn start_request(&self, request: TunnelRequest) -> Result<()> {
        self.start(&request.key, request.spec, request.target, request.listen_port)
            .await
    }

    /// Start a tunnel described by a database record
    pub async fn start_database(
        &self,
        key: &str,
        record: &DatabaseRecord,
        settings: &TunnelSettings,
    ) -> Result<()> {
        if key.trim().is_empty() {
            return Ok(());
        }
        let request = TunnelRequest::from_record(key, record, settings)?;
        self.start_request(request).await
    }

    /// Tear down the tunnel for `key`.
    ///
    /// Always safe to call; every teardown step runs even if an earlier one
    /// fails. Teardown runs on its own task holding the slot, so dropping
    /// the returned future does not interrupt it.
    pub async fn stop(&self, key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Ok(());
        }

        let Some(slot) = self.existing_slot(key).await else {
            return Ok(());
        };
        let entry = slot.lock_owned().await;
        if entry.is_none() {
            return Ok(());
        }

        let teardown = tokio::spawn(Self::teardown(entry, Arc::clone(&self.pool), key.to_string()));

        teardown
            .await
            .map_err(|e| TunnelError::Other(anyhow::anyhow!("teardown of {} failed: {}", key, e)))
    }

    async fn teardown(
        mut entry: OwnedMutexGuard<Option<ActiveTunnel>>,
        pool: Arc<dyn ConnectionPool>,
        key: String,
    ) {
        let Some(mut tunnel) = entry.take() else {
            return;
        };

        tracing::info!("Stopping tunnel {}", key);

        match pool.close(&key).await {
            Ok(()) => {}
            Err(PoolError::NotFound(_)) => {
                tracing::debug!("No pooled connection to close for {}", key);
            }
            Err(e) => tracing::warn!("Failed to close pooled connection for {}: {}", key, e),
        }

        tunnel.server.shutdown().await;

        if let Err(e) = tunnel.transport.close().await {
            tracing::warn!("Failed to close transport for {}: {}", key, e);
        }

        tracing::info!("Tunnel {} stopped", key);
    }

    /// Stop every registered tunnel
    pub async fn stop_all(&self) -> Result<()> {
        let keys: Vec<String> = self.slots.read().await.keys().cloned().collect();

        tracing::info!("Stopping all tunnels");
        let results = futures::future::join_all(keys.iter().map(|key| self.stop(key))).await;

        results.into_iter().collect()
    }

    /// Run `op` with a tunnel for the request's key.
    ///
    /// `stop` runs exactly once whether `op` succeeds, fails or the future
    /// is dropped mid-way.
    pub async fn scoped<F, Fut, T, E>(self: &Arc<Self>, request: TunnelRequest, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<TunnelError>,
    {
        let mut guard = StopGuard::new(Arc::clone(self), request.key.clone());

        let outcome = match self.start_request(request).await {
            Ok(()) => op().await,
            Err(e) => Err(E::from(e)),
        };

        guard.stop().await;
        outcome
    }

    pub async fn is_active(&self, key: &str) -> bool {
        match self.existing_slot(key).await {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Status of the tunnel for `key`, if running
    pub async fn status(&self, key: &str) -> Option<TunnelStatus> {
        let slot = self.existing_slot(key).await?;
        let entry = slot.lock().await;
        entry.as_ref().map(|tunnel| tunnel.to_status(key))
    }

    /// Status of every running tunnel, ordered by key
    pub async fn list(&self) -> Vec<TunnelStatus> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut statuses = Vec::new();
        for (key, slot) in slots {
            if let Some(tunnel) = slot.lock().await.as_ref() {
                statuses.push(tunnel.to_status(&key));
            }
        }
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub async fn active_count(&self) -> usize {
        self.list().await.len()
    }
}

/// Stops a tunnel when dropped unless stopped explicitly first
struct StopGuard {
    registry: Arc<TunnelRegistry>,
    key: String,
    armed: bool,
}

impl StopGuard {
    fn new(registry: Arc<TunnelRegistry>, key: String) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    async fn stop(&mut self) {
        if let Err(e) = self.registry.stop(&self.key).await {
            tracing::warn!("Failed to stop tunnel {}: {}", self.key, e);
        }
        self.armed = false;
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = registry.stop(&key).await {
                        tracing::warn!("Failed to stop tunnel {}: {}", key, e);
                    }
                });
            }
            Err(_) => tracing::error!("No runtime available to stop tunnel {}", key),
        }
    }
}
