use crate::models::{ConnectionSpec, ForwardTarget, HostKeyPolicy, ResolvedConnection, DEFAULT_SSH_PORT};
use crate::services::ssh_config::{SshConfig, SshHostConfig};
use crate::services::transport::{BoxedChannel, Connector, Transport};
use crate::utils::error::{Result, TunnelError};
use crate::utils::paths::{default_known_hosts_path, default_ssh_config_path, expand_tilde};
use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::known_hosts::{check_known_hosts_path, learn_known_hosts_path};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// SSH client session handle
pub type SshSession = Handle<SshClientHandler>;

/// SSH service for resolving parameters and opening gateway sessions
pub struct SshService;

impl SshService {
    /// Resolve a spec into final connection parameters.
    ///
    /// A missing or malformed SSH config never fails resolution; the
    /// lookup is skipped and only explicit values are used.
    pub fn resolve(spec: &ConnectionSpec) -> Result<ResolvedConnection> {
        if spec.gateway_host.trim().is_empty() {
            return Err(TunnelError::Config("gateway host is required".to_string()));
        }

        let host_config = if spec.use_ssh_config {
            Self::lookup_ssh_config(spec)
        } else {
            None
        };

        Self::merge(spec, host_config.as_ref())
    }

    fn lookup_ssh_config(spec: &ConnectionSpec) -> Option<SshHostConfig> {
        let path = spec
            .ssh_config_path
            .as_deref()
            .map(expand_tilde)
            .or_else(default_ssh_config_path)?;

        match SshConfig::load(&path) {
            Ok(config) => Some(config.lookup(&spec.gateway_host)),
            Err(e) => {
                tracing::warn!("Ignoring SSH config: {}", e);
                None
            }
        }
    }

    /// Merge explicit spec values with an SSH config entry.
    ///
    /// Explicit values win, config values fill gaps, config identity files
    /// are appended after explicit ones.
    pub fn merge(
        spec: &ConnectionSpec,
        host_config: Option<&SshHostConfig>,
    ) -> Result<ResolvedConnection> {
        let host = host_config
            .map(|c| c.hostname.clone())
            .unwrap_or_else(|| spec.gateway_host.clone());

        let port = spec
            .gateway_port
            .or_else(|| host_config.and_then(|c| c.port))
            .unwrap_or(DEFAULT_SSH_PORT);

        let username = spec
            .username
            .clone()
            .or_else(|| host_config.and_then(|c| c.user.clone()))
            .or_else(local_username)
            .ok_or_else(|| {
                TunnelError::Config(format!("no SSH username configured for {}", spec.gateway_host))
            })?;

        let identity_files: Vec<PathBuf> = spec
            .identity_files
            .iter()
            .chain(host_config.into_iter().flat_map(|c| c.identity_files.iter()))
            .map(|p| expand_tilde(p))
            .collect();

        Ok(ResolvedConnection {
            host,
            port,
            username,
            password: spec.password.clone(),
            identity_files,
            use_agent: spec.use_agent,
            host_key_policy: spec.host_key_policy,
            known_hosts_path: spec.known_hosts_path.as_deref().map(expand_tilde),
            connect_timeout: spec.connect_timeout,
        })
    }

    /// Open and authenticate a session to the gateway
    pub async fn connect(resolved: &ResolvedConnection) -> Result<SshSession> {
        tracing::info!("Connecting to {}", resolved.display_name());

        let config = client::Config {
            // Tunnels may sit idle for a long time; keep them alive instead
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            ..<client::Config as Default>::default()
        };

        let handler = SshClientHandler::new(
            &resolved.host,
            resolved.port,
            resolved.host_key_policy,
            resolved.known_hosts_path.clone(),
        );

        let connecting = client::connect(
            Arc::new(config),
            (resolved.host.as_str(), resolved.port),
            handler,
        );

        let mut session = match tokio::time::timeout(resolved.connect_timeout, connecting).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(connect_error(e, &resolved.host, resolved.port)),
            Err(_) => {
                return Err(TunnelError::HostUnreachable(format!(
                    "{}:{}: timed out after {}s",
                    resolved.host,
                    resolved.port,
                    resolved.connect_timeout.as_secs()
                )));
            }
        };

        Self::authenticate(&mut session, resolved).await?;
        Ok(session)
    }

    /// Try identity files, then the agent, then the password
    async fn authenticate(session: &mut SshSession, resolved: &ResolvedConnection) -> Result<()> {
        let mut failures: Vec<String> = Vec::new();

        for path in &resolved.identity_files {
            let key = match Self::load_key(path, resolved.password.as_deref()).await {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!("Skipping identity {:?}: {}", path, e);
                    failures.push(e.to_string());
                    continue;
                }
            };

            let hash_alg = session.best_supported_rsa_hash().await.ok().flatten().flatten();
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

            match session
                .authenticate_publickey(&resolved.username, key_with_alg)
                .await
            {
                Ok(AuthResult::Success) => {
                    tracing::info!("Authenticated with identity {:?}", path);
                    return Ok(());
                }
                Ok(_) => failures.push(format!("identity {:?} rejected", path)),
                Err(e) => failures.push(format!("identity {:?}: {}", path, e)),
            }
        }

        if resolved.use_agent {
            match Self::authenticate_agent(session, &resolved.username).await {
                Ok(true) => {
                    tracing::info!("Authenticated with ssh-agent identity");
                    return Ok(());
                }
                Ok(false) => failures.push("no agent identity accepted".to_string()),
                Err(reason) => {
                    tracing::debug!("ssh-agent unavailable: {}", reason);
                }
            }
        }

        if let Some(password) = &resolved.password {
            match session
                .authenticate_password(&resolved.username, password)
                .await
            {
                Ok(AuthResult::Success) => {
                    tracing::info!("Authenticated with password");
                    return Ok(());
                }
                Ok(_) => failures.push("password rejected".to_string()),
                Err(e) => failures.push(format!("password: {}", e)),
            }
        }

        let reason = if failures.is_empty() {
            "no usable credentials".to_string()
        } else {
            failures.join("; ")
        };

        tracing::error!("Authentication to {} failed: {}", resolved.display_name(), reason);
        Err(TunnelError::AuthenticationFailed(reason))
    }

    /// Offer every agent identity. `Err` means no agent could be used.
    #[cfg(unix)]
    async fn authenticate_agent(
        session: &mut SshSession,
        username: &str,
    ) -> std::result::Result<bool, String> {
        use russh::keys::agent::client::AgentClient;

        let mut agent = AgentClient::connect_env().await.map_err(|e| e.to_string())?;
        let identities = agent.request_identities().await.map_err(|e| e.to_string())?;

        for public_key in &identities {
            let hash_alg = session.best_supported_rsa_hash().await.ok().flatten().flatten();

            match session
                .authenticate_publickey_with(username, public_key.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(AuthResult::Success) => return Ok(true),
                Ok(_) => continue,
                Err(e) => tracing::debug!("Agent identity failed: {}", e),
            }
        }

        Ok(false)
    }

    #[cfg(not(unix))]
    async fn authenticate_agent(
        _session: &mut SshSession,
        _username: &str,
    ) -> std::result::Result<bool, String> {
        Err("ssh-agent is only supported on unix".to_string())
    }

    /// Load a private key, decrypting it with `passphrase` when needed
    async fn load_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey> {
        let key_data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TunnelError::AuthenticationFailed(format!("cannot read {:?}: {}", path, e)))?;

        let key = PrivateKey::from_openssh(key_data.trim()).map_err(|e| {
            TunnelError::AuthenticationFailed(format!("failed to load key {:?}: {}", path, e))
        })?;

        if !key.is_encrypted() {
            return Ok(key);
        }

        let passphrase = passphrase.ok_or_else(|| {
            TunnelError::AuthenticationFailed(format!("key {:?} is encrypted and no passphrase is set", path))
        })?;

        key.decrypt(passphrase.as_bytes()).map_err(|e| {
            TunnelError::AuthenticationFailed(format!("failed to decrypt key {:?}: {}", path, e))
        })
    }
}

/// Classify a failed connect: network trouble vs. a gateway that answered
/// but could not complete the SSH handshake
fn connect_error(e: russh::Error, host: &str, port: u16) -> TunnelError {
    match e {
        russh::Error::UnknownKey | russh::Error::KeyChanged { .. } => {
            TunnelError::HostKeyRejected(format!("{}:{}", host, port))
        }
        russh::Error::IO(_)
        | russh::Error::Disconnect
        | russh::Error::HUP
        | russh::Error::ConnectionTimeout
        | russh::Error::Elapsed(_) => TunnelError::HostUnreachable(format!("{}:{}: {}", host, port, e)),
        e => TunnelError::Handshake(format!("{}:{}: {}", host, port, e)),
    }
}

fn local_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

/// [`Connector`] backed by russh
#[derive(Debug, Default, Clone)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<dyn Transport>> {
        let resolved = SshService::resolve(spec)?;
        let session = SshService::connect(&resolved).await?;
        Ok(Arc::new(SshTransport::new(session, resolved.display_name())))
    }
}

/// An authenticated gateway session
pub struct SshTransport {
    session: SshSession,
    gateway: String,
    closed: AtomicBool,
}

impl SshTransport {
    pub fn new(session: SshSession, gateway: String) -> Self {
        Self {
            session,
            gateway,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_direct_tcpip(
        &self,
        target: &ForwardTarget,
        originator: SocketAddr,
    ) -> Result<BoxedChannel> {
        let channel = self
            .session
            .channel_open_direct_tcpip(
                target.remote_host.as_str(),
                target.remote_port as u32,
                originator.ip().to_string(),
                originator.port() as u32,
            )
            .await
            .map_err(|e| TunnelError::ChannelOpen(format!("{}: {}", target, e)))?;

        Ok(Box::pin(channel.into_stream()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.session.is_closed() {
            return Ok(());
        }

        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| TunnelError::HostUnreachable(format!("disconnect failed: {}", e)))?;

        tracing::info!("Disconnected from {}", self.gateway);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.session.is_closed()
    }

    fn gateway(&self) -> String {
        self.gateway.clone()
    }
}

/// SSH client handler applying the configured host key policy
pub struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<PathBuf>,
}

impl SshClientHandler {
    pub fn new(
        host: &str,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            policy,
            known_hosts_path,
        }
    }

    /// Calculate SHA256 fingerprint of a public key
    fn calculate_fingerprint(key: &PublicKey) -> String {
        use russh::keys::ssh_key::HashAlg;
        key.fingerprint(HashAlg::Sha256).to_string()
    }

    fn verify(&self, key: &PublicKey) -> bool {
        let fingerprint = Self::calculate_fingerprint(key);

        if self.policy == HostKeyPolicy::AcceptAny {
            tracing::warn!(
                "Host key verification disabled - accepting {} for {}:{}",
                fingerprint,
                self.host,
                self.port
            );
            return true;
        }

        let Some(path) = self.known_hosts_path.clone().or_else(default_known_hosts_path) else {
            tracing::warn!("No known_hosts location available");
            return self.policy == HostKeyPolicy::AcceptNew;
        };

        let known = if path.exists() {
            check_known_hosts_path(&self.host, self.port, key, &path)
        } else {
            Ok(false)
        };

        match known {
            Ok(true) => {
                tracing::debug!("Host key for {}:{} found in {:?}", self.host, self.port, path);
                true
            }
            Ok(false) if self.policy == HostKeyPolicy::Strict => {
                tracing::error!(
                    "Unknown host key {} for {}:{} (strict checking)",
                    fingerprint,
                    self.host,
                    self.port
                );
                false
            }
            Ok(false) => {
                tracing::warn!(
                    "Permanently adding {}:{} ({}) to {:?}",
                    self.host,
                    self.port,
                    fingerprint,
                    path
                );
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = learn_known_hosts_path(&self.host, self.port, key, &path) {
                    tracing::warn!("Failed to record host key: {}", e);
                }
                true
            }
            Err(e) => {
                tracing::error!("Host key for {}:{} does not match {:?}: {}", self.host, self.port, path, e);
                tracing::error!("Received: {}", fingerprint);
                false
            }
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let accepted = self.verify(server_public_key);
        async move { Ok(accepted) }
    }
}
