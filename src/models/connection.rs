use super::HostKeyPolicy;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Parameters for reaching and authenticating to an SSH gateway.
///
/// Explicit values always win; when `use_ssh_config` is set the user's SSH
/// client config only fills the gaps (see [`ResolvedConnection`]).
#[derive(Clone, PartialEq)]
pub struct ConnectionSpec {
    /// Gateway host name, or an alias from the SSH config
    pub gateway_host: String,
    /// Gateway port; falls back to the SSH config, then 22
    pub gateway_port: Option<u16>,
    pub username: Option<String>,
    /// Used for password auth and as passphrase for encrypted keys
    pub password: Option<String>,
    /// Private keys tried in order
    pub identity_files: Vec<PathBuf>,
    /// Offer identities from a running ssh-agent
    pub use_agent: bool,
    /// Consult the user's SSH client config for missing values
    pub use_ssh_config: bool,
    /// Overrides `~/.ssh/config`
    pub ssh_config_path: Option<PathBuf>,
    pub host_key_policy: HostKeyPolicy,
    /// Overrides `~/.ssh/known_hosts`
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl ConnectionSpec {
    pub fn new(gateway_host: impl Into<String>) -> Self {
        Self {
            gateway_host: gateway_host.into(),
            gateway_port: None,
            username: None,
            password: None,
            identity_files: Vec::new(),
            use_agent: true,
            use_ssh_config: false,
            ssh_config_path: None,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.gateway_port = Some(port);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_files.push(path.into());
        self
    }

    pub fn with_agent(mut self, use_agent: bool) -> Self {
        self.use_agent = use_agent;
        self
    }

    pub fn with_ssh_config(mut self, path: Option<PathBuf>) -> Self {
        self.use_ssh_config = true;
        self.ssh_config_path = path;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("gateway_host", &self.gateway_host)
            .field("gateway_port", &self.gateway_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_files", &self.identity_files)
            .field("use_agent", &self.use_agent)
            .field("use_ssh_config", &self.use_ssh_config)
            .field("ssh_config_path", &self.ssh_config_path)
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Final connection parameters after merging a [`ConnectionSpec`] with the
/// SSH config and expanding identity paths.
#[derive(Clone, PartialEq)]
pub struct ResolvedConnection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub identity_files: Vec<PathBuf>,
    pub use_agent: bool,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl ResolvedConnection {
    /// Get a display string for the connection
    pub fn display_name(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_files", &self.identity_files)
            .field("use_agent", &self.use_agent)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ConnectionSpec::new("bastion.example.com")
            .with_port(2222)
            .with_username("deploy")
            .with_identity_file("~/.ssh/id_ed25519")
            .with_identity_file("/keys/backup");

        assert_eq!(spec.gateway_host, "bastion.example.com");
        assert_eq!(spec.gateway_port, Some(2222));
        assert_eq!(spec.username.as_deref(), Some("deploy"));
        assert_eq!(spec.identity_files.len(), 2);
        assert_eq!(spec.identity_files[0], PathBuf::from("~/.ssh/id_ed25519"));
    }

    #[test]
    fn test_spec_defaults() {
        let spec = ConnectionSpec::new("gw");

        assert!(spec.gateway_port.is_none());
        assert!(spec.use_agent);
        assert!(!spec.use_ssh_config);
        assert_eq!(spec.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(spec.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    }

    #[test]
    fn test_debug_redacts_password() {
        let spec = ConnectionSpec::new("gw").with_password("hunter2");
        let printed = format!("{:?}", spec);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
