use serde::{Deserialize, Serialize};

/// How the gateway's host key is checked against known_hosts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Trust on first use: unknown keys are accepted and persisted,
    /// changed keys are rejected
    #[default]
    AcceptNew,
    /// Only keys already present in known_hosts are accepted
    Strict,
    /// Every key is accepted without looking at known_hosts
    AcceptAny,
}

impl HostKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptNew => "accept-new",
            Self::Strict => "strict",
            Self::AcceptAny => "accept-any",
        }
    }
}
