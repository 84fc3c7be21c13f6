use super::ForwardTarget;
use crate::utils::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunnel settings for one database alias, as stored in `databases.toml`.
///
/// Required fields are optional here so an incomplete record still loads;
/// [`DatabaseRecord::validate`] reports what is missing before any network
/// action is taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseRecord {
    /// Service host as seen from the gateway
    #[serde(rename = "REMOTE_HOST", default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,

    /// Used both as the local listening port and the service port
    #[serde(rename = "PORT", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// SSH gateway host (or SSH config alias)
    #[serde(rename = "TUNNEL_HOST", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_host: Option<String>,

    #[serde(rename = "TUNNEL_USER", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_user: Option<String>,

    #[serde(rename = "TUNNEL_PASSWORD", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_password: Option<String>,

    #[serde(rename = "TUNNEL_IDENTITY", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_identity: Option<IdentityFiles>,

    #[serde(rename = "TUNNEL_PORT", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_port: Option<u16>,
}

/// `TUNNEL_IDENTITY` accepts a single path or a list of paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IdentityFiles {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl IdentityFiles {
    pub fn to_vec(&self) -> Vec<PathBuf> {
        match self {
            Self::One(path) => vec![path.clone()],
            Self::Many(paths) => paths.clone(),
        }
    }
}

/// The validated, required part of a [`DatabaseRecord`]
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelEndpoints {
    pub gateway_host: String,
    pub target: ForwardTarget,
    pub listen_port: u16,
}

impl DatabaseRecord {
    /// Check the required fields, in the order REMOTE_HOST, TUNNEL_HOST, PORT
    pub fn validate(&self, key: &str) -> Result<TunnelEndpoints> {
        let missing = |field| TunnelError::MissingField {
            key: key.to_string(),
            field,
        };

        let remote_host = non_empty(&self.remote_host).ok_or_else(|| missing("REMOTE_HOST"))?;
        let gateway_host = non_empty(&self.tunnel_host).ok_or_else(|| missing("TUNNEL_HOST"))?;
        let port = self.port.filter(|p| *p != 0).ok_or_else(|| missing("PORT"))?;

        Ok(TunnelEndpoints {
            gateway_host: gateway_host.to_string(),
            target: ForwardTarget::new(remote_host, port),
            listen_port: port,
        })
    }

    pub fn identity_files(&self) -> Vec<PathBuf> {
        self.tunnel_identity
            .as_ref()
            .map(IdentityFiles::to_vec)
            .unwrap_or_default()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
