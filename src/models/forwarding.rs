use serde::{Deserialize, Serialize};
use std::fmt;

/// The service reached through the SSH transport.
///
/// Distinct from the gateway: the gateway opens a TCP connection to this
/// host and port on our behalf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ForwardTarget {
    pub remote_host: String,
    pub remote_port: u16,
}

impl ForwardTarget {
    pub fn new(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_host: remote_host.into(),
            remote_port,
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote_host, self.remote_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_target_display() {
        let target = ForwardTarget::new("10.0.0.5", 5432);
        assert_eq!(target.to_string(), "10.0.0.5:5432");
    }
}
