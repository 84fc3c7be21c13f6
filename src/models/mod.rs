pub mod auth;
pub mod connection;
pub mod database;
pub mod forwarding;
pub mod status;

// Re-export main types
pub use auth::HostKeyPolicy;
pub use connection::{ConnectionSpec, ResolvedConnection, DEFAULT_SSH_PORT};
pub use database::{DatabaseRecord, IdentityFiles, TunnelEndpoints};
pub use forwarding::ForwardTarget;
pub use status::TunnelStatus;
