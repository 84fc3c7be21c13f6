// Services module
pub mod config_service;
pub mod forwarding_server;
pub mod relay_service;
pub mod ssh_config;
pub mod ssh_service;
pub mod transport;
pub mod tunnel_registry;
