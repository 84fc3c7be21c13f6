pub mod commands;

pub use commands::{Cli, Commands};

use anyhow::Context;
use dbtunnel::models::DatabaseRecord;
use dbtunnel::services::config_service::{ConfigService, TunnelSettings};
use dbtunnel::services::ssh_service::SshService;
use dbtunnel::services::tunnel_registry::{TunnelRegistry, TunnelRequest};
use std::sync::Arc;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config_dir {
        Some(dir) => ConfigService::with_dir(dir)?,
        None => ConfigService::new()?,
    };

    match cli.command {
        Commands::List { json } => list(&config, json),
        Commands::Check { alias, ssh_config } => check(&config, &alias, ssh_config),
        Commands::Up {
            alias,
            ssh_config,
            port,
            bind,
        } => up(&config, &alias, ssh_config, port, bind).await,
    }
}

fn list(config: &ConfigService, json: bool) -> anyhow::Result<()> {
    let mut databases = config.load_databases()?;

    if json {
        for record in databases.values_mut() {
            if record.tunnel_password.is_some() {
                record.tunnel_password = Some("<redacted>".to_string());
            }
        }
        println!("{}", serde_json::to_string_pretty(&databases)?);
        return Ok(());
    }

    if databases.is_empty() {
        println!("No databases configured in {:?}", config.config_dir());
        return Ok(());
    }

    for (alias, record) in &databases {
        match record.validate(alias) {
            Ok(endpoints) => println!(
                "{} - :{} → {} via {}",
                alias, endpoints.listen_port, endpoints.target, endpoints.gateway_host
            ),
            Err(e) => println!("{} - incomplete ({})", alias, e),
        }
    }

    Ok(())
}

fn load(
    config: &ConfigService,
    alias: &str,
    ssh_config: bool,
) -> anyhow::Result<(DatabaseRecord, TunnelSettings)> {
    let record = config
        .get_database(alias)?
        .with_context(|| format!("database '{}' is not configured", alias))?;

    let mut settings = config.load_settings()?;
    settings.use_ssh_config |= ssh_config;

    Ok((record, settings))
}

fn check(config: &ConfigService, alias: &str, ssh_config: bool) -> anyhow::Result<()> {
    let (record, settings) = load(config, alias, ssh_config)?;
    let request = TunnelRequest::from_record(alias, &record, &settings)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let resolved = SshService::resolve(&request.spec)?;

    println!("{}", alias);
    println!("  gateway:  {}", resolved.display_name());
    println!("  target:   {}", request.target);
    println!("  listen:   {}:{}", settings.bind_address, request.listen_port);
    println!("  host key: {}", resolved.host_key_policy.as_str());
    for path in &resolved.identity_files {
        println!("  identity: {}", path.display());
    }

    Ok(())
}

async fn up(
    config: &ConfigService,
    alias: &str,
    ssh_config: bool,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let (record, settings) = load(config, alias, ssh_config)?;
    let mut request = TunnelRequest::from_record(alias, &record, &settings)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    if let Some(port) = port {
        request.listen_port = port;
    }

    let bind_address = bind.unwrap_or_else(|| settings.bind_address.clone());
    let registry = Arc::new(TunnelRegistry::with_ssh().with_bind_address(bind_address));

    registry
        .start_request(request)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if let Some(status) = registry.status(alias).await {
        println!(
            "Tunnel {} up: {} → {} → {} (Ctrl-C to stop)",
            alias, status.local_addr, status.gateway, status.target
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    if let Some(status) = registry.status(alias).await {
        tracing::info!(
            "Relayed {} bytes out, {} bytes in over {}s",
            status.bytes_sent,
            status.bytes_received,
            status.uptime().num_seconds()
        );
    }

    registry.stop_all().await?;
    Ok(())
}
