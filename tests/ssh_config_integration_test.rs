//! Integration tests for SSH config resolution
//!
//! These tests verify that database records, tunnel settings and the user's
//! SSH client config combine into the final gateway connection parameters.

use dbtunnel::models::{ConnectionSpec, DatabaseRecord, IdentityFiles};
use dbtunnel::services::config_service::TunnelSettings;
use dbtunnel::services::ssh_config::SshConfig;
use dbtunnel::services::ssh_service::SshService;
use dbtunnel::services::tunnel_registry::TunnelRequest;
use dbtunnel::utils::error::TunnelError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SSH_CONFIG: &str = r#"
# Jump hosts
Host db1
    HostName 10.0.0.5
    User alice
    IdentityFile /keys/db1_ed25519

Host bastion-*
    HostName %h.corp.example
    Port 2202
    User ops

Host bastion-legacy
    Port 22

Host *
    IdentityFile /keys/default
"#;

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config");
    fs::write(&path, content).expect("Failed to write ssh config");
    path
}

// =============================================================================
// Alias Resolution
// =============================================================================

#[test]
fn test_alias_resolves_hostname_and_user() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SSH_CONFIG);

    let spec = ConnectionSpec::new("db1").with_ssh_config(Some(path));
    let resolved = SshService::resolve(&spec).unwrap();

    assert_eq!(resolved.host, "10.0.0.5");
    assert_eq!(resolved.username, "alice");
    assert_eq!(resolved.port, 22);
    assert_eq!(
        resolved.identity_files,
        vec![PathBuf::from("/keys/db1_ed25519"), PathBuf::from("/keys/default")]
    );
}

#[test]
fn test_first_matching_block_wins() {
    let temp = TempDir::new().unwrap();
    let config = SshConfig::load(&write_config(&temp, SSH_CONFIG)).unwrap();

    let host = config.lookup("bastion-legacy");
    assert_eq!(host.hostname, "bastion-legacy.corp.example");
    assert_eq!(host.port, Some(2202));
    assert_eq!(host.user.as_deref(), Some("ops"));
}

#[test]
fn test_explicit_values_override_config() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SSH_CONFIG);

    let spec = ConnectionSpec::new("bastion-eu")
        .with_ssh_config(Some(path))
        .with_port(2022)
        .with_username("deploy")
        .with_identity_file("/keys/explicit");
    let resolved = SshService::resolve(&spec).unwrap();

    assert_eq!(resolved.host, "bastion-eu.corp.example");
    assert_eq!(resolved.port, 2022);
    assert_eq!(resolved.username, "deploy");
    assert_eq!(resolved.identity_files[0], PathBuf::from("/keys/explicit"));
}

#[test]
fn test_unknown_alias_keeps_host() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "Host other\n    HostName 10.9.9.9\n");

    let spec = ConnectionSpec::new("gw.example.com")
        .with_ssh_config(Some(path))
        .with_username("svc");
    let resolved = SshService::resolve(&spec).unwrap();

    assert_eq!(resolved.host, "gw.example.com");
    assert!(resolved.identity_files.is_empty());
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_missing_config_falls_back_to_explicit_values() {
    let temp = TempDir::new().unwrap();
    let spec = ConnectionSpec::new("db1")
        .with_ssh_config(Some(temp.path().join("does-not-exist")))
        .with_username("bob");

    let resolved = SshService::resolve(&spec).unwrap();
    assert_eq!(resolved.host, "db1");
    assert_eq!(resolved.username, "bob");
}

#[test]
fn test_malformed_config_reports_path() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "Host db1\n    Port \"2202\n");

    match SshConfig::load(&path) {
        Err(TunnelError::SshConfigParse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected parse error, got {:?}", other),
    }

    // Resolution continues without the config
    let spec = ConnectionSpec::new("db1").with_ssh_config(Some(path)).with_username("bob");
    assert_eq!(SshService::resolve(&spec).unwrap().host, "db1");
}

#[test]
fn test_config_ignored_when_disabled() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SSH_CONFIG);

    let mut spec = ConnectionSpec::new("db1").with_username("bob");
    spec.ssh_config_path = Some(path);
    let resolved = SshService::resolve(&spec).unwrap();

    assert_eq!(resolved.host, "db1");
}

// =============================================================================
// Record → Request → Resolution
// =============================================================================

#[test]
fn test_record_with_only_alias_resolves_through_settings() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SSH_CONFIG);

    let record = DatabaseRecord {
        remote_host: Some("pg.internal".into()),
        port: Some(5432),
        tunnel_host: Some("db1".into()),
        ..Default::default()
    };
    let settings = TunnelSettings {
        use_ssh_config: true,
        ssh_config_path: Some(path),
        ..Default::default()
    };

    let request = TunnelRequest::from_record("reporting", &record, &settings).unwrap();
    let resolved = SshService::resolve(&request.spec).unwrap();

    assert_eq!(resolved.host, "10.0.0.5");
    assert_eq!(resolved.username, "alice");
    assert_eq!(request.target.to_string(), "pg.internal:5432");
}

#[test]
fn test_record_identity_precedes_config_identity() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SSH_CONFIG);

    let record = DatabaseRecord {
        remote_host: Some("pg.internal".into()),
        port: Some(5432),
        tunnel_host: Some("db1".into()),
        tunnel_identity: Some(IdentityFiles::Many(vec!["/keys/a".into(), "/keys/b".into()])),
        ..Default::default()
    };
    let settings = TunnelSettings {
        use_ssh_config: true,
        ssh_config_path: Some(path),
        ..Default::default()
    };

    let request = TunnelRequest::from_record("reporting", &record, &settings).unwrap();
    let resolved = SshService::resolve(&request.spec).unwrap();

    let files: Vec<&Path> = resolved.identity_files.iter().map(PathBuf::as_path).collect();
    assert_eq!(
        files,
        vec![
            Path::new("/keys/a"),
            Path::new("/keys/b"),
            Path::new("/keys/db1_ed25519"),
            Path::new("/keys/default"),
        ]
    );
}
