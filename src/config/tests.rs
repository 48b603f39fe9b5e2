//! Unit tests for configuration module
//!
//! Tests parsing, validation, defaults and environment overrides.

use super::*;
use anyhow::Result;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = SessionConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.socket, "zigen-0");
    assert_eq!(config.pixel_scale, 1000.0);
    assert!(config.cuboid_padding > 0.0);
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("zsurface.toml");

    fs::write(
        &file_path,
        r#"
socket = "zigen-1"
pixel_scale = 500.0
cuboid_padding = 0.1
"#,
    )?;

    let config = SessionConfig::load(&file_path)?;
    assert_eq!(config.socket, "zigen-1");
    assert_eq!(config.pixel_scale, 500.0);
    assert_eq!(config.cuboid_padding, 0.1);
    // Unspecified keys keep their defaults
    assert_eq!(config.surface_thickness, 0.001);

    Ok(())
}

#[test]
fn test_empty_file_uses_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("empty.toml");
    fs::write(&file_path, "")?;

    let config = SessionConfig::load(&file_path)?;
    assert_eq!(config, SessionConfig::default());
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut config = SessionConfig::default();
    config.pixel_scale = 0.0;
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    let mut config = SessionConfig::default();
    config.cuboid_padding = -0.5;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::default();
    config.surface_thickness = f32::NAN;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::default();
    config.socket = "   ".into();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file_reports_config_error() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("broken.toml");
    fs::write(&file_path, "pixel_scale = \"big\"")?;

    let err = SessionConfig::load(&file_path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    Ok(())
}

#[test]
fn test_missing_file_reports_config_error() {
    let err = SessionConfig::load("/nonexistent/zsurface.toml").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = SessionConfig::default();
    config.socket = "/run/user/1000/zigen-7".into();
    config.save(&file_path)?;

    assert_eq!(SessionConfig::load(&file_path)?, config);
    Ok(())
}

#[test]
fn test_save_into_missing_directory_is_config_error() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("missing").join("saved.toml");

    let err = SessionConfig::default().save(&file_path).unwrap_err();
    match err {
        Error::Config(message) => assert!(message.contains("saved.toml")),
        other => panic!("expected a config error, got {:?}", other),
    }
    Ok(())
}

#[test]
#[serial]
fn test_env_override_replaces_socket() {
    std::env::set_var(SOCKET_ENV, "zigen-env");
    let config = SessionConfig::default().with_env_overrides();
    std::env::remove_var(SOCKET_ENV);

    assert_eq!(config.socket, "zigen-env");
}

#[test]
#[serial]
fn test_empty_env_override_is_ignored() {
    std::env::set_var(SOCKET_ENV, "");
    let config = SessionConfig::default().with_env_overrides();
    std::env::remove_var(SOCKET_ENV);

    assert_eq!(config.socket, "zigen-0");
}
