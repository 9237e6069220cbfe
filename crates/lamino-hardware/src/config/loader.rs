//! Session configuration loading.
//!
//! Values come from the TOML file, overridden by `LAMINO_`-prefixed
//! environment variables with `__` separating nested keys:
//!
//! ```text
//! LAMINO_SCAN__NUM_PROJECTIONS=1800
//! LAMINO_MICOS__MOTION_SERVER__SIMULATE=true
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use lamino_core::ConfigError;
use serde_valid::Validate;
use tracing::{debug, info};

use super::schema::SessionConfig;
use super::validation::validate_session_config;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LAMINO_";

fn env_overrides() -> Env {
    Env::prefixed(ENV_PREFIX).split("__")
}

/// Load and validate a session configuration file.
///
/// # Errors
///
/// [`ConfigError::NotFound`] if `path` does not exist, otherwise the parse
/// or validation error.
pub fn load_session_config(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()).into());
    }

    debug!("Loading session config from: {}", path.display());

    let figment = Figment::new()
        .merge(Toml::file(path))
        .merge(env_overrides());
    let config = extract(figment)
        .with_context(|| format!("Invalid session config: {}", path.display()))?;

    info!(
        session = %config.session.name,
        motors = config.motors.len(),
        mode = ?config.scan.mode,
        "Loaded session config"
    );
    Ok(config)
}

/// Load and validate a session configuration from a TOML string.
///
/// Environment overrides are not applied.
pub fn load_session_config_from_str(toml_content: &str) -> Result<SessionConfig> {
    Ok(extract(Figment::from(Toml::string(toml_content)))?)
}

fn extract(figment: Figment) -> Result<SessionConfig, ConfigError> {
    let config: SessionConfig = figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if let Err(errors) = config.validate() {
        return Err(ConfigError::SchemaValidationError(errors.to_string()));
    }

    if let Err(errors) = validate_session_config(&config) {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(ConfigError::ValidationError(messages.join("\n")));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{MotorConfig, ScanMode};
    use std::io::Write;

    const SESSION: &str = r#"
[session]
name = "test"

[micos.motion_server]
simulate = true

[[micos.motion_server.controllers]]
name = "Sam"
axes = 6

[motors.lamino_rot]
type = "micos"
server = "motion_server"
controller = "Sam"
index = 5
kind = "rotation"
continuous = true

[motors.flat]
type = "mock"
kind = "linear"

[scan]
mode = "continuous"
rotation_motor = "lamino_rot"
flat_motor = "flat"
flat_position = 10.0
radio_position = 0.0
"#;

    #[test]
    fn loads_with_defaults() {
        let config = load_session_config_from_str(SESSION).unwrap();
        assert_eq!(config.scan.mode, ScanMode::Continuous);
        assert_eq!(config.scan.num_darks, 50);
        assert_eq!(config.scan.num_flats, 51);
        assert_eq!(config.scan.num_projections, 3600);
        assert_eq!(config.scan.angular_range, 360.0);
        assert!(config.scan.separate_scans);
        assert_eq!(config.scan.return_velocity, 25.0);
        assert_eq!(config.micos["motion_server"].port, 6542);
        assert!(matches!(
            config.motors["lamino_rot"],
            MotorConfig::Micos { index: 5, .. }
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SESSION.as_bytes()).unwrap();
        let config = load_session_config(file.path()).unwrap();
        assert_eq!(config.session.name, "test");
    }

    #[test]
    fn missing_file() {
        let err = load_session_config(Path::new("/nonexistent/lamino.toml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn field_ranges_are_checked() {
        let toml = SESSION.replace("radio_position = 0.0", "radio_position = 0.0\nnum_projections = 0");
        let err = load_session_config_from_str(&toml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SchemaValidationError(_))
        ));
    }

    #[test]
    fn continuous_scan_needs_continuous_motor() {
        let toml = SESSION.replace("continuous = true", "continuous = false");
        let err = load_session_config_from_str(&toml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("velocity control"), "{}", message);
    }

    #[test]
    fn unknown_references_are_reported() {
        let toml = SESSION
            .replace("flat_motor = \"flat\"", "flat_motor = \"nope\"")
            .replace("index = 5", "index = 6");
        let err = load_session_config_from_str(&toml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown flat motor 'nope'"), "{}", message);
        assert!(message.contains("axis index 6"), "{}", message);
    }
}
