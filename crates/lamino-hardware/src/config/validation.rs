//! Cross-field validation of the session configuration.
//!
//! Field ranges are checked by `serde_valid`; this module checks that the
//! sections agree with each other: every referenced device exists and has the
//! capabilities its user needs.

use serde_valid::validation::Error as ValidationError;
use serde_valid::Validate;

use lamino_core::MotorKind;

use super::schema::{MotorConfig, ScanMode, SessionConfig};

fn custom(message: String) -> ValidationError {
    ValidationError::Custom(message)
}

/// Validate references between sections.
///
/// Returns every problem found, not only the first.
pub fn validate_session_config(config: &SessionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, motor) in &config.motors {
        if let MotorConfig::Micos {
            server,
            controller,
            index,
            ..
        } = motor
        {
            match config.micos.get(server) {
                None => errors.push(custom(format!(
                    "Motor '{}': unknown Micos server '{}'",
                    name, server
                ))),
                Some(micos) if micos.simulate => {
                    match micos.controllers.iter().find(|c| &c.name == controller) {
                        None => errors.push(custom(format!(
                            "Motor '{}': simulated server '{}' has no controller '{}'",
                            name, server, controller
                        ))),
                        Some(c) if *index >= c.axes => errors.push(custom(format!(
                            "Motor '{}': axis index {} out of range for controller '{}' ({} axes)",
                            name, index, controller, c.axes
                        ))),
                        Some(_) => {}
                    }
                }
                Some(_) => {}
            }
        }
    }

    for (name, server) in &config.micos {
        for controller in &server.controllers {
            if let Err(e) = controller.validate() {
                errors.push(custom(format!("Micos server '{}': {}", name, e)));
            }
        }
    }

    for (name, magnet) in &config.magnets {
        match config.motors.get(&magnet.motor) {
            None => errors.push(custom(format!(
                "Magnet '{}': unknown motor '{}'",
                name, magnet.motor
            ))),
            Some(motor) if motor.kind() != MotorKind::Linear => errors.push(custom(format!(
                "Magnet '{}': motor '{}' is not linear",
                name, magnet.motor
            ))),
            Some(_) => {}
        }
        if let Err(e) = magnet.validate() {
            errors.push(custom(format!("Magnet '{}': {}", name, e)));
        }
    }

    if let Some(stage) = &config.sample_translation {
        for motor in [&stage.tilt, &stage.sx45, &stage.sy45] {
            if !config.motors.contains_key(motor) {
                errors.push(custom(format!(
                    "Sample translation: unknown motor '{}'",
                    motor
                )));
            }
        }
        for magnet in [&stage.px45, &stage.py45] {
            if !config.magnets.contains_key(magnet) {
                errors.push(custom(format!(
                    "Sample translation: unknown magnet '{}'",
                    magnet
                )));
            }
        }
    }

    let scan = &config.scan;
    match config.motors.get(&scan.rotation_motor) {
        None => errors.push(custom(format!(
            "Scan: unknown rotation motor '{}'",
            scan.rotation_motor
        ))),
        Some(motor) => {
            if motor.kind() != MotorKind::Rotation {
                errors.push(custom(format!(
                    "Scan: motor '{}' is not a rotation motor",
                    scan.rotation_motor
                )));
            }
            if scan.mode == ScanMode::Continuous && !motor.is_continuous() {
                errors.push(custom(format!(
                    "Scan: continuous mode needs velocity control on '{}'",
                    scan.rotation_motor
                )));
            }
        }
    }
    if !config.motors.contains_key(&scan.flat_motor) {
        errors.push(custom(format!(
            "Scan: unknown flat motor '{}'",
            scan.flat_motor
        )));
    }
    if let Some(velocity) = scan.velocity {
        if velocity <= 0.0 || !velocity.is_finite() {
            errors.push(custom(format!(
                "Scan: velocity must be positive, got {}",
                velocity
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
