//! Live devices of a beamline session.
//!
//! [`Session::open`] turns a validated [`SessionConfig`] into devices:
//!
//! - one [`MicosConnection`] per `[micos.<server>]`, shared by all its motors
//!   (an in-process [`MicosSimulator`] when `simulate = true`)
//! - Micos, simulated Bliss and mock motors
//! - magnet pushers and the 45° sample stage
//! - a simulated Bliss shutter and machine information
//! - the camera
//!
//! Devices are handed out by capability, e.g. [`Session::continuous_motor`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lamino_core::{Camera, ContinuousMotor, Motor, Shutter, StorageRing};
use lamino_driver_bliss::{
    BlissMotor, BlissShutter, EsrfStorageRing, SimulatedAxis, SimulatedMachineInfo,
    SimulatedShutter,
};
use lamino_driver_micos::{
    ContinuousMicosMotor, MicosAxisConfig, MicosConnection, MicosMotor, MicosSimulator,
    SimulatedController,
};
use lamino_driver_mock::{MockCamera, MockMotor};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{
    load_session_config, CameraConfig, MicosServerConfig, MotorConfig, SessionConfig,
};
use crate::magnet::MagnetPusher;
use crate::pseudo::CompositeMotor;
use crate::sample_translation::SampleTranslation;

/// Lookup failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No device of that name
    #[error("Unknown {kind} '{name}'")]
    UnknownDevice {
        /// Device category
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// The device exists but lacks the capability
    #[error("Device '{name}' does not support {capability}")]
    MissingCapability {
        /// Device name
        name: String,
        /// Requested capability
        capability: &'static str,
    },

    /// No `[sample_translation]` section
    #[error("Session has no sample translation stage")]
    NoSampleTranslation,
}

#[derive(Default)]
struct MotorMaps {
    motors: HashMap<String, Arc<dyn Motor>>,
    continuous: HashMap<String, Arc<dyn ContinuousMotor>>,
}

impl MotorMaps {
    fn insert<M: Motor + 'static>(&mut self, name: &str, motor: Arc<M>) {
        self.motors.insert(name.to_string(), motor);
    }

    fn insert_continuous<M: ContinuousMotor + 'static>(&mut self, name: &str, motor: Arc<M>) {
        self.motors.insert(name.to_string(), motor.clone());
        self.continuous.insert(name.to_string(), motor);
    }
}

/// Devices of one beamline session.
pub struct Session {
    config: SessionConfig,
    motors: HashMap<String, Arc<dyn Motor>>,
    continuous: HashMap<String, Arc<dyn ContinuousMotor>>,
    magnets: HashMap<String, Arc<MagnetPusher>>,
    shutter: Arc<dyn Shutter>,
    storage_ring: Arc<dyn StorageRing>,
    camera: Arc<dyn Camera>,
    sample_translation: Option<Arc<SampleTranslation>>,
    // Servers stop when dropped.
    simulators: Vec<MicosSimulator>,
}

impl Session {
    /// Load a configuration file and open its devices.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let config = load_session_config(path)?;
        Self::open(config).await
    }

    /// Open every device of `config`.
    pub async fn open(config: SessionConfig) -> Result<Self> {
        let mut simulators = Vec::new();
        let mut connections = HashMap::new();
        for (name, server) in &config.micos {
            let used = config
                .motors
                .values()
                .any(|m| matches!(m, MotorConfig::Micos { server, .. } if server == name));
            if !used {
                debug!(server = %name, "skipping unused Micos server");
                continue;
            }
            let connection = connect_micos(name, server, &mut simulators).await?;
            connections.insert(name.clone(), connection);
        }

        let mut maps = MotorMaps::default();
        for (name, motor) in &config.motors {
            open_motor(name, motor, &connections, &mut maps)
                .await
                .with_context(|| format!("Failed to open motor '{}'", name))?;
        }
        let MotorMaps { motors, continuous } = maps;

        let lookup = |name: &str| -> Result<Arc<dyn Motor>> {
            motors.get(name).cloned().ok_or_else(|| {
                SessionError::UnknownDevice {
                    kind: "motor",
                    name: name.to_string(),
                }
                .into()
            })
        };

        let mut magnets = HashMap::new();
        for (name, magnet) in &config.magnets {
            let pusher = MagnetPusher::new(lookup(&magnet.motor)?, magnet.positions);
            magnets.insert(name.clone(), Arc::new(pusher));
        }

        let sample_translation = match &config.sample_translation {
            Some(stage) => {
                let tilt = lookup(&stage.tilt)?;
                let sx45 = lookup(&stage.sx45)?;
                let sy45 = lookup(&stage.sy45)?;
                let magnet = |name: &str| -> Result<Arc<MagnetPusher>> {
                    magnets.get(name).cloned().ok_or_else(|| {
                        SessionError::UnknownDevice {
                            kind: "magnet",
                            name: name.to_string(),
                        }
                        .into()
                    })
                };
                let pseudo = CompositeMotor::new(
                    "sample",
                    vec![tilt.clone(), sx45.clone(), sy45.clone()],
                );
                Some(Arc::new(SampleTranslation::new(
                    Arc::new(pseudo),
                    tilt,
                    sx45,
                    sy45,
                    magnet(&stage.px45)?,
                    magnet(&stage.py45)?,
                )))
            }
            None => None,
        };

        let shutter_device = SimulatedShutter::new(config.shutter.name.clone())
            .with_transition(config.shutter.transition);
        let shutter: Arc<dyn Shutter> = Arc::new(
            BlissShutter::new(Arc::new(shutter_device)).with_timeout(config.shutter.timeout),
        );

        let ring = &config.storage_ring;
        let storage_ring: Arc<dyn StorageRing> = Arc::new(EsrfStorageRing::new(Arc::new(
            SimulatedMachineInfo::new(ring.current, ring.lifetime, ring.mode),
        )));

        let camera: Arc<dyn Camera> = match &config.camera {
            CameraConfig::Mock(camera) => Arc::new(MockCamera::new(camera.clone())),
        };

        info!(
            session = %config.session.name,
            motors = motors.len(),
            magnets = magnets.len(),
            simulators = simulators.len(),
            "Session open"
        );

        Ok(Self {
            config,
            motors,
            continuous,
            magnets,
            shutter,
            storage_ring,
            camera,
            sample_translation,
            simulators,
        })
    }

    /// The configuration the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Motor names in alphabetical order.
    pub fn motor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.motors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Motor by name.
    pub fn motor(&self, name: &str) -> Result<Arc<dyn Motor>, SessionError> {
        self.motors
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDevice {
                kind: "motor",
                name: name.to_string(),
            })
    }

    /// Motor with velocity control by name.
    pub fn continuous_motor(&self, name: &str) -> Result<Arc<dyn ContinuousMotor>, SessionError> {
        if let Some(motor) = self.continuous.get(name) {
            return Ok(motor.clone());
        }
        if self.motors.contains_key(name) {
            Err(SessionError::MissingCapability {
                name: name.to_string(),
                capability: "velocity control",
            })
        } else {
            Err(SessionError::UnknownDevice {
                kind: "motor",
                name: name.to_string(),
            })
        }
    }

    /// Magnet pusher by name.
    pub fn magnet(&self, name: &str) -> Result<Arc<MagnetPusher>, SessionError> {
        self.magnets
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDevice {
                kind: "magnet",
                name: name.to_string(),
            })
    }

    /// The 45° sample stage.
    pub fn sample_translation(&self) -> Result<Arc<SampleTranslation>, SessionError> {
        self.sample_translation
            .clone()
            .ok_or(SessionError::NoSampleTranslation)
    }

    /// Beam shutter.
    pub fn shutter(&self) -> Arc<dyn Shutter> {
        self.shutter.clone()
    }

    /// Storage ring telemetry.
    pub fn storage_ring(&self) -> Arc<dyn StorageRing> {
        self.storage_ring.clone()
    }

    /// Detector.
    pub fn camera(&self) -> Arc<dyn Camera> {
        self.camera.clone()
    }

    /// Running Micos simulators.
    pub fn simulators(&self) -> &[MicosSimulator] {
        &self.simulators
    }
}

async fn connect_micos(
    name: &str,
    server: &MicosServerConfig,
    simulators: &mut Vec<MicosSimulator>,
) -> Result<Arc<MicosConnection>> {
    let connection = if server.simulate {
        let controllers = server
            .controllers
            .iter()
            .map(|c| {
                SimulatedController::new(c.name.clone(), c.axes)
                    .with_speed(c.speed)
                    .with_acceleration(c.acceleration)
            })
            .collect();
        let simulator = MicosSimulator::start(controllers)
            .await
            .with_context(|| format!("Failed to start Micos simulator '{}'", name))?;
        let addr = simulator.local_addr();
        simulators.push(simulator);
        info!(server = %name, %addr, "using Micos simulator");
        MicosConnection::connect_with(&addr.ip().to_string(), addr.port(), server.settings)
            .await?
    } else {
        MicosConnection::connect_with(&server.host, server.port, server.settings).await?
    };
    Ok(Arc::new(connection))
}

async fn open_motor(
    name: &str,
    config: &MotorConfig,
    connections: &HashMap<String, Arc<MicosConnection>>,
    maps: &mut MotorMaps,
) -> Result<()> {
    match config {
        MotorConfig::Micos {
            server,
            controller,
            index,
            kind,
            continuous,
            settle_timeout,
        } => {
            let connection = connections.get(server).cloned().ok_or_else(|| {
                SessionError::UnknownDevice {
                    kind: "Micos server",
                    name: server.clone(),
                }
            })?;
            let axis = MicosAxisConfig {
                controller: controller.clone(),
                index: *index,
                settle_timeout: *settle_timeout,
            };
            let motor = MicosMotor::open(name, *kind, &axis, connection).await?;
            if *continuous {
                maps.insert_continuous(name, Arc::new(ContinuousMicosMotor::new(motor)));
            } else {
                maps.insert(name, Arc::new(motor));
            }
        }
        MotorConfig::Bliss { kind, axis } => {
            let device = Arc::new(SimulatedAxis::new(name, axis.clone()));
            maps.insert_continuous(name, Arc::new(BlissMotor::new(name, *kind, device)));
        }
        MotorConfig::Mock {
            kind,
            position,
            velocity,
            motion_velocity,
        } => {
            let mut motor = MockMotor::new(name, *kind)
                .with_position(*position)
                .with_velocity(*velocity);
            if *motion_velocity {
                motor = motor.with_motion_velocity();
            }
            maps.insert_continuous(name, Arc::new(motor));
        }
    }
    debug!(motor = %name, kind = ?config.kind(), "motor opened");
    Ok(())
}
