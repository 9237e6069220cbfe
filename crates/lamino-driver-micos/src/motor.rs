//! Micos motor axes
//!
//! A motor is addressed by its controller name and a 0-based axis index.
//! Query replies list one value per controller axis and are indexed with
//! `index`; commands that address a single axis use the 1-based number
//! `index + 1`.
//!
//! | operation          | command                          |
//! |--------------------|----------------------------------|
//! | position           | `{c} Crds ?`                     |
//! | set position       | `{c} AxisAbs {index+1} {pos}`    |
//! | acceleration       | `{c} Accel ?` / `{c} Accel {index+1} {a}` |
//! | velocity           | `{c} Speed ?` / `{c} Speed {index+1} {v}` |
//! | home               | `{c} Calibrate {index+1}`        |
//! | stop               | `{c} Stop`                       |
//! | state              | `{c} IsReady`                    |
//!
//! Setters are sent without reading a reply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lamino_core::limits::DEFAULT_SETTLE_TIMEOUT;
use lamino_core::{ContinuousMotor, DeviceError, Motor, MotorKind, MotorState};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::connection::{MicosConnection, MicosError};

/// Reply fragment the controller uses to refuse a move.
const SOFT_LIMIT_REPLY: &str = "Movement not possible due to soft limits";

/// Axis address and timing, as found in session configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MicosAxisConfig {
    /// Controller name, e.g. `Sam`
    pub controller: String,
    /// 0-based axis index within the controller
    pub index: usize,
    /// Upper bound for a move or homing run
    #[serde(with = "humantime_serde", default = "default_settle_timeout")]
    pub settle_timeout: Duration,
}

fn default_settle_timeout() -> Duration {
    DEFAULT_SETTLE_TIMEOUT
}

impl MicosAxisConfig {
    /// Axis with the default settle timeout.
    pub fn new(controller: impl Into<String>, index: usize) -> Self {
        Self {
            controller: controller.into(),
            index,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

// =============================================================================
// MicosMotor
// =============================================================================

/// One positional axis of a Micos controller.
pub struct MicosMotor {
    name: String,
    controller: String,
    index: usize,
    kind: MotorKind,
    settle_timeout: Duration,
    connection: Arc<MicosConnection>,
}

impl MicosMotor {
    /// Open an axis on a shared connection.
    ///
    /// Queries `AxisInfo` once to check that the server answers for the
    /// controller.
    pub async fn open(
        name: impl Into<String>,
        kind: MotorKind,
        axis: &MicosAxisConfig,
        connection: Arc<MicosConnection>,
    ) -> Result<Self> {
        let motor = Self {
            name: name.into(),
            controller: axis.controller.clone(),
            index: axis.index,
            kind,
            settle_timeout: axis.settle_timeout,
            connection,
        };

        let info = motor
            .connection
            .execute(&format!("{} AxisInfo", motor.controller))
            .await
            .with_context(|| format!("Micos motor '{}' did not answer AxisInfo", motor.name))?;
        info!(
            motor = %motor.name,
            controller = %motor.controller,
            index = motor.index,
            info = %info,
            "Micos axis opened"
        );

        Ok(motor)
    }

    /// Controller name.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// 0-based axis index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based axis number used in commands.
    fn axis_number(&self) -> usize {
        self.index + 1
    }

    /// Query `{c} {keyword} ?` and pick this axis' value from the reply.
    async fn query_axis_value(&self, keyword: &str) -> Result<f64> {
        let command = format!("{} {} ?", self.controller, keyword);
        let reply = self.connection.execute(&command).await?;
        self.parse_axis_value(&command, keyword, &reply)
            .map_err(anyhow::Error::from)
    }

    fn parse_axis_value(&self, command: &str, keyword: &str, reply: &str) -> Result<f64, MicosError> {
        let invalid = || MicosError::InvalidResponse {
            command: command.to_string(),
            response: reply.to_string(),
        };
        let prefix = format!("{} {} ", self.controller, keyword);
        let (_, values) = reply.split_once(&prefix).ok_or_else(invalid)?;
        values
            .split_whitespace()
            .nth(self.index)
            .ok_or_else(invalid)?
            .parse::<f64>()
            .map_err(|_| invalid())
    }

    /// Poll the state every `sleep_between` until the axis is in standby.
    async fn wait_standby(&self) -> Result<()> {
        let poll = self.connection.sleep_between();
        let start = Instant::now();

        loop {
            if self.state().await? == MotorState::Standby {
                return Ok(());
            }
            if start.elapsed() > self.settle_timeout {
                return Err(DeviceError::Timeout {
                    what: format!("'{}' to reach standby", self.name),
                    seconds: start.elapsed().as_secs_f64(),
                }
                .into());
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn read_velocity(&self) -> Result<f64> {
        self.query_axis_value("Speed").await
    }

    async fn write_velocity(&self, velocity: f64) -> Result<()> {
        self.connection
            .send(&format!("{} Speed {} {}", self.controller, self.axis_number(), velocity))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Motor for MicosMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MotorKind {
        self.kind
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn position(&self) -> Result<f64> {
        self.query_axis_value("Crds").await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_position(&self, target: f64) -> Result<()> {
        let reply = self
            .connection
            .execute(&format!(
                "{} AxisAbs {} {}",
                self.controller,
                self.axis_number(),
                target
            ))
            .await?;
        if reply.contains(SOFT_LIMIT_REPLY) {
            return Err(DeviceError::SoftLimit {
                motor: self.name.clone(),
            }
            .into());
        }

        self.wait_standby().await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn state(&self) -> Result<MotorState> {
        // IsReady reports on the whole controller, not on a single axis.
        let reply = self
            .connection
            .execute(&format!("{} IsReady", self.controller))
            .await?;
        if reply == format!("{} not ready", self.controller) {
            Ok(MotorState::Moving)
        } else {
            Ok(MotorState::Standby)
        }
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn stop(&self) -> Result<()> {
        self.connection
            .send(&format!("{} Stop", self.controller))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn home(&self) -> Result<()> {
        self.connection
            .execute(&format!("{} Calibrate {}", self.controller, self.axis_number()))
            .await?;
        self.wait_standby().await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn acceleration(&self) -> Result<f64> {
        self.query_axis_value("Accel").await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.connection
            .send(&format!(
                "{} Accel {} {}",
                self.controller,
                self.axis_number(),
                acceleration
            ))
            .await?;
        Ok(())
    }
}

// =============================================================================
// ContinuousMicosMotor
// =============================================================================

/// Micos axis that also exposes its velocity.
///
/// The controller has a single `Speed` per axis, so the continuous velocity
/// and the motion velocity are the same quantity.
pub struct ContinuousMicosMotor {
    inner: MicosMotor,
}

impl ContinuousMicosMotor {
    /// Wrap a positional axis.
    pub fn new(inner: MicosMotor) -> Self {
        Self { inner }
    }

    /// The underlying positional axis.
    pub fn inner(&self) -> &MicosMotor {
        &self.inner
    }
}

#[async_trait]
impl Motor for ContinuousMicosMotor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> MotorKind {
        self.inner.kind()
    }

    async fn position(&self) -> Result<f64> {
        self.inner.position().await
    }

    async fn set_position(&self, target: f64) -> Result<()> {
        self.inner.set_position(target).await
    }

    async fn state(&self) -> Result<MotorState> {
        self.inner.state().await
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    async fn home(&self) -> Result<()> {
        self.inner.home().await
    }

    async fn acceleration(&self) -> Result<f64> {
        self.inner.acceleration().await
    }

    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.inner.set_acceleration(acceleration).await
    }
}

#[async_trait]
impl ContinuousMotor for ContinuousMicosMotor {
    #[instrument(skip(self), fields(motor = %self.inner.name), err)]
    async fn velocity(&self) -> Result<f64> {
        self.inner.read_velocity().await
    }

    #[instrument(skip(self), fields(motor = %self.inner.name), err)]
    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        self.inner.write_velocity(velocity).await
    }

    async fn motion_velocity(&self) -> Result<Option<f64>> {
        Ok(Some(self.inner.read_velocity().await?))
    }

    async fn set_motion_velocity(&self, velocity: f64) -> Result<()> {
        self.inner.write_velocity(velocity).await
    }
}

// =============================================================================
// Constructors
// =============================================================================

/// Linear axis (mm).
pub struct LinearMotor;

impl LinearMotor {
    /// Open a linear axis.
    pub async fn open(
        name: impl Into<String>,
        axis: &MicosAxisConfig,
        connection: Arc<MicosConnection>,
    ) -> Result<MicosMotor> {
        MicosMotor::open(name, MotorKind::Linear, axis, connection).await
    }
}

/// Rotation axis (deg).
pub struct RotationMotor;

impl RotationMotor {
    /// Open a rotation axis.
    pub async fn open(
        name: impl Into<String>,
        axis: &MicosAxisConfig,
        connection: Arc<MicosConnection>,
    ) -> Result<MicosMotor> {
        MicosMotor::open(name, MotorKind::Rotation, axis, connection).await
    }
}

/// Linear axis with velocity control (mm/s).
pub struct ContinuousLinearMotor;

impl ContinuousLinearMotor {
    /// Open a continuous linear axis.
    pub async fn open(
        name: impl Into<String>,
        axis: &MicosAxisConfig,
        connection: Arc<MicosConnection>,
    ) -> Result<ContinuousMicosMotor> {
        Ok(ContinuousMicosMotor::new(
            MicosMotor::open(name, MotorKind::Linear, axis, connection).await?,
        ))
    }
}

/// Rotation axis with velocity control (deg/s).
pub struct ContinuousRotationMotor;

impl ContinuousRotationMotor {
    /// Open a continuous rotation axis.
    pub async fn open(
        name: impl Into<String>,
        axis: &MicosAxisConfig,
        connection: Arc<MicosConnection>,
    ) -> Result<ContinuousMicosMotor> {
        Ok(ContinuousMicosMotor::new(
            MicosMotor::open(name, MotorKind::Rotation, axis, connection).await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Scripted server: answers each received line with the next reply.
    fn scripted(server: DuplexStream, replies: Vec<&'static str>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();
            write.write_all(b"Micos server\r\n").await.unwrap();
            for reply in replies {
                match lines.next_line().await.unwrap() {
                    Some(line) => received.push(line),
                    None => break,
                }
                if !reply.is_empty() {
                    write.write_all(format!("{}\r\n", reply).as_bytes()).await.unwrap();
                }
            }
            received
        })
    }

    fn connection(device: DuplexStream) -> Arc<MicosConnection> {
        Arc::new(
            MicosConnection::from_stream("test", device, Duration::from_millis(1))
                .with_read_timeout(Duration::from_millis(500)),
        )
    }

    #[tokio::test]
    async fn position_picks_axis_by_index() {
        let (host, device) = tokio::io::duplex(1024);
        let server = scripted(host, vec!["Sam AxisInfo 6", "Sam Crds 0.0 1.5 -2.25 3.0"]);

        let motor = LinearMotor::open("sx45", &MicosAxisConfig::new("Sam", 2), connection(device))
            .await
            .unwrap();
        assert_eq!(motor.position().await.unwrap(), -2.25);

        let received = server.await.unwrap();
        assert_eq!(received, vec!["Sam AxisInfo", "Sam Crds ?"]);
    }

    #[tokio::test]
    async fn set_position_uses_one_based_axis_and_waits_for_standby() {
        let (host, device) = tokio::io::duplex(1024);
        let server = scripted(
            host,
            vec!["Sam AxisInfo", "Sam AxisAbs ok", "Sam not ready", "Sam ready"],
        );

        let motor = RotationMotor::open("rot", &MicosAxisConfig::new("Sam", 4), connection(device))
            .await
            .unwrap();
        motor.set_position(90.5).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[1], "Sam AxisAbs 5 90.5");
        assert_eq!(received[2], "Sam IsReady");
        assert_eq!(received[3], "Sam IsReady");
    }

    #[tokio::test]
    async fn soft_limit_reply_is_an_error() {
        let (host, device) = tokio::io::duplex(1024);
        let _server = scripted(
            host,
            vec!["Sam AxisInfo", "Sam Movement not possible due to soft limits"],
        );

        let motor = LinearMotor::open("sx45", &MicosAxisConfig::new("Sam", 0), connection(device))
            .await
            .unwrap();
        let err = motor.set_position(1000.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeviceError>(),
            Some(DeviceError::SoftLimit { .. })
        ));
    }

    #[tokio::test]
    async fn setters_do_not_wait_for_replies() {
        let (host, device) = tokio::io::duplex(1024);
        let server = scripted(host, vec!["Cont2 AxisInfo", "", "", ""]);

        let motor = ContinuousRotationMotor::open(
            "tilt",
            &MicosAxisConfig::new("Cont2", 1),
            connection(device),
        )
        .await
        .unwrap();
        motor.set_velocity(12.0).await.unwrap();
        motor.set_acceleration(4.0).await.unwrap();
        motor.stop().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(
            received[1..],
            ["Cont2 Speed 2 12", "Cont2 Accel 2 4", "Cont2 Stop"]
        );
    }

    #[tokio::test]
    async fn malformed_reply_is_rejected() {
        let (host, device) = tokio::io::duplex(1024);
        let _server = scripted(host, vec!["Sam AxisInfo", "Sam Speed 1.0"]);

        let motor = ContinuousLinearMotor::open(
            "py45",
            &MicosAxisConfig::new("Sam", 3),
            connection(device),
        )
        .await
        .unwrap();
        let err = motor.velocity().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MicosError>(),
            Some(MicosError::InvalidResponse { .. })
        ));
    }
}
