//! In-memory Bliss devices
//!
//! Used by simulated sessions and tests in place of the control system.
//! Axes move at constant velocity; positions are computed from the elapsed
//! time, so `stop` leaves an axis where its profile put it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::motor::BlissAxis;
use crate::shutter::BlissShutterDevice;
use crate::storage_ring::MachineInfo;

const POLL: Duration = Duration::from_millis(5);

// =============================================================================
// SimulatedAxis
// =============================================================================

/// Initial settings of a [`SimulatedAxis`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatedAxisConfig {
    /// Start position
    pub position: f64,
    /// Software limits `(low, high)`
    pub limits: (f64, f64),
    /// Motion velocity in units/s
    pub velocity: f64,
    /// Acceleration in units/s²
    pub acceleration: f64,
    /// Jog acceleration time
    #[serde(with = "humantime_serde")]
    pub jog_acctime: Duration,
}

impl Default for SimulatedAxisConfig {
    fn default() -> Self {
        Self {
            position: 0.0,
            limits: (-1.0e6, 1.0e6),
            velocity: 10.0,
            acceleration: 100.0,
            jog_acctime: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Motion {
    Move {
        from: f64,
        to: f64,
        speed: f64,
        started: Instant,
    },
    Jog {
        from: f64,
        velocity: f64,
        started: Instant,
    },
}

impl Motion {
    fn position_at(&self, now: Instant) -> f64 {
        match *self {
            Motion::Move {
                from,
                to,
                speed,
                started,
            } => {
                let travelled = speed * now.duration_since(started).as_secs_f64();
                if travelled >= (to - from).abs() {
                    to
                } else {
                    from + travelled * (to - from).signum()
                }
            }
            Motion::Jog {
                from,
                velocity,
                started,
            } => from + velocity * now.duration_since(started).as_secs_f64(),
        }
    }

    fn is_done(&self, now: Instant) -> bool {
        match *self {
            Motion::Move { to, .. } => self.position_at(now) == to,
            Motion::Jog { .. } => false,
        }
    }
}

#[derive(Debug)]
struct AxisInner {
    position: f64,
    velocity: f64,
    acceleration: f64,
    motion: Option<Motion>,
    generation: u64,
    fault: bool,
}

impl AxisInner {
    fn current(&self, now: Instant) -> f64 {
        self.motion.map_or(self.position, |m| m.position_at(now))
    }

    fn halt(&mut self, now: Instant) {
        self.position = self.current(now);
        self.motion = None;
        self.generation += 1;
    }

    fn settle(&mut self, now: Instant) {
        if let Some(m) = self.motion {
            if m.is_done(now) {
                self.position = m.position_at(now);
                self.motion = None;
            }
        }
    }
}

/// Simulated Bliss axis.
pub struct SimulatedAxis {
    name: String,
    limits: (f64, f64),
    jog_acctime: Duration,
    inner: Mutex<AxisInner>,
}

impl SimulatedAxis {
    /// Axis with the given settings.
    pub fn new(name: impl Into<String>, config: SimulatedAxisConfig) -> Self {
        Self {
            name: name.into(),
            limits: config.limits,
            jog_acctime: config.jog_acctime,
            inner: Mutex::new(AxisInner {
                position: config.position,
                velocity: config.velocity,
                acceleration: config.acceleration,
                motion: None,
                generation: 0,
                fault: false,
            }),
        }
    }

    /// Put the axis into (or out of) the `FAULT` state.
    pub fn set_fault(&self, fault: bool) {
        self.inner.lock().fault = fault;
    }
}

#[async_trait]
impl BlissAxis for SimulatedAxis {
    fn name(&self) -> &str {
        &self.name
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.inner.lock().current(Instant::now()))
    }

    async fn move_to(&self, position: f64) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.fault {
                bail!("Axis '{}' is in FAULT", self.name);
            }
            let now = Instant::now();
            inner.halt(now);
            if inner.velocity <= 0.0 {
                bail!("Axis '{}' has no motion velocity", self.name);
            }
            inner.motion = Some(Motion::Move {
                from: inner.position,
                to: position,
                speed: inner.velocity,
                started: now,
            });
            inner.generation
        };

        loop {
            {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    // stopped or superseded
                    return Ok(());
                }
                inner.settle(Instant::now());
                if inner.motion.is_none() {
                    return Ok(());
                }
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn acceleration(&self) -> Result<f64> {
        Ok(self.inner.lock().acceleration)
    }

    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.inner.lock().acceleration = acceleration;
        Ok(())
    }

    async fn velocity(&self) -> Result<f64> {
        Ok(self.inner.lock().velocity)
    }

    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        self.inner.lock().velocity = velocity;
        Ok(())
    }

    async fn jog(&self, velocity: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fault {
            bail!("Axis '{}' is in FAULT", self.name);
        }
        let now = Instant::now();
        inner.halt(now);
        if velocity != 0.0 {
            inner.motion = Some(Motion::Jog {
                from: inner.position,
                velocity,
                started: now,
            });
        }
        Ok(())
    }

    async fn jog_acctime(&self) -> Result<Duration> {
        Ok(self.jog_acctime)
    }

    async fn home(&self) -> Result<()> {
        self.move_to(0.0).await
    }

    async fn stop(&self) -> Result<()> {
        self.inner.lock().halt(Instant::now());
        Ok(())
    }

    async fn state(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        if inner.fault {
            return Ok("FAULT".into());
        }
        inner.settle(Instant::now());
        Ok(if inner.motion.is_some() {
            "MOVING".into()
        } else {
            "READY".into()
        })
    }

    async fn limits(&self) -> Result<(f64, f64)> {
        Ok(self.limits)
    }
}

// =============================================================================
// SimulatedShutter
// =============================================================================

#[derive(Debug)]
struct ShutterInner {
    open: bool,
    moving_until: Option<Instant>,
    fault: bool,
}

/// Simulated Bliss shutter, closed at start.
pub struct SimulatedShutter {
    name: String,
    transition: Duration,
    inner: Mutex<ShutterInner>,
    operations: AtomicUsize,
}

impl SimulatedShutter {
    /// Instant-acting shutter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transition: Duration::ZERO,
            inner: Mutex::new(ShutterInner {
                open: false,
                moving_until: None,
                fault: false,
            }),
            operations: AtomicUsize::new(0),
        }
    }

    /// Time the blade needs to move.
    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    /// Put the shutter into (or out of) the `FAULT` state.
    pub fn set_fault(&self, fault: bool) {
        self.inner.lock().fault = fault;
    }

    /// Number of open/close requests received.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// True while the shutter is (or is becoming) open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn actuate(&self, open: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fault {
            bail!("Shutter '{}' is in FAULT", self.name);
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        inner.open = open;
        inner.moving_until = Some(Instant::now() + self.transition);
        Ok(())
    }
}

#[async_trait]
impl BlissShutterDevice for SimulatedShutter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        self.actuate(true)
    }

    async fn close(&self) -> Result<()> {
        self.actuate(false)
    }

    async fn state(&self) -> Result<String> {
        let inner = self.inner.lock();
        if inner.fault {
            return Ok("FAULT".into());
        }
        if inner.moving_until.is_some_and(|t| Instant::now() < t) {
            return Ok("MOVING".into());
        }
        Ok(if inner.open { "OPEN" } else { "CLOSED" }.into())
    }
}

// =============================================================================
// SimulatedMachineInfo
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Telemetry {
    current: f64,
    lifetime: f64,
    mode: i64,
}

/// Simulated machine-information proxy.
pub struct SimulatedMachineInfo {
    telemetry: Mutex<Telemetry>,
}

impl SimulatedMachineInfo {
    /// Fixed telemetry values.
    pub fn new(current: f64, lifetime: f64, mode: i64) -> Self {
        Self {
            telemetry: Mutex::new(Telemetry {
                current,
                lifetime,
                mode,
            }),
        }
    }

    /// Change the ring current.
    pub fn set_current(&self, current: f64) {
        self.telemetry.lock().current = current;
    }

    /// Change the operation mode code.
    pub fn set_mode(&self, mode: i64) {
        self.telemetry.lock().mode = mode;
    }
}

#[async_trait]
impl MachineInfo for SimulatedMachineInfo {
    async fn sr_current(&self) -> Result<f64> {
        Ok(self.telemetry.lock().current)
    }

    async fn sr_lifetime(&self) -> Result<f64> {
        Ok(self.telemetry.lock().lifetime)
    }

    async fn sr_mode(&self) -> Result<i64> {
        Ok(self.telemetry.lock().mode)
    }
}
