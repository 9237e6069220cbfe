//! In-process Micos motion server
//!
//! Listens on a loopback TCP port and answers the same command dialect as
//! the real server, so sessions can run without hardware and tests can
//! exercise real sockets.
//!
//! Motion follows a constant-velocity profile at the axis `Speed`. Positions
//! are computed lazily from the elapsed time, so a stopped or finished move
//! leaves the axis exactly where the profile puts it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::RETURN_SEQUENCE;

/// Line the server sends to every new client.
const GREETING: &str = "Micos motion server simulator";

/// Soft limit used when none is configured.
const DEFAULT_SOFT_LIMIT: f64 = 1.0e6;

#[derive(Debug, Clone)]
struct Move {
    from: f64,
    to: f64,
    speed: f64,
    started: Instant,
}

impl Move {
    fn position_at(&self, now: Instant) -> f64 {
        let travelled = self.speed * now.duration_since(self.started).as_secs_f64();
        let distance = self.to - self.from;
        if travelled >= distance.abs() {
            self.to
        } else {
            self.from + travelled * distance.signum()
        }
    }

    fn is_done(&self, now: Instant) -> bool {
        self.position_at(now) == self.to
    }
}

#[derive(Debug, Clone)]
struct AxisSim {
    position: f64,
    speed: f64,
    acceleration: f64,
    soft_limits: (f64, f64),
    motion: Option<Move>,
}

impl AxisSim {
    fn current(&self, now: Instant) -> f64 {
        self.motion
            .as_ref()
            .map_or(self.position, |m| m.position_at(now))
    }

    /// Fold a finished move into the resting position.
    fn settle(&mut self, now: Instant) {
        if let Some(m) = &self.motion {
            if m.is_done(now) {
                self.position = m.to;
                self.motion = None;
            }
        }
    }

    fn halt(&mut self, now: Instant) {
        self.position = self.current(now);
        self.motion = None;
    }

    fn start_move(&mut self, target: f64, now: Instant) {
        let from = self.current(now);
        if self.speed <= 0.0 {
            self.position = from;
            self.motion = None;
            return;
        }
        self.motion = Some(Move {
            from,
            to: target,
            speed: self.speed,
            started: now,
        });
    }
}

/// A named controller served by [`MicosSimulator`].
#[derive(Debug, Clone)]
pub struct SimulatedController {
    name: String,
    axes: Vec<AxisSim>,
}

impl SimulatedController {
    /// Controller with `num_axes` axes at position 0.
    pub fn new(name: impl Into<String>, num_axes: usize) -> Self {
        let axis = AxisSim {
            position: 0.0,
            speed: 10.0,
            acceleration: 100.0,
            soft_limits: (-DEFAULT_SOFT_LIMIT, DEFAULT_SOFT_LIMIT),
            motion: None,
        };
        Self {
            name: name.into(),
            axes: vec![axis; num_axes],
        }
    }

    /// Set the initial speed of every axis.
    pub fn with_speed(mut self, speed: f64) -> Self {
        for axis in &mut self.axes {
            axis.speed = speed;
        }
        self
    }

    /// Set the acceleration of every axis.
    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        for axis in &mut self.axes {
            axis.acceleration = acceleration;
        }
        self
    }

    /// Set the soft limits of one axis (0-based index).
    pub fn with_soft_limits(mut self, index: usize, lower: f64, upper: f64) -> Self {
        if let Some(axis) = self.axes.get_mut(index) {
            axis.soft_limits = (lower, upper);
        }
        self
    }

    /// Set the initial position of one axis (0-based index).
    pub fn with_position(mut self, index: usize, position: f64) -> Self {
        if let Some(axis) = self.axes.get_mut(index) {
            axis.position = position;
        }
        self
    }

    fn is_moving(&mut self, now: Instant) -> bool {
        let mut moving = false;
        for axis in &mut self.axes {
            axis.settle(now);
            moving |= axis.motion.is_some();
        }
        moving
    }

    fn list(&self, keyword: &str, now: Instant, value: impl Fn(&AxisSim, Instant) -> f64) -> String {
        let values: Vec<String> = self
            .axes
            .iter()
            .map(|axis| format!("{:.4}", value(axis, now)))
            .collect();
        format!("{} {} {}", self.name, keyword, values.join(" "))
    }

    /// Apply one command; `None` means the command has no reply.
    fn handle(&mut self, args: &[&str], now: Instant) -> Option<String> {
        let name = self.name.clone();
        let num_axes = self.axes.len();
        let axis_arg = |s: &str| -> Option<usize> {
            s.parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|i| *i < num_axes)
        };

        match args {
            ["AxisInfo"] => Some(format!("{} AxisInfo {} axes", name, self.axes.len())),
            ["Crds", "?"] => Some(self.list("Crds", now, |a, t| a.current(t))),
            ["Speed", "?"] => Some(self.list("Speed", now, |a, _| a.speed)),
            ["Accel", "?"] => Some(self.list("Accel", now, |a, _| a.acceleration)),
            ["IsReady"] => {
                if self.is_moving(now) {
                    Some(format!("{} not ready", name))
                } else {
                    Some(format!("{} ready", name))
                }
            }
            ["Stop"] => {
                for axis in &mut self.axes {
                    axis.halt(now);
                }
                None
            }
            ["Speed", axis, value] => {
                let (index, value) = (axis_arg(*axis)?, value.parse::<f64>().ok()?);
                self.axes[index].speed = value.abs();
                None
            }
            ["Accel", axis, value] => {
                let (index, value) = (axis_arg(*axis)?, value.parse::<f64>().ok()?);
                self.axes[index].acceleration = value.abs();
                None
            }
            ["AxisAbs", axis, target] => {
                let (Some(index), Ok(target)) = (axis_arg(*axis), target.parse::<f64>()) else {
                    return Some(format!("{} AxisAbs invalid arguments", name));
                };
                let (lower, upper) = self.axes[index].soft_limits;
                if !(lower..=upper).contains(&target) {
                    return Some(format!("{} Movement not possible due to soft limits", name));
                }
                self.axes[index].start_move(target, now);
                Some(format!("{} AxisAbs ok", name))
            }
            ["Calibrate", axis] => {
                let Some(index) = axis_arg(*axis) else {
                    return Some(format!("{} Calibrate invalid arguments", name));
                };
                self.axes[index].start_move(0.0, now);
                Some(format!("{} Calibrate ok", name))
            }
            _ => Some(format!("{} unknown command", name)),
        }
    }
}

type Controllers = Arc<Mutex<HashMap<String, SimulatedController>>>;

/// Loopback Micos server.
///
/// The server stops when the value is dropped.
pub struct MicosSimulator {
    addr: SocketAddr,
    controllers: Controllers,
    accept_task: JoinHandle<()>,
}

impl MicosSimulator {
    /// Bind to an ephemeral loopback port and start serving.
    pub async fn start(controllers: Vec<SimulatedController>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let controllers: Controllers = Arc::new(Mutex::new(
            controllers
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        ));

        let shared = controllers.clone();
        let accept_task = tokio::spawn(async move {
            let mut clients = JoinSet::new();
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "simulator client connected");
                        clients.spawn(serve_client(stream, shared.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "simulator accept failed");
                        break;
                    }
                }
            }
        });
        info!(%addr, "Micos simulator listening");

        Ok(Self {
            addr,
            controllers,
            accept_task,
        })
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current position of an axis (0-based index).
    pub fn position(&self, controller: &str, index: usize) -> Option<f64> {
        let now = Instant::now();
        let controllers = self.controllers.lock();
        controllers
            .get(controller)
            .and_then(|c| c.axes.get(index))
            .map(|a| a.current(now))
    }

    /// Current speed of an axis (0-based index).
    pub fn speed(&self, controller: &str, index: usize) -> Option<f64> {
        let controllers = self.controllers.lock();
        controllers
            .get(controller)
            .and_then(|c| c.axes.get(index))
            .map(|a| a.speed)
    }
}

impl Drop for MicosSimulator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(stream: TcpStream, controllers: Controllers) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    if write
        .write_all(format!("{}{}", GREETING, RETURN_SEQUENCE).as_bytes())
        .await
        .is_err()
    {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = respond(&controllers, line.trim());
        if let Some(reply) = reply {
            let framed = format!("{}{}", reply, RETURN_SEQUENCE);
            if write.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    }
    debug!("simulator client disconnected");
}

fn respond(controllers: &Controllers, line: &str) -> Option<String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (controller, args) = words.split_first()?;
    let now = Instant::now();
    let mut controllers = controllers.lock();
    match controllers.get_mut(*controller) {
        Some(c) => c.handle(args, now),
        None => Some(format!("{} unknown controller", controller)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sam() -> Controllers {
        Arc::new(Mutex::new(HashMap::from([(
            "Sam".to_string(),
            SimulatedController::new("Sam", 3)
                .with_speed(1000.0)
                .with_soft_limits(0, -5.0, 5.0),
        )])))
    }

    #[test]
    fn queries_list_all_axes() {
        let c = sam();
        assert_eq!(
            respond(&c, "Sam Crds ?").as_deref(),
            Some("Sam Crds 0.0000 0.0000 0.0000")
        );
        assert_eq!(respond(&c, "Sam Speed 2 3.5"), None);
        assert_eq!(
            respond(&c, "Sam Speed ?").as_deref(),
            Some("Sam Speed 1000.0000 3.5000 1000.0000")
        );
    }

    #[test]
    fn soft_limits_refuse_moves() {
        let c = sam();
        assert_eq!(
            respond(&c, "Sam AxisAbs 1 10").as_deref(),
            Some("Sam Movement not possible due to soft limits")
        );
        assert_eq!(respond(&c, "Sam AxisAbs 2 10").as_deref(), Some("Sam AxisAbs ok"));
    }

    #[test]
    fn unknown_controller_is_answered() {
        let c = sam();
        assert_eq!(
            respond(&c, "Cont2 IsReady").as_deref(),
            Some("Cont2 unknown controller")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn motion_follows_speed() {
        let c = sam();
        respond(&c, "Sam Speed 3 2");
        respond(&c, "Sam AxisAbs 3 4");
        assert_eq!(respond(&c, "Sam IsReady").as_deref(), Some("Sam not ready"));

        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        assert_eq!(
            respond(&c, "Sam Crds ?").as_deref(),
            Some("Sam Crds 0.0000 0.0000 2.0000")
        );

        respond(&c, "Sam Stop");
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert_eq!(respond(&c, "Sam IsReady").as_deref(), Some("Sam ready"));
        assert_eq!(
            respond(&c, "Sam Crds ?").as_deref(),
            Some("Sam Crds 0.0000 0.0000 2.0000")
        );
    }
}
