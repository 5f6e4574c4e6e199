//! Motion channel: fire-and-forget motion commands
//!
//! Commands are written and never acknowledged on this port. A background monitor
//! thread owns every reconnection decision, so `send` never blocks on a reconnect;
//! it fails fast with `Mg400Error::Connection` while the link is down.

use crate::config::ConnectionConfig;
use crate::protocol::{check_args, format_command, m_to_mm, rad_to_deg, Arg};
use crate::robot::{JogAxis, Pose, ARM_JOINTS};
use crate::transport::{TcpTransport, Transport};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Sleep for `duration`, returning early once `running` is cleared.
pub(crate) fn sleep_while(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// Cartesian target as `x, y, z, r` in millimeters and degrees.
fn cartesian_args(pose: &Pose) -> [Arg; 4] {
    [
        m_to_mm(pose.x).into(),
        m_to_mm(pose.y).into(),
        m_to_mm(pose.z).into(),
        rad_to_deg(pose.yaw).into(),
    ]
}

fn joint_args(joints: &[f64; ARM_JOINTS]) -> [Arg; ARM_JOINTS] {
    joints.map(|q| Arg::Float(rad_to_deg(q)))
}

pub struct MotionChannel {
    transport: Arc<dyn Transport>,
    connection: ConnectionConfig,
    running: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MotionChannel {
    pub fn new(ip: &str, port: u16, connection: &ConnectionConfig) -> Self {
        Self::with_transport(Arc::new(TcpTransport::new(ip, port)), connection)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, connection: &ConnectionConfig) -> Self {
        Self {
            transport,
            connection: connection.clone(),
            running: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        }
    }

    /// Spawn the connection monitor. Calling it on a running channel does nothing.
    pub fn start(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if monitor.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let transport = Arc::clone(&self.transport);
        let running = Arc::clone(&self.running);
        let connection = self.connection.clone();

        let handle = thread::Builder::new()
            .name("mg400-motion-monitor".to_string())
            .spawn(move || monitor_connection(transport, running, connection))?;

        *monitor = Some(handle);
        Ok(())
    }

    /// Stop the monitor and close the socket. Safe even if no connection was ever made.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.monitor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Motion monitor thread panicked");
            }
        }
        self.transport.disconnect();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Write a raw, already formatted command.
    pub fn send(&self, command: &str) -> Result<()> {
        debug!("motion -> {}", command);
        self.transport.send(command.as_bytes())
    }

    fn send_command(&self, name: &str, args: &[Arg]) -> Result<()> {
        check_args(name, args)?;
        self.send(&format_command(name, args))
    }

    /// Point-to-point move to a Cartesian target (meters, yaw in radians).
    pub fn mov_j(&self, target: &Pose) -> Result<()> {
        self.send_command("MovJ", &cartesian_args(target))
    }

    /// Straight-line move to a Cartesian target.
    pub fn mov_l(&self, target: &Pose) -> Result<()> {
        self.send_command("MovL", &cartesian_args(target))
    }

    /// Point-to-point move to joint angles in radians.
    pub fn joint_mov_j(&self, joints: &[f64; ARM_JOINTS]) -> Result<()> {
        self.send_command("JointMovJ", &joint_args(joints))
    }

    /// Relative point-to-point move by an offset in meters and radians.
    pub fn rel_mov_j(&self, offset: &Pose) -> Result<()> {
        self.send_command("RelMovJ", &cartesian_args(offset))
    }

    pub fn rel_mov_l(&self, offset: &Pose) -> Result<()> {
        self.send_command("RelMovL", &cartesian_args(offset))
    }

    /// Streaming joint set-point.
    pub fn servo_j(&self, joints: &[f64; ARM_JOINTS]) -> Result<()> {
        self.send_command("ServoJ", &joint_args(joints))
    }

    /// Streaming Cartesian set-point.
    pub fn servo_p(&self, target: &Pose) -> Result<()> {
        self.send_command("ServoP", &cartesian_args(target))
    }

    /// Start jogging along `axis`, or stop jogging with `None`.
    pub fn move_jog(&self, axis: Option<JogAxis>) -> Result<()> {
        match axis {
            Some(axis) => self.send_command("MoveJog", &[axis.wire_name().into()]),
            None => self.send_command("MoveJog", &[]),
        }
    }
}

impl Drop for MotionChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_connection(transport: Arc<dyn Transport>, running: Arc<AtomicBool>, connection: ConnectionConfig) {
    info!("Motion monitor started for {}", transport.peer());

    while running.load(Ordering::SeqCst) {
        if !transport.is_connected() {
            if let Err(e) = transport.connect(connection.connect_timeout()) {
                warn!("Motion channel connect failed: {}", e);
                sleep_while(&running, connection.retry_delay());
                continue;
            }
        }
        sleep_while(&running, connection.monitor_period());
    }

    info!("Motion monitor stopped for {}", transport.peer());
}
