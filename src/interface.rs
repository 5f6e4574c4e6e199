//! Orchestration over the three controller channels
//!
//! `Mg400Interface` owns one dashboard, one motion and one realtime channel against
//! the same controller and drives their lifecycle. Higher layers (the daemon, the CLI)
//! talk to the controller only through it.

use crate::config::Config;
use crate::dashboard::DashboardChannel;
use crate::error_messages::ErrorMessages;
use crate::motion::MotionChannel;
use crate::realtime::RealtimeFeedback;
use crate::robot::{angle_diff, Pose, RobotMode};
use crate::{Mg400Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Position tolerance for a move to count as reached, in meters.
pub const POSITION_TOLERANCE: f64 = 5e-3;
/// Yaw tolerance for a move to count as reached, in radians.
pub const YAW_TOLERANCE: f64 = 1.74e-2;
const MOVE_POLL_PERIOD: Duration = Duration::from_millis(100);
const ACTIVATE_POLL_PERIOD: Duration = Duration::from_millis(10);

/// One fault reported for a joint slot, resolved to text when possible.
#[derive(Debug, Clone, PartialEq)]
pub struct JointFault {
    /// 1-based joint number.
    pub joint: usize,
    pub id: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultReport {
    pub faults: Vec<JointFault>,
}

impl FaultReport {
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current = None;
        for fault in &self.faults {
            if current != Some(fault.joint) {
                writeln!(f, "Joint{}:", fault.joint)?;
                current = Some(fault.joint);
            }
            match &fault.description {
                Some(text) => writeln!(f, "\t{}", text)?,
                None => writeln!(f, "\tUnknown error id {}", fault.id)?,
            }
        }
        Ok(())
    }
}

/// Why a move was refused before anything was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    NotConnected,
    NotEnabled,
}

/// Why a move that was sent did not reach its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveAbort {
    ConnectionLost,
    RobotError,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Reached(Pose),
    Rejected(MoveRejection),
    Aborted { reason: MoveAbort, last_pose: Pose },
}

/// Position within 5 mm on every axis and yaw within about one degree.
pub fn is_goal_reached(current: &Pose, goal: &Pose) -> bool {
    (current.x - goal.x).abs() < POSITION_TOLERANCE
        && (current.y - goal.y).abs() < POSITION_TOLERANCE
        && (current.z - goal.z).abs() < POSITION_TOLERANCE
        && angle_diff(current.yaw, goal.yaw).abs() < YAW_TOLERANCE
}

pub struct Mg400Interface {
    config: Config,
    pub dashboard: DashboardChannel,
    pub motion: MotionChannel,
    pub realtime: RealtimeFeedback,
    error_messages: Option<ErrorMessages>,
}

impl Mg400Interface {
    pub fn new(config: Config) -> Self {
        let ip = config.robot.ip_address.clone();
        let ports = config.robot.ports.clone();
        let dashboard = DashboardChannel::new(&ip, ports.dashboard, &config.connection);
        let motion = MotionChannel::new(&ip, ports.motion, &config.connection);
        let realtime = RealtimeFeedback::new(&ip, ports.realtime, &config.connection);
        Self::with_channels(config, dashboard, motion, realtime)
    }

    pub fn with_channels(
        config: Config,
        dashboard: DashboardChannel,
        motion: MotionChannel,
        realtime: RealtimeFeedback,
    ) -> Self {
        Self {
            config,
            dashboard,
            motion,
            realtime,
            error_messages: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the error message table if one is configured.
    pub fn configure(&mut self) -> Result<()> {
        match &self.config.error_messages {
            Some(path) => {
                self.error_messages = Some(ErrorMessages::load_from_path(path)?);
            }
            None => warn!("No error message table configured; faults will be reported by id"),
        }
        Ok(())
    }

    pub fn set_error_messages(&mut self, messages: ErrorMessages) {
        self.error_messages = Some(messages);
    }

    /// Connect the dashboard, start the motion and realtime threads and wait for both
    /// of their links, bounded by twice the connect timeout.
    pub fn activate(&self) -> Result<()> {
        info!("Activating MG400 interface for {}", self.config.robot.ip_address);
        self.dashboard.connect()?;
        self.motion.start()?;
        self.realtime.start()?;

        let deadline = std::time::Instant::now() + self.config.connection.connect_timeout() * 2;
        while !(self.motion.is_connected() && self.realtime.is_connected()) {
            if self.realtime.is_fatal() || std::time::Instant::now() >= deadline {
                return Err(Mg400Error::Connection(format!(
                    "motion or realtime link to {} did not come up",
                    self.config.robot.ip_address
                )));
            }
            std::thread::sleep(ACTIVATE_POLL_PERIOD);
        }

        info!("MG400 interface active");
        Ok(())
    }

    pub fn deactivate(&self) {
        self.realtime.stop();
        self.motion.stop();
        self.dashboard.disconnect();
        info!("MG400 interface deactivated");
    }

    /// All three links are up and the realtime reader has not given up.
    pub fn ok(&self) -> bool {
        self.dashboard.is_connected()
            && self.motion.is_connected()
            && self.realtime.is_connected()
            && !self.realtime.is_fatal()
    }

    pub fn error_message(&self, id: i64) -> Option<&str> {
        self.error_messages.as_ref().and_then(|table| table.lookup(id).ok())
    }

    /// Query `GetErrorID()` and resolve every reported id.
    pub fn fault_report(&self) -> Result<FaultReport> {
        let table = self.dashboard.get_error_id()?;
        let faults = table
            .faults()
            .flat_map(|(joint, ids)| {
                ids.iter().map(move |&id| JointFault {
                    joint: joint + 1,
                    id,
                    description: None,
                })
            })
            .map(|mut fault| {
                fault.description = self.error_message(fault.id).map(str::to_string);
                fault
            })
            .collect();
        Ok(FaultReport { faults })
    }

    /// Send `MovL` to `target` and poll the realtime pose at 10 Hz until it is reached.
    ///
    /// Refused unless the interface is healthy and the robot is in `ENABLE` mode.
    pub async fn move_linear_and_wait(&self, target: Pose, timeout: Duration) -> Result<MoveOutcome> {
        if !self.ok() {
            error!("MG400 is not connected");
            return Ok(MoveOutcome::Rejected(MoveRejection::NotConnected));
        }
        if !self.realtime.is_robot_mode(RobotMode::Enable) {
            error!("Robot mode is not enabled");
            return Ok(MoveOutcome::Rejected(MoveRejection::NotEnabled));
        }

        self.motion.mov_l(&target)?;

        let start = Instant::now();
        let mut ticker = interval(MOVE_POLL_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let pose = self.realtime.current_end_pose();
            if is_goal_reached(&pose, &target) {
                info!("MovL reached target");
                return Ok(MoveOutcome::Reached(pose));
            }

            let reason = if !self.ok() {
                Some(MoveAbort::ConnectionLost)
            } else if self.realtime.is_robot_mode(RobotMode::Error) {
                Some(MoveAbort::RobotError)
            } else if start.elapsed() > timeout {
                Some(MoveAbort::Timeout)
            } else {
                None
            };

            if let Some(reason) = reason {
                error!("MovL aborted: {:?}", reason);
                return Ok(MoveOutcome::Aborted { reason, last_pose: pose });
            }
        }
    }
}

impl Drop for Mg400Interface {
    fn drop(&mut self) {
        self.deactivate();
    }
}
