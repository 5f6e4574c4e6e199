//! Dashboard channel: synchronous request/response administration commands
//!
//! Every call formats a command, sends it, blocks for the `;`-terminated reply and
//! parses it. Calls are serialized by an internal lock, so a reply always belongs to
//! the request that precedes it. A non-zero status surfaces as
//! `Mg400Error::CommandRejected` and keeps the connection; a socket failure or a
//! missing reply drops the connection and the next caller must reconnect explicitly.

use crate::config::ConnectionConfig;
use crate::protocol::{check_args, deg_to_rad, format_command, m_to_mm, parse_reply, Arg, Reply, REPLY_TERMINATOR};
use crate::robot::{
    AoIndex, ArchIndex, CollisionLevel, DiIndex, DigitalLevel, DoIndex, Pose, RobotMode,
    ToolDoIndex, ToolFrame, UserFrame, JOINT_SLOTS,
};
use crate::transport::{Received, TcpTransport, Transport};
use crate::{Mg400Error, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REPLY_CHUNK: usize = 1024;

/// Per-joint fault codes from `GetErrorID()`. An empty slot means no fault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorIdTable {
    slots: [Vec<i64>; JOINT_SLOTS],
}

impl ErrorIdTable {
    pub fn from_groups(groups: Vec<Vec<i64>>) -> std::result::Result<Self, String> {
        if groups.len() > JOINT_SLOTS {
            return Err(format!("expected at most {} joint slots, got {}", JOINT_SLOTS, groups.len()));
        }
        let mut table = Self::default();
        for (slot, ids) in table.slots.iter_mut().zip(groups) {
            *slot = ids;
        }
        Ok(table)
    }

    /// Fault codes for joint slot `index` (0-based).
    pub fn joint(&self, index: usize) -> &[i64] {
        self.slots.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_faults(&self) -> bool {
        self.slots.iter().any(|slot| !slot.is_empty())
    }

    /// Non-empty slots as `(joint index, ids)`.
    pub fn faults(&self) -> impl Iterator<Item = (usize, &[i64])> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(i, ids)| (i, ids.as_slice()))
    }
}

/// Arm handedness for `SetArmOrientation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOrientation {
    Left,
    Right,
}

impl ArmOrientation {
    fn raw(self) -> i64 {
        match self {
            ArmOrientation::Left => 0,
            ArmOrientation::Right => 1,
        }
    }
}

fn percent(name: &str, value: u8) -> Result<Arg> {
    if (1..=100).contains(&value) {
        Ok(Arg::Int(value as i64))
    } else {
        Err(Mg400Error::InvalidArgument(format!("{} ratio must be within 1..=100, got {}", name, value)))
    }
}

/// Synchronous command client for the dashboard port.
pub struct DashboardChannel {
    transport: Box<dyn Transport>,
    connect_timeout: Duration,
    reply_timeout: Duration,
    call_lock: Mutex<()>,
}

impl DashboardChannel {
    pub fn new(ip: &str, port: u16, connection: &ConnectionConfig) -> Self {
        Self::with_transport(
            Box::new(TcpTransport::new(ip, port)),
            connection.connect_timeout(),
            connection.reply_timeout(),
        )
    }

    pub fn with_transport(
        transport: Box<dyn Transport>,
        connect_timeout: Duration,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            connect_timeout,
            reply_timeout,
            call_lock: Mutex::new(()),
        }
    }

    pub fn connect(&self) -> Result<()> {
        let _guard = self.call_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.transport.connect(self.connect_timeout)
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send one command and return its successful reply.
    pub fn call(&self, name: &str, args: &[Arg]) -> Result<Reply> {
        check_args(name, args)?;
        let _guard = self.call_lock.lock().unwrap_or_else(|e| e.into_inner());
        let command = format_command(name, args);

        debug!("dashboard -> {}", command);
        self.transport.send(command.as_bytes())?;

        let line = self.read_reply(&command)?;
        debug!("dashboard <- {}", line);

        let reply = parse_reply(&line)?;
        if !reply.is_success() {
            warn!("{} rejected by controller with status {}", command, reply.code);
            return Err(Mg400Error::CommandRejected {
                code: reply.code,
                command,
            });
        }
        Ok(reply)
    }

    fn call_void(&self, name: &str, args: &[Arg]) -> Result<()> {
        self.call(name, args).map(|_| ())
    }

    /// Accumulate bytes until the reply terminator or the reply timeout.
    fn read_reply(&self, command: &str) -> Result<String> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut chunk = [0u8; REPLY_CHUNK];
        let mut text = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.receive(&mut chunk, remaining)? {
                Received::Data(n) => {
                    text.push_str(&String::from_utf8_lossy(&chunk[..n]));
                    if let Some(end) = text.find(REPLY_TERMINATOR) {
                        text.truncate(end + REPLY_TERMINATOR.len_utf8());
                        return Ok(text);
                    }
                }
                Received::Timeout => break,
            }
        }

        // A late reply would be read as the answer to the next command.
        self.transport.disconnect();
        Err(Mg400Error::Connection(format!(
            "No complete reply to {} within {:?} (got {:?})",
            command, self.reply_timeout, text
        )))
    }

    pub fn enable_robot(&self) -> Result<()> {
        self.call_void("EnableRobot", &[])
    }

    pub fn disable_robot(&self) -> Result<()> {
        self.call_void("DisableRobot", &[])
    }

    pub fn clear_error(&self) -> Result<()> {
        self.call_void("ClearError", &[])
    }

    pub fn reset_robot(&self) -> Result<()> {
        self.call_void("ResetRobot", &[])
    }

    /// Global speed ratio in percent.
    pub fn speed_factor(&self, ratio: u8) -> Result<()> {
        self.call_void("SpeedFactor", &[percent("SpeedFactor", ratio)?])
    }

    pub fn user(&self, frame: UserFrame) -> Result<()> {
        self.call_void("User", &[frame.raw().into()])
    }

    pub fn tool(&self, frame: ToolFrame) -> Result<()> {
        self.call_void("Tool", &[frame.raw().into()])
    }

    pub fn robot_mode(&self) -> Result<RobotMode> {
        let reply = self.call("RobotMode", &[])?;
        Ok(RobotMode::from_raw(reply.single_int()?))
    }

    /// Payload weight in kilograms and its inertia.
    pub fn payload(&self, weight: f64, inertia: f64) -> Result<()> {
        self.call_void("PayLoad", &[weight.into(), inertia.into()])
    }

    /// Queued digital output, applied in order with motion commands.
    pub fn digital_output(&self, index: DoIndex, level: DigitalLevel) -> Result<()> {
        self.call_void("DO", &[index.raw().into(), level.raw().into()])
    }

    /// Immediate digital output.
    pub fn digital_output_execute(&self, index: DoIndex, level: DigitalLevel) -> Result<()> {
        self.call_void("DOExecute", &[index.raw().into(), level.raw().into()])
    }

    pub fn tool_digital_output(&self, index: ToolDoIndex, level: DigitalLevel) -> Result<()> {
        self.call_void("ToolDO", &[index.raw().into(), level.raw().into()])
    }

    pub fn tool_digital_output_execute(&self, index: ToolDoIndex, level: DigitalLevel) -> Result<()> {
        self.call_void("ToolDOExecute", &[index.raw().into(), level.raw().into()])
    }

    /// Queued analog output in volts.
    pub fn analog_output(&self, index: AoIndex, volts: f64) -> Result<()> {
        self.call_void("AO", &[index.raw().into(), volts.into()])
    }

    pub fn analog_output_execute(&self, index: AoIndex, volts: f64) -> Result<()> {
        self.call_void("AOExecute", &[index.raw().into(), volts.into()])
    }

    pub fn acc_j(&self, ratio: u8) -> Result<()> {
        self.call_void("AccJ", &[percent("AccJ", ratio)?])
    }

    pub fn acc_l(&self, ratio: u8) -> Result<()> {
        self.call_void("AccL", &[percent("AccL", ratio)?])
    }

    pub fn speed_j(&self, ratio: u8) -> Result<()> {
        self.call_void("SpeedJ", &[percent("SpeedJ", ratio)?])
    }

    pub fn speed_l(&self, ratio: u8) -> Result<()> {
        self.call_void("SpeedL", &[percent("SpeedL", ratio)?])
    }

    pub fn arch(&self, index: ArchIndex) -> Result<()> {
        self.call_void("Arch", &[index.raw().into()])
    }

    /// Continuous path blending ratio, 0 disables blending.
    pub fn cp(&self, ratio: u8) -> Result<()> {
        if ratio > 100 {
            return Err(Mg400Error::InvalidArgument(format!("CP ratio must be within 0..=100, got {}", ratio)));
        }
        self.call_void("CP", &[Arg::Int(ratio as i64)])
    }

    /// Maximum lifting height for `Jump`, in meters.
    pub fn lim_z(&self, z: f64) -> Result<()> {
        if !z.is_finite() {
            return Err(Mg400Error::InvalidArgument(format!("LimZ height must be finite, got {}", z)));
        }
        self.call_void("LimZ", &[Arg::Int(m_to_mm(z).round() as i64)])
    }

    pub fn set_arm_orientation(&self, orientation: ArmOrientation) -> Result<()> {
        self.call_void("SetArmOrientation", &[orientation.raw().into()])
    }

    pub fn power_on(&self) -> Result<()> {
        self.call_void("PowerOn", &[])
    }

    pub fn run_script(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['(', ')', ',', ';']) {
            return Err(Mg400Error::InvalidArgument(format!("Invalid script name '{}'", name)));
        }
        self.call_void("RunScript", &[name.into()])
    }

    pub fn stop_script(&self) -> Result<()> {
        self.call_void("StopScript", &[])
    }

    pub fn pause_script(&self) -> Result<()> {
        self.call_void("PauseScript", &[])
    }

    pub fn continue_script(&self) -> Result<()> {
        self.call_void("ContinueScript", &[])
    }

    pub fn set_safe_skin(&self, enabled: bool) -> Result<()> {
        self.call_void("SetSafeSkin", &[Arg::Int(enabled as i64)])
    }

    pub fn set_obstacle_avoid(&self, enabled: bool) -> Result<()> {
        self.call_void("SetObstacleAvoid", &[Arg::Int(enabled as i64)])
    }

    pub fn set_collision_level(&self, level: CollisionLevel) -> Result<()> {
        self.call_void("SetCollisionLevel", &[level.raw().into()])
    }

    pub fn emergency_stop(&self) -> Result<()> {
        self.call_void("EmergencyStop", &[])
    }

    pub fn get_error_id(&self) -> Result<ErrorIdTable> {
        let reply = self.call("GetErrorID", &[])?;
        let groups = reply.nested_ints()?;
        ErrorIdTable::from_groups(groups).map_err(|reason| Mg400Error::parse(&reply.line, reason))
    }

    /// Joint angles in radians.
    pub fn get_angle(&self) -> Result<[f64; JOINT_SLOTS]> {
        let reply = self.call("GetAngle", &[])?;
        let degrees: [f64; JOINT_SLOTS] = reply.fixed_scalars()?;
        Ok(degrees.map(deg_to_rad))
    }

    /// Tool pose in meters and radians.
    pub fn get_pose(&self) -> Result<Pose> {
        let reply = self.call("GetPose", &[])?;
        let raw: [f64; 6] = reply.fixed_scalars()?;
        Ok(Pose::from_controller(&raw))
    }

    pub fn digital_input(&self, index: DiIndex) -> Result<DigitalLevel> {
        let reply = self.call("DI", &[index.raw().into()])?;
        Ok(DigitalLevel::from(reply.single_int()? != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use std::f64::consts::PI;
    use std::sync::Arc;

    fn channel() -> (DashboardChannel, Arc<ScriptedTransport>) {
        let mock = Arc::new(ScriptedTransport::connected());
        let channel = DashboardChannel::with_transport(
            Box::new(Arc::clone(&mock)),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        (channel, mock)
    }

    fn expect_void(sent: &str, reply: &str, call: impl FnOnce(&DashboardChannel) -> Result<()>) {
        let (channel, mock) = channel();
        mock.push_reply(reply);
        call(&channel).unwrap();
        assert_eq!(mock.sent(), vec![sent.to_string()]);
    }

    #[test]
    fn test_void_commands() {
        expect_void("EnableRobot()", "0,{},EnableRobot();", |c| c.enable_robot());
        expect_void("DisableRobot()", "0,{},DisableRobot();", |c| c.disable_robot());
        expect_void("ClearError()", "0,{},ClearError();", |c| c.clear_error());
        expect_void("ResetRobot()", "0,{},ResetRobot();", |c| c.reset_robot());
        expect_void("SpeedFactor(78)", "0,{},SpeedFactor(78);", |c| c.speed_factor(78));
        expect_void("User(1)", "0,{},User(1);", |c| c.user(UserFrame::new(1)?));
        expect_void("Tool(1)", "0,{},Tool(1);", |c| c.tool(ToolFrame::new(1)?));
        expect_void("PayLoad(3.000,0.400)", "0,{},PayLoad(3.000,0.400);", |c| c.payload(3.0, 0.4));
        expect_void("DO(12,1)", "0,{},DO(12,1);", |c| {
            c.digital_output(DoIndex::new(12)?, DigitalLevel::High)
        });
        expect_void("ToolDOExecute(2,1)", "0,{},ToolDOExecute(2,1);", |c| {
            c.tool_digital_output_execute(ToolDoIndex::new(2)?, DigitalLevel::High)
        });
        expect_void("AccJ(50)", "0,{},AccJ(50);", |c| c.acc_j(50));
        expect_void("AccL(50)", "0,{},AccL(50);", |c| c.acc_l(50));
        expect_void("SpeedJ(50)", "0,{},SpeedJ(50);", |c| c.speed_j(50));
        expect_void("SpeedL(50)", "0,{},SpeedL(50);", |c| c.speed_l(50));
        expect_void("CP(50)", "0,{},CP(50);", |c| c.cp(50));
        expect_void("LimZ(80)", "0,{},LimZ(80);", |c| c.lim_z(0.08));
        expect_void("RunScript(demo)", "0,{},RunScript(demo);", |c| c.run_script("demo"));
        expect_void("SetCollisionLevel(1)", "0,{},SetCollisionLevel(1);", |c| {
            c.set_collision_level(CollisionLevel::new(1)?)
        });
        expect_void("EmergencyStop()", "0,{},EmergencyStop();", |c| c.emergency_stop());
        expect_void("AO(1,2.500)", "0,{},AO(1,2.500);", |c| c.analog_output(AoIndex::new(1)?, 2.5));
    }

    #[test]
    fn test_robot_mode() {
        let (channel, mock) = channel();
        mock.push_reply("0,{5},RobotMode();");
        assert_eq!(channel.robot_mode().unwrap(), RobotMode::Enable);
        assert_eq!(mock.sent(), vec!["RobotMode()"]);
    }

    #[test]
    fn test_get_angle_in_radians() {
        let (channel, mock) = channel();
        mock.push_reply("0,{0.000000,0.000000,45.000000,45.000000,0.000000,0.000000},GetAngle();");

        let angles = channel.get_angle().unwrap();
        assert_eq!(angles[0], 0.0);
        assert_eq!(angles[1], 0.0);
        assert!((angles[2] - 0.25 * PI).abs() < 1e-15);
        assert!((angles[3] - 0.25 * PI).abs() < 1e-15);
    }

    #[test]
    fn test_get_pose_in_meters() {
        let (channel, mock) = channel();
        mock.push_reply("0,{350.000000,0.000000,0.000000,0.000000,0.000000,0.000000},GetPose();");

        let pose = channel.get_pose().unwrap();
        assert_eq!(pose.x, 0.35);
        assert_eq!(pose.y, 0.0);
        assert_eq!(pose.z, 0.0);
        assert_eq!(pose.yaw, 0.0);
    }

    #[test]
    fn test_get_error_id() {
        let (channel, mock) = channel();
        mock.push_reply("0,{[[69,72],[1],[],[],[],[]]},GetErrorID();");

        let table = channel.get_error_id().unwrap();
        assert_eq!(table.joint(0), &[69, 72]);
        assert_eq!(table.joint(1), &[1]);
        for joint in 2..6 {
            assert!(table.joint(joint).is_empty());
        }
        assert!(table.has_faults());
        assert_eq!(table.faults().count(), 2);
    }

    #[test]
    fn test_error_table_rejects_extra_slots() {
        let (channel, mock) = channel();
        mock.push_reply("0,{[[1],[],[],[],[],[],[]]},GetErrorID();");
        assert!(matches!(channel.get_error_id(), Err(Mg400Error::ProtocolParse { .. })));
    }

    #[test]
    fn test_digital_input() {
        let (channel, mock) = channel();
        mock.push_reply("0,{0},DI(1);");
        assert_eq!(channel.digital_input(DiIndex::new(1).unwrap()).unwrap(), DigitalLevel::Low);
        assert_eq!(mock.sent(), vec!["DI(1)"]);
    }

    #[test]
    fn test_rejected_command_keeps_connection() {
        let (channel, mock) = channel();
        mock.push_reply("1,{},EnableRobot();");

        match channel.enable_robot() {
            Err(Mg400Error::CommandRejected { code, command }) => {
                assert_eq!(code, 1);
                assert_eq!(command, "EnableRobot()");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(channel.is_connected());
    }

    #[test]
    fn test_reply_split_across_reads() {
        let (channel, mock) = channel();
        mock.push_reply("0,{0.0,0.0,");
        mock.push_reply("0.0,0.0,0.0,0.0},GetAngle();");
        assert_eq!(channel.get_angle().unwrap(), [0.0; 6]);
    }

    #[test]
    fn test_missing_reply_disconnects() {
        let (channel, _mock) = channel();
        let err = channel.clear_error().unwrap_err();
        assert!(matches!(err, Mg400Error::Connection(_)));
        assert!(!channel.is_connected());

        let err = channel.clear_error().unwrap_err();
        assert!(matches!(err, Mg400Error::Connection(_)));
    }

    #[test]
    fn test_malformed_reply_keeps_connection() {
        let (channel, mock) = channel();
        mock.push_reply("garbage;");
        assert!(matches!(channel.reset_robot(), Err(Mg400Error::ProtocolParse { .. })));
        assert!(channel.is_connected());
    }

    #[test]
    fn test_invalid_ratio_sends_nothing() {
        let (channel, mock) = channel();
        assert!(matches!(channel.speed_factor(0), Err(Mg400Error::InvalidArgument(_))));
        assert!(matches!(channel.acc_j(101), Err(Mg400Error::InvalidArgument(_))));
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn test_non_finite_values_send_nothing() {
        let (channel, mock) = channel();
        assert!(matches!(channel.lim_z(f64::NAN), Err(Mg400Error::InvalidArgument(_))));
        assert!(matches!(
            channel.call("PayLoad", &[f64::INFINITY.into(), 0.4.into()]),
            Err(Mg400Error::InvalidArgument(_))
        ));
        assert!(mock.sent().is_empty());
        assert!(channel.is_connected());
    }

    #[test]
    fn test_explicit_reconnect() {
        let (channel, mock) = channel();
        channel.disconnect();
        assert!(!channel.is_connected());
        channel.connect().unwrap();
        assert!(channel.is_connected());
        assert_eq!(mock.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
