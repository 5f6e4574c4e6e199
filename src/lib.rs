//! MG400 - host driver for the Dobot MG400 controller
//!
//! The controller exposes three TCP ports with different framing: a textual
//! request/response dashboard, a fire-and-forget motion port, and a binary realtime
//! feedback stream. This library wraps each in a channel type and ties them
//! together in [`Mg400Interface`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mg400::{Config, Mg400Interface};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut robot = Mg400Interface::new(Config::load_from_path("config/default_config.yaml")?);
//!     robot.configure()?;
//!     robot.activate()?;
//!
//!     robot.dashboard.enable_robot()?;
//!     robot.dashboard.speed_factor(30)?;
//!
//!     println!("Joints: {:?}", robot.realtime.current_joint_states());
//!     println!("Mode: {:?}", robot.realtime.robot_mode());
//!
//!     robot.deactivate();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **TcpTransport**: reconnecting socket primitive shared by every channel
//! - **DashboardChannel**: synchronous administrative commands and queries
//! - **MotionChannel**: streaming motion commands with a reconnect monitor
//! - **RealtimeFeedback**: background frame reader and cached robot state
//! - **Mg400Interface**: lifecycle, health, fault reporting and move-and-wait

pub mod config;
pub mod dashboard;
pub mod error;
pub mod error_messages;
pub mod interface;
pub mod monitoring;
pub mod motion;
pub mod protocol;
pub mod realtime;
pub mod robot;
pub mod transport;

pub use config::{Config, ConnectionConfig, MonitoringConfig, PollingConfig, PortConfig, RobotConfig};
pub use dashboard::{ArmOrientation, DashboardChannel, ErrorIdTable};
pub use error::{Mg400Error, Result};
pub use error_messages::ErrorMessages;
pub use interface::{FaultReport, JointFault, Mg400Interface, MoveAbort, MoveOutcome, MoveRejection};
pub use monitoring::{FaultData, JointStateData, MonitorOutput, RobotModeData};
pub use motion::MotionChannel;
pub use protocol::{format_command, parse_reply, Arg, Reply};
pub use realtime::{ChannelState, FeedbackSnapshot, FrameOutcome, RealtimeFeedback, RealtimeFrame};
pub use robot::{
    AoIndex, ArchIndex, CollisionLevel, DiIndex, DigitalLevel, DoIndex, JogAxis, Pose, RobotMode,
    ToolDoIndex, ToolFrame, UserFrame,
};
pub use transport::{Received, TcpTransport, Transport};
