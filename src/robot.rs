//! Robot domain values: operating mode, pose, and typed command arguments

use crate::protocol::{deg_to_rad, m_to_mm, mm_to_m, rad_to_deg};
use crate::{Mg400Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Joint slots reported by the controller (dashboard replies, error table).
pub const JOINT_SLOTS: usize = 6;
/// Joints physically present on the arm and exposed from realtime feedback.
pub const ARM_JOINTS: usize = 4;

/// Controller operating mode as reported by `RobotMode()` and realtime frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotMode {
    Init,
    BrakeOpen,
    Disabled,
    Enable,
    Backdrive,
    Running,
    Recording,
    Error,
    Pause,
    Jog,
    Unknown(i64),
}

impl RobotMode {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => RobotMode::Init,
            2 => RobotMode::BrakeOpen,
            4 => RobotMode::Disabled,
            5 => RobotMode::Enable,
            6 => RobotMode::Backdrive,
            7 => RobotMode::Running,
            8 => RobotMode::Recording,
            9 => RobotMode::Error,
            10 => RobotMode::Pause,
            11 => RobotMode::Jog,
            other => RobotMode::Unknown(other),
        }
    }

    pub fn raw(&self) -> i64 {
        match self {
            RobotMode::Init => 1,
            RobotMode::BrakeOpen => 2,
            RobotMode::Disabled => 4,
            RobotMode::Enable => 5,
            RobotMode::Backdrive => 6,
            RobotMode::Running => 7,
            RobotMode::Recording => 8,
            RobotMode::Error => 9,
            RobotMode::Pause => 10,
            RobotMode::Jog => 11,
            RobotMode::Unknown(raw) => *raw,
        }
    }

    pub fn name(&self) -> String {
        match self {
            RobotMode::Init => "INIT".to_string(),
            RobotMode::BrakeOpen => "BRAKE_OPEN".to_string(),
            RobotMode::Disabled => "DISABLED".to_string(),
            RobotMode::Enable => "ENABLE".to_string(),
            RobotMode::Backdrive => "BACKDRIVE".to_string(),
            RobotMode::Running => "RUNNING".to_string(),
            RobotMode::Recording => "RECORDING".to_string(),
            RobotMode::Error => "ERROR".to_string(),
            RobotMode::Pause => "PAUSE".to_string(),
            RobotMode::Jog => "JOG".to_string(),
            RobotMode::Unknown(raw) => format!("UNKNOWN({})", raw),
        }
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tool pose in SI units: meters and radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { x, y, z, roll, pitch, yaw }
    }

    /// Planar pose as used by the 4-axis motion commands.
    pub fn planar(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self::new(x, y, z, 0.0, 0.0, yaw)
    }

    /// Build from a controller vector `[x, y, z, rx, ry, rz]` in millimeters and degrees.
    pub fn from_controller(raw: &[f64; 6]) -> Self {
        Self {
            x: mm_to_m(raw[0]),
            y: mm_to_m(raw[1]),
            z: mm_to_m(raw[2]),
            roll: deg_to_rad(raw[3]),
            pitch: deg_to_rad(raw[4]),
            yaw: deg_to_rad(raw[5]),
        }
    }

    /// Inverse of [`Pose::from_controller`].
    pub fn to_controller(&self) -> [f64; 6] {
        [
            m_to_mm(self.x),
            m_to_mm(self.y),
            m_to_mm(self.z),
            rad_to_deg(self.roll),
            rad_to_deg(self.pitch),
            rad_to_deg(self.yaw),
        ]
    }

    /// Orientation as a unit quaternion `[x, y, z, w]` (fixed-axis roll, pitch, yaw).
    pub fn quaternion(&self) -> [f64; 4] {
        let (sr, cr) = (self.roll * 0.5).sin_cos();
        let (sp, cp) = (self.pitch * 0.5).sin_cos();
        let (sy, cy) = (self.yaw * 0.5).sin_cos();

        [
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
            cr * cp * cy + sr * sp * sy,
        ]
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Shortest signed difference between two angles, in (-pi, pi].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut d = (a - b) % two_pi;
    if d > std::f64::consts::PI {
        d -= two_pi;
    } else if d <= -std::f64::consts::PI {
        d += two_pi;
    }
    d
}

/// Digital output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalLevel {
    Low,
    High,
}

impl DigitalLevel {
    pub fn raw(self) -> i64 {
        match self {
            DigitalLevel::Low => 0,
            DigitalLevel::High => 1,
        }
    }
}

impl From<bool> for DigitalLevel {
    fn from(high: bool) -> Self {
        if high {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

/// Bounded small integer argument, validated at construction.
macro_rules! bounded_index {
    ($(#[$meta:meta])* $name:ident, $min:expr, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(u8);

        impl $name {
            pub const MIN: u8 = $min;
            pub const MAX: u8 = $max;

            pub fn new(value: u8) -> Result<Self> {
                if (Self::MIN..=Self::MAX).contains(&value) {
                    Ok(Self(value))
                } else {
                    Err(Mg400Error::InvalidArgument(format!(
                        "{} must be within {}..={}, got {}",
                        stringify!($name), Self::MIN, Self::MAX, value
                    )))
                }
            }

            pub fn raw(self) -> i64 {
                self.0 as i64
            }
        }
    };
}

bounded_index!(
    /// User coordinate system index.
    UserFrame, 0, 9
);
bounded_index!(
    /// Tool coordinate system index.
    ToolFrame, 0, 9
);
bounded_index!(
    /// Collision detection sensitivity; 0 disables detection.
    CollisionLevel, 0, 5
);
bounded_index!(DoIndex, 1, 16);
bounded_index!(DiIndex, 1, 16);
bounded_index!(ToolDoIndex, 1, 2);
bounded_index!(AoIndex, 1, 2);
bounded_index!(ArchIndex, 0, 9);

/// Axis selector for `MoveJog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogAxis {
    J1Positive,
    J1Negative,
    J2Positive,
    J2Negative,
    J3Positive,
    J3Negative,
    J4Positive,
    J4Negative,
    XPositive,
    XNegative,
    YPositive,
    YNegative,
    ZPositive,
    ZNegative,
    RPositive,
    RNegative,
}

impl JogAxis {
    pub fn wire_name(self) -> &'static str {
        match self {
            JogAxis::J1Positive => "J1+",
            JogAxis::J1Negative => "J1-",
            JogAxis::J2Positive => "J2+",
            JogAxis::J2Negative => "J2-",
            JogAxis::J3Positive => "J3+",
            JogAxis::J3Negative => "J3-",
            JogAxis::J4Positive => "J4+",
            JogAxis::J4Negative => "J4-",
            JogAxis::XPositive => "X+",
            JogAxis::XNegative => "X-",
            JogAxis::YPositive => "Y+",
            JogAxis::YNegative => "Y-",
            JogAxis::ZPositive => "Z+",
            JogAxis::ZNegative => "Z-",
            JogAxis::RPositive => "R+",
            JogAxis::RNegative => "R-",
        }
    }
}

impl std::str::FromStr for JogAxis {
    type Err = Mg400Error;

    fn from_str(s: &str) -> Result<Self> {
        const ALL: [JogAxis; 16] = [
            JogAxis::J1Positive, JogAxis::J1Negative, JogAxis::J2Positive, JogAxis::J2Negative,
            JogAxis::J3Positive, JogAxis::J3Negative, JogAxis::J4Positive, JogAxis::J4Negative,
            JogAxis::XPositive, JogAxis::XNegative, JogAxis::YPositive, JogAxis::YNegative,
            JogAxis::ZPositive, JogAxis::ZNegative, JogAxis::RPositive, JogAxis::RNegative,
        ];
        ALL.iter()
            .copied()
            .find(|axis| axis.wire_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Mg400Error::InvalidArgument(format!("Unknown jog axis '{}'", s)))
    }
}
