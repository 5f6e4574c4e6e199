//! JSON-based Robot Monitoring
//!
//! Provides JSON-lines output for robot state monitoring with dynamic
//! output based on change detection and publication rate limiting.

use crate::interface::FaultReport;
use crate::robot::{Pose, RobotMode, ARM_JOINTS};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// System time as fractional Unix seconds.
pub fn system_time() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Joint angles and tool pose from the realtime cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointStateData {
    /// Unix time when the daemon sampled the cache
    pub stime: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Joint angles in radians [j1, j2, j3, j4]
    pub joint_positions: [f64; ARM_JOINTS],
    /// Tool pose [x, y, z, roll, pitch, yaw] in meters and radians
    pub tcp_pose: [f64; 6],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotModeData {
    pub stime: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub robot_mode: i64,
    pub robot_mode_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEntry {
    pub joint: usize,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultData {
    pub stime: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub faults: Vec<FaultEntry>,
}

fn round_to(value: f64, decimal_places: u32) -> f64 {
    let multiplier = 10.0_f64.powi(decimal_places as i32);
    (value * multiplier).round() / multiplier
}

impl JointStateData {
    pub fn new_rounded(joints: [f64; ARM_JOINTS], pose: &Pose, stime: f64, decimal_places: u32) -> Self {
        let tcp = [pose.x, pose.y, pose.z, pose.roll, pose.pitch, pose.yaw];
        Self {
            stime,
            event_type: "joint_state".to_string(),
            joint_positions: joints.map(|v| round_to(v, decimal_places)),
            tcp_pose: tcp.map(|v| round_to(v, decimal_places)),
        }
    }
}

impl RobotModeData {
    pub fn new(mode: RobotMode, stime: f64) -> Self {
        Self {
            stime,
            event_type: "robot_mode".to_string(),
            robot_mode: mode.raw(),
            robot_mode_name: mode.name(),
        }
    }
}

impl FaultData {
    pub fn from_report(report: &FaultReport, stime: f64) -> Self {
        Self {
            stime,
            event_type: "fault".to_string(),
            faults: report
                .faults
                .iter()
                .map(|f| FaultEntry {
                    joint: f.joint,
                    id: f.id,
                    description: f.description.clone(),
                })
                .collect(),
        }
    }
}

/// Monitor output manager that handles dynamic output and rate limiting
pub struct MonitorOutput {
    last_joint_state: Option<([f64; ARM_JOINTS], [f64; 6])>,
    last_robot_mode: Option<RobotMode>,
    last_fault_ids: Option<Vec<(usize, i64)>>,
    last_joint_state_output: Option<Instant>,
    /// Maximum joint_state events per second
    pub_rate_hz: u32,
    /// 1 mm or 0.001 rad
    position_threshold: f64,
    dynamic_mode: bool,
    pub decimal_places: u32,
}

impl MonitorOutput {
    pub fn new(pub_rate_hz: u32, dynamic_mode: bool, decimal_places: u32) -> Self {
        Self {
            last_joint_state: None,
            last_robot_mode: None,
            last_fault_ids: None,
            last_joint_state_output: None,
            pub_rate_hz: pub_rate_hz.max(1),
            position_threshold: 0.001,
            dynamic_mode,
            decimal_places,
        }
    }

    /// Rate limited, and in dynamic mode suppressed unless something moved.
    pub fn should_output_joint_state(&mut self, joints: [f64; ARM_JOINTS], pose: &Pose) -> bool {
        let now = Instant::now();

        if let Some(last_output) = self.last_joint_state_output {
            let min_interval = Duration::from_millis(1000 / self.pub_rate_hz as u64);
            if now.duration_since(last_output) < min_interval {
                return false;
            }
        }

        let tcp = [pose.x, pose.y, pose.z, pose.roll, pose.pitch, pose.yaw];
        if self.dynamic_mode {
            if let Some((last_joints, last_tcp)) = &self.last_joint_state {
                if !self.changed(last_joints, &joints) && !self.changed(last_tcp, &tcp) {
                    return false;
                }
            }
        }

        self.last_joint_state = Some((joints, tcp));
        self.last_joint_state_output = Some(now);
        true
    }

    /// Never rate limited, only change detection
    pub fn should_output_robot_mode(&mut self, mode: RobotMode) -> bool {
        if self.dynamic_mode && self.last_robot_mode == Some(mode) {
            return false;
        }
        self.last_robot_mode = Some(mode);
        true
    }

    /// Emits when the set of active fault ids changes, including when it clears.
    pub fn should_output_fault(&mut self, report: &FaultReport) -> bool {
        let ids: Vec<(usize, i64)> = report.faults.iter().map(|f| (f.joint, f.id)).collect();
        match &self.last_fault_ids {
            Some(last) if self.dynamic_mode && *last == ids => false,
            None if ids.is_empty() => {
                self.last_fault_ids = Some(ids);
                false
            }
            _ => {
                self.last_fault_ids = Some(ids);
                true
            }
        }
    }

    fn changed(&self, old: &[f64], new: &[f64]) -> bool {
        old.iter()
            .zip(new.iter())
            .any(|(o, n)| (o - n).abs() > self.position_threshold)
    }

    /// Joint state line with a fixed number of decimals on every value.
    pub fn format_joint_state(&self, data: &JointStateData) -> String {
        let fixed = |values: &[f64]| -> String {
            values
                .iter()
                .map(|&v| format!("{:.prec$}", v, prec = self.decimal_places as usize))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            r#"{{"stime":{:.6},"type":"{}","joint_positions":[{}],"tcp_pose":[{}]}}"#,
            data.stime,
            data.event_type,
            fixed(&data.joint_positions),
            fixed(&data.tcp_pose)
        )
    }

    pub fn output_joint_state(&self, data: &JointStateData) {
        println!("{}", self.format_joint_state(data));
    }

    pub fn output_robot_mode(&self, data: &RobotModeData) {
        if let Ok(json) = serde_json::to_string(data) {
            println!("{}", json);
        }
    }

    pub fn output_fault(&self, data: &FaultData) {
        if let Ok(json) = serde_json::to_string(data) {
            println!("{}", json);
        }
    }
}
